use log::debug;

use crate::name::Name;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Good,
    Bad,
}

/// Decides whether octets really are the object a name refers to.
pub trait IntegrityChecker: Send + Sync {
    fn verify(&self, name: &Name, octets: &[u8]) -> Verdict;
}

/// Recomputes the digest of the octets with the algorithm of the name.
#[derive(Debug, Default, Clone, Copy)]
pub struct DigestChecker;

impl IntegrityChecker for DigestChecker {
    fn verify(&self, name: &Name, octets: &[u8]) -> Verdict {
        if name.verify(octets) {
            Verdict::Good
        } else {
            debug!("digest mismatch for {} over {} bytes", name, octets.len());
            Verdict::Bad
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{DigestChecker, IntegrityChecker, Verdict};
    use crate::algo::{Algorithm, MATCH_ORDER};
    use crate::name::Name;

    #[test]
    fn test_digest_checker() {
        let checker = DigestChecker;
        for a in MATCH_ORDER.iter() {
            let n = Name::from_content(Some("example.com"), b"foo", *a);
            assert_eq!(checker.verify(&n, b"foo"), Verdict::Good);
            assert_eq!(checker.verify(&n, b"bar"), Verdict::Bad);
        }
        let n = Name::from_content(None, b"", Algorithm::Sha256Trunc32);
        assert_eq!(checker.verify(&n, b""), Verdict::Good);
    }
}
