//! The closed set of hash suites a [Name](crate::name::Name) may carry.
//!
//! Truncated suites hash with SHA-256 and keep the first bytes of the output. Only byte
//! aligned truncation lengths exist, so every digest length is a whole number of bytes.
use std::fmt;
use std::str::FromStr;

use sha2::{Digest, Sha256, Sha384, Sha512};

use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Algorithm {
    Sha256,
    Sha384,
    Sha512,
    Sha256Trunc128,
    Sha256Trunc120,
    Sha256Trunc96,
    Sha256Trunc64,
    Sha256Trunc32,
}

/// Registry order used when matching a textual id at the start of a string.
///
/// `sha-256` is a prefix of every truncated id, so the longer ids come first.
pub const MATCH_ORDER: [Algorithm; 8] = [
    Algorithm::Sha256Trunc128,
    Algorithm::Sha256Trunc120,
    Algorithm::Sha256Trunc96,
    Algorithm::Sha256Trunc64,
    Algorithm::Sha256Trunc32,
    Algorithm::Sha256,
    Algorithm::Sha384,
    Algorithm::Sha512,
];

impl Algorithm {
    pub fn id(&self) -> &'static str {
        match self {
            Algorithm::Sha256 => "sha-256",
            Algorithm::Sha384 => "sha-384",
            Algorithm::Sha512 => "sha-512",
            Algorithm::Sha256Trunc128 => "sha-256-128",
            Algorithm::Sha256Trunc120 => "sha-256-120",
            Algorithm::Sha256Trunc96 => "sha-256-96",
            Algorithm::Sha256Trunc64 => "sha-256-64",
            Algorithm::Sha256Trunc32 => "sha-256-32",
        }
    }

    /// Suite id for the binary and human readable encodings.
    ///
    /// 1 to 6 are the registered NI suites. SHA-384 and SHA-512 have no registered suite
    /// and use 7 and 8 locally.
    pub fn suite_id(&self) -> u8 {
        match self {
            Algorithm::Sha256 => 1,
            Algorithm::Sha256Trunc128 => 2,
            Algorithm::Sha256Trunc120 => 3,
            Algorithm::Sha256Trunc96 => 4,
            Algorithm::Sha256Trunc64 => 5,
            Algorithm::Sha256Trunc32 => 6,
            Algorithm::Sha384 => 7,
            Algorithm::Sha512 => 8,
        }
    }

    pub fn from_suite_id(id: u8) -> Option<Algorithm> {
        MATCH_ORDER.iter().copied().find(|a| a.suite_id() == id)
    }

    /// True for the suites registered for the NI binary format.
    pub fn is_registered_suite(&self) -> bool {
        self.suite_id() <= 6
    }

    /// Digest output length in bytes.
    pub fn digest_len(&self) -> usize {
        match self {
            Algorithm::Sha256 => 32,
            Algorithm::Sha384 => 48,
            Algorithm::Sha512 => 64,
            Algorithm::Sha256Trunc128 => 16,
            Algorithm::Sha256Trunc120 => 15,
            Algorithm::Sha256Trunc96 => 12,
            Algorithm::Sha256Trunc64 => 8,
            Algorithm::Sha256Trunc32 => 4,
        }
    }

    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        match self {
            Algorithm::Sha384 => Sha384::digest(data).to_vec(),
            Algorithm::Sha512 => Sha512::digest(data).to_vec(),
            _ => {
                let mut v = Sha256::digest(data).to_vec();
                v.truncate(self.digest_len());
                v
            },
        }
    }

    /// Match the registry id the string starts with.
    ///
    /// Returns the algorithm and the remainder of the string after the id.
    pub fn match_prefix(s: &str) -> Option<(Algorithm, &str)> {
        for a in MATCH_ORDER.iter() {
            if let Some(rest) = s.strip_prefix(a.id()) {
                return Some((*a, rest));
            }
        }
        None
    }
}

impl Default for Algorithm {
    fn default() -> Algorithm {
        Algorithm::Sha256
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str(self.id())
    }
}

impl FromStr for Algorithm {
    type Err = Error;

    /// Accepts a textual id or a decimal suite id.
    fn from_str(s: &str) -> Result<Algorithm, Error> {
        if let Ok(n) = s.parse::<u8>() {
            return Algorithm::from_suite_id(n).ok_or_else(|| Error::UnknownAlgorithm(s.to_string()));
        }
        MATCH_ORDER
            .iter()
            .copied()
            .find(|a| a.id() == s)
            .ok_or_else(|| Error::UnknownAlgorithm(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::{Algorithm, MATCH_ORDER};
    use std::str::FromStr;

    #[test]
    fn test_digest_lengths() {
        for a in MATCH_ORDER.iter() {
            assert_eq!(a.digest(b"foo").len(), a.digest_len(), "{}", a);
        }
    }

    #[test]
    fn test_truncation_is_prefix() {
        let full = Algorithm::Sha256.digest(b"foo");
        for a in [
            Algorithm::Sha256Trunc128,
            Algorithm::Sha256Trunc120,
            Algorithm::Sha256Trunc96,
            Algorithm::Sha256Trunc64,
            Algorithm::Sha256Trunc32,
        ] {
            let d = a.digest(b"foo");
            assert_eq!(d.len(), a.digest_len());
            assert_eq!(&full[..d.len()], &d[..]);
        }
    }

    #[test]
    fn test_sha256_known_value() {
        let d = Algorithm::Sha256.digest(b"foo");
        assert_eq!(hex::encode(d), "2c26b46b68ffc68ff99b453c1d30413413422d706483bfa0f98a5e886266e7ae");
    }

    #[test]
    fn test_match_prefix_prefers_longest() {
        let (a, rest) = Algorithm::match_prefix("sha-256-128;abc").unwrap();
        assert_eq!(a, Algorithm::Sha256Trunc128);
        assert_eq!(rest, ";abc");

        let (a, rest) = Algorithm::match_prefix("sha-256;abc").unwrap();
        assert_eq!(a, Algorithm::Sha256);
        assert_eq!(rest, ";abc");

        assert!(Algorithm::match_prefix("md5;abc").is_none());
    }

    #[test]
    fn test_from_str() {
        assert_eq!(Algorithm::from_str("sha-256-32").unwrap(), Algorithm::Sha256Trunc32);
        assert_eq!(Algorithm::from_str("3").unwrap(), Algorithm::Sha256Trunc120);
        assert!(Algorithm::from_str("0").is_err());
        assert!(Algorithm::from_str("sha-1").is_err());
    }
}
