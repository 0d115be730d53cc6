//! Digest encodings used by `ni` and `nih` names.
use crate::error::Error;

/// Encode bytes as base64url, without padding.
pub fn to_base64url(data: &[u8]) -> String {
    base64::encode_config(data, base64::URL_SAFE_NO_PAD)
}

/// Decode unpadded base64url.
///
/// The url safe alphabet is mapped back to the standard one and the padding restored
/// before decoding.
pub fn from_base64url(s: &str) -> Result<Vec<u8>, Error> {
    let mut std_b64: String = s
        .chars()
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            _ => c,
        })
        .collect();
    while std_b64.len() % 4 != 0 {
        std_b64.push('=');
    }
    base64::decode(&std_b64).map_err(|e| Error::MalformedName(format!("bad base64url digest '{}': {}", s, e)))
}

/// Decode a hex digest, ignoring `-` group separators.
pub fn from_hex(s: &str) -> Result<Vec<u8>, Error> {
    let clean: String = s.chars().filter(|c| *c != '-').collect();
    hex::decode(clean.to_ascii_lowercase()).map_err(|e| Error::MalformedName(format!("bad hex digest '{}': {}", s, e)))
}

/// Mod-16 Luhn check digit over a hex string.
///
/// Returns `None` if the string holds a character that is not a hex digit.
pub fn luhn16(s: &str) -> Option<char> {
    let n = 16;
    let mut factor = 2;
    let mut sum = 0;
    for c in s.chars().rev() {
        let code_point = c.to_digit(n)?;
        let mut addend = factor * code_point;
        factor = if factor == 2 { 1 } else { 2 };
        addend = (addend / n) + (addend % n);
        sum += addend;
    }
    let remainder = sum % n;
    let check = (n - remainder) % n;
    std::char::from_digit(check, n)
}

#[cfg(test)]
mod tests {
    use super::{from_base64url, from_hex, luhn16, to_base64url};

    #[test]
    fn test_base64url_alphabet() {
        let data = vec![0xfb, 0xff, 0xbf];
        let s = to_base64url(&data);
        assert_eq!(s, "-_-_");
        assert_eq!(from_base64url(&s).unwrap(), data);
    }

    #[test]
    fn test_base64url_restores_padding() {
        let s = to_base64url(b"fo");
        assert!(!s.contains('='));
        assert_eq!(from_base64url(&s).unwrap(), b"fo".to_vec());
    }

    #[test]
    fn test_base64url_bogus() {
        assert!(from_base64url("a").is_err());
        assert!(from_base64url("ab*d").is_err());
    }

    #[test]
    fn test_hex_separators() {
        assert_eq!(from_hex("dead-BEEF").unwrap(), vec![0xde, 0xad, 0xbe, 0xef]);
        assert!(from_hex("xyz").is_err());
    }

    #[test]
    fn test_luhn16() {
        // reverse "0f": 'f' doubled to 30 -> 1 + 14 = 15, '0' -> 0; (16 - 15) % 16 = 1
        assert_eq!(luhn16("0f"), Some('1'));
        assert_eq!(luhn16(""), Some('0'));
        assert_eq!(luhn16("zz"), None);
    }

    #[test]
    fn test_luhn16_detects_single_digit_change() {
        let a = luhn16("53c234e5e8472b6ac51c1ae1cab3fe06fad053beb8ebfd8977b010655bfdd3c3").unwrap();
        let b = luhn16("53c234e5e8472b6ac51c1ae1cab3fe06fad053beb8ebfd8977b010655bfdd3c4").unwrap();
        assert_ne!(a, b);
    }
}
