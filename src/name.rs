//! Self-certifying names for content.
//!
//! A name binds a hash algorithm to the digest of the content it names. Two surface
//! syntaxes are understood:
//!
//! ``` ignore,
//! ni://example.com/sha-256;LCa0a2j_xo_5m0U8HTBBNBNCLXBkg7-g-YpeiGJm564?ct=text/plain
//! nih:1;2c26b46b68ffc68ff99b453c1d30413413422d706483bfa0f98a5e886266e7ae;d
//! ```
//!
//! The authority and query parts are presentation hints. Identity is the algorithm and
//! the digest alone.
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use log::debug;

use crate::algo::Algorithm;
use crate::encode::{from_base64url, from_hex, luhn16, to_base64url};
use crate::error::Error;

pub const SCHEME_NI: &str = "ni";
pub const SCHEME_NIH: &str = "nih";

/// Query key carrying a locator hint.
pub const PARAM_LOCATOR: &str = "loc";
/// Query key carrying a content type hint.
pub const PARAM_CONTENT_TYPE: &str = "ct";

#[derive(Clone)]
pub struct Name {
    algorithm: Algorithm,
    digest: Vec<u8>,
    authority: Option<String>,
    query: Vec<(String, String)>,
}

impl Name {
    /// Build a name from a digest that was computed elsewhere.
    pub fn new(algorithm: Algorithm, digest: Vec<u8>, authority: Option<String>) -> Result<Name, Error> {
        if digest.len() != algorithm.digest_len() {
            return Err(Error::MalformedName(format!(
                "{} digest must be {} bytes, got {}",
                algorithm,
                algorithm.digest_len(),
                digest.len()
            )));
        }
        Ok(Name {
            algorithm,
            digest,
            authority: authority.filter(|a| !a.is_empty()),
            query: vec![],
        })
    }

    /// Name the given content.
    pub fn from_content(authority: Option<&str>, data: &[u8], algorithm: Algorithm) -> Name {
        Name {
            algorithm,
            digest: algorithm.digest(data),
            authority: authority.filter(|a| !a.is_empty()).map(String::from),
            query: vec![],
        }
    }

    /// Parse either an `ni` or an `nih` string.
    pub fn parse(s: &str) -> Result<Name, Error> {
        let s = s.trim();
        match s.split_once(':') {
            Some((scheme, rest)) if scheme.eq_ignore_ascii_case(SCHEME_NI) => Name::parse_ni(rest),
            Some((scheme, rest)) if scheme.eq_ignore_ascii_case(SCHEME_NIH) => Name::parse_nih(rest),
            _ => Err(Error::MalformedName(format!("'{}' is not an ni or nih uri", s))),
        }
    }

    fn parse_ni(rest: &str) -> Result<Name, Error> {
        let (authority, path_query) = match rest.strip_prefix("//") {
            Some(v) => match v.split_once('/') {
                Some((auth, p)) => (Some(auth.to_string()), p),
                None => return Err(Error::MalformedName(format!("no path in 'ni:{}'", rest))),
            },
            None => (None, rest.trim_start_matches('/')),
        };
        let (path, query) = match path_query.split_once('?') {
            Some((p, q)) => (p, Some(q)),
            None => (path_query, None),
        };

        let (algorithm, tail) = Algorithm::match_prefix(path)
            .ok_or_else(|| Error::MalformedName(format!("no known hash algorithm in '{}'", path)))?;
        let digest_b64 = tail
            .strip_prefix(';')
            .ok_or_else(|| Error::MalformedName(format!("expected ';' after algorithm in '{}'", path)))?;
        let digest = from_base64url(digest_b64)?;

        let mut name = Name::new(algorithm, digest, authority)?;
        if let Some(q) = query {
            name.query = parse_query(q);
        }
        Ok(name)
    }

    fn parse_nih(rest: &str) -> Result<Name, Error> {
        let mut fields = rest.trim_start_matches('/').split(';');
        let algo_field = fields.next().unwrap_or_default();
        let algorithm = Algorithm::from_str(algo_field)
            .map_err(|e| Error::MalformedName(format!("nih:{}: {}", rest, e)))?;
        let hex_field = fields
            .next()
            .ok_or_else(|| Error::MalformedName(format!("no digest in 'nih:{}'", rest)))?;
        let digest = from_hex(hex_field)?;

        if let Some(check) = fields.next() {
            let clean: String = hex_field.chars().filter(|c| *c != '-').collect::<String>().to_ascii_lowercase();
            let expected = luhn16(&clean)
                .ok_or_else(|| Error::MalformedName(format!("bad hex digest '{}'", hex_field)))?;
            let mut actual = check.chars();
            let ok = match (actual.next(), actual.next()) {
                (Some(c), None) => c.to_ascii_lowercase() == expected,
                _ => false,
            };
            if !ok {
                debug!("nih checksum error: expected '{}', got '{}'", expected, check);
                return Err(Error::MalformedChecksum {
                    expected,
                    actual: check.to_string(),
                });
            }
        }

        Name::new(algorithm, digest, None)
    }

    /// Decode the binary form: one suite byte followed by the digest.
    pub fn from_binary(data: &[u8]) -> Result<Name, Error> {
        let (first, digest) = data
            .split_first()
            .ok_or_else(|| Error::MalformedName(String::from("empty binary name")))?;
        let suite = first & 0x3f;
        let algorithm = Algorithm::from_suite_id(suite)
            .ok_or_else(|| Error::MalformedName(format!("unknown suite id {}", suite)))?;
        Name::new(algorithm, digest.to_vec(), None)
    }

    pub fn to_binary(&self) -> Vec<u8> {
        let mut v = Vec::with_capacity(1 + self.digest.len());
        v.push(self.algorithm.suite_id() & 0x3f);
        v.extend_from_slice(&self.digest);
        v
    }

    /// `{algorithm};{digest}` as it appears in the path of an `ni` uri.
    pub fn url_segment(&self) -> String {
        format!("{};{}", self.algorithm, self.digest_base64url())
    }

    pub fn to_wire_string(&self) -> String {
        format!(
            "{}://{}/{}{}",
            SCHEME_NI,
            self.authority.as_deref().unwrap_or(""),
            self.url_segment(),
            self.query_part()
        )
    }

    pub fn to_human_readable(&self) -> String {
        let suite = if self.algorithm.is_registered_suite() {
            self.algorithm.suite_id().to_string()
        } else {
            self.algorithm.id().to_string()
        };
        let hex_digest = hex::encode(&self.digest);
        // hex::encode only emits hex digits
        let check = luhn16(&hex_digest).unwrap_or('0');
        format!("{}:{};{};{}", SCHEME_NIH, suite, hex_digest, check)
    }

    pub fn to_well_known_url(&self) -> String {
        format!(
            "http://{}/.well-known/ni/{}/{}{}",
            self.authority.as_deref().unwrap_or(""),
            self.algorithm,
            self.digest_base64url(),
            self.query_part()
        )
    }

    /// Check that the data hashes to this name.
    pub fn verify(&self, data: &[u8]) -> bool {
        self.algorithm.digest(data) == self.digest
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn digest(&self) -> &[u8] {
        &self.digest
    }

    pub fn digest_base64url(&self) -> String {
        to_base64url(&self.digest)
    }

    pub fn authority(&self) -> Option<&str> {
        self.authority.as_deref()
    }

    pub fn query(&self) -> &[(String, String)] {
        &self.query
    }

    /// The query string with its leading `?`, or an empty string.
    pub fn query_part(&self) -> String {
        if self.query.is_empty() {
            return String::new();
        }
        let pairs: Vec<String> = self.query.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        format!("?{}", pairs.join("&"))
    }

    /// First value recorded for the key.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.query.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn locator(&self) -> Option<&str> {
        self.param(PARAM_LOCATOR)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.param(PARAM_CONTENT_TYPE)
    }

    pub fn with_authority(mut self, authority: &str) -> Name {
        self.authority = Some(authority.to_string()).filter(|a| !a.is_empty());
        self
    }

    pub fn with_param(mut self, key: &str, value: &str) -> Name {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    pub fn with_locator(self, locator: &str) -> Name {
        self.with_param(PARAM_LOCATOR, locator)
    }

    pub fn with_content_type(self, content_type: &str) -> Name {
        self.with_param(PARAM_CONTENT_TYPE, content_type)
    }

    /// Same identity, no authority and no query.
    pub fn bare(&self) -> Name {
        Name {
            algorithm: self.algorithm,
            digest: self.digest.clone(),
            authority: None,
            query: vec![],
        }
    }
}

fn parse_query(q: &str) -> Vec<(String, String)> {
    q.split('&')
        .filter(|p| !p.is_empty())
        .map(|p| match p.split_once('=') {
            Some((k, v)) => (k.to_string(), v.to_string()),
            None => (p.to_string(), String::new()),
        })
        .collect()
}

impl PartialEq for Name {
    fn eq(&self, other: &Name) -> bool {
        self.algorithm == other.algorithm && self.digest == other.digest
    }
}

impl Eq for Name {}

impl Hash for Name {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.algorithm.hash(state);
        self.digest.hash(state);
    }
}

impl FromStr for Name {
    type Err = Error;

    fn from_str(s: &str) -> Result<Name, Error> {
        Name::parse(s)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str(&self.to_wire_string())
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(fmt, "Name({})", self.to_wire_string())
    }
}
