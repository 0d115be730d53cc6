//! Client for a name resolution service (NRS).
//!
//! An NRS keeps routing hints and locators under a key, which is either the wire form of a
//! name or an authority. All operations are form POSTs to `/netinfproto/rr`, told apart by
//! the `stage` field:
//!
//! ``` ignore,
//! stage=zero  URI=<key> hint1=<hint> [hint2=<hint>]   register
//! stage=one   URI=<key>                               lookup
//! stage=two                                           list all entries
//! ```
//!
//! Hints are next hops, `host[:port]` or a url.
use std::collections::BTreeMap;

use log::{debug, info, warn};
use serde::Deserialize;
use serde_json::Value;
use ureq::{Agent, AgentBuilder};
use url::Url;

use crate::cl::http::{endpoint, read_body, HttpConfig, SCHEME};
use crate::error::{from_ureq, Error};
use crate::name::Name;
use crate::routing::Pattern;

pub const OPERATION: &str = "rr";

/// Hints one entry can hold.
pub const MAX_HINTS: usize = 2;

const STAGE_REGISTER: &str = "zero";
const STAGE_LOOKUP: &str = "one";
const STAGE_LIST: &str = "two";

// Servers answer with `loc` or `locs`, and fill unset slots with null.
#[derive(Debug, Default, Deserialize)]
struct WireEntry {
    #[serde(default)]
    ni: Option<String>,
    #[serde(default)]
    hints: Vec<Option<String>>,
    #[serde(default, alias = "loc")]
    locs: Vec<Option<String>>,
    #[serde(default)]
    meta: Value,
}

/// What the service holds for one key.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(from = "WireEntry")]
pub struct NrsEntry {
    pub key: Option<String>,
    pub hints: Vec<String>,
    pub locators: Vec<String>,
    pub meta: Option<String>,
}

fn present(v: Vec<Option<String>>) -> Vec<String> {
    v.into_iter().flatten().filter(|s| !s.is_empty()).collect()
}

impl From<WireEntry> for NrsEntry {
    fn from(w: WireEntry) -> NrsEntry {
        let meta = match w.meta {
            Value::String(s) => Some(s),
            Value::Array(a) => a.into_iter().find_map(|v| v.as_str().map(String::from)),
            _ => None,
        };
        NrsEntry {
            key: w.ni,
            hints: present(w.hints),
            locators: present(w.locs),
            meta,
        }
    }
}

/// The route destination for a hint. A bare `host[:port]` is reached over http.
pub fn hint_destination(hint: &str) -> Result<Url, Error> {
    let s = if hint.contains("://") { hint.to_string() } else { format!("{}://{}", SCHEME, hint) };
    Url::parse(&s).map_err(|e| Error::Unsupported(format!("bad routing hint '{}': {}", hint, e)))
}

impl NrsEntry {
    /// Route destinations for the hints, skipping any that do not make a url.
    pub fn destinations(&self) -> Vec<Url> {
        self.hints
            .iter()
            .filter_map(|h| match hint_destination(h) {
                Ok(v) => Some(v),
                Err(e) => {
                    warn!("{}", e);
                    None
                },
            })
            .collect()
    }
}

/// The routing pattern covered by an NRS key: one name, or every name under an authority.
pub fn key_pattern(key: &str) -> Result<Pattern, Error> {
    if key.starts_with("ni:") || key.starts_with("nih:") {
        return Ok(Pattern::Exact(Name::parse(key)?.to_wire_string()));
    }
    if key.is_empty() || key.contains('/') {
        return Err(Error::Unsupported(format!("nrs key '{}' is neither a name nor an authority", key)));
    }
    Pattern::regex(&format!("^ni://{}/", regex::escape(key)))
}

#[derive(Debug, Deserialize)]
struct Listing {
    #[serde(default)]
    results: BTreeMap<String, NrsEntry>,
}

pub struct NrsClient {
    agent: Agent,
    server: String,
}

impl NrsClient {
    /// `server` is `host[:port]` or a base url of the service.
    pub fn new(server: &str, config: &HttpConfig) -> NrsClient {
        let agent = AgentBuilder::new().timeout(config.timeout).build();
        NrsClient::with_agent(server, agent)
    }

    pub(crate) fn with_agent(server: &str, agent: Agent) -> NrsClient {
        NrsClient {
            agent,
            server: server.to_string(),
        }
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    fn post<T: serde::de::DeserializeOwned>(&self, what: &str, fields: &[(&str, &str)]) -> Result<T, Error> {
        let url = endpoint(&self.server, OPERATION);
        debug!("POST {} {:?}", url, fields);
        let res = match self.agent.post(&url).send_form(fields) {
            Ok(v) => v,
            Err(ureq::Error::Status(404, _)) => return Err(Error::NotFound(what.to_string())),
            Err(e) => return Err(from_ureq(e, &url)),
        };
        let (_, body) = read_body(res)?;
        serde_json::from_slice(&body).map_err(|e| Error::Unreachable(format!("bad nrs answer for {}: {}", what, e)))
    }

    /// Store routing hints under the key, replacing those given before.
    pub fn register(&self, key: &str, hints: &[String]) -> Result<NrsEntry, Error> {
        if hints.is_empty() {
            return Err(Error::Unsupported(format!("no hints to register for {}", key)));
        }
        if hints.len() > MAX_HINTS {
            return Err(Error::Unsupported(format!("{} hints for {}, at most {} fit", hints.len(), key, MAX_HINTS)));
        }
        let names: Vec<String> = (1..=hints.len()).map(|i| format!("hint{}", i)).collect();
        let mut fields = vec![("stage", STAGE_REGISTER), ("URI", key)];
        for (n, h) in names.iter().zip(hints.iter()) {
            fields.push((n.as_str(), h.as_str()));
        }
        let entry: NrsEntry = self.post(key, &fields)?;
        info!("registered {} hints for {} at {}", hints.len(), key, self.server);
        Ok(entry)
    }

    /// Everything held for the key.
    pub fn entry(&self, key: &str) -> Result<NrsEntry, Error> {
        self.post(key, &[("stage", STAGE_LOOKUP), ("URI", key)])
    }

    /// Route destinations for the key. A key without hints is not found.
    pub fn lookup(&self, key: &str) -> Result<Vec<Url>, Error> {
        let destinations = self.entry(key)?.destinations();
        if destinations.is_empty() {
            return Err(Error::NotFound(key.to_string()));
        }
        debug!("nrs {} gave {} next hops for {}", self.server, destinations.len(), key);
        Ok(destinations)
    }

    /// All entries, by key.
    pub fn list(&self) -> Result<BTreeMap<String, NrsEntry>, Error> {
        let listing: Listing = self.post("nrs listing", &[("stage", STAGE_LIST)])?;
        Ok(listing.results)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use url::Url;

    use super::{hint_destination, key_pattern, NrsClient};
    use crate::algo::Algorithm;
    use crate::cl::http::HttpConfig;
    use crate::error::Error;
    use crate::name::Name;
    use crate::routing::Pattern;
    use crate::testutil;

    fn client(host: &str) -> NrsClient {
        NrsClient::new(
            host,
            &HttpConfig {
                timeout: Duration::from_secs(5),
            },
        )
    }

    #[test]
    fn test_register() {
        let host = testutil::serve(1, |mut req| {
            assert_eq!(req.url(), "/netinfproto/rr");
            let fields = testutil::form(&testutil::body(&mut req));
            assert_eq!(testutil::field(&fields, "stage"), Some("zero"));
            assert_eq!(testutil::field(&fields, "URI"), Some("example.com"));
            assert_eq!(testutil::field(&fields, "hint1"), Some("village.n4c.eu"));
            assert_eq!(testutil::field(&fields, "hint2"), Some("tcd.ie:8080"));
            let answer = r#"{"Netinf": "v0.1a", "ni": "example.com", "ts": "2012-06-01T10:00:00+00:00",
                "loc": [null, null], "hints": ["village.n4c.eu", "tcd.ie:8080"], "meta": [null]}"#;
            testutil::respond(req, 200, "application/json", answer.as_bytes().to_vec());
        });

        let hints = vec![String::from("village.n4c.eu"), String::from("tcd.ie:8080")];
        let entry = client(&host).register("example.com", &hints).unwrap();
        assert_eq!(entry.key.as_deref(), Some("example.com"));
        assert_eq!(entry.hints, hints);
        assert!(entry.locators.is_empty());
        assert_eq!(entry.meta, None);
    }

    #[test]
    fn test_register_needs_hints() {
        let c = client("127.0.0.1:1");
        assert!(matches!(c.register("example.com", &[]), Err(Error::Unsupported(_))));
        let three: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        assert!(matches!(c.register("example.com", &three), Err(Error::Unsupported(_))));
    }

    #[test]
    fn test_lookup() {
        let host = testutil::serve(1, |mut req| {
            let fields = testutil::form(&testutil::body(&mut req));
            assert_eq!(testutil::field(&fields, "stage"), Some("one"));
            let answer = r#"{"hints": ["village.n4c.eu", "nihttp://tcd.ie:8080"], "locs": ["http://a/x"], "meta": "test"}"#;
            testutil::respond(req, 200, "application/json", answer.as_bytes().to_vec());
        });
        let hops = client(&host).lookup("example.com").unwrap();
        assert_eq!(
            hops,
            vec![
                Url::parse("nihttp://village.n4c.eu").unwrap(),
                Url::parse("nihttp://tcd.ie:8080").unwrap()
            ]
        );
    }

    #[test]
    fn test_lookup_missing() {
        let host = testutil::serve(1, |req| {
            testutil::respond(req, 404, "text/plain", b"No entry".to_vec());
        });
        assert!(matches!(client(&host).lookup("example.com"), Err(Error::NotFound(_))));

        let empty = testutil::serve(1, |req| {
            testutil::respond(req, 200, "application/json", br#"{"hints": [null, null]}"#.to_vec());
        });
        assert!(matches!(client(&empty).lookup("example.com"), Err(Error::NotFound(_))));
    }

    #[test]
    fn test_list() {
        let host = testutil::serve(1, |mut req| {
            let fields = testutil::form(&testutil::body(&mut req));
            assert_eq!(testutil::field(&fields, "stage"), Some("two"));
            let answer = r#"{"pattern": "*", "results": {
                "example.com": {"hints": ["village.n4c.eu"], "locs": [], "meta": null},
                "ietf.org": {"hints": [], "locs": ["http://ietf.org/x"], "meta": null}}}"#;
            testutil::respond(req, 200, "application/json", answer.as_bytes().to_vec());
        });
        let all = client(&host).list().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all["example.com"].hints, vec![String::from("village.n4c.eu")]);
        assert_eq!(all["ietf.org"].locators, vec![String::from("http://ietf.org/x")]);
    }

    #[test]
    fn test_bad_answer() {
        let host = testutil::serve(1, |req| {
            testutil::respond(req, 200, "text/html", b"<html></html>".to_vec());
        });
        assert!(matches!(client(&host).entry("example.com"), Err(Error::Unreachable(_))));
    }

    #[test]
    fn test_key_pattern() {
        let n = Name::from_content(Some("example.com"), b"foo", Algorithm::Sha256);
        let other = Name::from_content(Some("example.org"), b"foo", Algorithm::Sha256);

        let p = key_pattern("example.com").unwrap();
        assert!(matches!(p, Pattern::Regex(_)));
        assert!(p.matches(&n.to_wire_string()));
        assert!(!p.matches(&other.to_wire_string()));

        let exact = key_pattern(&n.to_wire_string()).unwrap();
        assert!(exact.matches(&n.to_wire_string()));
        assert!(!exact.matches(&other.to_wire_string()));

        assert!(key_pattern("").is_err());
        assert!(key_pattern("http://x/y").is_err());
        assert!(hint_destination("village.n4c.eu:8080").is_ok());
    }
}
