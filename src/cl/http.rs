use std::io::Read;
use std::str::FromStr;
use std::time::Duration;

use log::{debug, info};
use mime::Mime;
use ureq::{Agent, AgentBuilder};

use crate::cl::multipart::{self, FormData};
use crate::cl::nrs::NrsClient;
use crate::cl::{ConvergenceLayer, GetResponse, Object, Reply, ResponseMeta, SearchResults};
use crate::error::{from_ureq, Error};
use crate::name::Name;

pub const SCHEME: &str = "nihttp";

const NO_EXTENSION: &str = "no extension";

#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Applied to every request; the protocol itself has no timeouts.
    pub timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> HttpConfig {
        HttpConfig {
            timeout: Duration::from_secs(30),
        }
    }
}

/// The NetInf operations as blocking HTTP POSTs to `/netinfproto/{get,publish,search}`.
///
/// Failures are returned as they happen; retrying is up to the caller.
pub struct HttpConvergence {
    agent: Agent,
}

pub(crate) fn endpoint(dest: &str, op: &str) -> String {
    if dest.contains("://") {
        format!("{}/netinfproto/{}", dest.trim_end_matches('/'), op)
    } else {
        format!("http://{}/netinfproto/{}", dest, op)
    }
}

pub(crate) fn read_body(res: ureq::Response) -> Result<(String, Vec<u8>), Error> {
    let content_type = res.header("Content-Type").unwrap_or("").to_string();
    let mut data = vec![];
    res.into_reader().read_to_end(&mut data)?;
    Ok((content_type, data))
}

fn check_status(meta: &ResponseMeta) -> Result<(), Error> {
    match meta.status {
        404 => Err(Error::NotFound(meta.name.clone())),
        s if s >= 400 => Err(Error::Unreachable(format!("peer reported status {} for {}", s, meta.name))),
        _ => Ok(()),
    }
}

/// Decode a GET or PUBLISH answer: plain JSON metadata, or a multipart body holding the
/// metadata and the object.
pub fn decode_response(content_type: &str, body: &[u8]) -> Result<GetResponse, Error> {
    if let Some(b) = multipart::boundary(content_type) {
        let parts = multipart::parse(body, &b)?;
        let mut meta: Option<ResponseMeta> = None;
        let mut object: Option<Object> = None;
        for p in parts {
            let ct = p.content_type;
            let is_json = ct.as_ref().map(|m| m.essence_str() == "application/json").unwrap_or(false);
            if is_json && meta.is_none() {
                meta = Some(serde_json::from_slice(&p.body).map_err(|e| Error::Unreachable(format!("bad metadata part: {}", e)))?);
            } else if object.is_none() {
                object = Some(Object {
                    content_type: ct
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| mime::APPLICATION_OCTET_STREAM.to_string()),
                    octets: p.body,
                });
            }
        }
        let meta = meta.ok_or_else(|| Error::Unreachable(String::from("multipart answer without metadata")))?;
        check_status(&meta)?;
        return Ok(GetResponse {
            meta,
            object,
        });
    }

    match Mime::from_str(content_type) {
        Ok(m) if m.essence_str() == "application/json" => {
            let meta: ResponseMeta = serde_json::from_slice(body).map_err(|e| Error::Unreachable(format!("bad metadata: {}", e)))?;
            check_status(&meta)?;
            Ok(GetResponse {
                meta,
                object: None,
            })
        },
        _ => Err(Error::Unreachable(format!("unexpected answer of type '{}'", content_type))),
    }
}

impl HttpConvergence {
    pub fn new(config: &HttpConfig) -> HttpConvergence {
        let agent = AgentBuilder::new().timeout(config.timeout).build();
        HttpConvergence {
            agent,
        }
    }

    /// A name resolution service client sharing this layer's agent.
    pub fn nrs(&self, server: &str) -> NrsClient {
        NrsClient::with_agent(server, self.agent.clone())
    }

    fn post_form(&self, url: &str, fields: &[(&str, &str)]) -> Result<(String, Vec<u8>), Error> {
        debug!("POST {} {:?}", url, fields);
        let res = self.agent.post(url).send_form(fields).map_err(|e| from_ureq(e, url))?;
        read_body(res)
    }

    fn post_multipart(&self, url: &str, content_type: &str, body: &[u8]) -> Result<(String, Vec<u8>), Error> {
        debug!("POST {} multipart {} bytes", url, body.len());
        let res = self
            .agent
            .post(url)
            .set("Content-Type", content_type)
            .send_bytes(body)
            .map_err(|e| from_ureq(e, url))?;
        read_body(res)
    }

    /// GET with locator hints for the peer, sent as a JSON list.
    pub fn get_with_hints(&self, name: &Name, msg_id: &str, hints: &[String], next_hop: Option<&str>) -> Result<GetResponse, Error> {
        let host = match next_hop.or_else(|| name.authority()) {
            Some(v) => v,
            None => {
                return Err(Error::Unreachable(format!("no next hop and no authority for {}", name)));
            },
        };
        let url = endpoint(host, "get");
        let wire = name.to_wire_string();
        let hints_json = serde_json::to_string(hints)?;
        let mut fields = vec![("URI", wire.as_str()), ("msgid", msg_id), ("ext", NO_EXTENSION)];
        if !hints.is_empty() {
            fields.push(("hints", hints_json.as_str()));
        }
        let (ct, body) = self.post_form(&url, &fields)?;
        let res = decode_response(&ct, &body)?;
        info!(
            "get {} via {}: {}",
            name,
            host,
            if res.object.is_some() { "object" } else { "locators" }
        );
        Ok(res)
    }

    fn publish(&self, form: FormData, dest: &str) -> Result<ResponseMeta, Error> {
        let url = endpoint(dest, "publish");
        let (ct, body) = form.finish()?;
        let (res_ct, res_body) = self.post_multipart(&url, &ct, &body)?;
        Ok(decode_response(&res_ct, &res_body)?.meta)
    }
}

impl ConvergenceLayer for HttpConvergence {
    fn scheme(&self) -> &str {
        SCHEME
    }

    fn get(&self, name: &Name, msg_id: &str, next_hop: Option<&str>) -> Result<Reply<GetResponse>, Error> {
        self.get_with_hints(name, msg_id, &[], next_hop).map(Reply::Received)
    }

    fn publish_object(
        &self,
        name: &Name,
        octets: &[u8],
        content_type: Option<&str>,
        dest: &str,
        msg_id: &str,
    ) -> Result<Reply<ResponseMeta>, Error> {
        let ct = content_type
            .or_else(|| name.content_type())
            .unwrap_or("application/octet-stream");
        let form = FormData::new()
            .text("URI", &name.to_wire_string())
            .text("msgid", msg_id)
            .text("ext", NO_EXTENSION)
            .text("fullPut", "yes")
            .text("rform", "json")
            .file("octets", &name.digest_base64url(), ct, octets);
        info!("publishing {} ({} bytes) to {}", name, octets.len(), dest);
        self.publish(form, dest).map(Reply::Received)
    }

    fn publish_locators(&self, name: &Name, locators: &[String], dest: &str, msg_id: &str) -> Result<Reply<ResponseMeta>, Error> {
        if locators.is_empty() {
            return Err(Error::Unsupported(format!("nothing to publish for {}", name)));
        }
        let mut form = FormData::new()
            .text("URI", &name.to_wire_string())
            .text("msgid", msg_id)
            .text("ext", NO_EXTENSION)
            .text("fullPut", "no")
            .text("rform", "json");
        for (i, l) in locators.iter().enumerate() {
            form = form.text(&format!("loc{}", i + 1), l);
        }
        info!("publishing {} locators for {} to {}", locators.len(), name, dest);
        self.publish(form, dest).map(Reply::Received)
    }

    fn search(&self, dest: &str, msg_id: &str, tokens: &str) -> Result<Reply<SearchResults>, Error> {
        let url = endpoint(dest, "search");
        let (ct, body) = self.post_form(&url, &[("tokens", tokens), ("msgid", msg_id), ("ext", NO_EXTENSION), ("rform", "json")])?;
        let is_json = Mime::from_str(&ct)
            .map(|m| m.essence_str() == "application/json")
            .unwrap_or(false);
        if !is_json {
            return Err(Error::Unreachable(format!("unexpected search answer of type '{}'", ct)));
        }
        let results: SearchResults = serde_json::from_slice(&body).map_err(|e| Error::Unreachable(format!("bad search answer: {}", e)))?;
        debug!("search '{}' at {}: {} results", tokens, dest, results.results.len());
        Ok(Reply::Received(results))
    }
}

#[cfg(test)]
mod tests {
    use std::thread::sleep;
    use std::time::Duration;

    use super::{endpoint, HttpConfig, HttpConvergence};
    use crate::algo::Algorithm;
    use crate::cl::multipart;
    use crate::cl::{ConvergenceLayer, ResponseMeta, SearchResult, SearchResults};
    use crate::error::Error;
    use crate::name::Name;
    use crate::testutil;

    fn cl() -> HttpConvergence {
        HttpConvergence::new(&HttpConfig {
            timeout: Duration::from_secs(5),
        })
    }

    #[test]
    fn test_endpoint() {
        assert_eq!(endpoint("example.com", "get"), "http://example.com/netinfproto/get");
        assert_eq!(endpoint("http://localhost:8080/", "search"), "http://localhost:8080/netinfproto/search");
    }

    #[test]
    fn test_get_multipart_object() {
        let host = testutil::serve(1, |mut req| {
            assert_eq!(req.url(), "/netinfproto/get");
            let fields = testutil::form(&testutil::body(&mut req));
            let uri = testutil::field(&fields, "URI").unwrap().to_string();
            let msg_id = testutil::field(&fields, "msgid").unwrap().to_string();

            let name = Name::parse(&uri).unwrap();
            let mut meta = ResponseMeta::new(&name, &msg_id);
            meta.full_object = true;
            meta.locators.push(String::from("http://example.com/foo"));
            let mut body = b"--netinf-b0\r\nContent-Type: application/json\r\n\r\n".to_vec();
            body.extend_from_slice(&serde_json::to_vec(&meta).unwrap());
            body.extend_from_slice(b"\r\n--netinf-b0\r\nContent-Type: text/plain\r\nContent-Disposition: inline\r\n\r\nfoo\r\n--netinf-b0--\r\n");
            testutil::respond(req, 200, "multipart/mixed; boundary=netinf-b0", body);
        });

        let n = Name::from_content(Some("example.com"), b"foo", Algorithm::Sha256);
        let res = cl().get(&n, "123", Some(&host)).unwrap().received().unwrap();
        assert_eq!(res.meta.msg_id, "123");
        assert!(res.meta.full_object);
        assert_eq!(res.meta.locators, vec![String::from("http://example.com/foo")]);
        let object = res.object.unwrap();
        assert_eq!(object.content_type, "text/plain");
        assert_eq!(object.octets, b"foo".to_vec());
        assert!(n.verify(&object.octets));
    }

    #[test]
    fn test_get_json_locators_with_hints() {
        let host = testutil::serve(1, |mut req| {
            let fields = testutil::form(&testutil::body(&mut req));
            assert_eq!(testutil::field(&fields, "hints"), Some(r#"["http://hint/one"]"#));
            let name = Name::parse(testutil::field(&fields, "URI").unwrap()).unwrap();
            let mut meta = ResponseMeta::new(&name, "1");
            meta.locators.push(String::from("http://elsewhere/foo"));
            testutil::respond(req, 200, "application/json", serde_json::to_vec(&meta).unwrap());
        });

        let n = Name::from_content(None, b"foo", Algorithm::Sha256);
        let res = cl()
            .get_with_hints(&n, "1", &[String::from("http://hint/one")], Some(&host))
            .unwrap();
        assert!(res.object.is_none());
        assert_eq!(res.meta.locators.len(), 1);
    }

    #[test]
    fn test_get_without_hop() {
        let n = Name::from_content(None, b"foo", Algorithm::Sha256);
        match cl().get(&n, "1", None) {
            Err(Error::Unreachable(_)) => {},
            other => panic!("expected unreachable, got {:?}", other),
        }
    }

    #[test]
    fn test_get_error_status() {
        let host = testutil::serve(1, |req| {
            testutil::respond(req, 500, "text/plain", b"broken".to_vec());
        });
        let n = Name::from_content(None, b"foo", Algorithm::Sha256);
        match cl().get(&n, "1", Some(&host)) {
            Err(Error::Unreachable(_)) => {},
            other => panic!("expected unreachable, got {:?}", other),
        }
    }

    #[test]
    fn test_get_not_found_in_meta() {
        let host = testutil::serve(1, |req| {
            let n = Name::from_content(None, b"foo", Algorithm::Sha256);
            let mut meta = ResponseMeta::new(&n, "1");
            meta.status = 404;
            testutil::respond(req, 200, "application/json", serde_json::to_vec(&meta).unwrap());
        });
        let n = Name::from_content(None, b"foo", Algorithm::Sha256);
        match cl().get(&n, "1", Some(&host)) {
            Err(Error::NotFound(_)) => {},
            other => panic!("expected not found, got {:?}", other),
        }
    }

    #[test]
    fn test_get_unparsable() {
        let host = testutil::serve(1, |req| {
            testutil::respond(req, 200, "text/html", b"<html></html>".to_vec());
        });
        let n = Name::from_content(None, b"foo", Algorithm::Sha256);
        assert!(matches!(cl().get(&n, "1", Some(&host)), Err(Error::Unreachable(_))));
    }

    #[test]
    fn test_get_timeout() {
        let host = testutil::serve(1, |req| {
            sleep(Duration::from_millis(1500));
            drop(req);
        });
        let short = HttpConvergence::new(&HttpConfig {
            timeout: Duration::from_millis(200),
        });
        let n = Name::from_content(None, b"foo", Algorithm::Sha256);
        let e = short.get(&n, "1", Some(&host)).unwrap_err();
        assert!(matches!(e, Error::Timeout(_)), "{:?}", e);
        assert!(e.is_transient());
    }

    #[test]
    fn test_publish_object() {
        let host = testutil::serve(1, |mut req| {
            assert_eq!(req.url(), "/netinfproto/publish");
            let ct = testutil::header(&req, "Content-Type").unwrap();
            let body = testutil::body(&mut req);
            let parts = multipart::parse(&body, &multipart::boundary(&ct).unwrap()).unwrap();
            let field = |n: &str| parts.iter().find(|p| p.name.as_deref() == Some(n)).map(|p| p.body.clone());
            assert_eq!(field("fullPut").unwrap(), b"yes".to_vec());
            assert_eq!(field("octets").unwrap(), b"foo".to_vec());
            let name = Name::parse(&String::from_utf8(field("URI").unwrap()).unwrap()).unwrap();
            let msg_id = String::from_utf8(field("msgid").unwrap()).unwrap();
            let mut meta = ResponseMeta::new(&name, &msg_id);
            meta.status = 201;
            testutil::respond(req, 200, "application/json", serde_json::to_vec(&meta).unwrap());
        });

        let n = Name::from_content(Some("example.com"), b"foo", Algorithm::Sha256);
        let meta = cl()
            .publish_object(&n, b"foo", Some("text/plain"), &host, "9")
            .unwrap()
            .received()
            .unwrap();
        assert_eq!(meta.status, 201);
        assert_eq!(meta.msg_id, "9");
    }

    #[test]
    fn test_publish_locators() {
        let host = testutil::serve(1, |mut req| {
            let ct = testutil::header(&req, "Content-Type").unwrap();
            let body = testutil::body(&mut req);
            let parts = multipart::parse(&body, &multipart::boundary(&ct).unwrap()).unwrap();
            let names: Vec<&str> = parts.iter().filter_map(|p| p.name.as_deref()).collect();
            assert!(names.contains(&"loc1"));
            assert!(names.contains(&"loc2"));
            assert!(!names.contains(&"octets"));
            let n = Name::from_content(None, b"foo", Algorithm::Sha256);
            testutil::respond(req, 200, "application/json", serde_json::to_vec(&ResponseMeta::new(&n, "2")).unwrap());
        });

        let n = Name::from_content(None, b"foo", Algorithm::Sha256);
        let locs = vec![String::from("http://a/foo"), String::from("http://b/foo")];
        assert!(cl().publish_locators(&n, &locs, &host, "2").is_ok());
        assert!(matches!(cl().publish_locators(&n, &[], &host, "2"), Err(Error::Unsupported(_))));
    }

    #[test]
    fn test_search() {
        let host = testutil::serve(1, |mut req| {
            let fields = testutil::form(&testutil::body(&mut req));
            assert_eq!(testutil::field(&fields, "tokens"), Some("cat pictures"));
            let res = SearchResults {
                protocol_version: String::from(crate::cl::PROTOCOL_VERSION),
                msg_id: String::from(testutil::field(&fields, "msgid").unwrap()),
                status: 200,
                results: vec![SearchResult {
                    name: String::from("ni:///sha-256;LCa0a2j_xo_5m0U8HTBBNBNCLXBkg7-g-YpeiGJm564"),
                    locator: String::from("http://example.com/cat.jpg"),
                    description: String::from("a cat"),
                }],
            };
            testutil::respond(req, 200, "application/json", serde_json::to_vec(&res).unwrap());
        });

        let res = cl().search(&host, "5", "cat pictures").unwrap().received().unwrap();
        assert_eq!(res.msg_id, "5");
        assert_eq!(res.results.len(), 1);
        assert_eq!(res.results[0].description, "a cat");
    }
}
