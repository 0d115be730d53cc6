use std::io::Read;
use std::thread;

use tiny_http::{Header, Request, Response, Server, StatusCode};

/// Serve `n` requests on a loopback port, returning `host:port`.
pub fn serve<F>(n: usize, f: F) -> String
where
    F: Fn(Request) + Send + 'static,
{
    let server = Server::http("127.0.0.1:0").unwrap();
    let port = server.server_addr().port();
    thread::spawn(move || {
        for _ in 0..n {
            match server.recv() {
                Ok(req) => f(req),
                Err(_) => break,
            }
        }
    });
    format!("127.0.0.1:{}", port)
}

pub fn body(req: &mut Request) -> Vec<u8> {
    let mut v = vec![];
    req.as_reader().read_to_end(&mut v).unwrap();
    v
}

pub fn header(req: &Request, field: &'static str) -> Option<String> {
    req.headers()
        .iter()
        .find(|h| h.field.equiv(field))
        .map(|h| h.value.as_str().to_string())
}

pub fn respond(req: Request, status: u16, content_type: &str, data: Vec<u8>) {
    let h = Header::from_bytes(&b"Content-Type"[..], content_type.as_bytes()).unwrap();
    let res = Response::from_data(data).with_status_code(StatusCode(status)).with_header(h);
    req.respond(res).unwrap();
}

/// Decode an `application/x-www-form-urlencoded` body.
pub fn form(data: &[u8]) -> Vec<(String, String)> {
    url::form_urlencoded::parse(data).into_owned().collect()
}

pub fn field<'a>(fields: &'a [(String, String)], key: &str) -> Option<&'a str> {
    fields.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
}
