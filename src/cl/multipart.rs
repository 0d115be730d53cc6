use std::io::{self, Read};
use std::str::FromStr;

use futures::executor::block_on;
use futures::stream;
use mime::Mime;
use ::multipart::client::lazy::Multipart;

use crate::error::Error;

/// One part of a multipart answer.
#[derive(Debug, Clone, PartialEq)]
pub struct Part {
    /// The `name` of a `form-data` disposition, if the part has one.
    pub name: Option<String>,
    pub content_type: Option<Mime>,
    pub body: Vec<u8>,
}

/// A `multipart/form-data` request body, as for an HTML form upload.
pub struct FormData<'d> {
    inner: Multipart<'static, 'd>,
}

impl<'d> FormData<'d> {
    pub fn new() -> FormData<'d> {
        FormData {
            inner: Multipart::new(),
        }
    }

    pub fn text(mut self, name: &str, value: &str) -> FormData<'d> {
        self.inner.add_text(name.to_string(), value.to_string());
        self
    }

    pub fn file(mut self, name: &str, filename: &str, content_type: &str, data: &'d [u8]) -> FormData<'d> {
        let ct = Mime::from_str(content_type).unwrap_or(mime::APPLICATION_OCTET_STREAM);
        self.inner.add_stream(name.to_string(), data, Some(filename.to_string()), Some(ct));
        self
    }

    /// Close the body, returning its content type header value and the octets.
    pub fn finish(mut self) -> Result<(String, Vec<u8>), Error> {
        let mut prepared = self.inner.prepare().map_err(|e| e.error)?;
        let content_type = format!("multipart/form-data; boundary={}", prepared.boundary());
        let mut body = vec![];
        prepared.read_to_end(&mut body)?;
        Ok((content_type, body))
    }
}

impl<'d> Default for FormData<'d> {
    fn default() -> FormData<'d> {
        FormData::new()
    }
}

/// The boundary of a multipart content type, if it is one.
pub fn boundary(content_type: &str) -> Option<String> {
    let m = Mime::from_str(content_type).ok()?;
    if m.type_() != mime::MULTIPART {
        return None;
    }
    m.get_param(mime::BOUNDARY).map(|b| b.as_str().to_string())
}

/// Split a multipart body of any subtype into its parts.
pub fn parse(body: &[u8], boundary: &str) -> Result<Vec<Part>, Error> {
    let malformed = |e: multer::Error| Error::Unreachable(format!("malformed multipart body: {}", e));
    let chunks = stream::iter(vec![Ok::<Vec<u8>, io::Error>(body.to_vec())]);
    let mut reader = multer::Multipart::new(chunks, boundary);
    block_on(async {
        let mut parts = vec![];
        while let Some(field) = reader.next_field().await.map_err(malformed)? {
            let name = field.name().map(String::from);
            let content_type = field.content_type().cloned();
            let body = field.bytes().await.map_err(malformed)?;
            parts.push(Part {
                name,
                content_type,
                body: body.to_vec(),
            });
        }
        Ok(parts)
    })
}
