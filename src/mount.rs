//! Candidate locations derived from a name by templates.
//!
//! A template is literal text with `{field}` placeholders. The fields are the parts of a
//! name:
//!
//! * `{algorithm}`, or `{algo}` for short - the hash algorithm id, e.g. `sha-256`.
//! * `{digest}` - the base64url digest.
//! * `{authority}` - the authority of the name.
//! * `{query}` - the query string with its `?`, or nothing.
//! * `{loc}` and `{ct}` - the locator and content type hints from the query.
//!
//! `{{` and `}}` stand for literal braces. If a name lacks the authority or a hint that
//! a template asks for, the template gives no candidate for that name.
//!
//! ``` ignore,
//! http://{authority}/.well-known/ni/{algorithm}/{digest}{query}
//! file:///var/ni/media/{ct}/{algorithm}/{digest}
//! {loc}
//! ```
use std::fmt;

use log::debug;
use url::Url;

use crate::error::Error;
use crate::name::Name;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Algorithm,
    Digest,
    Authority,
    Query,
    Locator,
    ContentType,
}

impl Field {
    fn from_token(s: &str) -> Option<Field> {
        match s {
            "algorithm" | "algo" => Some(Field::Algorithm),
            "digest" => Some(Field::Digest),
            "authority" => Some(Field::Authority),
            "query" => Some(Field::Query),
            "loc" => Some(Field::Locator),
            "ct" => Some(Field::ContentType),
            _ => None,
        }
    }

    fn value(&self, name: &Name) -> Option<String> {
        match self {
            Field::Algorithm => Some(name.algorithm().id().to_string()),
            Field::Digest => Some(name.digest_base64url()),
            Field::Authority => name.authority().map(String::from),
            Field::Query => Some(name.query_part()),
            Field::Locator => name.locator().map(String::from),
            Field::ContentType => name.content_type().map(String::from),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Field(Field),
}

/// A compiled mount template.
#[derive(Debug, Clone)]
pub struct MountTransform {
    source: String,
    segments: Vec<Segment>,
}

impl MountTransform {
    pub fn parse(template: &str) -> Result<MountTransform, Error> {
        let invalid = |reason: &str| Error::InvalidTemplate {
            template: template.to_string(),
            reason: reason.to_string(),
        };

        let mut segments = vec![];
        let mut literal = String::new();
        let mut chars = template.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                },
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                },
                '{' => {
                    let mut token = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some(c) => token.push(c),
                            None => return Err(invalid("unclosed '{'")),
                        }
                    }
                    let field = Field::from_token(token.trim())
                        .ok_or_else(|| invalid(&format!("unknown field '{}'", token)))?;
                    if !literal.is_empty() {
                        segments.push(Segment::Literal(std::mem::take(&mut literal)));
                    }
                    segments.push(Segment::Field(field));
                },
                '}' => return Err(invalid("unmatched '}'")),
                _ => literal.push(c),
            }
        }
        if !literal.is_empty() {
            segments.push(Segment::Literal(literal));
        }
        Ok(MountTransform {
            source: template.to_string(),
            segments,
        })
    }

    /// Expand the template for the name. `None` if the name lacks a field it needs.
    pub fn evaluate(&self, name: &Name) -> Option<String> {
        let mut s = String::new();
        for seg in self.segments.iter() {
            match seg {
                Segment::Literal(v) => s.push_str(v),
                Segment::Field(f) => s.push_str(&f.value(name)?),
            }
        }
        Some(s)
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

impl fmt::Display for MountTransform {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.write_str(&self.source)
    }
}

#[derive(Debug, Default)]
pub struct MountTable {
    transforms: Vec<MountTransform>,
}

impl MountTable {
    pub fn new() -> MountTable {
        MountTable::default()
    }

    pub fn add_transform(&mut self, template: &str) -> Result<(), Error> {
        let t = MountTransform::parse(template)?;
        debug!("mounting {}", t);
        self.transforms.push(t);
        Ok(())
    }

    /// Candidate locations for the name, in registration order.
    pub fn resolve<'a>(&'a self, name: &'a Name) -> impl Iterator<Item = Url> + 'a {
        self.transforms.iter().filter_map(move |t| {
            let s = t.evaluate(name)?;
            if s.is_empty() {
                return None;
            }
            match Url::parse(&s) {
                Ok(u) => Some(u),
                Err(e) => {
                    debug!("mount {} gave unusable '{}': {}", t, s, e);
                    None
                },
            }
        })
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }
}
