//! Convergence layers carry the GET, PUBLISH and SEARCH operations over a transport.
//!
//! The HTTP layer answers every call synchronously. The UDP layer only sends, and answers
//! arrive later on the channels mounted on it.
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::name::Name;

/// Synchronous request/response over HTTP.
pub mod http;

/// Best effort multicast over UDP.
pub mod udp;

/// Multipart bodies for HTTP requests and responses.
pub mod multipart;

pub mod nrs;

pub const PROTOCOL_VERSION: &str = "NetInf-0.1";

/// The outcome of an operation on a convergence layer.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply<T> {
    /// The peer answered.
    Received(T),
    /// The request went out; any answer arrives asynchronously.
    Dispatched,
}

impl<T> Reply<T> {
    pub fn received(self) -> Option<T> {
        match self {
            Reply::Received(v) => Some(v),
            Reply::Dispatched => None,
        }
    }
}

/// Metadata part of a GET or PUBLISH answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMeta {
    #[serde(default)]
    pub protocol_version: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub msg_id: String,
    #[serde(default)]
    pub full_object: bool,
    #[serde(default = "default_status")]
    pub status: u16,
    #[serde(default)]
    pub locators: Vec<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

fn default_status() -> u16 {
    200
}

impl ResponseMeta {
    pub fn new(name: &Name, msg_id: &str) -> ResponseMeta {
        ResponseMeta {
            protocol_version: PROTOCOL_VERSION.to_string(),
            name: name.to_wire_string(),
            msg_id: msg_id.to_string(),
            full_object: false,
            status: default_status(),
            locators: vec![],
            metadata: serde_json::Map::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Object {
    pub content_type: String,
    pub octets: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GetResponse {
    pub meta: ResponseMeta,
    /// Present when the peer sent the full object, absent for a locators-only answer.
    pub object: Option<Object>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub name: String,
    #[serde(default)]
    pub locator: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResults {
    #[serde(default)]
    pub protocol_version: String,
    #[serde(default)]
    pub msg_id: String,
    #[serde(default = "default_status")]
    pub status: u16,
    #[serde(default)]
    pub results: Vec<SearchResult>,
}

/// A transport binding for the NetInf operations.
///
/// `dest` and `next_hop` are `host[:port]` or a base url, as the binding expects.
pub trait ConvergenceLayer: Send + Sync {
    /// Scheme of the route destinations this layer serves, e.g. `nihttp`.
    fn scheme(&self) -> &str;

    fn get(&self, name: &Name, msg_id: &str, next_hop: Option<&str>) -> Result<Reply<GetResponse>, Error>;

    fn publish_object(
        &self,
        name: &Name,
        octets: &[u8],
        content_type: Option<&str>,
        dest: &str,
        msg_id: &str,
    ) -> Result<Reply<ResponseMeta>, Error>;

    fn publish_locators(&self, name: &Name, locators: &[String], dest: &str, msg_id: &str) -> Result<Reply<ResponseMeta>, Error>;

    fn search(&self, dest: &str, msg_id: &str, tokens: &str) -> Result<Reply<SearchResults>, Error>;
}

/// A fresh message id.
pub fn new_msg_id() -> String {
    rand::random::<u32>().to_string()
}
