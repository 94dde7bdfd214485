//! Response payloads and the uniform response envelope.
//!
//! # Design
//! Only the fields the client relies on are typed; everything else CouchDB
//! returns is kept in `extra` maps so nothing is silently lost. Documents
//! themselves stay generic (`serde_json::Value` or any `DeserializeOwned`).

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Envelope every async operation resolves to.
#[derive(Debug, Clone, PartialEq)]
pub struct Response<T> {
    pub data: T,
    pub headers: Vec<(String, String)>,
    pub status: u16,
}

impl<T> Response<T> {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Response<U> {
        Response {
            data: f(self.data),
            headers: self.headers,
            status: self.status,
        }
    }
}

/// `{"ok":true,"id":...,"rev":...}` returned by document writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentInfo {
    pub id: String,
    pub rev: String,
}

/// CouchDB's `{"error":..,"reason":..}` failure body.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub(crate) struct ErrorBody {
    #[serde(default)]
    pub error: String,
    #[serde(default)]
    pub reason: String,
}

/// `GET /` welcome document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub couchdb: String,
    pub version: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// `GET /{db}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseInfo {
    pub db_name: String,
    #[serde(default)]
    pub doc_count: u64,
    #[serde(default)]
    pub doc_del_count: u64,
    #[serde(default)]
    pub update_seq: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Result of `POST /{db}/_find`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FindResult<T = Value> {
    pub docs: Vec<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bookmark: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// Result of calling a design-document update function.
///
/// Update functions may answer with any body; JSON bodies are parsed, other
/// bodies are returned as a JSON string.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateFunctionResult {
    pub body: Value,
    /// `X-Couch-Id`, when the function wrote a document.
    pub doc_id: Option<String>,
    /// `X-Couch-Update-NewRev`, when the function wrote a document.
    pub rev: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UuidList {
    pub uuids: Vec<String>,
}
