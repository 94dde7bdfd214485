//! Error types for the CouchDB client.
//!
//! # Design
//! Protocol-level failures share one `CouchError::Api` variant carrying a
//! machine-readable `ErrorCode`, the HTTP status (absent for failures raised
//! before any request is sent) and the raw response body. Each endpoint has
//! its own legal status space, so the mapping lives next to the endpoint in
//! `client.rs`; this module only defines the vocabulary.
//!
//! Transport failures (DNS, refused connections, timeouts) are kept in their
//! own `TransportError` type and surface unchanged through
//! `CouchError::Transport`.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Short machine-readable failure codes callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Database already exists (412 on create).
    DatabaseExists,
    /// Database does not exist.
    DatabaseMissing,
    /// Document, view or attachment does not exist.
    DocumentMissing,
    /// Design document addressed by an update function does not exist.
    DesignDocumentMissing,
    /// Revision mismatch.
    Conflict,
    /// Caller lacks the required privileges.
    Unauthorized,
    /// Server rejected the request as malformed.
    BadRequest,
    /// Status code outside the endpoint's known table.
    UnknownStatus,
    /// A required document field was absent; raised before any request.
    FieldMissing,
    /// Server did not identify itself in a recognisable way.
    ServerNotSupported,
    /// Server identified itself with a major version that is too old.
    ServerTooOld,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::DatabaseExists => "EDBEXISTS",
            ErrorCode::DatabaseMissing => "EDBMISSING",
            ErrorCode::DocumentMissing => "EDOCMISSING",
            ErrorCode::DesignDocumentMissing => "EDDOCMISSING",
            ErrorCode::Conflict => "EDOCCONFLICT",
            ErrorCode::Unauthorized => "EUNAUTHORIZED",
            ErrorCode::BadRequest => "EBADREQUEST",
            ErrorCode::UnknownStatus => "EUNKNOWN",
            ErrorCode::FieldMissing => "EFIELDMISSING",
            ErrorCode::ServerNotSupported => "ENOTSUPPORTED",
            ErrorCode::ServerTooOld => "EVERSIONTOOOLD",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure to complete an HTTP exchange at all.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("reading response body failed: {0}")]
    Body(String),
}

/// Errors returned by client operations.
#[derive(Debug, Error)]
pub enum CouchError {
    /// The server answered, but not with a status the operation accepts;
    /// or a precondition failed locally.
    #[error("{code}: {message}")]
    Api {
        code: ErrorCode,
        status: Option<u16>,
        message: String,
        body: String,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The request payload could not be serialized to JSON.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// The response body could not be deserialized into the expected type.
    #[error("deserialization failed: {0}")]
    Deserialization(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl CouchError {
    pub(crate) fn api(code: ErrorCode, status: Option<u16>, message: impl Into<String>, body: impl Into<String>) -> Self {
        CouchError::Api {
            code,
            status,
            message: message.into(),
            body: body.into(),
        }
    }

    /// The protocol-level code, if this is an `Api` error.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            CouchError::Api { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// The HTTP status that produced this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            CouchError::Api { status, .. } => *status,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_displays_code_and_message() {
        let err = CouchError::api(ErrorCode::DatabaseExists, Some(412), "database already exists", "{}");
        assert_eq!(err.to_string(), "EDBEXISTS: database already exists");
        assert_eq!(err.code(), Some(ErrorCode::DatabaseExists));
        assert_eq!(err.status(), Some(412));
    }

    #[test]
    fn transport_errors_pass_through_unchanged() {
        let err: CouchError = TransportError::Timeout(Duration::from_millis(250)).into();
        assert!(matches!(err, CouchError::Transport(TransportError::Timeout(d)) if d == Duration::from_millis(250)));
        assert_eq!(err.to_string(), "request timed out after 250ms");
        assert_eq!(err.code(), None);
        assert_eq!(err.status(), None);
    }
}
