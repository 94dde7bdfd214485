//! CouchDB HTTP API client with an optional ETag response cache.
//!
//! # Overview
//! Two layers:
//! - `CouchClient` builds `HttpRequest` values and parses `HttpResponse`
//!   values without touching the network (host-does-IO pattern), so it can
//!   be driven by any HTTP stack.
//! - `Couch` is the async client most callers want. It runs `CouchClient`
//!   requests through a `Dispatcher` that adds conditional GETs against a
//!   pluggable `ResponseCache`, and exposes the continuous change feed as a
//!   `Stream`.
//!
//! # Design
//! - Protocol failures are `CouchError::Api` values carrying an `ErrorCode`
//!   plus the status and raw body; transport failures pass through unchanged.
//! - The cache collaborator owns its storage and eviction; the client only
//!   reads before GETs and writes after 200s, in the background.
//! - No retries anywhere.

pub mod cache;
pub mod changes;
pub mod client;
pub mod config;
pub mod couch;
pub mod dispatch;
pub mod error;
pub mod http;
pub mod query;
pub mod transport;
pub mod types;

pub use cache::{cache_key, CacheEntry, CacheError, MemoryCache, ResponseCache};
pub use changes::{ChangeEvent, ChangeRev, ChangesFeed, ChangesOptions, LineDecoder, Subscription};
pub use client::CouchClient;
pub use config::{ClientConfig, Credentials};
pub use couch::Couch;
pub use dispatch::Dispatcher;
pub use error::{CouchError, ErrorCode, TransportError};
pub use http::{HttpMethod, HttpRequest, HttpResponse};
pub use query::Query;
pub use transport::{ByteStream, ReqwestTransport, StreamingResponse, Transport};
pub use types::{DatabaseInfo, DocumentInfo, FindResult, Response, ServerInfo, UpdateFunctionResult};
