//! Continuous change-feed subscription.
//!
//! # Design
//! Subscribing is two-phase: `Couch::changes` opens the connection and checks
//! the status, then hands back a `ChangesFeed`. The feed is a `Stream` of
//! events fed by a spawned reader task; `Subscription` is a cloneable handle
//! that aborts that task (and with it the connection). Dropping the feed
//! unsubscribes too. There is no reconnect: when the server closes the feed
//! the stream ends and the caller decides whether to subscribe again.
//!
//! The body is newline-delimited JSON. `LineDecoder` buffers partial lines
//! across chunks; blank heartbeat lines and lines that are not change rows
//! (including the closing `last_seq` line) are dropped.

use std::pin::Pin;
use std::task::{Context, Poll};

use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use crate::error::CouchError;
use crate::query::Query;
use crate::transport::ByteStream;

const FEED_BUFFER: usize = 64;
const DEFAULT_HEARTBEAT_MS: u64 = 30_000;
const DEFAULT_MAX_LINE_BYTES: usize = 8 * 1024 * 1024;

/// Options for `GET /{db}/_changes`. The feed mode is always `continuous`.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangesOptions {
    /// Sequence to start after; `"now"` skips history. Server default is the beginning.
    pub since: Option<String>,
    pub include_docs: bool,
    pub heartbeat_ms: Option<u64>,
    /// `ddoc/filter` name.
    pub filter: Option<String>,
    /// Additional parameters passed through verbatim.
    pub extra: Query,
}

impl Default for ChangesOptions {
    fn default() -> Self {
        Self {
            since: None,
            include_docs: false,
            heartbeat_ms: Some(DEFAULT_HEARTBEAT_MS),
            filter: None,
            extra: Query::new(),
        }
    }
}

impl ChangesOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn since(mut self, since: impl Into<String>) -> Self {
        self.since = Some(since.into());
        self
    }

    pub fn include_docs(mut self, include_docs: bool) -> Self {
        self.include_docs = include_docs;
        self
    }

    pub fn heartbeat_ms(mut self, heartbeat_ms: Option<u64>) -> Self {
        self.heartbeat_ms = heartbeat_ms;
        self
    }

    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub(crate) fn to_query(&self) -> Query {
        let mut query = Query::new().with("feed", "continuous");
        if let Some(since) = &self.since {
            query.set("since", since.as_str());
        }
        if self.include_docs {
            query.set("include_docs", true);
        }
        if let Some(heartbeat) = self.heartbeat_ms {
            query.set("heartbeat", heartbeat);
        }
        if let Some(filter) = &self.filter {
            query.set("filter", filter.as_str());
        }
        for (key, value) in self.extra.iter() {
            query.set(key, value.clone());
        }
        query
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeRev {
    pub rev: String,
}

/// One row of the change feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub seq: Value,
    pub id: String,
    #[serde(default)]
    pub changes: Vec<ChangeRev>,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<Value>,
}

/// Incremental NDJSON decoder for change rows.
///
/// A line longer than the configured limit (newline included) is dropped
/// along with everything up to its terminating newline.
#[derive(Debug)]
pub struct LineDecoder {
    buffer: Vec<u8>,
    max_line: usize,
    discarding: bool,
}

impl Default for LineDecoder {
    fn default() -> Self {
        Self::with_max_line(DEFAULT_MAX_LINE_BYTES)
    }
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_line,
            discarding: false,
        }
    }

    /// Feed a chunk and return the change rows completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<ChangeEvent> {
        let mut events = Vec::new();
        for segment in chunk.split_inclusive(|b| *b == b'\n') {
            let complete = segment.last() == Some(&b'\n');
            if self.discarding {
                self.discarding = !complete;
                continue;
            }
            self.buffer.extend_from_slice(segment);
            if self.buffer.len() > self.max_line {
                tracing::warn!(limit = self.max_line, "Dropping oversized change-feed line");
                self.buffer.clear();
                self.discarding = !complete;
                continue;
            }
            if complete {
                if let Some(event) = decode_line(&self.buffer) {
                    events.push(event);
                }
                self.buffer.clear();
            }
        }
        events
    }

    /// Decode whatever is left once the stream ends without a final newline.
    pub fn finish(self) -> Option<ChangeEvent> {
        decode_line(&self.buffer)
    }
}

fn decode_line(line: &[u8]) -> Option<ChangeEvent> {
    let line = line.trim_ascii();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_slice(line) {
        Ok(event) => Some(event),
        Err(err) => {
            tracing::trace!(error = %err, line = %String::from_utf8_lossy(line), "Dropping change-feed line");
            None
        }
    }
}

/// Cancellation handle for a change feed.
#[derive(Debug, Clone)]
pub struct Subscription {
    task: AbortHandle,
}

impl Subscription {
    /// Stop the reader task and close the connection. Idempotent.
    pub fn unsubscribe(&self) {
        self.task.abort();
    }

    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }
}

/// Stream of change events for one subscription.
#[derive(Debug)]
pub struct ChangesFeed {
    events: mpsc::Receiver<Result<ChangeEvent, CouchError>>,
    subscription: Subscription,
}

impl ChangesFeed {
    /// Start reading `body` on a background task. Must run inside a tokio runtime.
    pub fn spawn(body: ByteStream) -> Self {
        let (sender, events) = mpsc::channel(FEED_BUFFER);
        let task = tokio::spawn(pump(body, sender));
        Self {
            events,
            subscription: Subscription {
                task: task.abort_handle(),
            },
        }
    }

    pub fn subscription(&self) -> Subscription {
        self.subscription.clone()
    }

    pub fn unsubscribe(self) {
        self.subscription.unsubscribe();
    }
}

impl Stream for ChangesFeed {
    type Item = Result<ChangeEvent, CouchError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().events.poll_recv(cx)
    }
}

impl Drop for ChangesFeed {
    fn drop(&mut self) {
        self.subscription.unsubscribe();
    }
}

async fn pump(mut body: ByteStream, events: mpsc::Sender<Result<ChangeEvent, CouchError>>) {
    let mut decoder = LineDecoder::new();
    while let Some(chunk) = body.next().await {
        match chunk {
            Ok(bytes) => {
                for event in decoder.push(&bytes) {
                    if events.send(Ok(event)).await.is_err() {
                        return;
                    }
                }
            }
            Err(err) => {
                tracing::debug!(error = %err, "Change feed interrupted");
                let _ = events.send(Err(err.into())).await;
                return;
            }
        }
    }
    if let Some(event) = decoder.finish() {
        let _ = events.send(Ok(event)).await;
    }
    tracing::debug!("Change feed closed by server");
}
