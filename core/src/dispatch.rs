//! Request dispatcher with conditional ETag cache.
//!
//! # Design
//! Every outbound call goes through `Dispatcher::dispatch`:
//!
//! 1. Only GETs consult the cache, and only when one is configured. The key
//!    is derived from the fully-qualified URL.
//! 2. A hit adds `If-None-Match` with the stored ETag and keeps the stored
//!    body as a fallback.
//! 3. The request is sent once with the configured timeout. Transport
//!    failures propagate unchanged.
//! 4. A 304 answered for a hit gets the cached body back.
//! 5. A 200 GET with an ETag is written back by a detached task. The caller
//!    does not wait for it and a failed write is only logged. Without a
//!    tokio runtime to spawn on, the write is skipped.
//!
//! The cache reference is swapped atomically. Each dispatch takes a snapshot
//! at its start, so requests already in flight keep reading from and writing
//! to the cache they started with, even after a swap.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use crate::cache::{cache_key, CacheEntry, ResponseCache};
use crate::error::TransportError;
use crate::http::{HttpMethod, HttpRequest, HttpResponse};
use crate::transport::{StreamingResponse, Transport};

pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    cache: RwLock<Option<Arc<dyn ResponseCache>>>,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn Transport>, timeout: Duration) -> Self {
        Self {
            transport,
            cache: RwLock::new(None),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The cache currently in use, if any.
    pub fn cache(&self) -> Option<Arc<dyn ResponseCache>> {
        self.cache.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Replace the cache. The previous cache is invalidated; a failure to do
    /// so is logged and otherwise ignored.
    pub fn use_cache(&self, cache: Option<Arc<dyn ResponseCache>>) {
        let previous = {
            let mut slot = self.cache.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *slot, cache)
        };
        if let Some(previous) = previous {
            if let Err(err) = previous.invalidate() {
                tracing::warn!(error = %err, "Failed to invalidate replaced response cache");
            }
        }
    }

    pub async fn dispatch(&self, mut request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let cache = match request.method {
            HttpMethod::Get => self.cache(),
            _ => None,
        };
        let key = cache.as_ref().map(|_| cache_key(&request.url));

        let mut cached_body = None;
        if let (Some(cache), Some(key)) = (&cache, &key) {
            match cache.get(key).await {
                Ok(Some(entry)) => {
                    request.headers.push(("if-none-match".to_string(), entry.etag));
                    cached_body = Some(entry.body);
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(error = %err, url = %request.url, "Response cache read failed; sending unconditional request");
                }
            }
        }

        let method = request.method;
        let url = request.url.clone();
        let mut response = self.transport.send(request, self.timeout).await?;
        tracing::debug!(
            method = method.as_str(),
            url = %url,
            status = response.status,
            conditional = cached_body.is_some(),
            "Dispatched request"
        );

        if response.status == 304 {
            if let Some(body) = cached_body {
                response.body = body;
            }
        }

        if response.status == 200 {
            if let (Some(cache), Some(key)) = (cache, key) {
                store(cache, key, &response);
            }
        }

        Ok(response)
    }

    /// Open a long-lived streaming request. Bypasses the cache and the timeout.
    pub async fn open_stream(&self, request: HttpRequest) -> Result<StreamingResponse, TransportError> {
        tracing::debug!(url = %request.url, "Opening streaming request");
        self.transport.open_stream(request).await
    }
}

fn store(cache: Arc<dyn ResponseCache>, key: String, response: &HttpResponse) {
    let Some(etag) = response.etag() else {
        return;
    };
    let entry = CacheEntry {
        etag: etag.to_string(),
        body: response.body.clone(),
    };
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
        tracing::warn!(key = %key, "No tokio runtime for background cache write; response not cached");
        return;
    };
    runtime.spawn(async move {
        if let Err(err) = cache.set(&key, entry).await {
            tracing::warn!(error = %err, key = %key, "Response cache write failed");
        }
    });
}
