//! Network execution of `HttpRequest` values.
//!
//! # Design
//! `Transport` is the seam between the sans-IO client and the network. It
//! returns every HTTP status as data; only failures to complete an exchange
//! become `TransportError`. `ReqwestTransport` is the production
//! implementation. Tests substitute scripted transports.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;

use crate::error::TransportError;
use crate::http::{HttpMethod, HttpRequest, HttpResponse};

pub type ByteStream = BoxStream<'static, Result<Bytes, TransportError>>;

/// A response whose body is consumed incrementally.
pub struct StreamingResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: ByteStream,
}

impl StreamingResponse {
    /// Read the remaining body into a plain `HttpResponse`. Used for error bodies.
    pub async fn collect(mut self) -> Result<HttpResponse, TransportError> {
        let mut body = Vec::new();
        while let Some(chunk) = self.body.next().await {
            body.extend_from_slice(&chunk?);
        }
        Ok(HttpResponse {
            status: self.status,
            headers: self.headers,
            body,
        })
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Execute `request`, aborting it once `timeout` elapses.
    async fn send(&self, request: HttpRequest, timeout: Duration) -> Result<HttpResponse, TransportError>;

    /// Execute `request` without a deadline and hand back the body as a stream.
    async fn open_stream(&self, request: HttpRequest) -> Result<StreamingResponse, TransportError>;
}

#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn prepare(&self, request: HttpRequest) -> reqwest::RequestBuilder {
        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };
        let mut builder = self.client.request(method, &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }
        builder
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: HttpRequest, timeout: Duration) -> Result<HttpResponse, TransportError> {
        let response = self
            .prepare(request)
            .timeout(timeout)
            .send()
            .await
            .map_err(|err| map_error(err, timeout))?;
        let status = response.status().as_u16();
        let headers = collect_headers(response.headers());
        let body = response
            .bytes()
            .await
            .map_err(|err| match map_error(err, timeout) {
                TransportError::Request(msg) => TransportError::Body(msg),
                other => other,
            })?;
        Ok(HttpResponse {
            status,
            headers,
            body: body.to_vec(),
        })
    }

    async fn open_stream(&self, request: HttpRequest) -> Result<StreamingResponse, TransportError> {
        let response = self
            .prepare(request)
            .send()
            .await
            .map_err(|err| map_error(err, Duration::ZERO))?;
        let status = response.status().as_u16();
        let headers = collect_headers(response.headers());
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|err| TransportError::Body(err.to_string())))
            .boxed();
        Ok(StreamingResponse { status, headers, body })
    }
}

fn collect_headers(headers: &reqwest::header::HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })
        .collect()
}

fn map_error(err: reqwest::Error, timeout: Duration) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(timeout)
    } else if err.is_connect() {
        TransportError::Connect(err.to_string())
    } else {
        TransportError::Request(err.to_string())
    }
}
