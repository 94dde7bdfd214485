//! Async CouchDB client.
//!
//! # Design
//! `Couch` glues the sans-IO `CouchClient` to the `Dispatcher`: every method
//! builds a request, dispatches it (through the conditional cache for GETs)
//! and parses the result into a `Response` envelope. No operation retries;
//! one failed attempt is one failed result.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::cache::ResponseCache;
use crate::changes::{ChangesFeed, ChangesOptions};
use crate::client::CouchClient;
use crate::config::ClientConfig;
use crate::dispatch::Dispatcher;
use crate::error::{CouchError, ErrorCode};
use crate::http::{HttpRequest, HttpResponse};
use crate::query::Query;
use crate::transport::{ReqwestTransport, Transport};
use crate::types::{DatabaseInfo, DocumentInfo, FindResult, Response, ServerInfo, UpdateFunctionResult};

pub struct Couch {
    config: ClientConfig,
    client: CouchClient,
    dispatcher: Dispatcher,
}

impl Default for Couch {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}

impl Couch {
    /// Client over the default reqwest transport.
    pub fn new(config: ClientConfig) -> Self {
        Self::with_transport(config, Arc::new(ReqwestTransport::new()))
    }

    pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
        let client = CouchClient::from_config(&config);
        let dispatcher = Dispatcher::new(transport, config.timeout());
        Self {
            config,
            client,
            dispatcher,
        }
    }

    /// Client configured from `COUCHDB_*` environment variables.
    pub fn from_env() -> Result<Self, CouchError> {
        ClientConfig::from_env().map(Self::new)
    }

    pub fn with_cache(self, cache: Arc<dyn ResponseCache>) -> Self {
        self.dispatcher.use_cache(Some(cache));
        self
    }

    /// Swap the response cache; `None` disables caching. See `Dispatcher::use_cache`.
    pub fn use_cache(&self, cache: Option<Arc<dyn ResponseCache>>) {
        self.dispatcher.use_cache(cache);
    }

    pub fn cache(&self) -> Option<Arc<dyn ResponseCache>> {
        self.dispatcher.cache()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn base_url(&self) -> &str {
        self.client.base_url()
    }

    /// The request builder behind this client.
    pub fn client(&self) -> &CouchClient {
        &self.client
    }

    // -----------------------------------------------------------------------
    // Server
    // -----------------------------------------------------------------------

    pub async fn server_info(&self) -> Result<Response<ServerInfo>, CouchError> {
        let request = self.client.build_server_info();
        self.execute(request, CouchClient::parse_server_info).await
    }

    /// Fetch `count` server-generated UUIDs; a count of zero is treated as one.
    pub async fn uuids(&self, count: u32) -> Result<Response<Vec<String>>, CouchError> {
        let request = self.client.build_uuids(count);
        self.execute(request, CouchClient::parse_uuids).await
    }

    // -----------------------------------------------------------------------
    // Databases
    // -----------------------------------------------------------------------

    pub async fn list_databases(&self) -> Result<Response<Vec<String>>, CouchError> {
        let request = self.client.build_list_databases();
        self.execute(request, CouchClient::parse_list_databases).await
    }

    /// Fails with `DatabaseExists` when `db` is already there.
    pub async fn create_database(&self, db: &str) -> Result<Response<()>, CouchError> {
        let request = self.client.build_create_database(db);
        self.execute(request, CouchClient::parse_create_database).await
    }

    /// Fails with `DatabaseMissing` when `db` does not exist.
    pub async fn drop_database(&self, db: &str) -> Result<Response<()>, CouchError> {
        let request = self.client.build_drop_database(db);
        self.execute(request, CouchClient::parse_drop_database).await
    }

    pub async fn database_info(&self, db: &str) -> Result<Response<DatabaseInfo>, CouchError> {
        let request = self.client.build_database_info(db);
        self.execute(request, CouchClient::parse_database_info).await
    }

    // -----------------------------------------------------------------------
    // Documents and views
    // -----------------------------------------------------------------------

    /// Fetch a document. With a cache configured, repeated fetches are
    /// conditional and a 304 answers with the cached body.
    pub async fn get<T: DeserializeOwned>(&self, db: &str, doc_id: &str, query: &Query) -> Result<Response<T>, CouchError> {
        let request = self.client.build_get_document(db, doc_id, query);
        self.execute(request, CouchClient::parse_get_document).await
    }

    pub async fn view<T: DeserializeOwned>(
        &self,
        db: &str,
        ddoc: &str,
        view: &str,
        query: &Query,
    ) -> Result<Response<T>, CouchError> {
        let request = self.client.build_view(db, ddoc, view, query);
        self.execute(request, CouchClient::parse_view).await
    }

    pub async fn all_docs<T: DeserializeOwned>(&self, db: &str, query: &Query) -> Result<Response<T>, CouchError> {
        let request = self.client.build_all_docs(db, query);
        self.execute(request, CouchClient::parse_all_docs).await
    }

    /// Insert a document; the server assigns an `_id` if it has none.
    pub async fn insert<D: Serialize>(&self, db: &str, doc: &D) -> Result<Response<DocumentInfo>, CouchError> {
        let request = self.client.build_insert_document(db, doc)?;
        self.execute(request, CouchClient::parse_insert_document).await
    }

    /// Replace a document. `_id` and `_rev` are checked before any request is sent.
    pub async fn update<D: Serialize>(&self, db: &str, doc: &D) -> Result<Response<DocumentInfo>, CouchError> {
        let request = self.client.build_update_document(db, doc)?;
        self.execute(request, CouchClient::parse_update_document).await
    }

    pub async fn delete(&self, db: &str, doc_id: &str, rev: &str) -> Result<Response<DocumentInfo>, CouchError> {
        let request = self.client.build_delete_document(db, doc_id, rev);
        self.execute(request, CouchClient::parse_delete_document).await
    }

    // -----------------------------------------------------------------------
    // Attachments
    // -----------------------------------------------------------------------

    pub async fn get_attachment(
        &self,
        db: &str,
        doc_id: &str,
        name: &str,
        rev: Option<&str>,
    ) -> Result<Response<Vec<u8>>, CouchError> {
        let request = self.client.build_get_attachment(db, doc_id, name, rev);
        self.execute(request, CouchClient::parse_get_attachment).await
    }

    pub async fn insert_attachment(
        &self,
        db: &str,
        doc_id: &str,
        name: &str,
        body: Vec<u8>,
        content_type: &str,
        rev: Option<&str>,
    ) -> Result<Response<DocumentInfo>, CouchError> {
        let request = self
            .client
            .build_insert_attachment(db, doc_id, name, body, content_type, rev);
        self.execute(request, CouchClient::parse_insert_attachment).await
    }

    pub async fn delete_attachment(
        &self,
        db: &str,
        doc_id: &str,
        name: &str,
        rev: &str,
    ) -> Result<Response<DocumentInfo>, CouchError> {
        let request = self.client.build_delete_attachment(db, doc_id, name, rev);
        self.execute(request, CouchClient::parse_delete_attachment).await
    }

    // -----------------------------------------------------------------------
    // Update functions and Mango
    // -----------------------------------------------------------------------

    /// Call `_design/{ddoc}/_update/{func}`, against `doc_id` when given.
    pub async fn update_function(
        &self,
        db: &str,
        ddoc: &str,
        func: &str,
        query: &Query,
        doc_id: Option<&str>,
        body: Option<&Value>,
    ) -> Result<Response<UpdateFunctionResult>, CouchError> {
        let request = self
            .client
            .build_update_function(db, ddoc, func, query, doc_id, body)?;
        self.execute(request, CouchClient::parse_update_function).await
    }

    /// Run a Mango query. Servers older than CouchDB 2 are rejected from the
    /// response's `Server` header before the status is looked at.
    pub async fn find<T: DeserializeOwned>(
        &self,
        db: &str,
        mango: &Value,
        query: &Query,
    ) -> Result<Response<FindResult<T>>, CouchError> {
        let request = self.client.build_find(db, mango, query)?;
        self.execute(request, CouchClient::parse_find).await
    }

    // -----------------------------------------------------------------------
    // Change feed
    // -----------------------------------------------------------------------

    /// Subscribe to the continuous change feed of `db`.
    ///
    /// Resolves once the server has accepted the subscription; events then
    /// arrive through the returned stream until the server closes the feed or
    /// the subscription is cancelled.
    pub async fn changes(&self, db: &str, options: &ChangesOptions) -> Result<ChangesFeed, CouchError> {
        let request = self.client.build_changes(db, options);
        let stream = self.dispatcher.open_stream(request).await?;
        if stream.status == 200 {
            return Ok(ChangesFeed::spawn(stream.body));
        }
        let response = stream.collect().await?;
        self.client.check_changes(&response)?;
        Err(CouchError::api(
            ErrorCode::UnknownStatus,
            Some(response.status),
            format!("unexpected status {}", response.status),
            response.text_lossy(),
        ))
    }

    async fn execute<T, F>(&self, request: HttpRequest, parse: F) -> Result<Response<T>, CouchError>
    where
        F: FnOnce(&CouchClient, &HttpResponse) -> Result<T, CouchError>,
    {
        let response = self.dispatcher.dispatch(request).await?;
        let data = parse(&self.client, &response)?;
        Ok(Response {
            data,
            headers: response.headers,
            status: response.status,
        })
    }
}
