//! Stateless HTTP request builder and response parser for the CouchDB API.
//!
//! # Design
//! `CouchClient` holds only the base URL and an optional `Authorization`
//! header value. Each operation is split into a `build_*` method that
//! produces an `HttpRequest` and a `parse_*` method that consumes an
//! `HttpResponse`. The caller (usually `Couch`, through the dispatcher)
//! executes the round-trip in between, which keeps this module deterministic.
//!
//! Every endpoint has its own legal status space, expressed as a
//! `StatusTable` next to the endpoint. Unlisted statuses become
//! `ErrorCode::UnknownStatus`.

use std::sync::LazyLock;

use regex::Regex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::changes::ChangesOptions;
use crate::config::{ClientConfig, Credentials};
use crate::error::{CouchError, ErrorCode};
use crate::http::{HttpMethod, HttpRequest, HttpResponse};
use crate::query::{encode_component, Query};
use crate::types::{DatabaseInfo, DocumentInfo, ErrorBody, FindResult, ServerInfo, UpdateFunctionResult, UuidList};

const JSON: &str = "application/json";

/// Mango queries need CouchDB 2 or later.
pub const MIN_MANGO_VERSION: u64 = 2;

static SERVER_PRODUCT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*([^/\s]+)/(\d+)").expect("server header pattern is valid"));

/// Success statuses of one endpoint plus the meaning of its known failures.
struct StatusTable {
    ok: &'static [u16],
    failures: &'static [(u16, ErrorCode)],
}

const SERVER_INFO: StatusTable = StatusTable {
    ok: &[200],
    failures: &[],
};

const LIST_DATABASES: StatusTable = StatusTable {
    ok: &[200],
    failures: &[(401, ErrorCode::Unauthorized)],
};

const CREATE_DATABASE: StatusTable = StatusTable {
    ok: &[201, 202],
    failures: &[
        (412, ErrorCode::DatabaseExists),
        (401, ErrorCode::Unauthorized),
        (400, ErrorCode::BadRequest),
    ],
};

const DROP_DATABASE: StatusTable = StatusTable {
    ok: &[200, 202],
    failures: &[(404, ErrorCode::DatabaseMissing), (401, ErrorCode::Unauthorized)],
};

const DATABASE_INFO: StatusTable = StatusTable {
    ok: &[200, 304],
    failures: &[(404, ErrorCode::DatabaseMissing), (401, ErrorCode::Unauthorized)],
};

const GET_DOCUMENT: StatusTable = StatusTable {
    ok: &[200, 304],
    failures: &[(404, ErrorCode::DocumentMissing), (401, ErrorCode::Unauthorized)],
};

const GET_VIEW: StatusTable = StatusTable {
    ok: &[200, 304],
    failures: &[
        (404, ErrorCode::DocumentMissing),
        (400, ErrorCode::BadRequest),
        (401, ErrorCode::Unauthorized),
    ],
};

const ALL_DOCS: StatusTable = StatusTable {
    ok: &[200, 304],
    failures: &[
        (404, ErrorCode::DatabaseMissing),
        (400, ErrorCode::BadRequest),
        (401, ErrorCode::Unauthorized),
    ],
};

const INSERT_DOCUMENT: StatusTable = StatusTable {
    ok: &[201, 202],
    failures: &[
        (400, ErrorCode::BadRequest),
        (401, ErrorCode::Unauthorized),
        (409, ErrorCode::Conflict),
    ],
};

const UPDATE_DOCUMENT: StatusTable = StatusTable {
    ok: &[201, 202],
    failures: &[
        (400, ErrorCode::BadRequest),
        (401, ErrorCode::Unauthorized),
        (404, ErrorCode::DocumentMissing),
        (409, ErrorCode::Conflict),
    ],
};

const DELETE_DOCUMENT: StatusTable = StatusTable {
    ok: &[200],
    failures: UPDATE_DOCUMENT.failures,
};

const GET_ATTACHMENT: StatusTable = GET_DOCUMENT;

const INSERT_ATTACHMENT: StatusTable = UPDATE_DOCUMENT;

const DELETE_ATTACHMENT: StatusTable = StatusTable {
    ok: &[200, 202],
    failures: UPDATE_DOCUMENT.failures,
};

const UPDATE_FUNCTION: StatusTable = StatusTable {
    ok: &[200, 201, 202],
    failures: &[
        (404, ErrorCode::DesignDocumentMissing),
        (400, ErrorCode::BadRequest),
        (401, ErrorCode::Unauthorized),
    ],
};

const FIND: StatusTable = StatusTable {
    ok: &[200, 304],
    failures: &[
        (404, ErrorCode::DatabaseMissing),
        (400, ErrorCode::BadRequest),
        (401, ErrorCode::Unauthorized),
    ],
};

const UUIDS: StatusTable = SERVER_INFO;

const CHANGES: StatusTable = StatusTable {
    ok: &[200],
    failures: &[
        (404, ErrorCode::DatabaseMissing),
        (400, ErrorCode::BadRequest),
        (401, ErrorCode::Unauthorized),
    ],
};

/// Synchronous, stateless client for the CouchDB HTTP API.
#[derive(Debug, Clone)]
pub struct CouchClient {
    base_url: String,
    authorization: Option<String>,
}

impl CouchClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            authorization: None,
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        let client = Self::new(&config.base_url());
        match &config.auth {
            Some(credentials) => client.with_credentials(credentials),
            None => client,
        }
    }

    pub fn with_credentials(mut self, credentials: &Credentials) -> Self {
        self.authorization = Some(credentials.authorization());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // -----------------------------------------------------------------------
    // Server
    // -----------------------------------------------------------------------

    pub fn build_server_info(&self) -> HttpRequest {
        self.request(HttpMethod::Get, self.url(&[], &Query::new()))
    }

    pub fn parse_server_info(&self, response: &HttpResponse) -> Result<ServerInfo, CouchError> {
        check_status(response, &SERVER_INFO)?;
        parse_json(response)
    }

    pub fn build_uuids(&self, count: u32) -> HttpRequest {
        let query = Query::new().with("count", count.max(1));
        self.request(HttpMethod::Get, self.url(&["_uuids"], &query))
    }

    pub fn parse_uuids(&self, response: &HttpResponse) -> Result<Vec<String>, CouchError> {
        check_status(response, &UUIDS)?;
        parse_json::<UuidList>(response).map(|list| list.uuids)
    }

    // -----------------------------------------------------------------------
    // Databases
    // -----------------------------------------------------------------------

    pub fn build_list_databases(&self) -> HttpRequest {
        self.request(HttpMethod::Get, self.url(&["_all_dbs"], &Query::new()))
    }

    pub fn parse_list_databases(&self, response: &HttpResponse) -> Result<Vec<String>, CouchError> {
        check_status(response, &LIST_DATABASES)?;
        parse_json(response)
    }

    pub fn build_create_database(&self, db: &str) -> HttpRequest {
        self.request(HttpMethod::Put, self.url(&[db], &Query::new()))
    }

    pub fn parse_create_database(&self, response: &HttpResponse) -> Result<(), CouchError> {
        check_status(response, &CREATE_DATABASE)
    }

    pub fn build_drop_database(&self, db: &str) -> HttpRequest {
        self.request(HttpMethod::Delete, self.url(&[db], &Query::new()))
    }

    pub fn parse_drop_database(&self, response: &HttpResponse) -> Result<(), CouchError> {
        check_status(response, &DROP_DATABASE)
    }

    pub fn build_database_info(&self, db: &str) -> HttpRequest {
        self.request(HttpMethod::Get, self.url(&[db], &Query::new()))
    }

    pub fn parse_database_info(&self, response: &HttpResponse) -> Result<DatabaseInfo, CouchError> {
        check_status(response, &DATABASE_INFO)?;
        parse_json(response)
    }

    // -----------------------------------------------------------------------
    // Documents and views
    // -----------------------------------------------------------------------

    pub fn build_get_document(&self, db: &str, doc_id: &str, query: &Query) -> HttpRequest {
        self.request(HttpMethod::Get, self.url(&[db, doc_id], query))
    }

    pub fn parse_get_document<T: DeserializeOwned>(&self, response: &HttpResponse) -> Result<T, CouchError> {
        check_status(response, &GET_DOCUMENT)?;
        parse_json(response)
    }

    pub fn build_view(&self, db: &str, ddoc: &str, view: &str, query: &Query) -> HttpRequest {
        self.request(HttpMethod::Get, self.url(&[db, "_design", ddoc, "_view", view], query))
    }

    pub fn parse_view<T: DeserializeOwned>(&self, response: &HttpResponse) -> Result<T, CouchError> {
        check_status(response, &GET_VIEW)?;
        parse_json(response)
    }

    pub fn build_all_docs(&self, db: &str, query: &Query) -> HttpRequest {
        self.request(HttpMethod::Get, self.url(&[db, "_all_docs"], query))
    }

    pub fn parse_all_docs<T: DeserializeOwned>(&self, response: &HttpResponse) -> Result<T, CouchError> {
        check_status(response, &ALL_DOCS)?;
        parse_json(response)
    }

    /// `POST /{db}`; the server assigns an `_id` when the document has none.
    pub fn build_insert_document<D: Serialize>(&self, db: &str, doc: &D) -> Result<HttpRequest, CouchError> {
        self.json_request(HttpMethod::Post, self.url(&[db], &Query::new()), doc)
    }

    pub fn parse_insert_document(&self, response: &HttpResponse) -> Result<DocumentInfo, CouchError> {
        check_status(response, &INSERT_DOCUMENT)?;
        parse_json(response)
    }

    /// `PUT /{db}/{_id}`. Fails with `FieldMissing` before building anything
    /// when the document lacks `_id` or `_rev`.
    pub fn build_update_document<D: Serialize>(&self, db: &str, doc: &D) -> Result<HttpRequest, CouchError> {
        let doc = serde_json::to_value(doc).map_err(|e| CouchError::Serialization(e.to_string()))?;
        let id = required_field(&doc, "_id")?;
        required_field(&doc, "_rev")?;
        self.json_request(HttpMethod::Put, self.url(&[db, id], &Query::new()), &doc)
    }

    pub fn parse_update_document(&self, response: &HttpResponse) -> Result<DocumentInfo, CouchError> {
        check_status(response, &UPDATE_DOCUMENT)?;
        parse_json(response)
    }

    pub fn build_delete_document(&self, db: &str, doc_id: &str, rev: &str) -> HttpRequest {
        let query = Query::new().with("rev", rev);
        self.request(HttpMethod::Delete, self.url(&[db, doc_id], &query))
    }

    pub fn parse_delete_document(&self, response: &HttpResponse) -> Result<DocumentInfo, CouchError> {
        check_status(response, &DELETE_DOCUMENT)?;
        parse_json(response)
    }

    // -----------------------------------------------------------------------
    // Attachments
    // -----------------------------------------------------------------------

    pub fn build_get_attachment(&self, db: &str, doc_id: &str, name: &str, rev: Option<&str>) -> HttpRequest {
        let query = rev_query(rev);
        self.request(HttpMethod::Get, self.url(&[db, doc_id, name], &query))
    }

    /// Attachment bodies are returned as-is.
    pub fn parse_get_attachment(&self, response: &HttpResponse) -> Result<Vec<u8>, CouchError> {
        check_status(response, &GET_ATTACHMENT)?;
        Ok(response.body.clone())
    }

    /// `PUT /{db}/{doc}/{name}`; without `rev` the document is created.
    pub fn build_insert_attachment(
        &self,
        db: &str,
        doc_id: &str,
        name: &str,
        body: Vec<u8>,
        content_type: &str,
        rev: Option<&str>,
    ) -> HttpRequest {
        let query = rev_query(rev);
        let mut request = self.request(HttpMethod::Put, self.url(&[db, doc_id, name], &query));
        request.headers.push(("content-type".to_string(), content_type.to_string()));
        request.body = Some(body);
        request
    }

    pub fn parse_insert_attachment(&self, response: &HttpResponse) -> Result<DocumentInfo, CouchError> {
        check_status(response, &INSERT_ATTACHMENT)?;
        parse_json(response)
    }

    pub fn build_delete_attachment(&self, db: &str, doc_id: &str, name: &str, rev: &str) -> HttpRequest {
        let query = Query::new().with("rev", rev);
        self.request(HttpMethod::Delete, self.url(&[db, doc_id, name], &query))
    }

    pub fn parse_delete_attachment(&self, response: &HttpResponse) -> Result<DocumentInfo, CouchError> {
        check_status(response, &DELETE_ATTACHMENT)?;
        parse_json(response)
    }

    // -----------------------------------------------------------------------
    // Design-document update functions
    // -----------------------------------------------------------------------

    /// `POST .../_update/{func}` without a document id, `PUT .../_update/{func}/{id}` with one.
    pub fn build_update_function(
        &self,
        db: &str,
        ddoc: &str,
        func: &str,
        query: &Query,
        doc_id: Option<&str>,
        body: Option<&Value>,
    ) -> Result<HttpRequest, CouchError> {
        let (method, url) = match doc_id {
            Some(id) => (HttpMethod::Put, self.url(&[db, "_design", ddoc, "_update", func, id], query)),
            None => (HttpMethod::Post, self.url(&[db, "_design", ddoc, "_update", func], query)),
        };
        match body {
            Some(body) => self.json_request(method, url, body),
            None => Ok(self.request(method, url)),
        }
    }

    pub fn parse_update_function(&self, response: &HttpResponse) -> Result<UpdateFunctionResult, CouchError> {
        check_status(response, &UPDATE_FUNCTION)?;
        let body = serde_json::from_slice(&response.body).unwrap_or_else(|_| Value::String(response.text_lossy()));
        Ok(UpdateFunctionResult {
            body,
            doc_id: response.header("x-couch-id").map(str::to_string),
            rev: response.header("x-couch-update-newrev").map(str::to_string),
        })
    }

    // -----------------------------------------------------------------------
    // Mango
    // -----------------------------------------------------------------------

    /// `POST /{db}/_find` with `selector` as the JSON body.
    pub fn build_find(&self, db: &str, selector: &Value, query: &Query) -> Result<HttpRequest, CouchError> {
        self.json_request(HttpMethod::Post, self.url(&[db, "_find"], query), selector)
    }

    /// Checks the server identification before looking at the status.
    pub fn parse_find<T: DeserializeOwned>(&self, response: &HttpResponse) -> Result<FindResult<T>, CouchError> {
        let major = server_major_version(response)?;
        if major < MIN_MANGO_VERSION {
            return Err(CouchError::api(
                ErrorCode::ServerTooOld,
                Some(response.status),
                format!("Mango queries need server version {MIN_MANGO_VERSION} or later, found {major}"),
                response.text_lossy(),
            ));
        }
        check_status(response, &FIND)?;
        parse_json(response)
    }

    // -----------------------------------------------------------------------
    // Change feed
    // -----------------------------------------------------------------------

    pub fn build_changes(&self, db: &str, options: &ChangesOptions) -> HttpRequest {
        self.request(HttpMethod::Get, self.url(&[db, "_changes"], &options.to_query()))
    }

    /// Status check for the change feed, whose body is consumed as a stream.
    pub fn check_changes(&self, response: &HttpResponse) -> Result<(), CouchError> {
        check_status(response, &CHANGES)
    }

    // -----------------------------------------------------------------------
    // Request helpers
    // -----------------------------------------------------------------------

    fn url(&self, segments: &[&str], query: &Query) -> String {
        let mut url = self.base_url.clone();
        if segments.is_empty() {
            url.push('/');
        }
        for segment in segments {
            url.push('/');
            url.push_str(&encode_component(segment));
        }
        query.append_to(&mut url);
        url
    }

    fn request(&self, method: HttpMethod, url: String) -> HttpRequest {
        let mut headers = vec![("accept".to_string(), JSON.to_string())];
        if let Some(authorization) = &self.authorization {
            headers.push(("authorization".to_string(), authorization.clone()));
        }
        HttpRequest {
            method,
            url,
            headers,
            body: None,
        }
    }

    fn json_request<B: Serialize + ?Sized>(
        &self,
        method: HttpMethod,
        url: String,
        body: &B,
    ) -> Result<HttpRequest, CouchError> {
        let body = serde_json::to_vec(body).map_err(|e| CouchError::Serialization(e.to_string()))?;
        let mut request = self.request(method, url);
        request.headers.push(("content-type".to_string(), JSON.to_string()));
        request.body = Some(body);
        Ok(request)
    }
}

/// Major version from a `Product/major...` server header.
pub fn server_major_version(response: &HttpResponse) -> Result<u64, CouchError> {
    let header = response.server().unwrap_or_default();
    SERVER_PRODUCT
        .captures(header)
        .and_then(|caps| caps.get(2))
        .and_then(|major| major.as_str().parse().ok())
        .ok_or_else(|| {
            CouchError::api(
                ErrorCode::ServerNotSupported,
                Some(response.status),
                format!("unrecognised server identification: {header:?}"),
                response.text_lossy(),
            )
        })
}

fn rev_query(rev: Option<&str>) -> Query {
    match rev {
        Some(rev) => Query::new().with("rev", rev),
        None => Query::new(),
    }
}

fn required_field<'a>(doc: &'a Value, field: &str) -> Result<&'a str, CouchError> {
    doc.get(field)
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| CouchError::api(ErrorCode::FieldMissing, None, format!("document is missing {field}"), ""))
}

/// Map the response status through `table`.
fn check_status(response: &HttpResponse, table: &StatusTable) -> Result<(), CouchError> {
    if table.ok.contains(&response.status) {
        return Ok(());
    }
    let code = table
        .failures
        .iter()
        .find(|(status, _)| *status == response.status)
        .map(|(_, code)| *code)
        .unwrap_or(ErrorCode::UnknownStatus);
    let reason = serde_json::from_slice::<ErrorBody>(&response.body)
        .ok()
        .map(|body| if body.reason.is_empty() { body.error } else { body.reason })
        .filter(|reason| !reason.is_empty());
    let message = reason.unwrap_or_else(|| default_message(code, response.status));
    Err(CouchError::api(code, Some(response.status), message, response.text_lossy()))
}

fn default_message(code: ErrorCode, status: u16) -> String {
    match code {
        ErrorCode::DatabaseExists => "database already exists".to_string(),
        ErrorCode::DatabaseMissing => "database does not exist".to_string(),
        ErrorCode::DocumentMissing => "document not found".to_string(),
        ErrorCode::DesignDocumentMissing => "design document not found".to_string(),
        ErrorCode::Conflict => "document update conflict".to_string(),
        ErrorCode::Unauthorized => "not authorized".to_string(),
        ErrorCode::BadRequest => "bad request".to_string(),
        _ => format!("unexpected status {status}"),
    }
}

fn parse_json<T: DeserializeOwned>(response: &HttpResponse) -> Result<T, CouchError> {
    serde_json::from_slice(&response.body).map_err(|e| CouchError::Deserialization(e.to_string()))
}
