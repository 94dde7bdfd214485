//! In-memory CouchDB stand-in for tests and local development.
//!
//! # Design
//! One `RwLock` guards every database. Handlers speak CouchDB's wire format:
//! `{"error":..,"reason":..}` failure bodies, `N-<hex>` revisions, quoted
//! revisions as ETags with `If-None-Match` answered by 304, and a `Server`
//! header carrying the configured version. Update functions cannot run
//! JavaScript here; a named function merges the request body and query
//! parameters into the target document.

pub mod feed;
pub mod mango;
pub mod store;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use axum::{
    body::{Body, Bytes},
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::{net::TcpListener, sync::RwLock};

use crate::feed::FeedParams;
use crate::store::{generation, new_uuid, valid_db_name, Attachment, Database, RevError, StoredDoc};

pub const DEFAULT_VERSION: &str = "3.3.3";
const MAX_UUIDS: usize = 1000;
const DEFAULT_FIND_LIMIT: usize = 25;
const NO_INDEX_WARNING: &str = "No matching index found, create an index to optimize query time.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admin {
    pub user: String,
    pub password: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockConfig {
    /// Reported in `GET /` and the `Server` header.
    pub version: String,
    /// When set, creating and dropping databases needs these credentials.
    pub admin: Option<Admin>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            version: DEFAULT_VERSION.to_string(),
            admin: None,
        }
    }
}

impl MockConfig {
    /// Reads `COUCHDB_VERSION`, `COUCHDB_USER` and `COUCHDB_PASSWORD`.
    pub fn from_env() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        Self {
            version: var("COUCHDB_VERSION").unwrap_or_else(|| DEFAULT_VERSION.to_string()),
            admin: var("COUCHDB_USER").map(|user| Admin {
                user,
                password: var("COUCHDB_PASSWORD").unwrap_or_default(),
            }),
        }
    }

    pub fn with_version(mut self, version: &str) -> Self {
        self.version = version.to_string();
        self
    }

    pub fn with_admin(mut self, user: &str, password: &str) -> Self {
        self.admin = Some(Admin {
            user: user.to_string(),
            password: password.to_string(),
        });
        self
    }
}

#[derive(Debug, Default)]
struct Server {
    databases: BTreeMap<String, Database>,
}

#[derive(Clone)]
struct AppState {
    server: Arc<RwLock<Server>>,
    config: Arc<MockConfig>,
}

type Reply = Result<Response, Response>;

pub fn app() -> Router {
    app_with(MockConfig::default())
}

pub fn app_with(config: MockConfig) -> Router {
    let state = AppState {
        server: Arc::new(RwLock::new(Server::default())),
        config: Arc::new(config),
    };
    Router::new()
        .route("/", get(server_info))
        .route("/_all_dbs", get(all_dbs))
        .route("/_uuids", get(uuids))
        .route(
            "/{db}",
            get(database_info)
                .put(create_database)
                .delete(drop_database)
                .post(post_document),
        )
        .route("/{db}/_all_docs", get(all_docs))
        .route("/{db}/_find", post(find))
        .route("/{db}/_changes", get(changes))
        .route("/{db}/_design/{ddoc}/_update/{func}", post(update_new))
        .route("/{db}/_design/{ddoc}/_update/{func}/{doc_id}", put(update_existing))
        .route(
            "/{db}/{doc_id}",
            get(get_document).put(put_document).delete(delete_document),
        )
        .route(
            "/{db}/{doc_id}/{name}",
            get(get_attachment).put(put_attachment).delete(delete_attachment),
        )
        .layer(middleware::map_response_with_state(state.config.clone(), server_header))
        .with_state(state)
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    run_with(listener, MockConfig::default()).await
}

pub async fn run_with(listener: TcpListener, config: MockConfig) -> Result<(), std::io::Error> {
    axum::serve(listener, app_with(config)).await
}

async fn server_header(State(config): State<Arc<MockConfig>>, mut response: Response) -> Response {
    let server = format!("CouchDB/{} (Erlang OTP/25)", config.version);
    if let Ok(value) = HeaderValue::from_str(&server) {
        response.headers_mut().insert(header::SERVER, value);
    }
    response
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

fn error(status: StatusCode, error: &str, reason: impl Into<String>) -> Response {
    let reason = reason.into();
    (status, Json(json!({"error": error, "reason": reason}))).into_response()
}

fn db_missing() -> Response {
    error(StatusCode::NOT_FOUND, "not_found", "Database does not exist.")
}

fn doc_missing(database: &Database, id: &str) -> Response {
    let reason = match database.docs.get(id) {
        Some(doc) if doc.deleted => "deleted",
        _ => "missing",
    };
    error(StatusCode::NOT_FOUND, "not_found", reason)
}

fn rev_error(database: &Database, id: &str, err: RevError) -> Response {
    match err {
        RevError::Missing => doc_missing(database, id),
        RevError::Conflict => error(StatusCode::CONFLICT, "conflict", "Document update conflict."),
    }
}

fn etag(rev: &str) -> String {
    format!("\"{rev}\"")
}

fn written(status: StatusCode, id: &str, rev: &str) -> Response {
    (
        status,
        [(header::ETAG, etag(rev))],
        Json(json!({"ok": true, "id": id, "rev": rev})),
    )
        .into_response()
}

fn is_fresh(headers: &HeaderMap, etag: &str) -> bool {
    headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v == etag)
}

fn not_modified(etag: String) -> Response {
    (StatusCode::NOT_MODIFIED, [(header::ETAG, etag)]).into_response()
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

fn parse_object(body: &[u8]) -> Result<Map<String, Value>, Response> {
    match serde_json::from_slice(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(error(StatusCode::BAD_REQUEST, "bad_request", "Document must be a JSON object")),
        Err(_) => Err(error(StatusCode::BAD_REQUEST, "bad_request", "invalid UTF-8 JSON")),
    }
}

fn database<'a>(server: &'a Server, name: &str) -> Result<&'a Database, Response> {
    server.databases.get(name).ok_or_else(db_missing)
}

fn database_mut<'a>(server: &'a mut Server, name: &str) -> Result<&'a mut Database, Response> {
    server.databases.get_mut(name).ok_or_else(db_missing)
}

fn authorize(config: &MockConfig, headers: &HeaderMap) -> Result<(), Response> {
    let Some(admin) = &config.admin else {
        return Ok(());
    };
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Basic "))
        .and_then(|encoded| STANDARD.decode(encoded).ok())
        .and_then(|raw| String::from_utf8(raw).ok());
    match presented {
        Some(pair) if pair == format!("{}:{}", admin.user, admin.password) => Ok(()),
        Some(_) => Err(error(StatusCode::UNAUTHORIZED, "unauthorized", "Name or password is incorrect.")),
        None => Err(error(StatusCode::UNAUTHORIZED, "unauthorized", "You are not a server admin.")),
    }
}

fn json_param(params: &HashMap<String, String>, names: &[&str]) -> Result<Option<Value>, Response> {
    let Some(raw) = names.iter().find_map(|name| params.get(*name)) else {
        return Ok(None);
    };
    serde_json::from_str(raw).map(Some).map_err(|_| {
        error(
            StatusCode::BAD_REQUEST,
            "bad_request",
            format!("Invalid JSON in query parameter: {raw}"),
        )
    })
}

fn flag(params: &HashMap<String, String>, name: &str, default: bool) -> bool {
    params.get(name).map_or(default, |v| v == "true")
}

fn number(params: &HashMap<String, String>, name: &str) -> Option<usize> {
    params.get(name).and_then(|v| v.parse().ok())
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

async fn server_info(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "couchdb": "Welcome",
        "version": state.config.version,
        "vendor": {"name": "The Apache Software Foundation"},
    }))
}

async fn all_dbs(State(state): State<AppState>) -> Json<Vec<String>> {
    let server = state.server.read().await;
    Json(server.databases.keys().cloned().collect())
}

async fn uuids(Query(params): Query<HashMap<String, String>>) -> Reply {
    let count = match params.get("count") {
        Some(raw) => raw
            .parse::<usize>()
            .map_err(|_| error(StatusCode::BAD_REQUEST, "bad_request", "Invalid count"))?,
        None => 1,
    };
    if count > MAX_UUIDS {
        return Err(error(StatusCode::BAD_REQUEST, "bad_request", "count parameter too large"));
    }
    let uuids: Vec<String> = (0..count).map(|_| new_uuid()).collect();
    Ok(Json(json!({ "uuids": uuids })).into_response())
}

// ---------------------------------------------------------------------------
// Databases
// ---------------------------------------------------------------------------

async fn create_database(State(state): State<AppState>, Path(db): Path<String>, headers: HeaderMap) -> Reply {
    authorize(&state.config, &headers)?;
    if !valid_db_name(&db) {
        return Err(error(
            StatusCode::BAD_REQUEST,
            "illegal_database_name",
            format!(
                "Name: '{db}'. Only lowercase characters (a-z), digits (0-9), and any of the characters _, $, (, ), +, -, and / are allowed. Must begin with a letter."
            ),
        ));
    }
    let mut server = state.server.write().await;
    if server.databases.contains_key(&db) {
        return Err(error(
            StatusCode::PRECONDITION_FAILED,
            "file_exists",
            "The database could not be created, the file already exists.",
        ));
    }
    server.databases.insert(db.clone(), Database::default());
    tracing::debug!(db = %db, "Created database");
    Ok((StatusCode::CREATED, Json(json!({"ok": true}))).into_response())
}

async fn drop_database(State(state): State<AppState>, Path(db): Path<String>, headers: HeaderMap) -> Reply {
    authorize(&state.config, &headers)?;
    let mut server = state.server.write().await;
    server.databases.remove(&db).ok_or_else(db_missing)?;
    tracing::debug!(db = %db, "Dropped database");
    Ok(Json(json!({"ok": true})).into_response())
}

async fn database_info(State(state): State<AppState>, Path(db): Path<String>) -> Reply {
    let server = state.server.read().await;
    let database = database(&server, &db)?;
    Ok(Json(json!({
        "db_name": db,
        "doc_count": database.doc_count(),
        "doc_del_count": database.deleted_count(),
        "update_seq": database.seq.to_string(),
        "instance_start_time": "0",
    }))
    .into_response())
}

// ---------------------------------------------------------------------------
// Documents
// ---------------------------------------------------------------------------

async fn post_document(State(state): State<AppState>, Path(db): Path<String>, body: Bytes) -> Reply {
    let mut server = state.server.write().await;
    let database = database_mut(&mut server, &db)?;
    let body = parse_object(&body)?;
    let id = body
        .get("_id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map_or_else(new_uuid, str::to_string);
    let rev = body.get("_rev").and_then(Value::as_str);
    database.check_rev(&id, rev).map_err(|e| rev_error(database, &id, e))?;
    let rev = database.commit(&id, StoredDoc::from_body(body));
    Ok(written(StatusCode::CREATED, &id, &rev))
}

async fn get_document(
    State(state): State<AppState>,
    Path((db, doc_id)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Reply {
    let server = state.server.read().await;
    let database = database(&server, &db)?;
    let doc = database.live(&doc_id).ok_or_else(|| doc_missing(database, &doc_id))?;
    if params.get("rev").is_some_and(|rev| *rev != doc.rev) {
        return Err(error(StatusCode::NOT_FOUND, "not_found", "missing"));
    }
    let tag = etag(&doc.rev);
    if is_fresh(&headers, &tag) {
        return Ok(not_modified(tag));
    }
    Ok(([(header::ETAG, tag)], Json(doc.to_json(&doc_id))).into_response())
}

async fn put_document(
    State(state): State<AppState>,
    Path((db, doc_id)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
    body: Bytes,
) -> Reply {
    let mut server = state.server.write().await;
    let database = database_mut(&mut server, &db)?;
    let body = parse_object(&body)?;
    let rev = body
        .get("_rev")
        .and_then(Value::as_str)
        .or_else(|| params.get("rev").map(String::as_str));
    let existing = database
        .check_rev(&doc_id, rev)
        .map_err(|e| rev_error(database, &doc_id, e))?;
    let mut doc = StoredDoc::from_body(body);
    if let Some(existing) = existing {
        doc.attachments = existing.attachments.clone();
    }
    let rev = database.commit(&doc_id, doc);
    Ok(written(StatusCode::CREATED, &doc_id, &rev))
}

async fn delete_document(
    State(state): State<AppState>,
    Path((db, doc_id)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> Reply {
    let mut server = state.server.write().await;
    let database = database_mut(&mut server, &db)?;
    database
        .require_rev(&doc_id, params.get("rev").map(String::as_str))
        .map_err(|e| rev_error(database, &doc_id, e))?;
    let tombstone = StoredDoc {
        deleted: true,
        ..StoredDoc::default()
    };
    let rev = database.commit(&doc_id, tombstone);
    Ok(written(StatusCode::OK, &doc_id, &rev))
}

async fn all_docs(
    State(state): State<AppState>,
    Path(db): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Reply {
    let range = KeyRange {
        key: json_param(&params, &["key"])?,
        start: json_param(&params, &["startkey", "start_key"])?,
        end: json_param(&params, &["endkey", "end_key"])?,
        descending: flag(&params, "descending", false),
        inclusive_end: flag(&params, "inclusive_end", true),
    };
    let keys = json_param(&params, &["keys"])?;
    let include_docs = flag(&params, "include_docs", false);
    let skip = number(&params, "skip").unwrap_or(0);
    let limit = number(&params, "limit").unwrap_or(usize::MAX);

    let server = state.server.read().await;
    let database = database(&server, &db)?;
    let rows: Vec<Value> = match keys {
        Some(Value::Array(keys)) => keys.iter().map(|key| keyed_row(database, key, include_docs)).collect(),
        Some(_) => return Err(error(StatusCode::BAD_REQUEST, "bad_request", "`keys` must be an array")),
        None => {
            let mut docs: Vec<(&String, &StoredDoc)> = database.docs.iter().filter(|(_, doc)| !doc.deleted).collect();
            if range.descending {
                docs.reverse();
            }
            docs.into_iter()
                .filter(|(id, _)| range.contains(id))
                .map(|(id, doc)| row(id, doc, include_docs))
                .collect()
        }
    };
    let rows: Vec<Value> = rows.into_iter().skip(skip).take(limit).collect();
    Ok(Json(json!({
        "total_rows": database.doc_count(),
        "offset": skip,
        "rows": rows,
    }))
    .into_response())
}

struct KeyRange {
    key: Option<Value>,
    start: Option<Value>,
    end: Option<Value>,
    descending: bool,
    inclusive_end: bool,
}

impl KeyRange {
    fn contains(&self, id: &str) -> bool {
        use std::cmp::Ordering::{Equal, Greater, Less};

        let id = Value::String(id.to_string());
        if let Some(key) = &self.key {
            return mango::collate(&id, key) == Equal;
        }
        let after_start = self.start.as_ref().map_or(true, |start| {
            let ord = mango::collate(&id, start);
            if self.descending { ord != Greater } else { ord != Less }
        });
        let before_end = self.end.as_ref().map_or(true, |end| {
            let ord = mango::collate(&id, end);
            match (self.descending, self.inclusive_end) {
                (false, true) => ord != Greater,
                (false, false) => ord == Less,
                (true, true) => ord != Less,
                (true, false) => ord == Greater,
            }
        });
        after_start && before_end
    }
}

fn row(id: &str, doc: &StoredDoc, include_docs: bool) -> Value {
    let mut row = json!({"id": id, "key": id, "value": {"rev": doc.rev}});
    if include_docs {
        row["doc"] = doc.to_json(id);
    }
    row
}

fn keyed_row(database: &Database, key: &Value, include_docs: bool) -> Value {
    let doc = key.as_str().and_then(|id| database.docs.get(id).map(|doc| (id, doc)));
    match doc {
        Some((id, doc)) if doc.deleted => {
            let mut row = json!({"id": id, "key": id, "value": {"rev": doc.rev, "deleted": true}});
            if include_docs {
                row["doc"] = Value::Null;
            }
            row
        }
        Some((id, doc)) => row(id, doc, include_docs),
        None => json!({"key": key, "error": "not_found"}),
    }
}

// ---------------------------------------------------------------------------
// Attachments
// ---------------------------------------------------------------------------

async fn get_attachment(
    State(state): State<AppState>,
    Path((db, doc_id, name)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Reply {
    let server = state.server.read().await;
    let database = database(&server, &db)?;
    let doc = database.live(&doc_id).ok_or_else(|| doc_missing(database, &doc_id))?;
    let attachment = doc
        .attachments
        .get(&name)
        .ok_or_else(|| error(StatusCode::NOT_FOUND, "not_found", "Document is missing attachment"))?;
    let tag = etag(&format!("{}-{}", doc.rev, name));
    if is_fresh(&headers, &tag) {
        return Ok(not_modified(tag));
    }
    Ok((
        [
            (header::CONTENT_TYPE, attachment.content_type.clone()),
            (header::ETAG, tag),
        ],
        Body::from(attachment.data.clone()),
    )
        .into_response())
}

async fn put_attachment(
    State(state): State<AppState>,
    Path((db, doc_id, name)): Path<(String, String, String)>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Reply {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();
    let mut server = state.server.write().await;
    let database = database_mut(&mut server, &db)?;
    let existing = database
        .check_rev(&doc_id, params.get("rev").map(String::as_str))
        .map_err(|e| rev_error(database, &doc_id, e))?;
    let mut doc = existing.cloned().unwrap_or_default();
    let revpos = generation(&doc.rev) + 1;
    doc.attachments.insert(
        name,
        Attachment {
            content_type,
            data: body.to_vec(),
            revpos,
        },
    );
    let rev = database.commit(&doc_id, doc);
    Ok(written(StatusCode::CREATED, &doc_id, &rev))
}

async fn delete_attachment(
    State(state): State<AppState>,
    Path((db, doc_id, name)): Path<(String, String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> Reply {
    let mut server = state.server.write().await;
    let database = database_mut(&mut server, &db)?;
    let existing = database
        .require_rev(&doc_id, params.get("rev").map(String::as_str))
        .map_err(|e| rev_error(database, &doc_id, e))?;
    if !existing.attachments.contains_key(&name) {
        return Err(error(StatusCode::NOT_FOUND, "not_found", "Document is missing attachment"));
    }
    let mut doc = existing.clone();
    doc.attachments.remove(&name);
    let rev = database.commit(&doc_id, doc);
    Ok(written(StatusCode::OK, &doc_id, &rev))
}

// ---------------------------------------------------------------------------
// Update functions, Mango and the change feed
// ---------------------------------------------------------------------------

async fn update_new(
    State(state): State<AppState>,
    Path((db, ddoc, func)): Path<(String, String, String)>,
    Query(params): Query<HashMap<String, String>>,
    body: Bytes,
) -> Reply {
    run_update(&state, &db, &ddoc, &func, None, &params, &body).await
}

async fn update_existing(
    State(state): State<AppState>,
    Path((db, ddoc, func, doc_id)): Path<(String, String, String, String)>,
    Query(params): Query<HashMap<String, String>>,
    body: Bytes,
) -> Reply {
    run_update(&state, &db, &ddoc, &func, Some(doc_id), &params, &body).await
}

async fn run_update(
    state: &AppState,
    db: &str,
    ddoc: &str,
    func: &str,
    doc_id: Option<String>,
    params: &HashMap<String, String>,
    body: &[u8],
) -> Reply {
    let mut server = state.server.write().await;
    let database = database_mut(&mut server, db)?;
    let design_id = format!("_design/{ddoc}");
    let design = database
        .live(&design_id)
        .ok_or_else(|| error(StatusCode::NOT_FOUND, "not_found", "missing"))?;
    if design.fields.get("updates").and_then(|u| u.get(func)).is_none() {
        return Err(error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("missing update function {func} on design doc {design_id}"),
        ));
    }

    let patch = if body.is_empty() { Map::new() } else { parse_object(body)? };
    let id = doc_id
        .or_else(|| patch.get("_id").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(new_uuid);
    let mut doc = database.live(&id).cloned().unwrap_or_default();
    doc.fields.extend(StoredDoc::from_body(patch).fields);
    doc.fields
        .extend(params.iter().map(|(k, v)| (k.clone(), Value::String(v.clone()))));
    let rev = database.commit(&id, doc);
    let written = database.live(&id).map_or(Value::Null, |doc| doc.to_json(&id));
    Ok((
        StatusCode::CREATED,
        [("x-couch-id", id), ("x-couch-update-newrev", rev)],
        Json(written),
    )
        .into_response())
}

/// Body of `POST /{db}/_find`.
#[derive(Debug, Deserialize)]
struct FindRequest {
    selector: Option<Value>,
    #[serde(default = "default_find_limit")]
    limit: usize,
    #[serde(default)]
    skip: usize,
    fields: Option<Vec<String>>,
    #[serde(default)]
    sort: Vec<Value>,
}

fn default_find_limit() -> usize {
    DEFAULT_FIND_LIMIT
}

async fn find(State(state): State<AppState>, Path(db): Path<String>, body: Bytes) -> Reply {
    let server = state.server.read().await;
    let database = database(&server, &db)?;
    let request: FindRequest = serde_json::from_slice(&body)
        .map_err(|err| error(StatusCode::BAD_REQUEST, "bad_request", err.to_string()))?;
    let selector = request
        .selector
        .filter(Value::is_object)
        .ok_or_else(|| error(StatusCode::BAD_REQUEST, "missing_required_key", "Missing required key: selector"))?;

    let mut docs: Vec<Value> = database
        .docs
        .iter()
        .filter(|(id, doc)| !doc.deleted && !id.starts_with("_design/"))
        .map(|(id, doc)| doc.to_json(id))
        .filter(|doc| mango::matches(&selector, doc))
        .collect();
    mango::sort(&mut docs, &request.sort);
    let docs: Vec<Value> = docs
        .into_iter()
        .skip(request.skip)
        .take(request.limit)
        .map(|doc| match &request.fields {
            Some(fields) => mango::project(&doc, fields),
            None => doc,
        })
        .collect();
    Ok(Json(json!({
        "docs": docs,
        "bookmark": "nil",
        "warning": NO_INDEX_WARNING,
    }))
    .into_response())
}

async fn changes(
    State(state): State<AppState>,
    Path(db): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Reply {
    let params = FeedParams::from_query(&params);
    let server = state.server.read().await;
    let database = database(&server, &db)?;
    if !params.continuous {
        return Ok(Json(feed::normal(database, &params)).into_response());
    }
    tracing::debug!(db = %db, since = ?params.since, "Opened continuous change feed");
    Ok((
        [(header::CONTENT_TYPE, "application/json")],
        feed::continuous(database, &params),
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn basic(user: &str, password: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        let value = format!("Basic {}", STANDARD.encode(format!("{user}:{password}")));
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(&value).unwrap());
        headers
    }

    #[test]
    fn authorize_without_admin_allows_everyone() {
        assert!(authorize(&MockConfig::default(), &HeaderMap::new()).is_ok());
    }

    #[test]
    fn authorize_checks_credentials() {
        let config = MockConfig::default().with_admin("admin", "secret");
        assert!(authorize(&config, &basic("admin", "secret")).is_ok());
        assert_eq!(
            authorize(&config, &basic("admin", "wrong")).unwrap_err().status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            authorize(&config, &HeaderMap::new()).unwrap_err().status(),
            StatusCode::UNAUTHORIZED
        );
    }

    #[test]
    fn json_params_accept_aliases_and_reject_garbage() {
        let params: HashMap<String, String> = [("start_key".to_string(), "\"b\"".to_string())].into();
        assert_eq!(json_param(&params, &["startkey", "start_key"]).unwrap(), Some(json!("b")));

        let params: HashMap<String, String> = [("key".to_string(), "b".to_string())].into();
        assert!(json_param(&params, &["key"]).is_err());
    }

    #[test]
    fn key_range_bounds() {
        let range = KeyRange {
            key: None,
            start: Some(json!("b")),
            end: Some(json!("d")),
            descending: false,
            inclusive_end: false,
        };
        assert!(!range.contains("a"));
        assert!(range.contains("b"));
        assert!(range.contains("c"));
        assert!(!range.contains("d"));

        let descending = KeyRange {
            descending: true,
            inclusive_end: true,
            start: Some(json!("d")),
            end: Some(json!("b")),
            key: None,
        };
        assert!(descending.contains("d"));
        assert!(descending.contains("b"));
        assert!(!descending.contains("e"));
    }

    #[test]
    fn array_start_key_sorts_after_every_id() {
        let range = KeyRange {
            key: None,
            start: Some(json!(["Ann"])),
            end: None,
            descending: false,
            inclusive_end: true,
        };
        assert!(!range.contains("zzz"));
    }

    #[test]
    fn config_builders() {
        let config = MockConfig::default().with_version("1.6.1").with_admin("a", "b");
        assert_eq!(config.version, "1.6.1");
        assert_eq!(config.admin.unwrap().user, "a");
    }
}
