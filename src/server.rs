//! HTTP surface of the hub.
//!
//! **Records:**
//! - `GET    /data`: paginated listing (`offset`, `limit`, `sort`, `set`)
//! - `POST   /data`: create from an XML body
//! - `GET    /data/{id}`: one record, HAL JSON or raw XML (`?format=xml`
//!   or an XML `Accept` header)
//! - `PUT    /data/{id}`: create or replace
//! - `DELETE /data/{id}`: remove
//!
//! **Sets:**
//! - `GET /sets`: paginated listing
//! - `GET /sets/{spec}`
//!
//! **Health:**
//! - `GET /health`

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;
use tower_http::cors::CorsLayer;

use crate::config::HubConfig;
use crate::error::ResolveError;
use crate::model::{Record, Set};
use crate::resolver::{PutOutcome, RecordResolver};
use crate::store::{PageRequest, Sort};

// ── State ────────────────────────────────────────────────────────────────

/// Shared by every handler. Immutable after startup.
pub struct AppState {
    pub resolver: RecordResolver,
    pub config: HubConfig,
}

impl AppState {
    pub fn new(resolver: RecordResolver, config: HubConfig) -> Self {
        Self { resolver, config }
    }
}

// ── Errors ───────────────────────────────────────────────────────────────

/// Request failure with its HTTP status.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Internal(String),
}

impl ServerError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServerError::Resolve(ResolveError::MissingBody) => StatusCode::UNPROCESSABLE_ENTITY,
            ServerError::Resolve(ResolveError::MalformedInput { .. }) => StatusCode::BAD_REQUEST,
            ServerError::Resolve(ResolveError::IdentifierConflict { .. }) => StatusCode::CONFLICT,
            ServerError::Resolve(ResolveError::StorageWriteFailure { .. }) => StatusCode::BAD_REQUEST,
            ServerError::Resolve(ResolveError::NotFound { .. }) => StatusCode::NOT_FOUND,
            ServerError::Resolve(ResolveError::Configuration { .. }) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
            ServerError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            ServerError::Resolve(ResolveError::MissingBody) => "missing_body",
            ServerError::Resolve(ResolveError::MalformedInput { .. }) => "malformed_input",
            ServerError::Resolve(ResolveError::IdentifierConflict { .. }) => "conflict",
            ServerError::Resolve(ResolveError::StorageWriteFailure { .. }) => "storage",
            ServerError::Resolve(ResolveError::NotFound { .. }) | ServerError::NotFound(_) => {
                "not_found"
            }
            ServerError::Resolve(ResolveError::Configuration { .. }) => "configuration",
            ServerError::BadRequest(_) => "bad_request",
            ServerError::Internal(_) => "internal",
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        ServerError::BadRequest(msg.into())
    }
}

/// JSON error body.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub status: u16,
    #[serde(rename = "type")]
    pub error_type: String,
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::debug!(error = %self, status = status.as_u16(), "request rejected");
        }
        let body = ErrorResponse {
            error: self.to_string(),
            status: status.as_u16(),
            error_type: self.error_type().to_string(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ServerError>;

// ── Representations ──────────────────────────────────────────────────────

fn record_href(record_id: &str) -> String {
    format!("/data/{}", urlencoding::encode(record_id))
}

fn set_href(spec: &str) -> String {
    format!("/sets/{}", urlencoding::encode(spec))
}

fn link(href: String) -> Value {
    json!({ "href": href })
}

/// HAL representation of a record, with its structured mapping decoded.
fn record_resource(record: &Record) -> ApiResult<Value> {
    let content = record
        .json_value()
        .map_err(|e| ServerError::Internal(format!("stored record mapping is corrupt: {e}")))?;
    let href = record_href(record.canonical_id().unwrap_or_default());
    Ok(json!({
        "id": record.id,
        "recordIds": record.record_ids,
        "objectIds": record.object_ids,
        "sets": record.sets,
        "json": content,
        "_links": {
            "self": link(href),
            "sets": record.sets.iter().map(|s| link(set_href(s))).collect::<Vec<_>>(),
        },
    }))
}

fn set_resource(set: &Set) -> Value {
    json!({
        "spec": set.spec,
        "name": set.name,
        "_links": {
            "self": link(set_href(&set.spec)),
            "records": link(format!("/data?set={}", urlencoding::encode(&set.spec))),
        },
    })
}

/// `self`, `first`, and where they exist `next` and `previous`.
fn page_links(base: &str, extra: &str, offset: usize, limit: usize, total: usize) -> Value {
    let href = |offset: usize| link(format!("{base}?offset={offset}&limit={limit}{extra}"));
    let mut links = serde_json::Map::new();
    links.insert("self".into(), href(offset));
    links.insert("first".into(), href(0));
    let next = offset.saturating_add(limit);
    if next < total {
        links.insert("next".into(), href(next));
    }
    if offset > 0 {
        links.insert("previous".into(), href(offset.saturating_sub(limit)));
    }
    Value::Object(links)
}

// ── Paging parameters ────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    offset: Option<String>,
    limit: Option<String>,
    sort: Option<String>,
    set: Option<String>,
}

fn parse_offset(raw: Option<&str>) -> ApiResult<usize> {
    match raw {
        None | Some("") => Ok(0),
        Some(s) => s
            .parse()
            .map_err(|_| ServerError::bad_request(format!("offset \"{s}\" is not a number"))),
    }
}

fn parse_limit(raw: Option<&str>, config: &HubConfig) -> ApiResult<usize> {
    let max = config.records.max_limit;
    let Some(s) = raw.filter(|s| !s.is_empty()) else {
        return Ok(config.records.default_limit);
    };
    match s.parse::<usize>() {
        Ok(n) if (1..=max).contains(&n) => Ok(n),
        _ => Err(ServerError::bad_request(format!(
            "limit \"{s}\" must be a number between 1 and {max}"
        ))),
    }
}

impl ListParams {
    fn page(&self, config: &HubConfig) -> ApiResult<PageRequest> {
        let sort = match self.sort.as_deref().filter(|s| !s.is_empty()) {
            None => None,
            Some(s) => Some(Sort::parse(s).ok_or_else(|| {
                ServerError::bad_request(format!(
                    "sort \"{s}\" must be <id|recordIds>,<asc|desc>"
                ))
            })?),
        };
        Ok(PageRequest {
            offset: parse_offset(self.offset.as_deref())?,
            limit: parse_limit(self.limit.as_deref(), config)?,
            sort,
            set: self.set.clone().filter(|s| !s.is_empty()),
        })
    }

    /// Query-string suffix carrying the filter and sort into paging links.
    fn link_suffix(&self) -> String {
        let mut suffix = String::new();
        for (key, value) in [("sort", &self.sort), ("set", &self.set)] {
            if let Some(value) = value.as_deref().filter(|v| !v.is_empty()) {
                suffix.push_str(&format!("&{key}={}", urlencoding::encode(value)));
            }
        }
        suffix
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct FormatParams {
    format: Option<String>,
}

/// `?format=` wins; otherwise an `Accept` header naming XML and not JSON.
fn wants_xml(params: &FormatParams, headers: &HeaderMap) -> bool {
    if let Some(format) = params.format.as_deref() {
        return format.eq_ignore_ascii_case("xml");
    }
    headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains("xml") && !accept.contains("json"))
}

// ── Handlers ─────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    records: usize,
    sets: usize,
    rules: usize,
}

async fn health(State(state): State<Arc<AppState>>) -> ApiResult<Json<HealthResponse>> {
    let store = state.resolver.store();
    Ok(Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        records: store.count_records(None).map_err(ResolveError::from)?,
        sets: store.count_sets().map_err(ResolveError::from)?,
        rules: state.resolver.classifier().len(),
    }))
}

async fn list_records(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Value>> {
    let page = params.page(&state.config)?;
    let (records, total) = state.resolver.list(&page)?;
    let records = records
        .iter()
        .map(record_resource)
        .collect::<ApiResult<Vec<_>>>()?;
    Ok(Json(json!({
        "offset": page.offset,
        "limit": page.limit,
        "total": total,
        "_links": page_links("/data", &params.link_suffix(), page.offset, page.limit, total),
        "_embedded": { "records": records },
    })))
}

fn created(record: &Record) -> ApiResult<Response> {
    let location = record_href(record.canonical_id().unwrap_or_default());
    let location = HeaderValue::from_str(&location)
        .map_err(|e| ServerError::Internal(format!("invalid location header: {e}")))?;
    Ok((
        StatusCode::CREATED,
        [(header::LOCATION, location)],
        Json(record_resource(record)?),
    )
        .into_response())
}

async fn create_record(State(state): State<Arc<AppState>>, body: Bytes) -> ApiResult<Response> {
    let record = state.resolver.create(&body)?;
    created(&record)
}

async fn get_record(
    State(state): State<Arc<AppState>>,
    Path(record_id): Path<String>,
    Query(format): Query<FormatParams>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let record = state.resolver.get(&record_id)?;
    if wants_xml(&format, &headers) {
        return Ok((
            [(header::CONTENT_TYPE, "application/xml; charset=utf-8")],
            record.raw,
        )
            .into_response());
    }
    Ok(Json(record_resource(&record)?).into_response())
}

async fn put_record(
    State(state): State<Arc<AppState>>,
    Path(record_id): Path<String>,
    body: Bytes,
) -> ApiResult<Response> {
    match state.resolver.put(&record_id, &body)? {
        PutOutcome::Created(record) => created(&record),
        PutOutcome::Replaced(_) => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

async fn delete_record(
    State(state): State<Arc<AppState>>,
    Path(record_id): Path<String>,
) -> ApiResult<StatusCode> {
    state.resolver.delete(&record_id)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn list_sets(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Value>> {
    let offset = parse_offset(params.offset.as_deref())?;
    let limit = parse_limit(params.limit.as_deref(), &state.config)?;
    let store = state.resolver.store();
    let sets = store.find_sets(offset, limit).map_err(ResolveError::from)?;
    let total = store.count_sets().map_err(ResolveError::from)?;
    Ok(Json(json!({
        "offset": offset,
        "limit": limit,
        "total": total,
        "_links": page_links("/sets", "", offset, limit, total),
        "_embedded": { "sets": sets.iter().map(set_resource).collect::<Vec<_>>() },
    })))
}

async fn get_set(
    State(state): State<Arc<AppState>>,
    Path(spec): Path<String>,
) -> ApiResult<Json<Value>> {
    let set = state
        .resolver
        .store()
        .find_set(&spec)
        .map_err(ResolveError::from)?
        .ok_or_else(|| ServerError::NotFound(format!("set \"{spec}\" not found")))?;
    Ok(Json(set_resource(&set)))
}

// ── Router ───────────────────────────────────────────────────────────────

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/data", get(list_records).post(create_record))
        .route(
            "/data/{*record_id}",
            get(get_record).put(put_record).delete(delete_record),
        )
        .route("/sets", get(list_sets))
        .route("/sets/{*spec}", get(get_set))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind the configured address and serve until Ctrl-C.
pub async fn serve(state: Arc<AppState>) -> std::io::Result<()> {
    let addr = format!("{}:{}", state.config.server.bind, state.config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("datahub listening on {addr}");
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutting down");
            }
        })
        .await
}
