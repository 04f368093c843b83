//! HTTP server for the release mirror
//!
//! Provides /health, /_dashboard, /_dashboard.json, and a fallback handler
//! that mirrors every other GET or HEAD request.

use crate::dashboard;
use crate::error::{MirrorError, Result};
use crate::routing::{self, MirrorRule};
use crate::types::HealthResponse;
use artifact_cache::{CacheEngine, CacheStatus, ProgressRegistry, ProgressSnapshot};
use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::{Html, IntoResponse, Json, Response},
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use std::io::SeekFrom;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tower_http::cors::CorsLayer;
use tracing::info;

/// Shared state for the HTTP server
pub struct ServerState {
    pub engine: CacheEngine,
    pub progress: ProgressRegistry,
    pub rules: Vec<MirrorRule>,
    pub started_at: DateTime<Utc>,
}

impl ServerState {
    pub fn new(engine: CacheEngine, progress: ProgressRegistry, rules: Vec<MirrorRule>) -> Self {
        Self {
            engine,
            progress,
            rules,
            started_at: Utc::now(),
        }
    }
}

pub type SharedState = Arc<ServerState>;

const X_CACHE: &str = "X-Cache";

/// Create the HTTP router
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/_dashboard", get(dashboard_html))
        .route("/_dashboard.json", get(dashboard_json))
        .fallback(mirror)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the HTTP server, stopping on Ctrl-C
pub async fn start_server(state: SharedState, port: u16) -> std::io::Result<()> {
    let router = create_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!("release-mirror listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutting down");
    }
}

/// Health check endpoint
async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    let uptime_secs = (Utc::now() - state.started_at).num_seconds() as u64;

    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs,
        in_flight: state.engine.in_flight().await,
        downloading: state.progress.len(),
        cache: state.engine.stats(),
    })
}

async fn dashboard_html(State(state): State<SharedState>) -> Html<String> {
    Html(dashboard::render(&state.progress.snapshot()))
}

async fn dashboard_json(State(state): State<SharedState>) -> Json<Vec<ProgressSnapshot>> {
    Json(state.progress.snapshot())
}

/// Mirror a request: fetch it once, then serve the cached copy
async fn mirror(
    State(state): State<SharedState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    if method != Method::GET && method != Method::HEAD {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }

    let path_and_query = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
    let Some(target) = routing::resolve(&state.rules, path_and_query) else {
        return "Release Mirror".into_response();
    };
    info!(url = %target.origin_url, "Mirror request");

    let status = match state
        .engine
        .ensure_cached(&target.origin_url, &target.filename)
        .await
    {
        Ok(status) => status,
        Err(e) => return MirrorError::from(e).into_response(),
    };

    match serve_cached(&state.engine, &target.origin_url, &headers, &method, status).await {
        Ok(response) => response,
        Err(e) => e.into_response(),
    }
}

/// Single byte range requested through a `Range` header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParsedRange {
    StartEnd { start: u64, end_inclusive: Option<u64> },
    Suffix { len: u64 },
}

/// Parse `bytes=a-b`, `bytes=a-` or `bytes=-n`. Multiple ranges and other
/// units yield `None`, which serves the whole payload.
fn parse_range_header(value: &str) -> Option<ParsedRange> {
    let rest = value.trim().strip_prefix("bytes=")?;
    if rest.contains(',') {
        return None;
    }
    let (start_str, end_str) = rest.split_once('-')?;
    let (start_str, end_str) = (start_str.trim(), end_str.trim());

    if start_str.is_empty() {
        let len: u64 = end_str.parse().ok()?;
        return Some(ParsedRange::Suffix { len });
    }

    let start: u64 = start_str.parse().ok()?;
    let end_inclusive = if end_str.is_empty() {
        None
    } else {
        Some(end_str.parse::<u64>().ok()?)
    };
    Some(ParsedRange::StartEnd {
        start,
        end_inclusive,
    })
}

/// Resolve a range against the payload length as `[start, end)`, or `None`
/// when it cannot be satisfied
fn resolve_range(range: ParsedRange, total: u64) -> Option<(u64, u64)> {
    match range {
        ParsedRange::StartEnd {
            start,
            end_inclusive,
        } => {
            let end = end_inclusive.map_or(total, |end| end.saturating_add(1).min(total));
            (start < total && start < end).then_some((start, end))
        }
        ParsedRange::Suffix { len } => {
            (len > 0 && total > 0).then(|| (total.saturating_sub(len), total))
        }
    }
}

/// Stream a cached entry, answering `If-Modified-Since` with 304 and a single
/// `Range` with 206
async fn serve_cached(
    engine: &CacheEngine,
    url: &str,
    headers: &HeaderMap,
    method: &Method,
    status: CacheStatus,
) -> Result<Response> {
    let handle = engine.open(url).await?;
    let last_modified = handle.meta.fetched_at();
    let cache_header = if status == CacheStatus::Hit { "HIT" } else { "MISS" };

    let builder = Response::builder()
        .header(header::LAST_MODIFIED, http_date(&last_modified))
        .header(X_CACHE, cache_header);

    if not_modified_since(headers, &last_modified) {
        return Ok(builder.status(StatusCode::NOT_MODIFIED).body(Body::empty())?);
    }

    let mut file = handle.file;
    let total = file.metadata().await?.len();
    let builder = builder
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::CONTENT_TYPE, "application/octet-stream")
        .header(
            header::CONTENT_DISPOSITION,
            format!(
                "attachment; filename=\"{}\"",
                header_safe_filename(&handle.meta.filename)
            ),
        );

    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_range_header);

    let (builder, start, len) = match range.map(|r| resolve_range(r, total)) {
        None => (builder.status(StatusCode::OK), 0, total),
        Some(Some((start, end))) => (
            builder
                .status(StatusCode::PARTIAL_CONTENT)
                .header(
                    header::CONTENT_RANGE,
                    format!("bytes {}-{}/{}", start, end - 1, total),
                ),
            start,
            end - start,
        ),
        Some(None) => {
            return Ok(builder
                .status(StatusCode::RANGE_NOT_SATISFIABLE)
                .header(header::CONTENT_RANGE, format!("bytes */{}", total))
                .body(Body::empty())?);
        }
    };

    let body = if method == Method::HEAD {
        Body::empty()
    } else {
        if start > 0 {
            file.seek(SeekFrom::Start(start)).await?;
        }
        Body::from_stream(ReaderStream::new(file.take(len)))
    };

    Ok(builder.header(header::CONTENT_LENGTH, len).body(body)?)
}

fn http_date(time: &DateTime<Utc>) -> String {
    time.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn not_modified_since(headers: &HeaderMap, last_modified: &DateTime<Utc>) -> bool {
    headers
        .get(header::IF_MODIFIED_SINCE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| DateTime::parse_from_rfc2822(v).ok())
        .is_some_and(|since| last_modified.timestamp() <= since.timestamp())
}

fn header_safe_filename(name: &str) -> String {
    name.chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
