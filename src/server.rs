use std::convert::Infallible;
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use axum::{
    extract::{Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Form, Json, Router,
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{services::ServeDir, set_header::SetResponseHeaderLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::{
    error::ScanError,
    ports::{self, ALL_ALIAS},
    service::ScanService,
    types::ScanResult,
};

#[derive(Clone)]
pub struct AppState {
    service: ScanService,
}

#[derive(Debug, Deserialize)]
pub struct ScanRequest {
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub ports: String,
}

#[derive(Debug, Deserialize)]
pub struct SessionQuery {
    #[serde(rename = "sessionId")]
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanStarted {
    pub session_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultsResponse {
    pub results: Vec<ScanResult>,
    pub complete: bool,
    pub started_at: String,
}

impl IntoResponse for ScanError {
    fn into_response(self) -> Response {
        let status = if self.is_input_error() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::NOT_FOUND
        };
        (status, self.to_string()).into_response()
    }
}

/// Build the HTTP router: the scan API under `/api` and static files from `static_dir`.
pub fn router(service: ScanService, static_dir: impl AsRef<Path>) -> Router {
    let state = AppState { service };

    let api = Router::new()
        .route("/scan", post(post_scan))
        .route("/progress", get(get_progress))
        .route("/results", get(get_results))
        .with_state(state)
        .layer(SetResponseHeaderLayer::if_not_present(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        ));

    let static_svc = ServeDir::new(static_dir.as_ref()).append_index_html_on_directories(true);

    Router::new()
        .nest("/api", api)
        .fallback_service(static_svc)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
}

/// Serve the UI and API on `bind` until `shutdown` is cancelled, then tear down sessions.
pub async fn serve(
    bind: &str,
    service: ScanService,
    static_dir: impl AsRef<Path>,
    shutdown: CancellationToken,
) -> Result<()> {
    let app = router(service.clone(), static_dir);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("serving port scanner on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    service.teardown().await;
    Ok(())
}

/// Resolve a target to an IP: literals pass through, names take the first DNS answer.
pub async fn resolve_host(target: &str) -> Result<IpAddr, ScanError> {
    let target = target.trim();
    if target.is_empty() {
        return Err(ScanError::EmptyTarget);
    }
    if let Ok(ip) = target.parse::<IpAddr>() {
        return Ok(ip);
    }

    let resolve_err = |reason: String| ScanError::Resolve {
        target: target.to_string(),
        reason,
    };
    let mut addrs = tokio::net::lookup_host((target, 0))
        .await
        .map_err(|e| resolve_err(e.to_string()))?;
    addrs
        .next()
        .map(|addr| addr.ip())
        .ok_or_else(|| resolve_err("no addresses returned".to_string()))
}

async fn post_scan(
    State(app): State<AppState>,
    Form(req): Form<ScanRequest>,
) -> Result<Json<ScanStarted>, ScanError> {
    let spec = match req.ports.trim() {
        "" => ALL_ALIAS,
        _ => req.ports.as_str(),
    };
    let host = resolve_host(&req.target).await?;
    let port_list = ports::parse_port_spec(spec)?;

    let session_id = app.service.start_scan(host, port_list).await?;
    Ok(Json(ScanStarted { session_id }))
}

async fn get_progress(
    State(app): State<AppState>,
    Query(q): Query<SessionQuery>,
) -> Result<impl IntoResponse, ScanError> {
    let id = q.session_id.filter(|s| !s.is_empty()).ok_or(ScanError::MissingSessionId)?;
    let events = app.service.stream_progress(&id).await?;

    let sse = events.map(|ev| match Event::default().json_data(&ev) {
        Ok(event) => Ok::<_, Infallible>(event),
        Err(e) => {
            warn!("failed to encode progress event: {e}");
            Ok(Event::default().comment("encode error"))
        }
    });

    Ok(Sse::new(sse).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}

async fn get_results(
    State(app): State<AppState>,
    Query(q): Query<SessionQuery>,
) -> Result<Json<ResultsResponse>, ScanError> {
    let id = q.session_id.filter(|s| !s.is_empty()).ok_or(ScanError::MissingSessionId)?;
    let session = app.service.session(&id).await?;
    let results = session.results().await;
    let started_at = session
        .started_at()
        .format(&Rfc3339)
        .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"));

    Ok(Json(ResultsResponse {
        complete: session.is_finished(),
        results,
        started_at,
    }))
}
