//! HTTP and SSE transport
//!
//! Exposes the session registry over a small JSON API. Live output is
//! served as Server-Sent Events with `snapshot`, `data` and `exit` events.

use std::collections::HashMap;
use std::convert::Infallible;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::core::Snapshot;
use crate::session::{self, CreateRequest, PtyInfo, Registry};

/// Error returned by API handlers
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Session(#[from] session::Error),

    #[error("Malformed request: {0}")]
    Parse(String),
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Parse(rejection.body_text())
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Session(session::Error::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Session(session::Error::InvalidArgument(_)) | ApiError::Parse(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Session(session::Error::Write { .. }) => StatusCode::CONFLICT,
            ApiError::Session(session::Error::Spawn(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "request failed");
        } else {
            debug!(error = %self, status = status.as_u16(), "request rejected");
        }
        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn default_cols() -> u16 {
    80
}

fn default_rows() -> u16 {
    24
}

#[derive(Debug, Deserialize)]
pub struct CreateBody {
    pub cmd: Vec<String>,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default = "default_cols")]
    pub cols: u16,
    #[serde(default = "default_rows")]
    pub rows: u16,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateResponse {
    #[serde(rename = "ptyID")]
    pub pty_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ListResponse {
    pub ptys: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct ResizeBody {
    pub cols: u16,
    pub rows: u16,
}

/// `{data}` body shared by input, snapshot and restore
#[derive(Debug, Serialize, Deserialize)]
pub struct DataBody {
    pub data: String,
}

/// Build the API router
pub fn router(registry: Arc<Registry>) -> Router {
    Router::new()
        .route("/session/:session_id/pty", post(create_pty).get(list_ptys))
        .route(
            "/session/:session_id/pty/:pty_id",
            get(pty_info).delete(kill_pty),
        )
        .route("/session/:session_id/pty/:pty_id/input", post(write_input))
        .route("/session/:session_id/pty/:pty_id/resize", post(resize_pty))
        .route("/session/:session_id/pty/:pty_id/snapshot", get(snapshot))
        .route("/session/:session_id/pty/:pty_id/restore", post(restore))
        .route("/session/:session_id/pty/:pty_id/stream", get(stream))
        .with_state(registry)
}

async fn create_pty(
    State(registry): State<Arc<Registry>>,
    Path(session_id): Path<String>,
    body: Result<Json<CreateBody>, JsonRejection>,
) -> ApiResult<Json<CreateResponse>> {
    let Json(body) = body?;
    let request = CreateRequest {
        cmd: body.cmd,
        cwd: body.cwd,
        env: body.env,
        cols: body.cols,
        rows: body.rows,
    };
    let pty_id = registry.create(&session_id, request).await?;
    Ok(Json(CreateResponse { pty_id }))
}

async fn list_ptys(
    State(registry): State<Arc<Registry>>,
    Path(session_id): Path<String>,
) -> Json<ListResponse> {
    Json(ListResponse {
        ptys: registry.list(&session_id),
    })
}

async fn pty_info(
    State(registry): State<Arc<Registry>>,
    Path((session_id, pty_id)): Path<(String, String)>,
) -> ApiResult<Json<PtyInfo>> {
    Ok(Json(registry.info(&session_id, &pty_id)?))
}

async fn write_input(
    State(registry): State<Arc<Registry>>,
    Path((session_id, pty_id)): Path<(String, String)>,
    body: Result<Json<DataBody>, JsonRejection>,
) -> ApiResult<StatusCode> {
    let Json(body) = body?;
    registry.input(&session_id, &pty_id, body.data.as_bytes())?;
    Ok(StatusCode::OK)
}

async fn resize_pty(
    State(registry): State<Arc<Registry>>,
    Path((session_id, pty_id)): Path<(String, String)>,
    body: Result<Json<ResizeBody>, JsonRejection>,
) -> ApiResult<StatusCode> {
    let Json(body) = body?;
    registry.resize(&session_id, &pty_id, body.cols, body.rows)?;
    Ok(StatusCode::OK)
}

async fn snapshot(
    State(registry): State<Arc<Registry>>,
    Path((session_id, pty_id)): Path<(String, String)>,
) -> ApiResult<Json<DataBody>> {
    let snapshot = registry.snapshot(&session_id, &pty_id)?;
    Ok(Json(DataBody {
        data: snapshot.encode(),
    }))
}

async fn restore(
    State(registry): State<Arc<Registry>>,
    Path((session_id, pty_id)): Path<(String, String)>,
    body: Result<Json<DataBody>, JsonRejection>,
) -> ApiResult<StatusCode> {
    let Json(body) = body?;
    let snapshot = Snapshot::decode(&body.data).map_err(|e| ApiError::Parse(e.to_string()))?;
    registry.restore(&session_id, &pty_id, &snapshot)?;
    Ok(StatusCode::OK)
}

async fn stream(
    State(registry): State<Arc<Registry>>,
    Path((session_id, pty_id)): Path<(String, String)>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    // Resolve before responding so unknown PTYs get a plain 404
    let subscription = registry.subscribe(&session_id, &pty_id)?;
    let events = subscription.into_stream().map(|event| {
        Ok(Event::default()
            .event(event.name())
            .data(event.payload().to_string()))
    });
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

async fn kill_pty(
    State(registry): State<Arc<Registry>>,
    Path((session_id, pty_id)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    registry.kill(&session_id, &pty_id)?;
    Ok(StatusCode::OK)
}

/// Periodically drop PTYs that exited longer than `retention` ago
pub fn spawn_reaper(
    registry: Arc<Registry>,
    interval: Duration,
    retention: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let reaped = registry.reap_exited(retention);
            if reaped > 0 {
                info!(reaped, "reaped exited PTYs");
            }
        }
    })
}

/// Resolve once `signal` fires. If the handler could not be installed,
/// never resolve rather than stopping the server at startup.
pub async fn shutdown_signal<F>(signal: F)
where
    F: Future<Output = std::io::Result<()>>,
{
    if let Err(e) = signal.await {
        error!(error = %e, "failed to install shutdown signal handler");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

/// Serve the API on `listener` until `shutdown` resolves, then kill every PTY
pub async fn serve<F>(
    listener: TcpListener,
    registry: Arc<Registry>,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "listening");
    }
    let app = router(Arc::clone(&registry));
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await;
    if let Err(e) = &result {
        warn!(error = %e, "server stopped with error");
    }
    registry.shutdown().await;
    result
}
