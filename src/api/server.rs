//! HTTP REST surface over the supervisor.
//!
//! Handlers only call [`Supervisor`] operations, which in turn only touch the
//! registry; no request ever waits on an agent's output.

use std::future::Future;
use std::net::SocketAddr;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use super::types::{
    ActiveWorkflowSummary, ActiveWorkflowsResponse, CancelWorkflowResponse,
    CreateWorkflowRequest, CreateWorkflowResponse, ErrorBody, HealthResponse,
    WorkflowStatusResponse,
};
use crate::error::OasisError;
use crate::supervisor::Supervisor;

/// An error rendered as `{"status": "error", "message": ...}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl From<OasisError> for ApiError {
    fn from(err: OasisError) -> Self {
        let status = match &err {
            OasisError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            OasisError::WorkflowNotFound(_) => StatusCode::NOT_FOUND,
            OasisError::WorkflowActive(_) => StatusCode::CONFLICT,
            OasisError::Config(_) | OasisError::Io(_) | OasisError::Toml(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody::new(self.message))).into_response()
    }
}

/// All routes, open to cross-origin callers such as a browser dashboard.
pub fn router(supervisor: Supervisor) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/v1/workflow/execute", post(execute_handler))
        .route("/api/v1/workflow/active", get(active_handler))
        .route("/api/v1/workflow/{id}/status", get(status_handler))
        .route("/api/v1/workflow/{id}", delete(cancel_handler))
        .layer(CorsLayer::permissive())
        .with_state(supervisor)
}

/// Bind `listen_addr` and serve until `shutdown` resolves.
pub async fn serve(
    listen_addr: &str,
    supervisor: Supervisor,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), OasisError> {
    let addr: SocketAddr = listen_addr
        .parse()
        .map_err(|e| OasisError::Config(format!("invalid listen address {listen_addr:?}: {e}")))?;
    let listener = TcpListener::bind(addr).await?;
    serve_on(listener, supervisor, shutdown).await
}

/// Serve on an already bound listener.
pub async fn serve_on(
    listener: TcpListener,
    supervisor: Supervisor,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), OasisError> {
    info!(addr = ?listener.local_addr().ok(), "starting HTTP server");
    axum::serve(listener, router(supervisor))
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("HTTP server stopped");
    Ok(())
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        message: "Oasis workflow supervisor is running".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn execute_handler(
    State(supervisor): State<Supervisor>,
    body: Result<Json<CreateWorkflowRequest>, JsonRejection>,
) -> Result<Json<CreateWorkflowResponse>, ApiError> {
    let Json(request) = body?;
    let record = supervisor
        .submit(&request.query, request.model.as_deref())
        .inspect_err(|e| warn!(error = %e, "rejected workflow request"))?;
    Ok(Json(CreateWorkflowResponse::from(&record)))
}

async fn status_handler(
    State(supervisor): State<Supervisor>,
    Path(id): Path<String>,
) -> Result<Json<WorkflowStatusResponse>, ApiError> {
    let record = supervisor.status(&id)?;
    Ok(Json(WorkflowStatusResponse::from(record)))
}

async fn cancel_handler(
    State(supervisor): State<Supervisor>,
    Path(id): Path<String>,
) -> Result<Json<CancelWorkflowResponse>, ApiError> {
    let record = supervisor.cancel(&id).await?;
    Ok(Json(CancelWorkflowResponse::from(&record)))
}

async fn active_handler(State(supervisor): State<Supervisor>) -> Json<ActiveWorkflowsResponse> {
    let active_workflows = supervisor
        .active()
        .iter()
        .map(ActiveWorkflowSummary::from)
        .collect();
    Json(ActiveWorkflowsResponse { active_workflows })
}
