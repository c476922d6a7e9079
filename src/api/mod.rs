#![forbid(unsafe_code)]

// Control API module - HTTP boundary for the stress-test controller

pub mod protocol;

use crate::metrics::SwarmMetrics;
use crate::session::SessionController;
use crate::swarm::SwarmError;
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use protocol::{ErrorBody, StartRequest};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

/// Control API server state
#[derive(Clone)]
pub struct ControlServer {
    controller: Arc<SessionController>,
    metrics: SwarmMetrics,
}

impl ControlServer {
    pub fn new(controller: Arc<SessionController>, metrics: SwarmMetrics) -> Self {
        Self { controller, metrics }
    }

    /// Creates the Axum router for the control API
    pub fn router(self) -> Router {
        Router::new()
            .route("/api/start_test", post(start_test_handler))
            .route("/api/stop_test", post(stop_test_handler))
            .route("/api/status", get(status_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(self)
            .layer(CorsLayer::permissive())
    }

    /// Starts the control API on the specified port
    ///
    /// # Errors
    /// Returns an error if the server fails to bind to the port
    pub async fn serve(self, port: u16) -> anyhow::Result<()> {
        let addr = format!("0.0.0.0:{port}");
        info!("Starting control API on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr).await?;
        let app = self.router();

        axum::serve(listener, app).await?;

        Ok(())
    }
}

/// POST /api/start_test. Returns once scheduling has been accepted;
/// connecting proceeds asynchronously.
async fn start_test_handler(
    State(server): State<ControlServer>,
    Json(req): Json<StartRequest>,
) -> Response {
    match server.controller.start_session(&req).await {
        Ok(resp) => (StatusCode::OK, Json(resp)).into_response(),
        Err(e) => error_response(&e),
    }
}

/// POST /api/stop_test. No body required; returns once teardown completes
/// or the teardown timeout fires.
async fn stop_test_handler(State(server): State<ControlServer>) -> Response {
    match server.controller.stop_session().await {
        Ok(resp) => (StatusCode::OK, Json(resp)).into_response(),
        Err(e) => error_response(&e),
    }
}

/// GET /api/status, a non-mutating session snapshot
async fn status_handler(State(server): State<ControlServer>) -> Response {
    Json(server.controller.snapshot().await).into_response()
}

/// Health check handler
async fn health_handler(State(server): State<ControlServer>) -> Json<serde_json::Value> {
    let snapshot = server.controller.snapshot().await;
    Json(serde_json::json!({
        "status": "ok",
        "session": snapshot.status,
        "clients_connected": server.metrics.clients_connected_now(),
    }))
}

/// Metrics handler — Prometheus text exposition format.
/// Protected by optional METRICS_TOKEN env var (Bearer auth).
async fn metrics_handler(State(server): State<ControlServer>, headers: HeaderMap) -> Response {
    // Check bearer token if METRICS_TOKEN is configured
    if let Ok(expected) = std::env::var("METRICS_TOKEN") {
        let provided = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if provided != format!("Bearer {}", expected) {
            return StatusCode::UNAUTHORIZED.into_response();
        }
    }

    let body = server
        .metrics
        .render_prometheus(server.controller.status().is_active());
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
        .into_response()
}

/// Maps controller errors to HTTP statuses with a structured body.
fn error_response(err: &SwarmError) -> Response {
    let status = match err {
        SwarmError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        SwarmError::SessionAlreadyActive | SwarmError::NoActiveSession => StatusCode::CONFLICT,
        SwarmError::SchedulerClosed => StatusCode::SERVICE_UNAVAILABLE,
        SwarmError::ConnectionError(_) => StatusCode::BAD_GATEWAY,
    };
    let body = ErrorBody {
        success: false,
        error: err.kind().to_string(),
        message: err.to_string(),
    };
    (status, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (SwarmError::InvalidRequest("bad".to_string()), StatusCode::BAD_REQUEST),
            (SwarmError::SessionAlreadyActive, StatusCode::CONFLICT),
            (SwarmError::NoActiveSession, StatusCode::CONFLICT),
            (SwarmError::SchedulerClosed, StatusCode::SERVICE_UNAVAILABLE),
            (SwarmError::ConnectionError("down".to_string()), StatusCode::BAD_GATEWAY),
        ];
        for (err, expected) in cases {
            assert_eq!(error_response(&err).status(), expected, "{err}");
        }
    }
}
