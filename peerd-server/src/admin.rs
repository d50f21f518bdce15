//! Read-only HTTP endpoint for health checks and queue statistics.

use axum::{Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use peerd_core::{Observable, StatusSource};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

pub struct AdminState {
    pub host: String,
    pub status: Arc<dyn StatusSource>,
    pub targets: Vec<Arc<dyn Observable>>,
}

pub fn router(state: Arc<AdminState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/stat", get(stat_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(
    listener: TcpListener,
    state: Arc<AdminState>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

async fn health_handler(State(state): State<Arc<AdminState>>) -> impl IntoResponse {
    let status = state.status.status();
    let response = serde_json::json!({
        "host": state.host,
        "status": status.name(),
        "status_code": status.code(),
    });

    (StatusCode::OK, axum::Json(response))
}

async fn stat_handler(State(state): State<Arc<AdminState>>) -> impl IntoResponse {
    let targets: Vec<_> = state
        .targets
        .iter()
        .map(|target| {
            serde_json::json!({
                "nickname": target.nickname(),
                "fullname": target.fullname(),
                "size": target.size(),
            })
        })
        .collect();

    let response = serde_json::json!({
        "host": state.host,
        "status": state.status.status().name(),
        "targets": targets,
    });

    (StatusCode::OK, axum::Json(response))
}
