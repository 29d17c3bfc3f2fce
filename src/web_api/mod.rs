//! WebAPI - read-only health/metrics surface
//!
//! ## Responsibilities
//!
//! - GET /health - liveness + active session count
//! - GET /metrics - aggregate counters from a live registry read
//! - GET /cameras - per-session snapshots

use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::orchestrator::SessionOrchestrator;

/// Health response
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    active: usize,
}

/// Create the API router
pub fn create_router(orchestrator: Arc<SessionOrchestrator>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/cameras", get(cameras))
        .layer(TraceLayer::new_for_http())
        .with_state(orchestrator)
}

/// Serve the API on the given port until the process exits
pub async fn serve(orchestrator: Arc<SessionOrchestrator>, port: u16) -> crate::error::Result<()> {
    let app = create_router(orchestrator);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port = port, "HTTP surface listening");
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health(State(orchestrator): State<Arc<SessionOrchestrator>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        active: orchestrator.active_count().await,
    })
}

async fn metrics(State(orchestrator): State<Arc<SessionOrchestrator>>) -> impl IntoResponse {
    Json(orchestrator.metrics().await)
}

async fn cameras(State(orchestrator): State<Arc<SessionOrchestrator>>) -> impl IntoResponse {
    Json(orchestrator.session_snapshots().await)
}
