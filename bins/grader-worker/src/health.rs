// Liveness and occupancy endpoints for the worker process

use crate::pool::{PoolMonitor, PoolStatus};
use axum::{extract::State, routing::get, Json, Router};
use serde_json::{json, Value};
use std::net::SocketAddr;
use tracing::info;

pub fn router(monitor: PoolMonitor) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .with_state(monitor)
}

pub async fn serve(addr: SocketAddr, monitor: PoolMonitor) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Health server listening on {}", addr);
    axum::serve(listener, router(monitor)).await?;
    Ok(())
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn status(State(monitor): State<PoolMonitor>) -> Json<PoolStatus> {
    Json(monitor.status())
}
