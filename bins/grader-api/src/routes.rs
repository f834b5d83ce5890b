// Route table for the grader API

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::handlers;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/grade", post(handlers::submit))
        .route(
            "/grade/:job_id",
            get(handlers::get_result).delete(handlers::cancel),
        )
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics))
}
