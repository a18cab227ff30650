pub mod health;
pub mod rfp;

use axum::{routing::get, routing::post, Router};
use std::sync::Arc;

use crate::app::AppState;

/// Build the API router with all routes
pub fn api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health::health_check))
        // Intake
        .route("/rfp/upload", post(rfp::upload))
        .route("/rfp/jobs/:job_id", get(rfp::get_job))
        .route("/rfp/jobs/:job_id/download", get(rfp::download))
        // Review
        .route("/rfp/extractions/:extraction_id", get(rfp::get_extraction))
        .route("/rfp/extractions/:extraction_id/verify", post(rfp::verify))
}
