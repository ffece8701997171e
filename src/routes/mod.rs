pub mod auth;
pub mod billing;
pub mod dashboard;
pub mod integrations;
pub mod publishing;
pub mod search;

use axum::{Router, routing::get};
use std::sync::Arc;

use crate::AppState;

async fn health() -> &'static str {
    "ok"
}

/// Build all routes for the API
pub fn build_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(health))
        .merge(billing::routes())
        .merge(dashboard::routes())
        .merge(integrations::routes())
        .merge(publishing::routes())
        .merge(search::routes())
}
