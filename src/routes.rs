use axum::{
    routing::{get, post},
    Router,
};

use crate::events;

async fn healthz() -> &'static str {
    "ok"
}

/// Expects `Arc<CommandDispatcher>`, `ReconciliationHandle` and `EventSecret` extensions.
pub fn api_routes() -> Router {
    Router::new()
        .route("/onebot/events", post(events::onebot_events))
        .route("/healthz", get(healthz))
}
