//! HTTP route definitions

mod billing;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/billing/checkout/{plan}", get(billing::start_checkout))
        .route(
            "/billing/checkout/{plan}/return",
            get(billing::complete_checkout),
        )
        .route(
            "/billing/subscription/cancel",
            post(billing::cancel_subscription),
        )
        // Unauthenticated: the processor posts notifications here.
        .route("/billing/ipn", post(billing::handle_ipn))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}
