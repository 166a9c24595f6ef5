use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::handlers;
use crate::state::AppState;

/// Create the main application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/status", get(handlers::status))
        .route("/config", get(handlers::show_config))
        .route("/targets/:id/action", post(handlers::trigger_action))
        .route("/fleet/action", post(handlers::trigger_fleet_action))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            handlers::access_filter,
        ));

    Router::new()
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
