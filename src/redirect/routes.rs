use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::handlers::{health_check, redirect_url, RedirectState};

/// Router of the public redirect server. Must be served with
/// `into_make_service_with_connect_info::<SocketAddr>()`.
pub fn create_redirect_router(state: Arc<RedirectState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/{short_id}", get(redirect_url))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
