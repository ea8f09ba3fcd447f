use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::realtime::ws_handler;

use super::handlers::{
    create_url, delete_url, get_url, health_check, list_urls, owner_stats, update_url, url_stats,
    AppState,
};

/// Router of the API server: URL management, stats and the `/ws` realtime channel.
pub fn create_api_router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        .route("/urls", post(create_url).get(list_urls))
        .route(
            "/urls/{short_id}",
            get(get_url).patch(update_url).delete(delete_url),
        )
        .route("/stats/{short_id}", get(url_stats))
        .route("/users/{owner_id}/stats", get(owner_stats));

    Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(ws_handler))
        .nest("/api", api_routes)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
