//! JSON management API consumed by the dashboard.

pub mod client;
pub mod handlers;
pub mod routes;

pub use client::{ApiClient, ApiClientError};
pub use handlers::AppState;
pub use routes::create_api_router;
