//! Public redirect server: resolution, visit dispatch and HTTP surface.

pub mod dispatcher;
pub mod handlers;
pub mod resolver;
pub mod routes;

pub use dispatcher::{Visit, VisitDispatcher};
pub use handlers::RedirectState;
pub use resolver::{RedirectResolver, Resolution};
pub use routes::create_redirect_router;
