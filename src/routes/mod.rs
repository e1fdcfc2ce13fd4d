mod events;
mod extractors;
mod sessions;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::context::AppContext;

pub use extractors::AuthenticatedUser;

pub fn create_router(context: Arc<AppContext>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/user-sessions", post(sessions::create_session))
        .route("/user-sessions/refresh", post(sessions::refresh_session))
        .route("/events", post(events::publish_event))
        .layer(TraceLayer::new_for_http())
        .with_state(context)
}

async fn health() -> &'static str {
    "OK"
}
