//! HTTP surface over the publisher and the drainer.
//!
//! - `GET /health`: liveness
//! - `POST /`: publish a batch of documents
//! - `GET /`, `GET|POST /read`: drain the reply queue
//! - `POST /test`: publish and echo the input items

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

pub mod handlers;

pub use handlers::{
    health, publish_documents, read_replies, test_publish, AppState, HealthResponse,
    PublishedItem, ReadParams,
};

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/", get(read_replies).post(publish_documents))
        .route("/read", get(read_replies).post(read_replies))
        .route("/test", post(test_publish))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
