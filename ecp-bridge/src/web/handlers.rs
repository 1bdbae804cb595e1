//! HTTP endpoint handlers.
//!
//! Handlers never fail on transport problems: publish failures come back as
//! error-annotated receipts and drain failures as a shorter (possibly empty)
//! list.

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::amqp::Transport;
use crate::exchange::{
    DrainOptions, Drainer, PublishOptions, PublishReceipt, Publisher, ReceivedRecord,
};
use crate::Config;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub publisher: Publisher,
    pub drainer: Drainer,
}

impl AppState {
    pub fn new(config: Config, transport: Arc<dyn Transport>) -> Self {
        let target = Arc::new(config.target());

        let publisher = Publisher::new(Arc::clone(&target), Arc::clone(&transport))
            .with_timeout(config.publish_timeout);
        let drainer = Drainer::new(target, transport)
            .with_timeouts(config.drain_timeout, config.receive_timeout);

        Self {
            config: Arc::new(config),
            publisher,
            drainer,
        }
    }
}

// =============================================================================
// Health Check
// =============================================================================

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

// =============================================================================
// Publish
// =============================================================================

/// Receipt as returned to HTTP callers.
#[derive(Debug, Serialize)]
pub struct PublishedItem {
    #[serde(flatten)]
    pub receipt: PublishReceipt,
    /// Same as `baCorrelationId`
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_updated")]
    pub updated: DateTime<Utc>,
}

impl From<PublishReceipt> for PublishedItem {
    fn from(receipt: PublishReceipt) -> Self {
        Self {
            id: receipt.properties.correlation_id.clone(),
            updated: Utc::now(),
            receipt,
        }
    }
}

/// Document text of a batch item. Non-string values are rendered as JSON.
fn item_document(item: &Map<String, Value>) -> String {
    match item.get("xml") {
        Some(Value::String(xml)) => xml.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

/// Per-item overrides of queue and business properties.
fn item_options(item: &Map<String, Value>) -> PublishOptions {
    let text = |key: &str| item.get(key).and_then(Value::as_str).map(str::to_string);
    PublishOptions {
        queue: text("queue"),
        label: text("label"),
        sender: text("sender"),
        recipient: text("recipient"),
    }
}

async fn publish_item(state: &AppState, item: &Map<String, Value>) -> PublishReceipt {
    let document = item_document(item);
    state.publisher.send(&document, &item_options(item)).await
}

/// Publish endpoint.
///
/// Accepts a JSON array of items carrying the document in `xml` and
/// publishes them one after another. A missing or unparseable body yields
/// an empty array.
pub async fn publish_documents(
    State(state): State<AppState>,
    body: Option<Json<Vec<Map<String, Value>>>>,
) -> Json<Vec<PublishedItem>> {
    let Some(Json(items)) = body else {
        warn!("publish_body_missing");
        return Json(Vec::new());
    };

    info!(items = items.len(), "publish_batch_received");

    let mut published = Vec::with_capacity(items.len());
    for item in &items {
        published.push(PublishedItem::from(publish_item(&state, item).await));
    }

    let failed = published
        .iter()
        .filter(|item| item.receipt.error.is_some())
        .count();
    info!(items = published.len(), failed = failed, "publish_batch_complete");

    Json(published)
}

/// Test endpoint: publishes like `publish_documents` but echoes each input
/// item with its receipt under `ecp-publish`.
pub async fn test_publish(
    State(state): State<AppState>,
    body: Option<Json<Vec<Map<String, Value>>>>,
) -> Json<Vec<Map<String, Value>>> {
    let Some(Json(items)) = body else {
        return Json(Vec::new());
    };

    let mut echoed = Vec::with_capacity(items.len());
    for mut item in items {
        let receipt = publish_item(&state, &item).await;
        let receipt = serde_json::to_value(receipt).unwrap_or(Value::Null);
        item.insert("ecp-publish".to_string(), receipt);
        echoed.push(item);
    }

    Json(echoed)
}

// =============================================================================
// Read replies
// =============================================================================

/// Query parameters for the read endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct ReadParams {
    pub limit: Option<usize>,
}

/// Read endpoint: drains the configured reply queue.
///
/// An unparseable `limit` is ignored, so the answer is always a JSON list.
pub async fn read_replies(
    State(state): State<AppState>,
    params: Option<Query<ReadParams>>,
) -> Json<Vec<ReceivedRecord>> {
    let limit = match params {
        Some(Query(params)) => params.limit,
        None => {
            warn!("read_limit_invalid");
            None
        }
    };

    let drained = state
        .drainer
        .drain(&DrainOptions {
            limit,
            ..Default::default()
        })
        .await;

    if let Some(e) = &drained.error {
        warn!(queue = %drained.queue, error = %e, "read_replies_partial");
    }

    Json(drained.into_records())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amqp::memory::{reply, InMemoryBroker};
    use crate::web::router;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::time::Duration;
    use tower::ServiceExt;

    fn config() -> Config {
        Config {
            host: "broker.test".to_string(),
            port: 5672,
            url_override: None,
            send_queue: "edx.endpoint.outbox".to_string(),
            reply_queue: "edx.endpoint.reply".to_string(),
            label: Some("A01".to_string()),
            sender: Some("fos".to_string()),
            recipient: Some("10X1001A1001A450".to_string()),
            message_id_prefix: None,
            publish_timeout: Duration::from_secs(1),
            drain_timeout: Duration::from_secs(1),
            receive_timeout: Duration::from_secs(1),
            prefetch_window: Duration::from_millis(10),
            http_port: 5000,
            log_level: "info".to_string(),
        }
    }

    fn app(broker: &InMemoryBroker) -> axum::Router {
        router(AppState::new(config(), Arc::new(broker.clone())))
    }

    async fn call(app: axum::Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[test]
    fn test_item_document_and_options() {
        let item: Map<String, Value> = serde_json::from_str(
            r#"{"xml": "<doc/>", "queue": "other", "label": "A02", "sender": 5}"#,
        )
        .unwrap();

        assert_eq!(item_document(&item), "<doc/>");
        let options = item_options(&item);
        assert_eq!(options.queue.as_deref(), Some("other"));
        assert_eq!(options.label.as_deref(), Some("A02"));
        assert_eq!(options.sender, None);
        assert_eq!(options.recipient, None);

        assert_eq!(item_document(&Map::new()), "");
    }

    #[tokio::test]
    async fn test_health() {
        let broker = InMemoryBroker::new();
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();

        let (status, body) = call(app(&broker), request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_publish_batch() {
        let broker = InMemoryBroker::new();

        let (status, body) = call(
            app(&broker),
            post_json("/", r#"[{"xml": "<a/>"}, {"xml": "<b/>", "queue": "other"}]"#),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let items = body.as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["queue"], "edx.endpoint.outbox");
        assert_eq!(items[1]["queue"], "other");
        for item in items {
            assert_eq!(item["_id"], item["baCorrelationId"]);
            assert_eq!(item["_id"], item["correlation_id"]);
            assert!(item["published"].is_string());
            assert!(item["_updated"].is_string());
            assert!(item.get("error").is_none());
        }
        assert_eq!(broker.sent().len(), 2);
    }

    #[tokio::test]
    async fn test_publish_without_body_returns_empty_list() {
        let broker = InMemoryBroker::new();
        let request = Request::builder()
            .method("POST")
            .uri("/")
            .body(Body::empty())
            .unwrap();

        let (status, body) = call(app(&broker), request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!([]));
        assert_eq!(broker.connections_opened(), 0);
    }

    #[tokio::test]
    async fn test_publish_with_broker_down_reports_in_band() {
        let broker = InMemoryBroker::new();
        broker.set_reachable(false);

        let (status, body) = call(app(&broker), post_json("/", r#"[{"xml": "<a/>"}]"#)).await;

        assert_eq!(status, StatusCode::OK);
        let item = &body[0];
        assert!(item["error"].is_string());
        assert!(item.get("published").is_none());
        assert!(item["correlation_id"].is_string());
    }

    #[tokio::test]
    async fn test_test_endpoint_echoes_items() {
        let broker = InMemoryBroker::new();

        let (status, body) = call(
            app(&broker),
            post_json("/test", r#"[{"xml": "<a/>", "_id": "source-1"}]"#),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["_id"], "source-1");
        assert_eq!(body[0]["xml"], "<a/>");
        assert!(body[0]["ecp-publish"]["published"].is_string());
    }

    #[tokio::test]
    async fn test_read_drains_reply_queue() {
        let broker = InMemoryBroker::new();
        broker.enqueue("edx.endpoint.reply", reply("<Ack><mRID>1</mRID></Ack>", "c-1", &[]));
        broker.enqueue("edx.endpoint.reply", reply("<Ack><mRID>2</mRID></Ack>", "c-2", &[]));

        let request = Request::builder().uri("/read").body(Body::empty()).unwrap();
        let (status, body) = call(app(&broker), request).await;

        assert_eq!(status, StatusCode::OK);
        let records = body.as_array().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["correlation_id"], "c-1");
        assert_eq!(records[0]["Ack"]["mRID"], "1");
        assert!(records[1]["_id"].is_string());
        assert_eq!(broker.depth("edx.endpoint.reply"), 0);
    }

    #[tokio::test]
    async fn test_read_with_limit_and_root_get() {
        let broker = InMemoryBroker::new();
        for n in 0..3 {
            broker.enqueue("edx.endpoint.reply", reply("<Ack/>", &format!("c-{}", n), &[]));
        }

        let request = Request::builder().uri("/?limit=1").body(Body::empty()).unwrap();
        let (_, body) = call(app(&broker), request).await;

        assert_eq!(body.as_array().unwrap().len(), 1);
        assert_eq!(broker.depth("edx.endpoint.reply"), 2);
    }

    #[tokio::test]
    async fn test_read_with_invalid_limit_still_answers_json() {
        let broker = InMemoryBroker::new();
        broker.enqueue("edx.endpoint.reply", reply("<Ack/>", "c-1", &[]));

        let request = Request::builder()
            .uri("/read?limit=abc")
            .body(Body::empty())
            .unwrap();
        let (status, body) = call(app(&broker), request).await;

        assert_eq!(status, StatusCode::OK);
        let records = body.as_array().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0]["correlation_id"], "c-1");
    }

    #[tokio::test]
    async fn test_read_with_broker_down_returns_empty_list() {
        let broker = InMemoryBroker::new();
        broker.set_reachable(false);

        let request = Request::builder()
            .method("POST")
            .uri("/read")
            .body(Body::empty())
            .unwrap();
        let (status, body) = call(app(&broker), request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, serde_json::json!([]));
    }
}
