//! Records produced by the exchange core.
//!
//! - `BusinessProperties`: ECP application properties on every outbound message
//! - `PublishReceipt`: outcome of one publish, returned to the caller
//! - `ReceivedRecord`: one accepted reply, flattened for JSON output

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use super::xml::parse_document;
use crate::amqp::InboundMessage;
use crate::error::BodyError;

/// ECP business properties, serialized with their wire names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessProperties {
    /// Unique id of this business message
    #[serde(rename = "baMessageId")]
    pub message_id: String,
    /// Same value as the AMQP correlation id
    #[serde(rename = "baCorrelationId")]
    pub correlation_id: String,
    /// Business type label
    #[serde(rename = "businessType")]
    pub business_type: Option<String>,
    /// Recipient endpoint code
    #[serde(rename = "receiverCode")]
    pub receiver_code: Option<String>,
    /// Sending application name
    #[serde(rename = "senderApplication")]
    pub sender_application: Option<String>,
}

impl BusinessProperties {
    /// Application properties in wire order. Unset values are omitted.
    pub fn to_application_properties(&self) -> Vec<(String, String)> {
        [
            ("baMessageId", Some(&self.message_id)),
            ("baCorrelationId", Some(&self.correlation_id)),
            ("businessType", self.business_type.as_ref()),
            ("receiverCode", self.receiver_code.as_ref()),
            ("senderApplication", self.sender_application.as_ref()),
        ]
        .into_iter()
        .filter_map(|(key, value)| value.map(|v| (key.to_string(), v.clone())))
        .collect()
    }
}

/// Result of one publish call.
///
/// Always carries the correlation id and queue, even when the publish
/// failed; `published` is set only when the message was handed to the link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishReceipt {
    pub correlation_id: String,
    pub queue: String,
    /// When the publish attempt started
    pub send: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub properties: BusinessProperties,
}

impl PublishReceipt {
    pub fn is_published(&self) -> bool {
        self.published.is_some() && self.error.is_none()
    }
}

/// Keys owned by the typed part of a `ReceivedRecord`.
const RESERVED_KEYS: [&str; 4] = ["_id", "correlation_id", "body", "received"];

/// One reply message taken off the queue.
///
/// `fields` holds the stringified application properties, overlaid with
/// the body parsed as XML when it parses. Typed fields always win over
/// entries of the same name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceivedRecord {
    #[serde(rename = "_id")]
    pub id: String,
    pub correlation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    pub received: DateTime<Utc>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl ReceivedRecord {
    /// Build a record from an inbound message. Never fails: an undecodable
    /// body is dropped and unparseable markup is skipped, both logged.
    pub fn from_message(message: InboundMessage) -> Self {
        let id = Uuid::new_v4().to_string();
        let mut fields = Map::new();

        for (key, value) in message.application_properties {
            merge_field(&mut fields, key, Value::String(value));
        }

        let body = match decode_body(&message.body) {
            Ok(text) => Some(text),
            Err(e) => {
                warn!(
                    record_id = %id,
                    correlation_id = ?message.correlation_id,
                    body_length = message.body.len(),
                    error = %e,
                    "amqp_reply_body_undecodable"
                );
                None
            }
        };

        if let Some(text) = body.as_deref() {
            match parse_document(text) {
                Ok(parsed) => {
                    for (key, value) in parsed {
                        merge_field(&mut fields, key, value);
                    }
                }
                Err(e) => {
                    warn!(
                        record_id = %id,
                        correlation_id = ?message.correlation_id,
                        error = %e,
                        "amqp_reply_malformed_xml"
                    );
                }
            }
        }

        Self {
            id,
            correlation_id: message.correlation_id,
            body,
            received: Utc::now(),
            fields,
        }
    }
}

fn decode_body(bytes: &[u8]) -> Result<String, BodyError> {
    Ok(std::str::from_utf8(bytes)?.to_string())
}

fn merge_field(fields: &mut Map<String, Value>, key: String, value: Value) {
    if RESERVED_KEYS.contains(&key.as_str()) {
        debug!(key = %key, "amqp_reply_reserved_key_skipped");
        return;
    }
    fields.insert(key, value);
}
