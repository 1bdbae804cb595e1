//! Message shapes exchanged with the AMQP transport.

use chrono::{DateTime, Utc};

/// A message about to be sent on a sender link.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundMessage {
    /// Document payload, sent as an AMQP string value
    pub body: String,
    /// AMQP `message-id` property
    pub message_id: String,
    /// AMQP `correlation-id` property
    pub correlation_id: String,
    /// AMQP `creation-time` property
    pub creation_time: DateTime<Utc>,
    /// Header `durable` flag
    pub durable: bool,
    /// Application properties in insertion order
    pub application_properties: Vec<(String, String)>,
}

/// A message taken off a receiver link, not yet accepted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InboundMessage {
    /// Raw body bytes (AMQP value, data sections or empty)
    pub body: Vec<u8>,
    /// AMQP `correlation-id`, rendered as text
    pub correlation_id: Option<String>,
    /// Application properties stringified, in wire order
    pub application_properties: Vec<(String, String)>,
}

impl From<OutboundMessage> for InboundMessage {
    fn from(message: OutboundMessage) -> Self {
        Self {
            body: message.body.into_bytes(),
            correlation_id: Some(message.correlation_id),
            application_properties: message.application_properties,
        }
    }
}
