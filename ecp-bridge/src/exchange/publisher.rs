//! Publishes business documents to the ECP send queue.
//!
//! Every call opens its own connection and sender link, sends exactly one
//! durable message, and closes both again. Failures never escape `send`;
//! they are reported on the returned receipt.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{error, info};
use uuid::Uuid;

use super::record::{BusinessProperties, PublishReceipt};
use crate::amqp::{with_connection, Connection, OutboundMessage, Transport};
use crate::config::ConnectionTarget;
use crate::error::{PublishError, TransportError};

/// Default bound on connect, attach and send.
pub const PUBLISH_TIMEOUT: Duration = Duration::from_secs(25);

/// Per-call overrides of the configured target and business properties.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PublishOptions {
    pub queue: Option<String>,
    pub label: Option<String>,
    pub sender: Option<String>,
    pub recipient: Option<String>,
}

/// Publisher with one short-lived connection per message.
#[derive(Clone)]
pub struct Publisher {
    target: Arc<ConnectionTarget>,
    transport: Arc<dyn Transport>,
    timeout: Duration,
}

impl Publisher {
    /// Create a new publisher for the given target.
    pub fn new(target: Arc<ConnectionTarget>, transport: Arc<dyn Transport>) -> Self {
        Self {
            target,
            transport,
            timeout: PUBLISH_TIMEOUT,
        }
    }

    /// Override the connect/attach/send bound.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Publish one document.
    ///
    /// The receipt always carries a fresh correlation id and the target
    /// queue. `published` is set when the message was handed to the link;
    /// otherwise `error` describes what failed. There is no retry.
    pub async fn send(&self, document: &str, options: &PublishOptions) -> PublishReceipt {
        let mut receipt = self.receipt(options);

        info!(
            queue = %receipt.queue,
            correlation_id = %receipt.correlation_id,
            message_id = %receipt.properties.message_id,
            document_length = document.len(),
            "amqp_publish_starting"
        );

        match self.publish(document, &receipt).await {
            Ok(published) => {
                receipt.published = Some(published);
                info!(
                    queue = %receipt.queue,
                    correlation_id = %receipt.correlation_id,
                    "amqp_published"
                );
            }
            Err(e) => {
                error!(
                    queue = %receipt.queue,
                    correlation_id = %receipt.correlation_id,
                    error = %e,
                    "amqp_publish_failed"
                );
                receipt.error = Some(e.to_string());
            }
        }

        receipt
    }

    /// Fresh ids and business properties for one publish.
    fn receipt(&self, options: &PublishOptions) -> PublishReceipt {
        let target = &self.target;
        let correlation_id = Uuid::new_v4().to_string();
        let message_id = match &target.message_id_prefix {
            Some(prefix) => format!("{}{}", prefix, Uuid::new_v4()),
            None => Uuid::new_v4().to_string(),
        };

        PublishReceipt {
            correlation_id: correlation_id.clone(),
            queue: options
                .queue
                .clone()
                .unwrap_or_else(|| target.send_queue.clone()),
            send: Utc::now(),
            published: None,
            error: None,
            properties: BusinessProperties {
                message_id,
                correlation_id,
                business_type: options.label.clone().or_else(|| target.label.clone()),
                receiver_code: options
                    .recipient
                    .clone()
                    .or_else(|| target.recipient.clone()),
                sender_application: options.sender.clone().or_else(|| target.sender.clone()),
            },
        }
    }

    async fn publish(
        &self,
        document: &str,
        receipt: &PublishReceipt,
    ) -> Result<DateTime<Utc>, PublishError> {
        if document.trim().is_empty() {
            return Err(PublishError::EmptyDocument);
        }

        let message = OutboundMessage {
            body: document.to_string(),
            message_id: receipt.properties.message_id.clone(),
            correlation_id: receipt.correlation_id.clone(),
            creation_time: Utc::now(),
            durable: true,
            application_properties: receipt.properties.to_application_properties(),
        };
        let queue = receipt.queue.clone();
        let timeout = self.timeout;

        let published = with_connection(
            self.transport.as_ref(),
            &self.target.url,
            timeout,
            move |connection| Box::pin(send_one(connection, queue, message, timeout)),
        )
        .await??;

        Ok(published)
    }
}

/// Attach a sender, send `message`, and detach on every path.
async fn send_one(
    connection: &mut dyn Connection,
    queue: String,
    message: OutboundMessage,
    timeout: Duration,
) -> Result<DateTime<Utc>, TransportError> {
    let mut link = match tokio::time::timeout(timeout, connection.create_sender(&queue)).await {
        Ok(link) => link?,
        Err(_) => {
            return Err(TransportError::Link {
                address: queue,
                message: format!("attach not completed within {:?}", timeout),
            })
        }
    };

    let result = match tokio::time::timeout(timeout, link.send(message)).await {
        Ok(Ok(())) => Ok(Utc::now()),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(TransportError::SendTimeout {
            address: queue.clone(),
            timeout,
        }),
    };

    link.close().await;
    result
}
