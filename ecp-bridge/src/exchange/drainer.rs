//! Drains reply documents from an ECP queue.
//!
//! This module handles:
//! 1. Connecting with a bounded handshake and attaching a receiver with a
//!    fixed credit window
//! 2. Taking an advisory depth snapshot that caps the number of receives
//! 3. Receiving, converting and accepting messages until the budget is
//!    spent or a receive times out
//! 4. Detaching and closing on every path
//!
//! A message is accepted before its record is appended, so every returned
//! record was removed from the queue and nothing is removed without being
//! returned. Records accepted before a failure are kept.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::record::ReceivedRecord;
use crate::amqp::{with_connection, Connection, ReceiverLink, Transport, CREDIT_WINDOW};
use crate::config::ConnectionTarget;
use crate::error::TransportError;

/// Default bound on connect and attach.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(60);

/// Default bound on each receive.
pub const RECEIVE_TIMEOUT: Duration = Duration::from_secs(25);

/// Per-call drain overrides.
#[derive(Debug, Clone, Default)]
pub struct DrainOptions {
    /// Queue to drain, defaults to the configured reply queue
    pub queue: Option<String>,
    /// Per-receive timeout, defaults to the drainer's
    pub receive_timeout: Option<Duration>,
    /// Upper bound on records returned
    pub limit: Option<usize>,
}

/// Outcome of one drain call.
#[derive(Debug)]
pub struct Drained {
    pub queue: String,
    /// Accepted records in receive order
    pub records: Vec<ReceivedRecord>,
    /// The failure that ended the drain early, if any
    pub error: Option<TransportError>,
}

impl Drained {
    pub fn into_records(self) -> Vec<ReceivedRecord> {
        self.records
    }
}

/// Drainer with one short-lived connection per call.
#[derive(Clone)]
pub struct Drainer {
    target: Arc<ConnectionTarget>,
    transport: Arc<dyn Transport>,
    open_timeout: Duration,
    receive_timeout: Duration,
}

impl Drainer {
    pub fn new(target: Arc<ConnectionTarget>, transport: Arc<dyn Transport>) -> Self {
        Self {
            target,
            transport,
            open_timeout: DRAIN_TIMEOUT,
            receive_timeout: RECEIVE_TIMEOUT,
        }
    }

    /// Override the connect/attach and per-receive bounds.
    pub fn with_timeouts(mut self, open_timeout: Duration, receive_timeout: Duration) -> Self {
        self.open_timeout = open_timeout;
        self.receive_timeout = receive_timeout;
        self
    }

    /// Drain up to the observed depth of a queue.
    pub async fn drain(&self, options: &DrainOptions) -> Drained {
        let queue = options
            .queue
            .clone()
            .unwrap_or_else(|| self.target.reply_queue.clone());
        let receive_timeout = options.receive_timeout.unwrap_or(self.receive_timeout);
        let open_timeout = self.open_timeout;
        let limit = options.limit;

        info!(
            queue = %queue,
            receive_timeout_seconds = receive_timeout.as_secs_f64(),
            limit = ?limit,
            "amqp_drain_starting"
        );

        let address = queue.clone();
        let result = with_connection(
            self.transport.as_ref(),
            &self.target.url,
            open_timeout,
            move |connection| {
                Box::pin(drain_queue(
                    connection,
                    address,
                    open_timeout,
                    receive_timeout,
                    limit,
                ))
            },
        )
        .await;

        let (records, error) = match result {
            Ok(outcome) => outcome,
            Err(e) => (Vec::new(), Some(e)),
        };

        match &error {
            Some(e) => error!(
                queue = %queue,
                received = records.len(),
                error = %e,
                "amqp_drain_failed"
            ),
            None => info!(queue = %queue, received = records.len(), "amqp_drain_complete"),
        }

        Drained {
            queue,
            records,
            error,
        }
    }

    /// Connect, attach a receiver and report the advisory depth of `queue`
    /// without receiving anything.
    pub async fn probe(&self, queue: &str) -> Result<usize, TransportError> {
        let address = queue.to_string();
        let open_timeout = self.open_timeout;

        with_connection(
            self.transport.as_ref(),
            &self.target.url,
            open_timeout,
            move |connection| Box::pin(probe_queue(connection, address, open_timeout)),
        )
        .await?
    }
}

/// Number of receives to attempt for an observed depth.
fn attempt_budget(available: usize, limit: Option<usize>) -> usize {
    available
        .min(CREDIT_WINDOW as usize)
        .min(limit.unwrap_or(usize::MAX))
}

async fn attach_receiver(
    connection: &mut dyn Connection,
    queue: &str,
    open_timeout: Duration,
) -> Result<Box<dyn ReceiverLink>, TransportError> {
    let attach = connection.create_receiver(queue, CREDIT_WINDOW);
    match tokio::time::timeout(open_timeout, attach).await {
        Ok(link) => link,
        Err(_) => Err(TransportError::Link {
            address: queue.to_string(),
            message: format!("attach not completed within {:?}", open_timeout),
        }),
    }
}

async fn drain_queue(
    connection: &mut dyn Connection,
    queue: String,
    open_timeout: Duration,
    receive_timeout: Duration,
    limit: Option<usize>,
) -> (Vec<ReceivedRecord>, Option<TransportError>) {
    let mut records = Vec::new();

    let mut link = match attach_receiver(connection, &queue, open_timeout).await {
        Ok(link) => link,
        Err(e) => return (records, Some(e)),
    };

    let error = receive_batch(link.as_mut(), &queue, receive_timeout, limit, &mut records)
        .await
        .err();

    link.close().await;
    (records, error)
}

async fn receive_batch(
    link: &mut dyn ReceiverLink,
    queue: &str,
    receive_timeout: Duration,
    limit: Option<usize>,
    records: &mut Vec<ReceivedRecord>,
) -> Result<(), TransportError> {
    let available = link.available().await?;
    let budget = attempt_budget(available, limit);

    info!(
        queue = %queue,
        available = available,
        budget = budget,
        "amqp_queue_depth"
    );

    for attempt in 0..budget {
        let message = match link.receive(receive_timeout).await? {
            Some(message) => message,
            None => {
                debug!(
                    queue = %queue,
                    attempt = attempt,
                    timeout_seconds = receive_timeout.as_secs_f64(),
                    "amqp_receive_timeout"
                );
                break;
            }
        };

        let record = ReceivedRecord::from_message(message);
        link.accept().await?;

        debug!(
            queue = %queue,
            record_id = %record.id,
            correlation_id = ?record.correlation_id,
            "amqp_reply_accepted"
        );
        records.push(record);
    }

    if records.len() < budget {
        warn!(
            queue = %queue,
            budget = budget,
            received = records.len(),
            "amqp_drain_budget_unspent"
        );
    }

    Ok(())
}

async fn probe_queue(
    connection: &mut dyn Connection,
    queue: String,
    open_timeout: Duration,
) -> Result<usize, TransportError> {
    let mut link = attach_receiver(connection, &queue, open_timeout).await?;
    let available = link.available().await;
    link.close().await;
    available
}
