//! AMQP 1.0 transport seam.
//!
//! This module provides:
//! - The transport traits the exchange core is written against
//! - `AmqpTransport`, the `fe2o3-amqp` backed implementation
//! - `with_connection`, the scoped open/operate/close discipline
//!
//! ## Resource model
//!
//! ```text
//! connect → Connection → create_sender / create_receiver → Link
//!                      ↘ close (every path)        close ↙
//! ```
//!
//! Connections and links live for a single exchange call and are never
//! pooled. `close` on either is idempotent and never fails; problems while
//! closing are logged by the implementation.

pub mod client;
pub mod lifecycle;
pub mod types;

#[cfg(test)]
pub(crate) mod memory;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::TransportError;

pub use client::AmqpTransport;
pub use lifecycle::with_connection;
pub use types::{InboundMessage, OutboundMessage};

/// Credit window requested by receiver links.
pub const CREDIT_WINDOW: u32 = 100;

/// Factory for live broker connections.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a connection to `url`. Implementations may block; callers bound
    /// the call with their own timeout.
    async fn connect(&self, url: &str) -> Result<Box<dyn Connection>, TransportError>;
}

/// A live broker connection.
#[async_trait]
pub trait Connection: Send {
    /// Attach a sending link bound to `address`.
    async fn create_sender(
        &mut self,
        address: &str,
    ) -> Result<Box<dyn SenderLink>, TransportError>;

    /// Attach a receiving link on `address` granting `credit` to the broker.
    async fn create_receiver(
        &mut self,
        address: &str,
        credit: u32,
    ) -> Result<Box<dyn ReceiverLink>, TransportError>;

    /// Close the connection. Idempotent.
    async fn close(&mut self);
}

/// A unidirectional outbound link.
#[async_trait]
pub trait SenderLink: Send {
    /// Hand one message to the link. Does not wait for the broker's
    /// settlement outcome.
    async fn send(&mut self, message: OutboundMessage) -> Result<(), TransportError>;

    /// Detach the link. Idempotent.
    async fn close(&mut self);
}

/// A unidirectional inbound link.
#[async_trait]
pub trait ReceiverLink: Send {
    /// Number of messages currently buffered on the link. Advisory only.
    async fn available(&mut self) -> Result<usize, TransportError>;

    /// Wait up to `timeout` for the next message. `Ok(None)` on timeout.
    async fn receive(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<InboundMessage>, TransportError>;

    /// Accept the most recently received message, removing it from the
    /// queue.
    async fn accept(&mut self) -> Result<(), TransportError>;

    /// Detach the link. Unaccepted deliveries return to the queue. Idempotent.
    async fn close(&mut self);
}
