//! Error types for the message exchange core.
//!
//! Transport failures are explicit `Result`s inside the core. At the
//! Publisher/Drainer boundary they are reported in-band (receipt `error`
//! field, `Drained::error`) and never propagated to the HTTP layer.

use std::str::Utf8Error;
use std::time::Duration;

use thiserror::Error;

/// Failures raised by the AMQP transport.
///
/// A receive that times out is not an error; `ReceiverLink::receive`
/// returns `Ok(None)` for it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Failed to connect to {url}: {message}")]
    Connect { url: String, message: String },

    #[error("Connection to {url} not established within {timeout:?}")]
    ConnectTimeout { url: String, timeout: Duration },

    #[error("Link to '{address}' rejected: {message}")]
    Link { address: String, message: String },

    #[error("Send to '{address}' failed: {message}")]
    Send { address: String, message: String },

    #[error("Send to '{address}' did not complete within {timeout:?}")]
    SendTimeout { address: String, timeout: Duration },

    #[error("Receive from '{address}' failed: {message}")]
    Receive { address: String, message: String },

    #[error("Accept on '{address}' failed: {message}")]
    Accept { address: String, message: String },

    #[error("Depth of '{address}' unavailable: {message}")]
    Depth { address: String, message: String },
}

impl TransportError {
    /// Address or URL the failure relates to.
    pub fn target(&self) -> &str {
        match self {
            Self::Connect { url, .. } | Self::ConnectTimeout { url, .. } => url,
            Self::Link { address, .. }
            | Self::Send { address, .. }
            | Self::SendTimeout { address, .. }
            | Self::Receive { address, .. }
            | Self::Accept { address, .. }
            | Self::Depth { address, .. } => address,
        }
    }
}

/// Reasons a publish attempt did not enqueue its document.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PublishError {
    #[error("Document is empty")]
    EmptyDocument,

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Problems with a received message body. Never fatal for the record.
#[derive(Debug, Error)]
pub enum BodyError {
    #[error("Body is not valid UTF-8: {0}")]
    Decode(#[from] Utf8Error),

    #[error("Body is not well-formed XML: {0}")]
    Parse(String),
}
