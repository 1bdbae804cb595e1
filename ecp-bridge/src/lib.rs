//! CIM ECP bridge - publishes business documents to an ECP endpoint over
//! AMQP 1.0 and drains its reply queue into JSON records.
//!
//! ## Architecture
//!
//! ```text
//! HTTP → Publisher → send queue → ECP endpoint → reply queue → Drainer → HTTP
//! ```
//!
//! Every publish and every drain opens its own short-lived connection.

pub mod amqp;
pub mod config;
pub mod error;
pub mod exchange;
pub mod web;

// Re-export commonly used types
pub use amqp::{AmqpTransport, Transport};
pub use config::{Config, ConnectionTarget};
pub use error::{BodyError, PublishError, TransportError};
pub use exchange::{
    DrainOptions, Drained, Drainer, PublishOptions, PublishReceipt, Publisher, ReceivedRecord,
};
pub use web::AppState;
