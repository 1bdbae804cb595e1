//! Message exchange core.
//!
//! This module provides:
//! - `Publisher`: one durable document per call onto the send queue
//! - `Drainer`: bounded drain of the reply queue into records
//! - Record types and the XML body mapping
//!
//! ## Flow
//!
//! ```text
//! document → Publisher::send → send queue → ECP endpoint
//! ECP endpoint → reply queue → Drainer::drain → [ReceivedRecord]
//! ```

pub mod drainer;
pub mod publisher;
pub mod record;
pub mod xml;

pub use drainer::{DrainOptions, Drained, Drainer, DRAIN_TIMEOUT, RECEIVE_TIMEOUT};
pub use publisher::{PublishOptions, Publisher, PUBLISH_TIMEOUT};
pub use record::{BusinessProperties, PublishReceipt, ReceivedRecord};
