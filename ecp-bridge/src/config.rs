//! Configuration module for environment variable parsing.
//!
//! Every `CIM_ECP_*` variable also accepts its legacy `CIM_EDX_*` spelling.
//! Configuration is read once at startup and never mutated afterwards.

use std::env;
use std::time::Duration;

use tracing::warn;
use url::Url;

/// Default queue for outbound documents.
pub const DEFAULT_SEND_QUEUE: &str = "edx.endpoint.outbox";

/// Default queue for replies.
pub const DEFAULT_REPLY_QUEUE: &str = "edx.endpoint.reply";

/// Log filter used when neither `RUST_LOG` nor `LOG_LEVEL` is set.
pub const DEFAULT_LOG_LEVEL: &str = "error";

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Broker host, used when no full URL is given
    pub host: String,

    /// Broker port, used when no full URL is given
    pub port: u16,

    /// Full broker URL overriding host and port
    pub url_override: Option<String>,

    /// Queue outbound documents are published to
    pub send_queue: String,

    /// Queue replies are drained from
    pub reply_queue: String,

    /// Default `businessType`
    pub label: Option<String>,

    /// Default `senderApplication`
    pub sender: Option<String>,

    /// Default `receiverCode`
    pub recipient: Option<String>,

    /// Prefix prepended to every generated `baMessageId`
    pub message_id_prefix: Option<String>,

    /// Bound on connect, attach and send when publishing
    pub publish_timeout: Duration,

    /// Bound on connect and attach when draining
    pub drain_timeout: Duration,

    /// Bound on each receive while draining
    pub receive_timeout: Duration,

    /// Idle window used to count deliveries already buffered on a receiver
    pub prefetch_window: Duration,

    // =========================================================================
    // Web Server Configuration
    // =========================================================================

    /// Port for the web server to listen on
    pub http_port: u16,

    /// Log filter used when `RUST_LOG` is unset
    pub log_level: String,
}

/// Immutable broker target shared by the publisher and the drainer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionTarget {
    pub url: String,
    pub send_queue: String,
    pub reply_queue: String,
    pub label: Option<String>,
    pub sender: Option<String>,
    pub recipient: Option<String>,
    pub message_id_prefix: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Config {
            host: ecp_var("HOST").unwrap_or_else(|| "127.0.0.1".to_string()),

            port: parse_ecp("PORT", 5672),

            url_override: ecp_var("URL"),

            send_queue: ecp_var("PUBLISH").unwrap_or_else(|| DEFAULT_SEND_QUEUE.to_string()),

            reply_queue: ecp_var("REPLY").unwrap_or_else(|| DEFAULT_REPLY_QUEUE.to_string()),

            label: ecp_var("LABEL"),

            sender: ecp_var("SENDER"),

            recipient: ecp_var("RECIPIENT"),

            message_id_prefix: ecp_var("PREFIX"),

            publish_timeout: Duration::from_secs(parse_ecp("PUBLISH_TIMEOUT_SECS", 25)),

            drain_timeout: Duration::from_secs(parse_ecp("DRAIN_TIMEOUT_SECS", 60)),

            receive_timeout: Duration::from_secs(parse_ecp("RECEIVE_TIMEOUT_SECS", 25)),

            prefetch_window: Duration::from_millis(parse_ecp("PREFETCH_MS", 500)),

            // Web server configuration
            http_port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5000),

            log_level: log_level(env::var("LOG_LEVEL").ok()),
        }
    }

    /// Broker URL: the override when set, otherwise `amqp://host:port`.
    pub fn broker_url(&self) -> String {
        match &self.url_override {
            Some(url) => url.clone(),
            None => format!("amqp://{}:{}", self.host, self.port),
        }
    }

    /// Check the broker URL parses and uses an AMQP scheme.
    pub fn validate(&self) -> Result<(), String> {
        let url = self.broker_url();
        let parsed = Url::parse(&url).map_err(|e| format!("Invalid broker URL '{}': {}", url, e))?;
        match parsed.scheme() {
            "amqp" | "amqps" => Ok(()),
            other => Err(format!("Unsupported broker URL scheme '{}'", other)),
        }
    }

    /// Build the immutable broker target.
    pub fn target(&self) -> ConnectionTarget {
        ConnectionTarget {
            url: self.broker_url(),
            send_queue: self.send_queue.clone(),
            reply_queue: self.reply_queue.clone(),
            label: self.label.clone(),
            sender: self.sender.clone(),
            recipient: self.recipient.clone(),
            message_id_prefix: self.message_id_prefix.clone(),
        }
    }
}

/// Log filter from a raw `LOG_LEVEL`, `error` when unset or blank.
fn log_level(raw: Option<String>) -> String {
    raw.map(|v| v.trim().to_lowercase())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string())
}

/// Read `CIM_ECP_<suffix>`, falling back to `CIM_EDX_<suffix>`. Empty values
/// count as unset.
fn ecp_var(suffix: &str) -> Option<String> {
    [format!("CIM_ECP_{}", suffix), format!("CIM_EDX_{}", suffix)]
        .iter()
        .filter_map(|name| env::var(name).ok())
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
}

/// Parse a numeric `CIM_ECP_<suffix>` value, warning on malformed input.
fn parse_ecp<T: std::str::FromStr + Copy>(suffix: &str, default: T) -> T {
    let raw = match ecp_var(suffix) {
        Some(v) => v,
        None => return default,
    };

    match raw.parse::<T>() {
        Ok(value) => value,
        Err(_) => {
            warn!(env_var = suffix, value = %raw, "Invalid numeric value, using default");
            default
        }
    }
}
