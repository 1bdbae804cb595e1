//! Scoped connection lifecycle shared by the publisher and the drainer.

use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use tracing::{debug, warn};

use super::{Connection, Transport};
use crate::error::TransportError;

/// Open a connection, run `op` against it, and close it.
///
/// The connect is bounded by `timeout`. Once connected, the connection is
/// closed after `op` completes whatever `op` returns; `op` reports its own
/// failures through `T`, so nothing computed by `op` is masked by closing.
/// Links opened inside `op` must be closed by `op`.
///
/// `op` receives only the connection; state it needs is moved into the
/// closure.
pub async fn with_connection<T, F>(
    transport: &dyn Transport,
    url: &str,
    timeout: Duration,
    op: F,
) -> Result<T, TransportError>
where
    F: for<'c> FnOnce(&'c mut dyn Connection) -> BoxFuture<'c, T>,
{
    let started = Instant::now();

    let mut connection = match tokio::time::timeout(timeout, transport.connect(url)).await {
        Ok(Ok(connection)) => connection,
        Ok(Err(e)) => {
            warn!(error = %e, "amqp_connect_failed");
            return Err(e);
        }
        Err(_) => {
            warn!(
                timeout_seconds = timeout.as_secs_f64(),
                "amqp_connect_timeout"
            );
            return Err(TransportError::ConnectTimeout {
                url: url.to_string(),
                timeout,
            });
        }
    };

    debug!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        "amqp_connected"
    );

    let result = op(connection.as_mut()).await;

    connection.close().await;

    debug!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        "amqp_connection_closed"
    );

    Ok(result)
}
