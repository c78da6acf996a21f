//! Async timeout wrappers.

use crate::error::{ProtocolError, Result};
use std::future::Future;
use std::time::Duration;

/// Default deadline for a link to identify itself
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default time allowed for tasks to drain on shutdown
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Run a fallible future, mapping an elapsed deadline to `ProtocolError::Timeout`.
pub async fn with_timeout_error<F, T, E>(future: F, duration: Duration) -> Result<T>
where
    F: Future<Output = std::result::Result<T, E>>,
    E: Into<ProtocolError>,
{
    match tokio::time::timeout(duration, future).await {
        Ok(result) => result.map_err(Into::into),
        Err(_) => Err(ProtocolError::Timeout),
    }
}
