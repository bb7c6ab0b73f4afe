//! Bounded waits for telephony operations
//!
//! The controller never retries on its own. What it can do is stop waiting:
//! when a registration or connect timeout is configured, the awaited future
//! is wrapped with [`with_timeout`] and an expiry becomes
//! [`VoiceError::Timeout`].

use std::future::Future;
use std::time::Duration;

use tracing::error;

use crate::error::{VoiceError, VoiceResult};

/// Run `future`, failing with [`VoiceError::Timeout`] if it does not finish in time
///
/// # Examples
///
/// ```rust
/// # use callcenter_voice_core::recovery::with_timeout;
/// # use callcenter_voice_core::error::{VoiceError, VoiceResult};
/// # use std::time::Duration;
/// # #[tokio::main]
/// # async fn main() {
/// let result: VoiceResult<()> = with_timeout(
///     "register",
///     Duration::from_millis(20),
///     async {
///         tokio::time::sleep(Duration::from_secs(1)).await;
///         Ok(())
///     },
/// )
/// .await;
///
/// assert_eq!(result, Err(VoiceError::Timeout { duration_ms: 20 }));
/// # }
/// ```
pub async fn with_timeout<T, F>(operation_name: &str, timeout: Duration, future: F) -> VoiceResult<T>
where
    F: Future<Output = VoiceResult<T>>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => {
            error!(
                operation = operation_name,
                timeout_ms = timeout.as_millis() as u64,
                "Operation timed out"
            );
            Err(VoiceError::Timeout {
                duration_ms: timeout.as_millis() as u64,
            })
        }
    }
}

/// [`with_timeout`] when a bound is configured, a plain await otherwise
pub async fn with_optional_timeout<T, F>(
    operation_name: &str,
    timeout: Option<Duration>,
    future: F,
) -> VoiceResult<T>
where
    F: Future<Output = VoiceResult<T>>,
{
    match timeout {
        Some(timeout) => with_timeout(operation_name, timeout, future).await,
        None => future.await,
    }
}
