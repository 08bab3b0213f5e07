//! Retry policy
//!
//! Re-runs session operations that failed for transient reasons, tearing the
//! session down and re-establishing it between attempts, with capped
//! exponential backoff. Fatal failures are returned immediately.

use log::{info, warn};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use crate::client::Session;
use crate::config::ConnectionParams;
use crate::error::{FtpError, Result};

/// Boxed future returned by retryable operations.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Something that can drop its connection and establish a fresh one.
pub trait Reconnect {
    fn reconnect(&mut self) -> BoxFuture<'_, Result<()>>;
}

/// Bounded attempts with doubling backoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(500), Duration::from_secs(30))
    }
}

impl RetryPolicy {
    /// `max_attempts` counts the first try; zero is treated as one.
    pub fn new(max_attempts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
            max_backoff: max_backoff.max(initial_backoff),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay after the `failures`-th consecutive failure (1-based).
    pub fn backoff(&self, failures: u32) -> Duration {
        let factor = 1u32 << failures.saturating_sub(1).min(31);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Runs `op` on `session` under this policy. See [`with_retry`].
    pub async fn run<S, T, F>(&self, session: &mut S, op: F) -> Result<T>
    where
        S: Reconnect + Send + ?Sized,
        F: for<'a> FnMut(&'a mut S) -> BoxFuture<'a, Result<T>>,
    {
        with_retry(session, self, op).await
    }

    /// Establishes an authenticated session, retrying transient failures.
    ///
    /// Rejected credentials fail at once.
    pub async fn connect(&self, params: &ConnectionParams) -> Result<Session> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match Session::connect(params.clone()).await {
                Ok(session) => return Ok(session),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) if attempt >= self.max_attempts => {
                    warn!("Giving up connecting after {} attempts: {}", attempt, e);
                    return Err(FtpError::RetryExhausted {
                        attempts: attempt,
                        last: Box::new(e),
                    });
                }
                Err(e) => {
                    let delay = self.backoff(attempt);
                    warn!(
                        "Connect attempt {}/{} failed: {}. Retrying in {:?}",
                        attempt, self.max_attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

/// Runs `op`, reconnecting `session` and retrying after retryable failures.
///
/// Each attempt after the first is preceded by the backoff delay and a
/// reconnect; a reconnect that fails counts as that attempt's failure. Once
/// `max_attempts` attempts have failed, the last error is returned wrapped
/// in [`FtpError::RetryExhausted`].
pub async fn with_retry<S, T, F>(session: &mut S, policy: &RetryPolicy, mut op: F) -> Result<T>
where
    S: Reconnect + Send + ?Sized,
    F: for<'a> FnMut(&'a mut S) -> BoxFuture<'a, Result<T>>,
{
    let mut attempt = 0;
    let mut needs_reconnect = false;

    loop {
        attempt += 1;

        let outcome = if needs_reconnect {
            match session.reconnect().await {
                Ok(()) => {
                    info!("Reconnected for attempt {}/{}", attempt, policy.max_attempts);
                    op(&mut *session).await
                }
                Err(e) => Err(e),
            }
        } else {
            op(&mut *session).await
        };

        match outcome {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) if attempt >= policy.max_attempts => {
                warn!("Giving up after {} attempts: {}", attempt, e);
                return Err(FtpError::RetryExhausted {
                    attempts: attempt,
                    last: Box::new(e),
                });
            }
            Err(e) => {
                let delay = policy.backoff(attempt);
                warn!(
                    "Attempt {}/{} failed: {}. Retrying in {:?}",
                    attempt, policy.max_attempts, e, delay
                );
                tokio::time::sleep(delay).await;
                needs_reconnect = true;
            }
        }
    }
}
