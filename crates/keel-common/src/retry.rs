//! Backoff for storage calls and polling for reach-state waits
//!
//! - [`Backoff`] is a bounded step count used by storage backends. Each
//!   attempt reports done / not done; not-exist and other terminal errors stop
//!   immediately, exhaustion surfaces the last error, and an attempt loop that
//!   never errors but never finishes yields [`Error::WaitTimeout`].
//! - [`poll_until`] checks a condition at a fixed interval until it holds or
//!   a deadline passes.
//!
//! Sleeps end early with [`Error::Cancelled`] when the token fires.
//!
//! # Example
//!
//! ```ignore
//! use keel_common::retry::Backoff;
//!
//! let data = Backoff::object_store_read()
//!     .retry("s3 get", || async { fetch().await.map(Some) })
//!     .await?;
//! ```

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{Error, Result};

/// Default interval between reach-state polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default deadline for an instance to reach a desired state
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(600);

/// Bounded exponential backoff
#[derive(Clone, Debug, PartialEq)]
pub struct Backoff {
    /// Delay before the second attempt
    pub duration: Duration,
    /// Multiplier applied to the delay after every attempt
    pub factor: f64,
    /// Each delay is stretched by up to `jitter * delay`
    pub jitter: f64,
    /// Maximum number of attempts
    pub steps: u32,
}

impl Backoff {
    /// Read policy for object-store backends
    pub fn object_store_read() -> Self {
        Self {
            duration: Duration::from_secs(1),
            factor: 1.5,
            jitter: 0.1,
            steps: 4,
        }
    }

    /// Write policy for object-store backends
    pub fn object_store_write() -> Self {
        Self {
            steps: 5,
            ..Self::object_store_read()
        }
    }

    /// A single attempt with no sleeping
    pub fn once() -> Self {
        Self {
            duration: Duration::ZERO,
            factor: 1.0,
            jitter: 0.0,
            steps: 1,
        }
    }

    fn jittered(&self, delay: Duration) -> Duration {
        if self.jitter <= 0.0 {
            return delay;
        }
        let extra = rand::thread_rng().gen_range(0.0..1.0) * self.jitter;
        Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + extra))
    }

    /// Run `attempt` until it reports done, fails terminally, or steps run out
    ///
    /// `attempt` returns `Ok(Some(value))` when done, `Ok(None)` when it should
    /// be polled again, and `Err` on failure. Retryable errors are retried;
    /// all others (including not-exist) are returned immediately.
    pub async fn retry<T, F, Fut>(&self, operation: &str, attempt: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        run_backoff(self, operation, None, attempt).await
    }

    /// Like [`Backoff::retry`] but sleeps are interrupted by `cancel`
    pub async fn retry_cancellable<T, F, Fut>(
        &self,
        operation: &str,
        cancel: &CancellationToken,
        attempt: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        run_backoff(self, operation, Some(cancel), attempt).await
    }
}

async fn run_backoff<T, F, Fut>(
    backoff: &Backoff,
    operation: &str,
    cancel: Option<&CancellationToken>,
    mut attempt: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let steps = backoff.steps.max(1);
    let mut delay = backoff.duration;
    let mut last_error: Option<Error> = None;

    for i in 0..steps {
        if i != 0 {
            sleep(backoff.jittered(delay), operation, cancel).await?;
            delay = Duration::from_secs_f64(delay.as_secs_f64() * backoff.factor);
        }

        match attempt().await {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => {
                debug!(operation = %operation, attempt = i + 1, "Operation not done yet");
            }
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) => {
                if i + 1 < steps {
                    debug!(operation = %operation, attempt = i + 1, error = %e, "Retrying after error");
                }
                last_error = Some(e);
            }
        }
    }

    match last_error {
        Some(e) => {
            info!(operation = %operation, attempts = steps, error = %e, "Hit maximum retries");
            Err(e)
        }
        None => Err(Error::wait_timeout(operation)),
    }
}

async fn sleep(delay: Duration, operation: &str, cancel: Option<&CancellationToken>) -> Result<()> {
    match cancel {
        Some(token) => tokio::select! {
            _ = token.cancelled() => Err(Error::cancelled(operation)),
            _ = tokio::time::sleep(delay) => Ok(()),
        },
        None => {
            tokio::time::sleep(delay).await;
            Ok(())
        }
    }
}

/// Poll `check` every `interval` until it yields a value or `timeout` elapses
///
/// Used for reach-state waits (server running, load balancer ready). Errors
/// from `check` abort the wait.
pub async fn poll_until<T, F, Fut>(
    operation: &str,
    interval: Duration,
    timeout: Duration,
    cancel: &CancellationToken,
    mut check: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>>>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(value) = check().await? {
            return Ok(value);
        }
        let now = tokio::time::Instant::now();
        if now >= deadline {
            return Err(Error::wait_timeout(operation));
        }
        let wait = interval.min(deadline - now);
        sleep(wait, operation, Some(cancel)).await?;
    }
}
