//! Rate-limited work queue for tasks that ask to be retried
//!
//! Combines a token bucket (overall rate) with per-item exponential backoff.
//! Items that fail more than `max_retries` times are dropped.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use keel_common::{Error, Result};

/// Work queue tuning
#[derive(Clone, Debug)]
pub struct WorkQueueConfig {
    /// Sustained rate in items per second
    pub qps: f64,
    /// Token bucket size
    pub burst: u32,
    /// Delay after the first failure
    pub base_delay: Duration,
    /// Upper bound on per-item delay
    pub max_delay: Duration,
    /// Requeues allowed per item before it is dropped
    pub max_retries: u32,
}

impl Default for WorkQueueConfig {
    fn default() -> Self {
        Self {
            qps: 10.0,
            burst: 100,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_secs(1000),
            max_retries: 10,
        }
    }
}

struct TokenBucket {
    qps: f64,
    burst: f64,
    tokens: f64,
    last: Instant,
}

impl TokenBucket {
    fn new(qps: f64, burst: u32) -> Self {
        let burst = f64::from(burst.max(1));
        Self {
            qps: qps.max(f64::MIN_POSITIVE),
            burst,
            tokens: burst,
            last: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(self.last).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.qps).min(self.burst);
        self.last = now;
    }

    /// Take a token, or report how long until one is available
    fn try_take(&mut self) -> std::result::Result<(), Duration> {
        self.refill();
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            Err(Duration::from_secs_f64((1.0 - self.tokens) / self.qps))
        }
    }
}

/// Queue of keys with rate-limited requeueing
pub struct WorkQueue<K> {
    config: WorkQueueConfig,
    ready: VecDeque<K>,
    delayed: Vec<(Instant, K)>,
    failures: HashMap<K, u32>,
    bucket: TokenBucket,
}

impl<K: Clone + Eq + Hash> WorkQueue<K> {
    /// Empty queue
    pub fn new(config: WorkQueueConfig) -> Self {
        let bucket = TokenBucket::new(config.qps, config.burst);
        Self {
            config,
            ready: VecDeque::new(),
            delayed: Vec::new(),
            failures: HashMap::new(),
            bucket,
        }
    }

    /// Enqueue `item` for immediate processing
    pub fn add(&mut self, item: K) {
        if !self.ready.contains(&item) {
            self.ready.push_back(item);
        }
    }

    /// Requeue `item` after its backoff delay
    ///
    /// Returns false, and drops the item, once it has used up its retries.
    pub fn add_rate_limited(&mut self, item: K) -> bool {
        let failures = self.failures.entry(item.clone()).or_insert(0);
        if *failures >= self.config.max_retries {
            self.failures.remove(&item);
            return false;
        }
        let delay = backoff_delay(&self.config, *failures);
        *failures += 1;
        self.delayed.push((Instant::now() + delay, item));
        true
    }

    /// Clear the failure history of `item`
    pub fn forget(&mut self, item: &K) {
        self.failures.remove(item);
    }

    /// How many times `item` has been requeued
    pub fn num_requeues(&self, item: &K) -> u32 {
        self.failures.get(item).copied().unwrap_or(0)
    }

    /// Items waiting, ready or delayed
    pub fn len(&self) -> usize {
        self.ready.len() + self.delayed.len()
    }

    /// Nothing waiting
    pub fn is_empty(&self) -> bool {
        self.ready.is_empty() && self.delayed.is_empty()
    }

    fn promote_due(&mut self) {
        let now = Instant::now();
        let mut i = 0;
        while i < self.delayed.len() {
            if self.delayed[i].0 <= now {
                let (_, item) = self.delayed.swap_remove(i);
                self.add(item);
            } else {
                i += 1;
            }
        }
    }

    /// Next item, waiting for backoff and rate limits
    ///
    /// Returns `None` once the queue is empty.
    pub async fn get(&mut self, cancel: &CancellationToken) -> Result<Option<K>> {
        loop {
            self.promote_due();
            let wait = if !self.ready.is_empty() {
                match self.bucket.try_take() {
                    Ok(()) => return Ok(self.ready.pop_front()),
                    Err(wait) => wait,
                }
            } else {
                match self.delayed.iter().map(|(at, _)| *at).min() {
                    Some(at) => at.saturating_duration_since(Instant::now()),
                    None => return Ok(None),
                }
            };
            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::cancelled("work queue")),
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Up to `max` items: waits for the first, then takes whatever is ready
    pub async fn get_batch(&mut self, max: usize, cancel: &CancellationToken) -> Result<Vec<K>> {
        let mut batch = Vec::new();
        let Some(first) = self.get(cancel).await? else {
            return Ok(batch);
        };
        batch.push(first);
        while batch.len() < max.max(1) {
            self.promote_due();
            if self.ready.is_empty() || self.bucket.try_take().is_err() {
                break;
            }
            if let Some(item) = self.ready.pop_front() {
                batch.push(item);
            }
        }
        Ok(batch)
    }
}

fn backoff_delay(config: &WorkQueueConfig, failures: u32) -> Duration {
    let factor = 2f64.powi(failures.min(62) as i32);
    let delay = config.base_delay.as_secs_f64() * factor;
    Duration::from_secs_f64(delay.min(config.max_delay.as_secs_f64()))
}

/// Log and report a dropped item
pub(crate) fn warn_dropped(item: &impl std::fmt::Display, retries: u32) {
    warn!(item = %item, retries, "dropping item after too many retries");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let config = WorkQueueConfig::default();
        assert_eq!(backoff_delay(&config, 0), Duration::from_millis(5));
        assert_eq!(backoff_delay(&config, 3), Duration::from_millis(40));
        assert_eq!(backoff_delay(&config, 40), Duration::from_secs(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn items_are_dropped_after_max_retries() {
        let mut queue = WorkQueue::new(WorkQueueConfig {
            max_retries: 3,
            ..Default::default()
        });
        let cancel = CancellationToken::new();
        queue.add("a");
        let mut attempts = 0;
        while let Some(item) = queue.get(&cancel).await.unwrap() {
            attempts += 1;
            if !queue.add_rate_limited(item) {
                break;
            }
        }
        assert_eq!(attempts, 4);
        assert!(queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn requeued_items_wait_for_backoff() {
        let mut queue = WorkQueue::new(WorkQueueConfig::default());
        let cancel = CancellationToken::new();
        queue.add_rate_limited("a");
        queue.add_rate_limited("a");
        assert_eq!(queue.num_requeues(&"a"), 2);

        let start = Instant::now();
        let batch = queue.get_batch(4, &cancel).await.unwrap();
        assert_eq!(batch, vec!["a"]);
        assert!(Instant::now() - start >= Duration::from_millis(5));

        queue.forget(&"a");
        assert_eq!(queue.num_requeues(&"a"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_spaces_out_items_beyond_burst() {
        let mut queue = WorkQueue::new(WorkQueueConfig {
            qps: 1.0,
            burst: 1,
            ..Default::default()
        });
        let cancel = CancellationToken::new();
        queue.add(1);
        queue.add(2);
        let start = Instant::now();
        assert_eq!(queue.get(&cancel).await.unwrap(), Some(1));
        assert_eq!(queue.get(&cancel).await.unwrap(), Some(2));
        assert!(Instant::now() - start >= Duration::from_millis(900));
        assert_eq!(queue.get(&cancel).await.unwrap(), None);
    }

    #[tokio::test]
    async fn cancellation_interrupts_waiting() {
        let mut queue = WorkQueue::new(WorkQueueConfig {
            base_delay: Duration::from_secs(60),
            ..Default::default()
        });
        let cancel = CancellationToken::new();
        queue.add_rate_limited("slow");
        cancel.cancel();
        assert!(queue.get(&cancel).await.is_err());
    }
}
