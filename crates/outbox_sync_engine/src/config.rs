//! Configuration for the sync coordinator.

use outbox_sync_protocol::MergePolicy;
use rand::Rng;
use std::time::Duration;

/// Configuration for draining the mutation log.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Retry configuration for transport failures.
    pub retry: RetryConfig,
    /// Timeout for one remote call; expiry counts as a transport failure.
    pub timeout: Duration,
    /// Interval for periodic drains while online.
    pub sync_interval: Option<Duration>,
    /// Follow-up writes allowed per mutation after conflicts (merge or re-issue).
    pub max_merge_rounds: u32,
    /// Which collections allow field-level merging.
    pub merge_policy: MergePolicy,
}

impl SyncConfig {
    /// Creates a configuration with default values.
    pub fn new() -> Self {
        Self {
            retry: RetryConfig::default(),
            timeout: Duration::from_secs(30),
            sync_interval: None,
            max_merge_rounds: 3,
            merge_policy: MergePolicy::row_level(),
        }
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the remote call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the interval for periodic drains.
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = Some(interval);
        self
    }

    /// Sets the follow-up write budget per mutation.
    pub fn with_max_merge_rounds(mut self, rounds: u32) -> Self {
        self.max_merge_rounds = rounds;
        self
    }

    /// Sets the merge policy.
    pub fn with_merge_policy(mut self, policy: MergePolicy) -> Self {
        self.merge_policy = policy;
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for retry behavior.
///
/// The first `immediate_retries` failures of a mutation are retried at
/// once. After that the coordinator waits `initial_delay`, then doubles
/// (by `backoff_multiplier`) on every further failure, up to `max_delay`.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Failures retried without waiting.
    pub immediate_retries: u32,
    /// First backoff delay.
    pub initial_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add up to 25% random jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a retry configuration with the given immediate-retry ceiling.
    pub fn new(immediate_retries: u32) -> Self {
        Self {
            immediate_retries,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(60),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.add_jitter = jitter;
        self
    }

    /// Calculates the delay for a given backoff step (1-indexed, 0 means none).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let base_delay = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let delay_secs = base_delay.min(self.max_delay.as_secs_f64());

        if self.add_jitter {
            let jitter = delay_secs * 0.25 * rand::thread_rng().gen_range(0.0..1.0);
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }

    /// Wait before retrying a mutation that has failed `attempts` times.
    ///
    /// `None` means retry at once.
    pub fn backoff_after(&self, attempts: u32) -> Option<Duration> {
        if attempts <= self.immediate_retries {
            None
        } else {
            Some(self.delay_for_attempt(attempts - self.immediate_retries))
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(0)
    }
}
