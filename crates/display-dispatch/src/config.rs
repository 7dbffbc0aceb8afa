//! Dispatcher configuration.

use display_types::DEFAULT_PRIORITY;
use std::time::Duration;

/// Tuning knobs for the dispatcher service.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Priority assigned when an enqueue request has none.
    pub default_priority: i32,
    /// Publish attempts before a job is marked failed.
    pub publish_max_attempts: u32,
    /// Base backoff between publish attempts; attempt `n` waits `n * publish_backoff`.
    pub publish_backoff: Duration,
    /// Deadline applied to every broker call.
    pub broker_timeout: Duration,
    /// Deliveries past this attempt fail the job instead of running it. `None` = unlimited.
    pub max_delivery_attempts: Option<u32>,
    /// Re-reads allowed when a compare-and-swap loses a race.
    pub cas_retry_limit: u32,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            default_priority: DEFAULT_PRIORITY,
            publish_max_attempts: 3,
            publish_backoff: Duration::from_millis(200),
            broker_timeout: Duration::from_secs(5),
            max_delivery_attempts: Some(5),
            cas_retry_limit: 8,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

impl DispatcherConfig {
    /// Defaults overridden by `DISPATCHER_DEFAULT_PRIORITY`, `DISPATCHER_PUBLISH_MAX_ATTEMPTS`,
    /// `DISPATCHER_PUBLISH_BACKOFF_MS`, `DISPATCHER_BROKER_TIMEOUT_MS`,
    /// `DISPATCHER_MAX_DELIVERY_ATTEMPTS` (0 = unlimited) and `DISPATCHER_CAS_RETRY_LIMIT`.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            default_priority: env_parse("DISPATCHER_DEFAULT_PRIORITY").unwrap_or(d.default_priority),
            publish_max_attempts: env_parse("DISPATCHER_PUBLISH_MAX_ATTEMPTS")
                .unwrap_or(d.publish_max_attempts),
            publish_backoff: env_parse("DISPATCHER_PUBLISH_BACKOFF_MS")
                .map(Duration::from_millis)
                .unwrap_or(d.publish_backoff),
            broker_timeout: env_parse("DISPATCHER_BROKER_TIMEOUT_MS")
                .map(Duration::from_millis)
                .unwrap_or(d.broker_timeout),
            max_delivery_attempts: match env_parse::<u32>("DISPATCHER_MAX_DELIVERY_ATTEMPTS") {
                Some(0) => None,
                Some(n) => Some(n),
                None => d.max_delivery_attempts,
            },
            cas_retry_limit: env_parse("DISPATCHER_CAS_RETRY_LIMIT").unwrap_or(d.cas_retry_limit),
        }
    }

    pub fn with_publish_retries(mut self, attempts: u32, backoff: Duration) -> Self {
        self.publish_max_attempts = attempts;
        self.publish_backoff = backoff;
        self
    }

    pub fn with_broker_timeout(mut self, timeout: Duration) -> Self {
        self.broker_timeout = timeout;
        self
    }

    pub fn with_max_delivery_attempts(mut self, max: Option<u32>) -> Self {
        self.max_delivery_attempts = max;
        self
    }
}
