//! Broker configuration.

use std::time::Duration;

/// Delivery settings shared by the broker adapters.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Queue (topic) the adapter publishes to and consumes from.
    pub queue_name: String,
    /// How long a delivery stays leased before the broker redelivers it.
    pub visibility_timeout: Duration,
    /// Delay before a nacked message becomes visible again.
    pub redelivery_delay: Duration,
    /// Upper bound on how long an idle consumer sleeps between checks.
    pub poll_interval: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            queue_name: "display.jobs".to_string(),
            visibility_timeout: Duration::from_secs(30),
            redelivery_delay: Duration::ZERO,
            poll_interval: Duration::from_millis(100),
        }
    }
}

fn env_millis(key: &str) -> Option<Duration> {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_millis)
}

impl BrokerConfig {
    /// Defaults overridden by `BROKER_QUEUE`, `BROKER_VISIBILITY_TIMEOUT_MS`,
    /// `BROKER_REDELIVERY_DELAY_MS` and `BROKER_POLL_INTERVAL_MS`.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            queue_name: std::env::var("BROKER_QUEUE").unwrap_or(d.queue_name),
            visibility_timeout: env_millis("BROKER_VISIBILITY_TIMEOUT_MS")
                .unwrap_or(d.visibility_timeout),
            redelivery_delay: env_millis("BROKER_REDELIVERY_DELAY_MS")
                .unwrap_or(d.redelivery_delay),
            poll_interval: env_millis("BROKER_POLL_INTERVAL_MS").unwrap_or(d.poll_interval),
        }
    }

    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    pub fn with_redelivery_delay(mut self, delay: Duration) -> Self {
        self.redelivery_delay = delay;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}
