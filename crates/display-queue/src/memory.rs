//! In-memory broker: priority queue with leases and redelivery.

use crate::BrokerConfig;
use chrono::{DateTime, Utc};
use display_types::{AckHandle, Delivery, QueueAdapter, QueueError, QueueMessage};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use uuid::Uuid;

/// Heap entry. Max-heap order: higher priority, then older `enqueued_at`, then lower seq.
struct Ready {
    priority: i32,
    enqueued_at: DateTime<Utc>,
    seq: u64,
    message: QueueMessage,
}

impl PartialEq for Ready {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Ready {}

impl PartialOrd for Ready {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ready {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.enqueued_at.cmp(&self.enqueued_at))
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct Leased {
    message: QueueMessage,
    deadline: Instant,
}

struct Delayed {
    visible_at: Instant,
    message: QueueMessage,
}

#[derive(Default)]
struct BrokerState {
    ready: BinaryHeap<Ready>,
    delayed: Vec<Delayed>,
    /// receipt -> leased message.
    leased: HashMap<String, Leased>,
    next_seq: u64,
    closed: bool,
}

impl BrokerState {
    fn push_ready(&mut self, message: QueueMessage) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.ready.push(Ready {
            priority: message.priority,
            enqueued_at: message.enqueued_at,
            seq,
            message,
        });
    }

    /// Move expired leases and due delayed messages back to the ready heap.
    fn promote(&mut self, now: Instant) {
        let expired: Vec<String> = self
            .leased
            .iter()
            .filter(|(_, l)| l.deadline <= now)
            .map(|(r, _)| r.clone())
            .collect();
        for receipt in expired {
            if let Some(l) = self.leased.remove(&receipt) {
                let message = l.message.redelivered();
                tracing::warn!(
                    job_id = %message.job_id,
                    attempt = message.delivery_attempt,
                    "visibility timeout elapsed, redelivering"
                );
                self.push_ready(message);
            }
        }

        let mut i = 0;
        while i < self.delayed.len() {
            if self.delayed[i].visible_at <= now {
                let d = self.delayed.swap_remove(i);
                self.push_ready(d.message);
            } else {
                i += 1;
            }
        }
    }

    /// Time until the next lease expiry or delayed message, if any.
    fn next_wakeup(&self, now: Instant) -> Option<Duration> {
        self.leased
            .values()
            .map(|l| l.deadline)
            .chain(self.delayed.iter().map(|d| d.visible_at))
            .min()
            .map(|t| t.saturating_duration_since(now))
    }
}

/// In-process broker with at-least-once delivery.
///
/// Deliveries are leased for `visibility_timeout`; a lease that is neither acked nor
/// nacked in time is redelivered with `delivery_attempt + 1`. Not durable: use the
/// SQLite queue when messages must survive a restart.
pub struct InMemoryBroker {
    config: BrokerConfig,
    state: Mutex<BrokerState>,
    notify: Notify,
}

impl InMemoryBroker {
    pub fn new(config: BrokerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(BrokerState::default()),
            notify: Notify::new(),
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    /// Number of deliveries currently leased to consumers.
    pub async fn in_flight(&self) -> usize {
        self.state.lock().await.leased.len()
    }

    /// Stop the broker. Pending `receive` calls return `QueueError::Closed`.
    pub async fn close(&self) {
        self.state.lock().await.closed = true;
        self.notify.notify_waiters();
    }

    /// Lease the next visible message, or report how long to wait for one.
    async fn try_lease(&self) -> Result<Result<Delivery, Duration>, QueueError> {
        let mut st = self.state.lock().await;
        if st.closed {
            return Err(QueueError::Closed);
        }
        let now = Instant::now();
        st.promote(now);
        if let Some(ready) = st.ready.pop() {
            let receipt = Uuid::new_v4().to_string();
            st.leased.insert(
                receipt.clone(),
                Leased {
                    message: ready.message.clone(),
                    deadline: now + self.config.visibility_timeout,
                },
            );
            return Ok(Ok(Delivery {
                message: ready.message,
                handle: AckHandle::new(receipt),
            }));
        }
        let wait = st
            .next_wakeup(now)
            .map_or(self.config.poll_interval, |d| d.min(self.config.poll_interval));
        Ok(Err(wait))
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new(BrokerConfig::default())
    }
}

#[async_trait::async_trait]
impl QueueAdapter for InMemoryBroker {
    async fn publish(&self, message: QueueMessage) -> Result<(), QueueError> {
        {
            let mut st = self.state.lock().await;
            if st.closed {
                return Err(QueueError::Closed);
            }
            tracing::debug!(
                queue = %self.config.queue_name,
                job_id = %message.job_id,
                priority = message.priority,
                "message published"
            );
            st.push_ready(message);
        }
        self.notify.notify_one();
        Ok(())
    }

    async fn receive(&self) -> Result<Delivery, QueueError> {
        loop {
            let wait = match self.try_lease().await? {
                Ok(delivery) => return Ok(delivery),
                Err(wait) => wait,
            };
            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    async fn ack(&self, handle: &AckHandle) -> Result<(), QueueError> {
        let mut st = self.state.lock().await;
        st.leased
            .remove(handle.as_str())
            .map(|_| ())
            .ok_or_else(|| QueueError::UnknownHandle(handle.to_string()))
    }

    async fn nack(&self, handle: &AckHandle) -> Result<(), QueueError> {
        {
            let mut st = self.state.lock().await;
            let leased = st
                .leased
                .remove(handle.as_str())
                .ok_or_else(|| QueueError::UnknownHandle(handle.to_string()))?;
            let message = leased.message.redelivered();
            if self.config.redelivery_delay.is_zero() {
                st.push_ready(message);
            } else {
                st.delayed.push(Delayed {
                    visible_at: Instant::now() + self.config.redelivery_delay,
                    message,
                });
            }
        }
        self.notify.notify_one();
        Ok(())
    }

    async fn queue_depth(&self) -> Result<usize, QueueError> {
        let st = self.state.lock().await;
        Ok(st.ready.len() + st.delayed.len())
    }
}
