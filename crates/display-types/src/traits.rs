//! Traits for the job store and the broker adapter.

use crate::{
    AckHandle, Delivery, JobId, JobRecord, JobState, QueueError, QueueMessage, StoreError,
    Transition,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use futures::StreamExt;
use std::collections::HashMap;

/// Selection for [`JobStore::list`]. Empty filter matches every job.
#[derive(Debug, Clone, Default)]
pub struct JobFilter {
    pub states: Option<Vec<JobState>>,
    /// Only jobs with `updated_at >= updated_since`.
    pub updated_since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl JobFilter {
    pub fn with_states(states: &[JobState]) -> Self {
        Self {
            states: Some(states.to_vec()),
            ..Default::default()
        }
    }

    pub fn updated_since(mut self, since: DateTime<Utc>) -> Self {
        self.updated_since = Some(since);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn matches(&self, job: &JobRecord) -> bool {
        if let Some(ref states) = self.states {
            if !states.contains(&job.state) {
                return false;
            }
        }
        if let Some(since) = self.updated_since {
            if job.updated_at < since {
                return false;
            }
        }
        true
    }
}

/// Durable mapping from job id to job record and its history.
///
/// Contract: `update_state` is a compare-and-swap on the stored state. Two callers
/// racing on the same `(from, to)` pair see exactly one success; the loser gets
/// [`StoreError::StateConflict`].
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persist a new record. Fails with `Conflict` when its idempotency key is taken.
    async fn create(&self, job: JobRecord) -> Result<JobRecord, StoreError>;

    async fn get(&self, id: JobId) -> Result<JobRecord, StoreError>;

    async fn update_state(&self, id: JobId, transition: Transition) -> Result<JobRecord, StoreError>;

    /// Matching records ordered by `created_at` ascending.
    async fn list(&self, filter: &JobFilter) -> Result<Vec<JobRecord>, StoreError>;

    /// Number of jobs per state. Backends may override with a cheaper query.
    async fn count_by_state(&self) -> Result<HashMap<JobState, usize>, StoreError> {
        let mut counts = HashMap::new();
        for job in self.list(&JobFilter::default()).await? {
            *counts.entry(job.state).or_insert(0) += 1;
        }
        Ok(counts)
    }
}

/// Publish/consume seam over a message broker with at-least-once delivery.
#[async_trait]
pub trait QueueAdapter: Send + Sync {
    /// Hand a message to the broker. A failure means the outcome is unknown.
    async fn publish(&self, message: QueueMessage) -> Result<(), QueueError>;

    /// Wait for the next deliverable message and lease it to the caller.
    async fn receive(&self) -> Result<Delivery, QueueError>;

    /// Settle a delivery after successful processing.
    async fn ack(&self, handle: &AckHandle) -> Result<(), QueueError>;

    /// Return a delivery for redelivery with `delivery_attempt + 1`.
    async fn nack(&self, handle: &AckHandle) -> Result<(), QueueError>;

    /// Approximate count of undelivered messages. For status reporting only.
    async fn queue_depth(&self) -> Result<usize, QueueError>;

    /// Lazy, potentially infinite stream of deliveries. Ends when the queue is closed.
    fn consume(&self) -> BoxStream<'_, Result<Delivery, QueueError>> {
        futures::stream::unfold(self, |queue| async move {
            match queue.receive().await {
                Err(QueueError::Closed) => None,
                other => Some((other, queue)),
            }
        })
        .boxed()
    }
}
