//! Read-only views over the job store and the broker.

use chrono::{DateTime, Utc};
use display_types::{
    DispatchError, JobFilter, JobRecord, JobState, JobStore, QueueAdapter, QueueStatus,
};
use std::sync::Arc;
use std::time::Duration;

/// Default number of entries returned by [`StatusAggregator::failures`].
pub const DEFAULT_FAILURES_LIMIT: usize = 10;

/// Combines store counts with broker depth. The two reads are independent, so the
/// result is eventually consistent rather than a snapshot.
#[derive(Clone)]
pub struct StatusAggregator {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn QueueAdapter>,
    broker_timeout: Duration,
}

impl StatusAggregator {
    pub fn new(
        store: Arc<dyn JobStore>,
        queue: Arc<dyn QueueAdapter>,
        broker_timeout: Duration,
    ) -> Self {
        Self {
            store,
            queue,
            broker_timeout,
        }
    }

    pub async fn queue_status(&self) -> Result<QueueStatus, DispatchError> {
        let counts = self.store.count_by_state().await?;
        let queue_depth = tokio::time::timeout(self.broker_timeout, self.queue.queue_depth())
            .await
            .map_err(|_| DispatchError::Timeout {
                job_id: None,
                operation: "queue_depth",
                after: self.broker_timeout,
            })??;
        let count = |s: JobState| counts.get(&s).copied().unwrap_or(0);
        Ok(QueueStatus {
            pending_count: count(JobState::Pending),
            queued_count: count(JobState::Queued),
            running_count: count(JobState::Running),
            cancelling_count: count(JobState::Cancelling),
            queue_depth,
        })
    }

    /// Failed jobs updated at or after `since`, most recent first.
    pub async fn failures(
        &self,
        since: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> Result<Vec<JobRecord>, DispatchError> {
        let mut filter = JobFilter::with_states(&[JobState::Failed]);
        if let Some(since) = since {
            filter = filter.updated_since(since);
        }
        let mut failed = self.store.list(&filter).await?;
        failed.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then(b.id.cmp(&a.id)));
        failed.truncate(limit.unwrap_or(DEFAULT_FAILURES_LIMIT));
        Ok(failed)
    }
}
