//! Dispatcher: admission, publish with bounded retries, cancellation, and the worker
//! transition API. Every state change goes through the store's compare-and-swap.

use crate::{DispatcherConfig, StatusAggregator};
use chrono::Utc;
use dashmap::DashSet;
use display_types::{
    DispatchError, EnqueueRequest, JobId, JobRecord, JobRef, JobState, JobStore, QueueAdapter,
    QueueMessage, StoreError, Transition, TransitionRequest, WorkerOutcome,
};
use std::sync::Arc;

const DISPATCH_FAILURE: &str = "dispatch failure";
const DELIVERY_EXHAUSTED: &str = "delivery attempts exhausted";

/// What a worker should do with a delivery, decided by [`Dispatcher::claim`].
#[derive(Debug, Clone, PartialEq)]
pub enum Claim {
    /// The job is now `RUNNING` under this delivery attempt.
    Run(JobRecord),
    /// Unknown, terminal, or already claimed by this or a later attempt: ack, do not run.
    Stale,
    /// Cancellation was requested while the job was running: report the stop and ack.
    CancelRequested,
}

/// Job ids with a publish in progress on this dispatcher.
#[derive(Clone, Default)]
struct InFlight(Arc<DashSet<JobId>>);

/// Releases its id when dropped, including when the enqueue future is cancelled.
struct InFlightGuard {
    set: Arc<DashSet<JobId>>,
    id: JobId,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set.remove(&self.id);
    }
}

impl InFlight {
    fn try_claim(&self, id: JobId) -> Option<InFlightGuard> {
        self.0.insert(id).then(|| InFlightGuard {
            set: self.0.clone(),
            id,
        })
    }
}

/// Dispatcher service. Cheap to clone; store and queue are shared.
#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<dyn JobStore>,
    queue: Arc<dyn QueueAdapter>,
    config: DispatcherConfig,
    status: StatusAggregator,
    publishing: InFlight,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn JobStore>,
        queue: Arc<dyn QueueAdapter>,
        config: DispatcherConfig,
    ) -> Self {
        let status = StatusAggregator::new(store.clone(), queue.clone(), config.broker_timeout);
        Self {
            store,
            queue,
            config,
            status,
            publishing: InFlight::default(),
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn queue(&self) -> &Arc<dyn QueueAdapter> {
        &self.queue
    }

    pub fn status(&self) -> &StatusAggregator {
        &self.status
    }

    /// Admit a job: validate, persist as `PENDING`, publish, mark `QUEUED`.
    ///
    /// A repeated idempotency key with the same payload and priority returns the
    /// existing job (re-publishing it if it never left `PENDING` and no other publish
    /// of it is in progress); with a different request it is a `Conflict`.
    pub async fn enqueue(&self, req: EnqueueRequest) -> Result<JobRef, DispatchError> {
        let priority = req.priority_or(self.config.default_priority);
        let req = EnqueueRequest {
            priority: Some(priority),
            ..req
        };
        req.validate()?;

        let record = JobRecord::new(
            JobId::new(),
            req.payload.clone(),
            priority,
            req.idempotency_key.clone(),
            Utc::now(),
        );
        // Claimed before the record is visible, so a replay cannot race this publish.
        let _claim = self.publishing.try_claim(record.id);
        match self.store.create(record).await {
            Ok(job) => {
                tracing::info!(
                    job_id = %job.id,
                    job_type = %job.payload.job_type,
                    priority,
                    "job enqueued"
                );
                self.publish(job).await
            }
            Err(StoreError::Conflict { existing }) => {
                let job = self.store.get(existing).await?;
                if job.payload != req.payload || job.priority != priority {
                    return Err(DispatchError::Conflict { existing });
                }
                tracing::info!(job_id = %job.id, state = %job.state, "idempotent enqueue replay");
                if job.state == JobState::Pending {
                    return self.replay_publish(job.id).await;
                }
                Ok(JobRef {
                    job_id: job.id,
                    state: job.state,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Re-publish a `PENDING` job whose earlier publish ended unresolved. While another
    /// publish of it is in progress the caller just gets the current `PENDING` state.
    async fn replay_publish(&self, id: JobId) -> Result<JobRef, DispatchError> {
        let Some(_claim) = self.publishing.try_claim(id) else {
            tracing::debug!(job_id = %id, "publish already in progress");
            return Ok(JobRef {
                job_id: id,
                state: JobState::Pending,
            });
        };
        // The in-progress publish may have finished between the read and the claim.
        let job = self.store.get(id).await?;
        if job.state != JobState::Pending {
            return Ok(JobRef {
                job_id: id,
                state: job.state,
            });
        }
        self.publish(job).await
    }

    /// Publish with bounded retries, each attempt under `broker_timeout`.
    ///
    /// Definite broker errors on every attempt fail the job. A timeout on any attempt
    /// leaves it `PENDING`: that message may have been delivered.
    async fn publish(&self, job: JobRecord) -> Result<JobRef, DispatchError> {
        let message = QueueMessage::for_job(&job, job.created_at);
        let attempts = self.config.publish_max_attempts.max(1);
        let mut last_error = String::new();
        let mut timed_out = false;

        for attempt in 1..=attempts {
            let result =
                tokio::time::timeout(self.config.broker_timeout, self.queue.publish(message.clone()))
                    .await;
            match result {
                Ok(Ok(())) => return self.mark_queued(job.id).await,
                Ok(Err(e)) => {
                    tracing::warn!(job_id = %job.id, attempt, error = %e, "publish failed");
                    last_error = e.to_string();
                }
                Err(_) => {
                    tracing::warn!(job_id = %job.id, attempt, "publish timed out");
                    timed_out = true;
                }
            }
            if attempt < attempts {
                tokio::time::sleep(self.config.publish_backoff * attempt).await;
            }
        }

        if timed_out {
            return Err(DispatchError::Timeout {
                job_id: Some(job.id),
                operation: "publish",
                after: self.config.broker_timeout,
            });
        }

        let failed = Transition::new(JobState::Pending, JobState::Failed, Utc::now())
            .with_error(DISPATCH_FAILURE);
        match self.store.update_state(job.id, failed).await {
            Ok(_) => {
                tracing::error!(job_id = %job.id, error = %last_error, "job failed: broker unavailable");
                Err(DispatchError::DispatchFailure {
                    job_id: job.id,
                    reason: last_error,
                })
            }
            // Cancelled (or claimed) meanwhile; report where it ended up.
            Err(StoreError::StateConflict { actual, .. }) => Ok(JobRef {
                job_id: job.id,
                state: actual,
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn mark_queued(&self, id: JobId) -> Result<JobRef, DispatchError> {
        let t = Transition::new(JobState::Pending, JobState::Queued, Utc::now());
        match self.store.update_state(id, t).await {
            Ok(job) => {
                tracing::info!(job_id = %id, "job queued");
                Ok(JobRef {
                    job_id: id,
                    state: job.state,
                })
            }
            // A worker claim or a cancel got there first.
            Err(StoreError::StateConflict { actual, .. }) => {
                tracing::debug!(job_id = %id, state = %actual, "job moved on before queued mark");
                Ok(JobRef {
                    job_id: id,
                    state: actual,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Request cancellation. `PENDING`/`QUEUED` cancel immediately, `RUNNING` becomes
    /// `CANCELLING`. On a terminal or already cancelling job this returns the current
    /// state unchanged.
    pub async fn cancel(&self, id: JobId) -> Result<JobRef, DispatchError> {
        let mut conflicts = 0;
        loop {
            let job = self.store.get(id).await?;
            let to = match job.state {
                JobState::Pending | JobState::Queued => JobState::Cancelled,
                JobState::Running => JobState::Cancelling,
                state => {
                    tracing::debug!(job_id = %id, state = %state, "cancel is a no-op");
                    return Ok(JobRef { job_id: id, state });
                }
            };
            match self
                .store
                .update_state(id, Transition::new(job.state, to, Utc::now()))
                .await
            {
                Ok(updated) => {
                    tracing::info!(job_id = %id, from = %job.state, state = %updated.state, "cancel requested");
                    return Ok(JobRef {
                        job_id: id,
                        state: updated.state,
                    });
                }
                Err(e @ StoreError::StateConflict { .. }) => {
                    conflicts += 1;
                    if conflicts > self.config.cas_retry_limit {
                        return Err(e.into());
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Full record including history.
    pub async fn job_status(&self, id: JobId) -> Result<JobRecord, DispatchError> {
        tracing::debug!(job_id = %id, "job status read");
        Ok(self.store.get(id).await?)
    }

    /// Compare-and-swap pass-through for workers. Only worker-reported states are accepted.
    pub async fn update_state(
        &self,
        id: JobId,
        req: TransitionRequest,
    ) -> Result<JobRecord, DispatchError> {
        if !matches!(
            req.to,
            JobState::Running | JobState::Succeeded | JobState::Failed | JobState::Cancelled
        ) {
            return Err(DispatchError::InvalidTransition {
                id,
                from: req.from,
                to: req.to,
            });
        }
        let mut t = Transition::new(req.from, req.to, Utc::now());
        t.attempt = req.attempt;
        t.error = req.error;
        let job = self.store.update_state(id, t).await?;
        tracing::info!(job_id = %id, from = %req.from, state = %job.state, attempt = job.attempt, "worker transition");
        Ok(job)
    }

    /// Decide whether a delivered message should run, and move the job to `RUNNING` if so.
    pub async fn claim(&self, message: &QueueMessage) -> Result<Claim, DispatchError> {
        let id = message.job_id;
        let attempt = message.delivery_attempt;
        let exhausted = self
            .config
            .max_delivery_attempts
            .is_some_and(|max| attempt > max);
        let mut conflicts = 0;

        loop {
            let job = match self.store.get(id).await {
                Ok(job) => job,
                Err(StoreError::NotFound(_)) => {
                    tracing::warn!(job_id = %id, attempt, "stale delivery: unknown job");
                    return Ok(Claim::Stale);
                }
                Err(e) => return Err(e.into()),
            };

            let now = Utc::now();
            let step = match job.state {
                state if state.is_terminal() => {
                    tracing::warn!(job_id = %id, state = %state, attempt, "stale delivery: job finished");
                    return Ok(Claim::Stale);
                }
                JobState::Cancelling => return Ok(Claim::CancelRequested),
                // Delivery proves the publish landed even if the queued mark did not.
                JobState::Pending => Transition::new(JobState::Pending, JobState::Queued, now),
                JobState::Queued => {
                    Transition::new(JobState::Queued, JobState::Running, now).with_attempt(attempt)
                }
                JobState::Running if exhausted && job.attempt == attempt => {
                    tracing::warn!(job_id = %id, attempt, "delivery attempts exhausted");
                    Transition::new(JobState::Running, JobState::Failed, now)
                        .with_attempt(attempt)
                        .with_error(DELIVERY_EXHAUSTED)
                }
                JobState::Running if attempt > job.attempt => {
                    Transition::new(JobState::Running, JobState::Running, now).with_attempt(attempt)
                }
                _ => {
                    tracing::warn!(
                        job_id = %id,
                        attempt,
                        claimed_attempt = job.attempt,
                        "stale delivery: duplicate"
                    );
                    return Ok(Claim::Stale);
                }
            };

            match self.store.update_state(id, step).await {
                Ok(updated) if updated.state == JobState::Running && !exhausted => {
                    tracing::info!(job_id = %id, attempt, "job claimed");
                    return Ok(Claim::Run(updated));
                }
                Ok(_) => {}
                Err(e @ StoreError::StateConflict { .. }) => {
                    conflicts += 1;
                    if conflicts > self.config.cas_retry_limit {
                        return Err(e.into());
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Record a worker's outcome. Idempotent when the job already is in the reported state.
    pub async fn complete(
        &self,
        id: JobId,
        outcome: WorkerOutcome,
    ) -> Result<JobRecord, DispatchError> {
        let to = outcome.target_state();
        let mut conflicts = 0;
        loop {
            let job = self.store.get(id).await?;
            if job.state == to {
                return Ok(job);
            }
            if job.is_terminal() {
                return Err(DispatchError::InvalidTransition {
                    id,
                    from: job.state,
                    to,
                });
            }
            let mut t = Transition::new(job.state, to, Utc::now());
            if let WorkerOutcome::Failed { ref error } = outcome {
                t = t.with_error(error.clone());
            }
            match self.store.update_state(id, t).await {
                Ok(updated) => {
                    if to == JobState::Failed {
                        tracing::warn!(job_id = %id, error = ?updated.error, "job failed");
                    } else {
                        tracing::info!(job_id = %id, state = %updated.state, "job finished");
                    }
                    return Ok(updated);
                }
                Err(e @ StoreError::StateConflict { .. }) => {
                    conflicts += 1;
                    if conflicts > self.config.cas_retry_limit {
                        return Err(e.into());
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
