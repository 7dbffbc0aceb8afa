//! Worker-side loop: receive, claim, run, report, ack.

use crate::{Claim, Dispatcher};
use display_types::{
    AckHandle, Delivery, DispatchError, JobId, JobRecord, JobState, QueueAdapter, QueueError,
    WorkerOutcome,
};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    /// The handler saw a cancellation request and stopped.
    #[error("stopped on cancellation request")]
    Cancelled,
    #[error("{0}")]
    Failed(String),
}

/// Lets a running handler check whether the job has been asked to stop.
pub struct CancelProbe {
    dispatcher: Dispatcher,
    job_id: JobId,
}

impl CancelProbe {
    pub fn job_id(&self) -> JobId {
        self.job_id
    }

    pub async fn is_cancel_requested(&self) -> Result<bool, DispatchError> {
        let job = self.dispatcher.job_status(self.job_id).await?;
        Ok(job.state == JobState::Cancelling)
    }
}

/// The actual rendering work. Must tolerate running the same job more than once.
#[async_trait::async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, job: &JobRecord, probe: &CancelProbe) -> Result<(), HandlerError>;
}

/// Result of processing one delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum Processed {
    /// Handler ran; job is in its reported final state.
    Completed(JobRecord),
    /// Delivery was stale and acked without running.
    Skipped(JobId),
    /// Cancellation was acknowledged; job is `CANCELLED`.
    Stopped(JobId),
}

pub struct WorkerLoop<H> {
    dispatcher: Dispatcher,
    queue: Arc<dyn QueueAdapter>,
    handler: H,
    error_backoff: Duration,
}

impl<H: JobHandler> WorkerLoop<H> {
    pub fn new(dispatcher: Dispatcher, handler: H) -> Self {
        let queue = dispatcher.queue().clone();
        Self {
            dispatcher,
            queue,
            handler,
            error_backoff: DEFAULT_ERROR_BACKOFF,
        }
    }

    /// Pause after a failed receive before asking the queue again.
    pub fn with_error_backoff(mut self, backoff: Duration) -> Self {
        self.error_backoff = backoff;
        self
    }

    /// Consume until the queue closes. Receive and per-delivery errors are logged
    /// and the loop continues; a failed delivery is nacked.
    pub async fn run(&self) -> Result<(), DispatchError> {
        let mut deliveries = self.queue.consume();
        while let Some(delivery) = deliveries.next().await {
            let delivery = match delivery {
                Ok(delivery) => delivery,
                Err(e) => {
                    tracing::warn!(error = %e, "receive failed");
                    tokio::time::sleep(self.error_backoff).await;
                    continue;
                }
            };
            let job_id = delivery.message.job_id;
            if let Err(e) = self.process(delivery).await {
                tracing::warn!(job_id = %job_id, error = %e, "delivery processing failed");
            }
        }
        tracing::info!("queue closed, worker stopping");
        Ok(())
    }

    /// Receive and process exactly one delivery.
    pub async fn run_once(&self) -> Result<Processed, DispatchError> {
        let delivery = self.queue.receive().await?;
        self.process(delivery).await
    }

    pub async fn process(&self, delivery: Delivery) -> Result<Processed, DispatchError> {
        let Delivery { message, handle } = delivery;
        let id = message.job_id;

        let claim = match self.dispatcher.claim(&message).await {
            Ok(claim) => claim,
            Err(e) => {
                self.nack(&handle, id).await;
                return Err(e);
            }
        };

        let processed = match claim {
            Claim::Stale => Processed::Skipped(id),
            Claim::CancelRequested => {
                self.report(id, WorkerOutcome::Stopped, &handle).await?;
                Processed::Stopped(id)
            }
            Claim::Run(job) => {
                let probe = CancelProbe {
                    dispatcher: self.dispatcher.clone(),
                    job_id: id,
                };
                let outcome = match self.handler.run(&job, &probe).await {
                    Ok(()) => WorkerOutcome::Succeeded,
                    Err(HandlerError::Cancelled) => WorkerOutcome::Stopped,
                    Err(HandlerError::Failed(error)) => WorkerOutcome::Failed { error },
                };
                let stopped = outcome == WorkerOutcome::Stopped;
                let job = self.report(id, outcome, &handle).await?;
                if stopped {
                    Processed::Stopped(id)
                } else {
                    Processed::Completed(job)
                }
            }
        };

        self.ack(&handle, id).await;
        Ok(processed)
    }

    /// Report an outcome; nack the delivery if the store could not record it.
    async fn report(
        &self,
        id: JobId,
        outcome: WorkerOutcome,
        handle: &AckHandle,
    ) -> Result<JobRecord, DispatchError> {
        match self.dispatcher.complete(id, outcome).await {
            Ok(job) => Ok(job),
            Err(e) => {
                self.nack(handle, id).await;
                Err(e)
            }
        }
    }

    async fn ack(&self, handle: &AckHandle, id: JobId) {
        match self.queue.ack(handle).await {
            Ok(()) => {}
            // Lease expired; the redelivery will be recognised as stale.
            Err(QueueError::UnknownHandle(_)) => {
                tracing::warn!(job_id = %id, "ack after lease expiry");
            }
            Err(e) => tracing::warn!(job_id = %id, error = %e, "ack failed"),
        }
    }

    async fn nack(&self, handle: &AckHandle, id: JobId) {
        if let Err(e) = self.queue.nack(handle).await {
            tracing::warn!(job_id = %id, error = %e, "nack failed");
        }
    }
}
