//! Broker-facing message types.

use crate::{JobId, JobPayload, JobRecord, QueueError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// On-wire representation of a job handed to a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueMessage {
    pub job_id: JobId,
    pub payload: JobPayload,
    pub priority: i32,
    pub enqueued_at: DateTime<Utc>,
    /// Starts at 1; the broker increments it on every redelivery.
    pub delivery_attempt: u32,
}

impl QueueMessage {
    pub fn for_job(job: &JobRecord, enqueued_at: DateTime<Utc>) -> Self {
        Self {
            job_id: job.id,
            payload: job.payload.clone(),
            priority: job.priority,
            enqueued_at,
            delivery_attempt: 1,
        }
    }

    /// Same message, one delivery attempt later.
    pub fn redelivered(mut self) -> Self {
        self.delivery_attempt = self.delivery_attempt.saturating_add(1);
        self
    }

    pub fn to_json(&self) -> Result<String, QueueError> {
        serde_json::to_string(self).map_err(|e| QueueError::Codec(e.to_string()))
    }

    pub fn from_json(body: &str) -> Result<Self, QueueError> {
        serde_json::from_str(body).map_err(|e| QueueError::Codec(e.to_string()))
    }
}

/// Opaque receipt identifying one delivery of a message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AckHandle(String);

impl AckHandle {
    pub fn new(receipt: impl Into<String>) -> Self {
        Self(receipt.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AckHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A received message together with the handle used to ack or nack it.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub message: QueueMessage,
    pub handle: AckHandle,
}
