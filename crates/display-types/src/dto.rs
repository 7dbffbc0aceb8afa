//! Request and response DTOs for the tool-facing and worker-facing contracts.

use crate::{DispatchError, JobId, JobPayload, JobState, DEFAULT_PRIORITY, PRIORITY_RANGE};
use serde::{Deserialize, Serialize};

const MAX_IDEMPOTENCY_KEY_LEN: usize = 256;

/// Enqueue request: payload fields at the top level plus priority and idempotency key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnqueueRequest {
    #[serde(flatten)]
    pub payload: JobPayload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
}

impl EnqueueRequest {
    pub fn new(payload: JobPayload) -> Self {
        Self {
            payload,
            priority: None,
            idempotency_key: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Parse an untyped body; any shape error is an `InvalidPayload`.
    pub fn from_json(value: serde_json::Value) -> Result<Self, DispatchError> {
        serde_json::from_value(value).map_err(|e| DispatchError::InvalidPayload(e.to_string()))
    }

    pub fn priority_or(&self, default: i32) -> i32 {
        self.priority.unwrap_or(default)
    }

    pub fn validate(&self) -> Result<(), DispatchError> {
        self.payload
            .validate()
            .map_err(DispatchError::InvalidPayload)?;
        let priority = self.priority_or(DEFAULT_PRIORITY);
        if !PRIORITY_RANGE.contains(&priority) {
            return Err(DispatchError::InvalidPayload(format!(
                "priority {} outside {}..={}",
                priority,
                PRIORITY_RANGE.start(),
                PRIORITY_RANGE.end()
            )));
        }
        if let Some(ref key) = self.idempotency_key {
            if key.trim().is_empty() {
                return Err(DispatchError::InvalidPayload(
                    "idempotency_key must not be blank".to_string(),
                ));
            }
            if key.len() > MAX_IDEMPOTENCY_KEY_LEN {
                return Err(DispatchError::InvalidPayload(format!(
                    "idempotency_key exceeds {} bytes",
                    MAX_IDEMPOTENCY_KEY_LEN
                )));
            }
        }
        Ok(())
    }
}

/// `{job_id, state}` returned by enqueue and cancel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRef {
    pub job_id: JobId,
    pub state: JobState,
}

/// Queue overview. Store counts and broker depth are read independently.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStatus {
    pub pending_count: usize,
    pub queued_count: usize,
    pub running_count: usize,
    #[serde(default)]
    pub cancelling_count: usize,
    pub queue_depth: usize,
}

/// What a worker reports when it stops working on a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WorkerOutcome {
    Succeeded,
    Failed { error: String },
    /// Worker observed `CANCELLING` and stopped.
    Stopped,
}

impl WorkerOutcome {
    pub fn target_state(&self) -> JobState {
        match self {
            WorkerOutcome::Succeeded => JobState::Succeeded,
            WorkerOutcome::Failed { .. } => JobState::Failed,
            WorkerOutcome::Stopped => JobState::Cancelled,
        }
    }
}

/// Raw compare-and-swap callback from a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRequest {
    pub from: JobState,
    pub to: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
}

/// Response envelope used by the HTTP service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaseResponse<T> {
    #[serde(default = "default_code")]
    pub code: i32,
    pub message: String,
    #[serde(default)]
    pub data: Option<T>,
}

fn default_code() -> i32 {
    200
}

impl<T> BaseResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            code: 200,
            message: "Success".to_string(),
            data: Some(data),
        }
    }
}
