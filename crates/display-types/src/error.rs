//! Error taxonomy shared by the store, queue and dispatcher layers.

use crate::{JobId, JobState};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("idempotency key already maps to job {existing}")]
    Conflict { existing: JobId },
    #[error("job {id} is {actual}, expected {expected}")]
    StateConflict {
        id: JobId,
        expected: JobState,
        actual: JobState,
    },
    #[error("job {id}: transition {from} -> {to} is not allowed")]
    InvalidTransition {
        id: JobId,
        from: JobState,
        to: JobState,
    },
    #[error("job store error: {0}")]
    Other(String),
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("broker unavailable: {0}")]
    Unavailable(String),
    #[error("unknown or expired delivery handle: {0}")]
    UnknownHandle(String),
    #[error("message codec error: {0}")]
    Codec(String),
    #[error("queue closed")]
    Closed,
}

/// Errors surfaced by the dispatcher service to its callers.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error("job not found: {0}")]
    NotFound(JobId),
    #[error("idempotency key already used by job {existing} with a different request")]
    Conflict { existing: JobId },
    #[error("job {id} is {actual}, expected {expected}")]
    StateConflict {
        id: JobId,
        expected: JobState,
        actual: JobState,
    },
    #[error("job {id}: transition {from} -> {to} is not allowed")]
    InvalidTransition {
        id: JobId,
        from: JobState,
        to: JobState,
    },
    #[error("dispatch failure for job {job_id}: {reason}")]
    DispatchFailure { job_id: JobId, reason: String },
    #[error("{operation} timed out after {after:?}; outcome unknown")]
    Timeout {
        job_id: Option<JobId>,
        operation: &'static str,
        after: Duration,
    },
    #[error("store: {0}")]
    Store(StoreError),
    #[error("queue: {0}")]
    Queue(#[from] QueueError),
}

impl From<StoreError> for DispatchError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => DispatchError::NotFound(id),
            StoreError::Conflict { existing } => DispatchError::Conflict { existing },
            StoreError::StateConflict {
                id,
                expected,
                actual,
            } => DispatchError::StateConflict {
                id,
                expected,
                actual,
            },
            StoreError::InvalidTransition { id, from, to } => {
                DispatchError::InvalidTransition { id, from, to }
            }
            other => DispatchError::Store(other),
        }
    }
}

/// Machine-readable classification of a [`DispatchError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidPayload,
    NotFound,
    Conflict,
    StateConflict,
    InvalidTransition,
    DispatchFailure,
    Timeout,
    Internal,
}

impl DispatchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DispatchError::InvalidPayload(_) => ErrorKind::InvalidPayload,
            DispatchError::NotFound(_) => ErrorKind::NotFound,
            DispatchError::Conflict { .. } => ErrorKind::Conflict,
            DispatchError::StateConflict { .. } => ErrorKind::StateConflict,
            DispatchError::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            DispatchError::DispatchFailure { .. } => ErrorKind::DispatchFailure,
            DispatchError::Timeout { .. } => ErrorKind::Timeout,
            DispatchError::Store(_) | DispatchError::Queue(_) => ErrorKind::Internal,
        }
    }

    /// Job the error refers to, when there is one.
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            DispatchError::NotFound(id) => Some(*id),
            DispatchError::Conflict { existing } => Some(*existing),
            DispatchError::StateConflict { id, .. } | DispatchError::InvalidTransition { id, .. } => {
                Some(*id)
            }
            DispatchError::DispatchFailure { job_id, .. } => Some(*job_id),
            DispatchError::Timeout { job_id, .. } => *job_id,
            _ => None,
        }
    }
}
