//! Job model and lifecycle state machine.

use crate::StoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Maximum accepted length of a payload `source`, in bytes.
pub const MAX_SOURCE_LEN: usize = 2048;

/// Accepted priority range (inclusive).
pub const PRIORITY_RANGE: std::ops::RangeInclusive<i32> = -1000..=1000;

/// Priority used when the caller does not give one.
pub const DEFAULT_PRIORITY: i32 = 5;

/// Globally unique job identifier, assigned at enqueue time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for JobId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// Kind of display content a job renders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Image,
    Video,
    Slideshow,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::Image => "image",
            JobKind::Video => "video",
            JobKind::Slideshow => "slideshow",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a job.
///
/// Initial state is `Pending`; `Succeeded`, `Failed` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Pending,
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelling,
    Cancelled,
}

impl JobState {
    pub const ALL: [JobState; 7] = [
        JobState::Pending,
        JobState::Queued,
        JobState::Running,
        JobState::Succeeded,
        JobState::Failed,
        JobState::Cancelling,
        JobState::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Pending => "PENDING",
            JobState::Queued => "QUEUED",
            JobState::Running => "RUNNING",
            JobState::Succeeded => "SUCCEEDED",
            JobState::Failed => "FAILED",
            JobState::Cancelling => "CANCELLING",
            JobState::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::Cancelled
        )
    }

    /// Whether `self -> to` is an edge of the lifecycle graph.
    ///
    /// `Running -> Running` is the re-claim of a redelivered message; the store
    /// additionally requires a strictly greater delivery attempt for it.
    pub fn can_transition_to(self, to: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, to),
            (Pending, Queued)
                | (Pending, Failed)
                | (Pending, Cancelled)
                | (Queued, Running)
                | (Queued, Cancelled)
                | (Running, Running)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Running, Cancelling)
                | (Cancelling, Cancelled)
                | (Cancelling, Succeeded)
                | (Cancelling, Failed)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        JobState::ALL
            .into_iter()
            .find(|st| st.as_str() == upper)
            .ok_or_else(|| format!("unknown job state: {s}"))
    }
}

/// Opaque job parameters forwarded to the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobPayload {
    pub job_type: JobKind,
    /// Path or URL to the content.
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_device: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<HashMap<String, serde_json::Value>>,
}

impl JobPayload {
    pub fn new(job_type: JobKind, source: impl Into<String>) -> Self {
        Self {
            job_type,
            source: source.into(),
            target_device: None,
            options: None,
        }
    }

    pub fn with_target_device(mut self, device: impl Into<String>) -> Self {
        self.target_device = Some(device.into());
        self
    }

    /// Check the payload is dispatchable. Returns a human-readable reason on failure.
    pub fn validate(&self) -> Result<(), String> {
        let source = self.source.trim();
        if source.is_empty() {
            return Err("source must not be empty".to_string());
        }
        if self.source.len() > MAX_SOURCE_LEN {
            return Err(format!(
                "source exceeds {} bytes ({})",
                MAX_SOURCE_LEN,
                self.source.len()
            ));
        }
        if let Some(ref device) = self.target_device {
            if device.trim().is_empty() {
                return Err("target_device must not be blank".to_string());
            }
        }
        Ok(())
    }
}

/// One entry of a job's append-only history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateTransition {
    pub state: JobState,
    pub at: DateTime<Utc>,
    /// Delivery attempt for worker-reported states.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
}

/// Compare-and-swap request applied by [`crate::JobStore::update_state`].
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub from: JobState,
    pub to: JobState,
    pub at: DateTime<Utc>,
    pub attempt: Option<u32>,
    pub error: Option<String>,
}

impl Transition {
    pub fn new(from: JobState, to: JobState, at: DateTime<Utc>) -> Self {
        Self {
            from,
            to,
            at,
            attempt: None,
            error: None,
        }
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

/// Stored job: payload, current state, and its history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub payload: JobPayload,
    pub priority: i32,
    pub state: JobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set only while `state == Failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Delivery attempt of the latest worker claim; 0 until first claimed.
    #[serde(default)]
    pub attempt: u32,
    #[serde(default)]
    pub history: Vec<StateTransition>,
}

impl JobRecord {
    /// A fresh `Pending` record with its first history entry.
    pub fn new(
        id: JobId,
        payload: JobPayload,
        priority: i32,
        idempotency_key: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            payload,
            priority,
            state: JobState::Pending,
            idempotency_key,
            created_at: now,
            updated_at: now,
            error: None,
            attempt: 0,
            history: vec![StateTransition {
                state: JobState::Pending,
                at: now,
                attempt: None,
            }],
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Check `t` against the current state without mutating.
    pub fn check(&self, t: &Transition) -> Result<(), StoreError> {
        if self.state != t.from {
            return Err(StoreError::StateConflict {
                id: self.id,
                expected: t.from,
                actual: self.state,
            });
        }
        if !t.from.can_transition_to(t.to) {
            return Err(StoreError::InvalidTransition {
                id: self.id,
                from: t.from,
                to: t.to,
            });
        }
        if t.from == JobState::Running && t.to == JobState::Running {
            match t.attempt {
                Some(a) if a > self.attempt => {}
                _ => {
                    return Err(StoreError::StateConflict {
                        id: self.id,
                        expected: t.from,
                        actual: self.state,
                    })
                }
            }
        }
        Ok(())
    }

    /// Apply `t` if it is legal from the current state. Timestamps never go backwards.
    pub fn apply(&mut self, t: &Transition) -> Result<(), StoreError> {
        self.check(t)?;
        let at = t.at.max(self.updated_at);
        self.state = t.to;
        self.updated_at = at;
        if t.to == JobState::Running {
            self.attempt = t.attempt.unwrap_or(self.attempt + 1);
        }
        self.error = if t.to == JobState::Failed {
            Some(
                t.error
                    .clone()
                    .unwrap_or_else(|| "unknown error".to_string()),
            )
        } else {
            None
        };
        let attempt = match t.to {
            JobState::Running => Some(self.attempt),
            _ => t.attempt,
        };
        self.history.push(StateTransition {
            state: t.to,
            at,
            attempt,
        });
        Ok(())
    }
}
