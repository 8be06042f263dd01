//! Task record: identity + lifecycle of one unit of work.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{TaskId, User};

/// Name resolved to a factory at dispatch time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskType(String);

impl TaskType {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Arguments of a task: opaque to the engine, decoded by the executable.
pub type TaskArguments = HashMap<String, serde_json::Value>;

/// Task state.
///
/// State transitions:
/// - Created -> Queued -> Running -> Done | Error | Cancelled
/// - Queued -> Cancelled (stopped before it ran)
/// - Cancelled -> Queued (explicit requeue only)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Created,
    Queued,
    Running,
    Done,
    Error,
    Cancelled,
}

/// Metadata + lifecycle of a task held by the registry.
///
/// All state transitions go through the methods below; each returns whether the
/// transition was applied so callers can log the ones that were refused.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub task_type: TaskType,
    pub owner: User,
    pub arguments: TaskArguments,
    pub state: TaskState,
    pub progress: f64,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    pub fn new(
        id: TaskId,
        task_type: TaskType,
        owner: User,
        arguments: TaskArguments,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            task_type,
            owner,
            arguments,
            state: TaskState::Created,
            progress: 0.0,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Created -> Queued, or Cancelled -> Queued on requeue.
    pub fn mark_queued(&mut self, now: DateTime<Utc>) -> bool {
        match self.state {
            TaskState::Created | TaskState::Cancelled | TaskState::Queued => {
                self.state = TaskState::Queued;
                self.progress = 0.0;
                self.updated_at = now;
                true
            }
            _ => false,
        }
    }

    /// Queued -> Running.
    pub fn mark_running(&mut self, now: DateTime<Utc>) -> bool {
        if self.state != TaskState::Queued {
            return false;
        }
        self.state = TaskState::Running;
        self.progress = 0.0;
        self.updated_at = now;
        true
    }

    /// Progress only moves forward, and only while running.
    pub fn set_progress(&mut self, rate: f64, now: DateTime<Utc>) -> bool {
        if self.state != TaskState::Running || rate.is_nan() {
            return false;
        }
        let rate = rate.clamp(0.0, 1.0);
        if rate < self.progress {
            return false;
        }
        self.progress = rate;
        self.updated_at = now;
        true
    }

    /// Running -> Done.
    pub fn mark_done(&mut self, result: serde_json::Value, now: DateTime<Utc>) -> bool {
        if self.state != TaskState::Running {
            return false;
        }
        self.state = TaskState::Done;
        self.progress = 1.0;
        self.result = Some(result);
        self.updated_at = now;
        true
    }

    /// Running -> Error.
    pub fn mark_error(&mut self, error: String, now: DateTime<Utc>) -> bool {
        if self.state != TaskState::Running {
            return false;
        }
        self.state = TaskState::Error;
        self.error = Some(error);
        self.updated_at = now;
        true
    }

    /// Queued | Running -> Cancelled.
    pub fn mark_cancelled(&mut self, now: DateTime<Utc>) -> bool {
        if !matches!(self.state, TaskState::Queued | TaskState::Running) {
            return false;
        }
        self.state = TaskState::Cancelled;
        self.updated_at = now;
        true
    }
}
