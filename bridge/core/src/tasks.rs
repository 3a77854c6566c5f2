//! Task Records
//!
//! Identifiers and lifecycle state for tasks driven through the bridge, plus
//! the in-memory [`TaskStore`] that pins each task to its context and arbitrates
//! the terminal transition.
//!
//! # Design Philosophy
//!
//! A task is one execute-to-terminal unit of work. Its context id is fixed the
//! first time the task is seen; later calls that disagree are logged and
//! ignored. The store is not durable: it only lives as long as the process.

use std::fmt;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::cancellation::{CancelOutcome, CancellationTracker};

/// Task identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    /// Create a new task ID from a string
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the string value
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Context identifier (conversational continuity and session affinity scope)
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextId(pub String);

impl ContextId {
    /// Create a new context ID from a string
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the string value
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ContextId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Lifecycle state of a task
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    /// Task accepted but not yet worked on
    Submitted,
    /// Task is actively running
    Working,
    /// Task finished successfully
    Completed,
    /// Task failed
    Failed,
    /// Task was canceled
    Canceled,
}

impl TaskState {
    /// Human-readable label
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::Working => "working",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }

    /// Whether no further updates may follow this state
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// What the store knows about one task
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskRecord {
    /// Task identifier
    pub id: TaskId,
    /// Context the task was first seen with
    pub context_id: ContextId,
    /// Current lifecycle state
    pub state: TaskState,
    /// When the task was first seen (Unix timestamp ms)
    pub created_at: u64,
    /// When the state last changed (Unix timestamp ms)
    pub updated_at: u64,
}

impl TaskRecord {
    fn new(id: TaskId, context_id: ContextId) -> Self {
        let now = now_ms();
        Self {
            id,
            context_id,
            state: TaskState::Submitted,
            created_at: now,
            updated_at: now,
        }
    }

    fn set_state(&mut self, state: TaskState) {
        self.state = state;
        self.updated_at = now_ms();
    }
}

/// Result of registering a task with the store
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Registration {
    /// First sighting of this task id
    New(TaskRecord),
    /// The task id was already known
    Existing(TaskRecord),
}

impl Registration {
    /// The record, regardless of whether it was just created
    #[must_use]
    pub fn record(&self) -> &TaskRecord {
        match self {
            Self::New(record) | Self::Existing(record) => record,
        }
    }
}

/// In-memory task table
///
/// Safe for concurrent use across contexts; every mutation happens under the
/// task's shard lock.
#[derive(Debug, Default)]
pub struct TaskStore {
    tasks: DashMap<TaskId, TaskRecord>,
}

impl TaskStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task, pinning its context on first sight
    pub fn register(&self, task_id: &TaskId, context_id: &ContextId) -> Registration {
        match self.tasks.entry(task_id.clone()) {
            Entry::Occupied(entry) => {
                let record = entry.get();
                if &record.context_id != context_id {
                    tracing::warn!(
                        task_id = %task_id,
                        pinned = %record.context_id,
                        requested = %context_id,
                        "Task already bound to another context; keeping the original"
                    );
                }
                Registration::Existing(record.clone())
            }
            Entry::Vacant(entry) => {
                let record = TaskRecord::new(task_id.clone(), context_id.clone());
                entry.insert(record.clone());
                Registration::New(record)
            }
        }
    }

    /// Get a snapshot of a task record
    #[must_use]
    pub fn get(&self, task_id: &TaskId) -> Option<TaskRecord> {
        self.tasks.get(task_id).map(|r| r.clone())
    }

    /// Move a task to a non-terminal state
    ///
    /// Terminal records are left untouched.
    pub fn set_state(&self, task_id: &TaskId, state: TaskState) {
        if let Some(mut record) = self.tasks.get_mut(task_id) {
            if !record.state.is_terminal() {
                record.set_state(state);
            }
        }
    }

    /// Commit the terminal state for a task
    ///
    /// A pending cancellation always wins over the proposed state. Returns the
    /// state that was committed, or `None` if the task was already terminal or
    /// unknown, in which case nothing may be published.
    pub fn commit_terminal(
        &self,
        task_id: &TaskId,
        proposed: TaskState,
        cancellations: &CancellationTracker,
    ) -> Option<TaskState> {
        debug_assert!(proposed.is_terminal());
        let mut record = self.tasks.get_mut(task_id)?;
        if record.state.is_terminal() {
            return None;
        }

        let state = if cancellations.is_marked(task_id) {
            if proposed != TaskState::Canceled {
                tracing::debug!(
                    task_id = %task_id,
                    proposed = %proposed,
                    "Cancellation overrides terminal state"
                );
            }
            cancellations.clear(task_id);
            TaskState::Canceled
        } else {
            proposed
        };

        record.set_state(state);
        Some(state)
    }

    /// Record a cancellation request for a task
    ///
    /// Runs under the task's entry lock so it cannot interleave with
    /// [`commit_terminal`](Self::commit_terminal).
    pub fn request_cancel(
        &self,
        task_id: &TaskId,
        cancellations: &CancellationTracker,
    ) -> CancelOutcome {
        match self.tasks.entry(task_id.clone()) {
            Entry::Occupied(entry) => {
                if entry.get().state.is_terminal() {
                    CancelOutcome::AlreadyTerminal(entry.get().state)
                } else {
                    cancellations.mark(task_id);
                    CancelOutcome::Signaled
                }
            }
            Entry::Vacant(_) => {
                cancellations.mark(task_id);
                CancelOutcome::Deferred
            }
        }
    }

    /// Number of known tasks
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the store is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Get current timestamp in milliseconds
fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
