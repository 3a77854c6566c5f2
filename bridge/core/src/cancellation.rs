//! Cooperative Cancellation
//!
//! Tracks task ids whose cancellation has been requested. Nothing here
//! interrupts running work: the translator checks the tracker at the start of
//! an execution and before each backend event is dispatched, and stops on its
//! own when it finds a mark.
//!
//! A mark for a task that never reaches `execute` would otherwise stay forever,
//! so marks older than a time-to-live are expired for tasks the caller does not
//! know.

use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::tasks::{TaskId, TaskState};

/// What a cancel request resolved to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The task has not been seen yet; its first execution publishes Canceled
    Deferred,
    /// The task is in flight; the next dispatch boundary publishes Canceled
    Signaled,
    /// The task already reached a terminal state; nothing is published
    AlreadyTerminal(TaskState),
}

/// Task ids with a pending cancellation, and when each was marked
#[derive(Debug, Default)]
pub struct CancellationTracker {
    canceled: DashMap<TaskId, Instant>,
}

impl CancellationTracker {
    /// Create an empty tracker
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a task as canceled
    pub fn mark(&self, task_id: &TaskId) {
        if let Entry::Vacant(entry) = self.canceled.entry(task_id.clone()) {
            entry.insert(Instant::now());
            tracing::debug!(task_id = %task_id, "Cancellation requested");
        }
    }

    /// Whether a cancellation is pending for the task
    #[must_use]
    pub fn is_marked(&self, task_id: &TaskId) -> bool {
        self.canceled.contains_key(task_id)
    }

    /// Forget a task's cancellation (after Canceled was published)
    pub fn clear(&self, task_id: &TaskId) {
        self.canceled.remove(task_id);
    }

    /// Number of pending cancellations
    #[must_use]
    pub fn pending(&self) -> usize {
        self.canceled.len()
    }

    /// Drop marks at least `max_age` old whose task `is_known` rejects
    ///
    /// `is_known` is called with no tracker lock held. Returns the number of
    /// marks dropped.
    pub fn expire(&self, max_age: Duration, is_known: impl Fn(&TaskId) -> bool) -> usize {
        let stale: Vec<TaskId> = self
            .canceled
            .iter()
            .filter(|entry| entry.value().elapsed() >= max_age)
            .map(|entry| entry.key().clone())
            .collect();

        let expired = stale
            .iter()
            .filter(|task_id| !is_known(*task_id))
            .filter(|task_id| {
                self.canceled
                    .remove_if(*task_id, |_, marked_at| marked_at.elapsed() >= max_age)
                    .is_some()
            })
            .count();
        if expired > 0 {
            tracing::debug!(expired, "Expired cancellations for unseen tasks");
        }
        expired
    }
}
