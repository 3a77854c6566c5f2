//! Bridge errors

use thiserror::Error;

use crate::tasks::{TaskId, TaskState};

/// Errors returned to callers of the bridge
///
/// Failures inside a run are published to the sink as a Failed update rather
/// than returned; only conditions that prevent publishing anything end up
/// here.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The task already reached a terminal state
    #[error("Task {task_id} is already {state}")]
    TaskAlreadyTerminal {
        /// The task
        task_id: TaskId,
        /// Its terminal state
        state: TaskState,
    },
}

/// Result alias for bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;
