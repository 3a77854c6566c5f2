//! Event Translator
//!
//! The central state machine of the bridge. One call to
//! [`EventTranslator::execute`] drives one task: it announces the task,
//! acquires the context's backend session, consumes the run's event stream,
//! and publishes protocol updates in dispatch order until exactly one
//! terminal update has been sent.
//!
//! # Design Philosophy
//!
//! - Per-item bookkeeping lives in an [`ItemState`] local to the execution;
//!   nothing about items survives the call.
//! - Cancellation is cooperative. It is checked once before any session is
//!   touched and again before every event is dispatched; the event being
//!   dispatched is never interrupted.
//! - The terminal state is committed through the [`TaskStore`], which applies
//!   any pending cancellation at that moment, so a task publishes at most one
//!   terminal update no matter how `execute` and `cancel` interleave.

pub mod dispatch;
pub mod item_state;

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;

pub use dispatch::{dispatch, tool_artifact_id, Dispatch, Flow, TURN_USAGE_ARTIFACT};
pub use item_state::ItemState;

use crate::backend::{AgentBackend, SessionOptions};
use crate::cancellation::{CancelOutcome, CancellationTracker};
use crate::config::ConfigResolver;
use crate::error::{BridgeError, Result};
use crate::protocol::{Message, UpdateBuilder, UpdateKind};
use crate::session::{binding_key_for, SessionRegistry};
use crate::sink::UpdateSink;
use crate::tasks::{ContextId, Registration, TaskId, TaskState, TaskStore};

/// Message metadata key carrying a per-task working directory
pub const WORKING_DIRECTORY_KEY: &str = "workingDirectory";

/// Input failure text
const NO_TEXT_CONTENT: &str = "No text content";

/// How long a cancel for a task that was never executed stays pending
pub const DEFERRED_CANCEL_TTL: Duration = Duration::from_secs(600);

/// Everything `execute` needs to know about a request
#[derive(Clone, Debug)]
pub struct TaskContext {
    /// Task identifier
    pub task_id: TaskId,
    /// Context identifier
    pub context_id: ContextId,
    /// The user's message
    pub message: Message,
    /// Explicit working directory for this task
    pub working_directory: Option<String>,
}

impl TaskContext {
    /// Create a task context
    #[must_use]
    pub fn new(task_id: TaskId, context_id: ContextId, message: Message) -> Self {
        Self {
            task_id,
            context_id,
            message,
            working_directory: None,
        }
    }

    /// Set an explicit working directory
    #[must_use]
    pub fn with_working_directory(mut self, dir: impl Into<String>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    /// The per-task working directory override, if any
    ///
    /// The explicit field wins over the message's `workingDirectory` metadata.
    #[must_use]
    pub fn working_directory_override(&self) -> Option<&str> {
        self.working_directory
            .as_deref()
            .filter(|d| !d.trim().is_empty())
            .or_else(|| self.message.metadata_str(WORKING_DIRECTORY_KEY))
    }
}

/// Bridges backend runs onto protocol updates
pub struct EventTranslator {
    backend: Arc<dyn AgentBackend>,
    config: ConfigResolver,
    sessions: SessionRegistry,
    cancellations: CancellationTracker,
    tasks: TaskStore,
    deferred_cancel_ttl: Duration,
}

impl std::fmt::Debug for EventTranslator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventTranslator")
            .field("backend", &self.backend.name())
            .field("config", &self.config)
            .field("sessions", &self.sessions)
            .field("tasks", &self.tasks.len())
            .finish_non_exhaustive()
    }
}

impl EventTranslator {
    /// Create a translator over a backend
    #[must_use]
    pub fn new(backend: Arc<dyn AgentBackend>, config: ConfigResolver) -> Self {
        Self {
            backend,
            config,
            sessions: SessionRegistry::new(),
            cancellations: CancellationTracker::new(),
            tasks: TaskStore::new(),
            deferred_cancel_ttl: DEFERRED_CANCEL_TTL,
        }
    }

    /// Set how long a cancel for a not yet executed task stays pending
    #[must_use]
    pub fn with_deferred_cancel_ttl(mut self, ttl: Duration) -> Self {
        self.deferred_cancel_ttl = ttl;
        self
    }

    /// Session registry
    #[must_use]
    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Task store
    #[must_use]
    pub fn tasks(&self) -> &TaskStore {
        &self.tasks
    }

    /// Cancellation tracker
    #[must_use]
    pub fn cancellations(&self) -> &CancellationTracker {
        &self.cancellations
    }

    /// Request cancellation of a task
    ///
    /// Safe before, during or after an execution. An in-flight or not yet
    /// started task ends with exactly one Canceled update; a task that already
    /// reached a terminal state is left alone. Deferred cancels for tasks that
    /// never arrive expire after [`DEFERRED_CANCEL_TTL`].
    pub fn cancel(&self, task_id: &TaskId) -> CancelOutcome {
        self.cancellations
            .expire(self.deferred_cancel_ttl, |id| self.tasks.get(id).is_some());
        let outcome = self.tasks.request_cancel(task_id, &self.cancellations);
        tracing::info!(task_id = %task_id, outcome = ?outcome, "Cancel requested");
        outcome
    }

    /// Drive one task to a terminal state
    ///
    /// Returns the terminal state that was published. Failures inside the run
    /// are published as a Failed update and are not errors here.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::TaskAlreadyTerminal`] when the task already
    /// ended; nothing is published in that case.
    pub async fn execute(&self, task: TaskContext, sink: &dyn UpdateSink) -> Result<TaskState> {
        let record = match self.tasks.register(&task.task_id, &task.context_id) {
            Registration::Existing(record) if record.state.is_terminal() => {
                return Err(BridgeError::TaskAlreadyTerminal {
                    task_id: record.id,
                    state: record.state,
                });
            }
            Registration::Existing(record) => record,
            Registration::New(record) => {
                let builder = UpdateBuilder::new(record.id.clone(), record.context_id.clone());
                sink.publish(builder.submitted(vec![task.message.clone()])).await;
                record
            }
        };
        let context_id = record.context_id;
        let builder = UpdateBuilder::new(task.task_id.clone(), context_id.clone());

        tracing::info!(task_id = %task.task_id, context_id = %context_id, "Executing task");

        self.tasks.set_state(&task.task_id, TaskState::Working);
        sink.publish(builder.status(TaskState::Working, None, UpdateKind::StateChange, false))
            .await;

        if self.cancellations.is_marked(&task.task_id) {
            tracing::debug!(task_id = %task.task_id, "Task canceled before start");
            return self.finish(&builder, TaskState::Canceled, None, sink).await;
        }

        let text = task.message.text_content();
        if text.trim().is_empty() {
            return self
                .finish(&builder, TaskState::Failed, Some(NO_TEXT_CONTENT), sink)
                .await;
        }

        let config = self.config.resolve(&context_id);
        let binding_key = binding_key_for(
            task.working_directory_override(),
            config.working_directory.as_deref(),
        );

        let session = match self.sessions.get_or_create(&context_id, &binding_key, || {
            self.backend
                .start_session(SessionOptions::from_config(&config, binding_key.clone()))
        }) {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(context_id = %context_id, error = %e, "Failed to create session");
                return self
                    .finish(&builder, TaskState::Failed, Some(&e.to_string()), sink)
                    .await;
            }
        };

        let mut events = match session.run_streamed(&text).await {
            Ok(events) => events,
            Err(e) => {
                tracing::warn!(task_id = %task.task_id, error = %e, "Failed to start run");
                return self
                    .finish(&builder, TaskState::Failed, Some(&e.to_string()), sink)
                    .await;
            }
        };

        let mut items = ItemState::new();
        while let Some(next) = events.next().await {
            if self.cancellations.is_marked(&task.task_id) {
                tracing::debug!(task_id = %task.task_id, "Task canceled mid-stream");
                drop(events);
                return self.finish(&builder, TaskState::Canceled, None, sink).await;
            }

            let event = match next {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!(task_id = %task.task_id, error = %e, "Backend stream failed");
                    return self
                        .finish(&builder, TaskState::Failed, Some(&e.to_string()), sink)
                        .await;
                }
            };

            tracing::trace!(task_id = %task.task_id, event = event.name(), "Dispatching event");
            let Dispatch { updates, flow } = dispatch(&event, &mut items, &builder);
            for update in updates {
                sink.publish(update).await;
            }
            if let Flow::Fail(message) = flow {
                return self
                    .finish(&builder, TaskState::Failed, Some(&message), sink)
                    .await;
            }
        }

        self.finish(&builder, TaskState::Completed, None, sink).await
    }

    /// Commit and publish the terminal update, then finish the sink
    async fn finish(
        &self,
        builder: &UpdateBuilder,
        proposed: TaskState,
        text: Option<&str>,
        sink: &dyn UpdateSink,
    ) -> Result<TaskState> {
        let task_id = builder.task_id();
        let Some(state) = self
            .tasks
            .commit_terminal(task_id, proposed, &self.cancellations)
        else {
            let state = self
                .tasks
                .get(task_id)
                .map_or(proposed, |record| record.state);
            tracing::warn!(task_id = %task_id, state = %state, "Task already terminal; dropping update");
            return Err(BridgeError::TaskAlreadyTerminal {
                task_id: task_id.clone(),
                state,
            });
        };

        // The proposed text only describes the proposed state
        let text = if state == proposed { text } else { None };
        sink.publish(builder.terminal(state, text)).await;
        sink.finished().await;

        tracing::info!(task_id = %task_id, state = %state, "Task finished");
        Ok(state)
    }
}
