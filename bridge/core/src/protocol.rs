//! Task-Update Protocol
//!
//! Updates published by the bridge to clients. These are the only thing a
//! client ever sees of a backend run: an initial task record, status updates,
//! and artifact chunks, in dispatch order.
//!
//! # Wire Format
//!
//! Every update carries a `kind` discriminator (`task`, `status-update`,
//! `artifact-update`) and uses camelCase field names. Status updates carry a
//! `metadata.kind` tag (see [`UpdateKind`]) that tells clients how to render
//! the attached message.

use std::fmt::Debug;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::tasks::{ContextId, TaskId, TaskState};

/// Who authored a message
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The requesting user
    User,
    /// The bridged agent
    Agent,
}

/// One piece of message or artifact content
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Part {
    /// Plain text
    Text {
        /// The text content
        text: String,
    },
    /// Structured JSON data
    Data {
        /// The data payload
        data: Value,
    },
}

impl Part {
    /// Create a text part
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Get the text if this is a text part
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text { text } => Some(text),
            Self::Data { .. } => None,
        }
    }
}

/// A protocol message
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Unique message ID
    pub message_id: String,
    /// Author of the message
    pub role: Role,
    /// Message content
    pub parts: Vec<Part>,
    /// Task the message belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    /// Context the message belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_id: Option<ContextId>,
    /// Free-form metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl Message {
    /// Create a user message with a single text part
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            message_id: new_message_id(),
            role: Role::User,
            parts: vec![Part::text(text)],
            task_id: None,
            context_id: None,
            metadata: None,
        }
    }

    /// Create an agent message with the given parts
    #[must_use]
    pub fn agent(task_id: &TaskId, context_id: &ContextId, parts: Vec<Part>) -> Self {
        Self {
            message_id: new_message_id(),
            role: Role::Agent,
            parts,
            task_id: Some(task_id.clone()),
            context_id: Some(context_id.clone()),
            metadata: None,
        }
    }

    /// Attach metadata
    #[must_use]
    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// All text parts in order, joined by newline
    #[must_use]
    pub fn text_content(&self) -> String {
        self.parts
            .iter()
            .filter_map(Part::as_text)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Read a string field from the message metadata
    #[must_use]
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.as_ref()?.get(key)?.as_str()
    }
}

/// Status of a task at one point in time
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatus {
    /// Lifecycle state
    pub state: TaskState,
    /// Message attached to this status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    /// RFC 3339 timestamp
    pub timestamp: String,
}

impl TaskStatus {
    /// Create a status stamped with the current time
    #[must_use]
    pub fn now(state: TaskState, message: Option<Message>) -> Self {
        Self {
            state,
            message,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// A full task record, published once when a task is first seen
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Task identifier
    pub id: TaskId,
    /// Context identifier
    pub context_id: ContextId,
    /// Current status
    pub status: TaskStatus,
    /// Conversation history
    #[serde(default)]
    pub history: Vec<Message>,
}

/// How a client should interpret a status update
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpdateKind {
    /// Task lifecycle transition
    StateChange,
    /// Backend began a turn
    TurnStarted,
    /// Backend finished a turn
    TurnCompleted,
    /// Incremental assistant text
    TextContent,
    /// Incremental reasoning text
    Thought,
    /// Tool lifecycle change (payload is a [`ToolUpdate`])
    ToolUpdate,
}

/// Metadata attached to status updates
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateMetadata {
    /// Update kind
    pub kind: UpdateKind,
}

/// Status change for a task
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatusUpdateEvent {
    /// Task identifier
    pub task_id: TaskId,
    /// Context identifier
    pub context_id: ContextId,
    /// The new status
    pub status: TaskStatus,
    /// Whether this is the last update for the task
    #[serde(rename = "final")]
    pub is_final: bool,
    /// Update kind tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<UpdateMetadata>,
}

impl TaskStatusUpdateEvent {
    /// The update kind, if tagged
    #[must_use]
    pub fn kind(&self) -> Option<UpdateKind> {
        self.metadata.map(|m| m.kind)
    }

    /// Text carried by the status message, if any
    #[must_use]
    pub fn text(&self) -> Option<String> {
        self.status.message.as_ref().map(Message::text_content)
    }
}

/// Output produced by a task
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    /// Artifact identifier (stable across chunks)
    pub artifact_id: String,
    /// Content of this chunk
    pub parts: Vec<Part>,
}

/// One chunk of an artifact
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskArtifactUpdateEvent {
    /// Task identifier
    pub task_id: TaskId,
    /// Context identifier
    pub context_id: ContextId,
    /// The artifact chunk
    pub artifact: Artifact,
    /// Whether this chunk extends a previously sent one
    pub append: bool,
    /// Whether no further chunks follow for this artifact
    pub last_chunk: bool,
}

/// Any update published to a sink
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ProtocolUpdate {
    /// Initial task record
    Task(Task),
    /// Status change
    StatusUpdate(TaskStatusUpdateEvent),
    /// Artifact chunk
    ArtifactUpdate(TaskArtifactUpdateEvent),
}

impl ProtocolUpdate {
    /// Whether this update ends the task
    #[must_use]
    pub fn is_final(&self) -> bool {
        match self {
            Self::StatusUpdate(update) => update.is_final,
            Self::Task(_) | Self::ArtifactUpdate(_) => false,
        }
    }

    /// The task state carried by this update, if any
    #[must_use]
    pub fn state(&self) -> Option<TaskState> {
        match self {
            Self::Task(task) => Some(task.status.state),
            Self::StatusUpdate(update) => Some(update.status.state),
            Self::ArtifactUpdate(_) => None,
        }
    }
}

/// Which kind of tool a [`ToolUpdate`] describes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    /// Shell command
    CommandExecution,
    /// File edits
    FileChange,
    /// MCP server tool call
    McpToolCall,
    /// Web search
    WebSearch,
    /// Todo list maintenance
    TodoList,
}

/// Lifecycle phase of a tool
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolPhase {
    /// Tool began running
    Started,
    /// Tool state changed (re-emitted on every change)
    Updated,
    /// Tool finished
    Completed,
    /// Tool failed
    Failed,
}

/// Tool lifecycle payload, carried as a data part
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolUpdate {
    /// Backend item id
    pub item_id: String,
    /// Tool kind
    pub tool: ToolKind,
    /// Lifecycle phase
    pub phase: ToolPhase,
    /// Kind-specific details
    pub detail: Value,
}

/// Builds updates for one task
#[derive(Clone, Debug)]
pub struct UpdateBuilder {
    task_id: TaskId,
    context_id: ContextId,
}

impl UpdateBuilder {
    /// Create a builder for a task
    #[must_use]
    pub fn new(task_id: TaskId, context_id: ContextId) -> Self {
        Self {
            task_id,
            context_id,
        }
    }

    /// Task identifier
    #[must_use]
    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    /// The synthesized `submitted` task record
    #[must_use]
    pub fn submitted(&self, history: Vec<Message>) -> ProtocolUpdate {
        ProtocolUpdate::Task(Task {
            id: self.task_id.clone(),
            context_id: self.context_id.clone(),
            status: TaskStatus::now(TaskState::Submitted, None),
            history,
        })
    }

    /// A status update
    #[must_use]
    pub fn status(
        &self,
        state: TaskState,
        message: Option<Message>,
        kind: UpdateKind,
        is_final: bool,
    ) -> ProtocolUpdate {
        ProtocolUpdate::StatusUpdate(TaskStatusUpdateEvent {
            task_id: self.task_id.clone(),
            context_id: self.context_id.clone(),
            status: TaskStatus::now(state, message),
            is_final,
            metadata: Some(UpdateMetadata { kind }),
        })
    }

    /// A non-final `working` update carrying text
    #[must_use]
    pub fn working_text(&self, text: impl Into<String>, kind: UpdateKind) -> ProtocolUpdate {
        let message = Message::agent(&self.task_id, &self.context_id, vec![Part::text(text)]);
        self.status(TaskState::Working, Some(message), kind, false)
    }

    /// A non-final `working` update carrying a tool lifecycle payload
    #[must_use]
    pub fn tool_update(&self, update: &ToolUpdate) -> ProtocolUpdate {
        let message = Message::agent(
            &self.task_id,
            &self.context_id,
            vec![Part::Data {
                data: to_json_value(update),
            }],
        );
        self.status(
            TaskState::Working,
            Some(message),
            UpdateKind::ToolUpdate,
            false,
        )
    }

    /// A final update for a terminal state
    #[must_use]
    pub fn terminal(&self, state: TaskState, text: Option<&str>) -> ProtocolUpdate {
        let message = text
            .map(|t| Message::agent(&self.task_id, &self.context_id, vec![Part::text(t)]));
        self.status(state, message, UpdateKind::StateChange, true)
    }

    /// An artifact chunk with a single text part
    #[must_use]
    pub fn artifact_text(
        &self,
        artifact_id: impl Into<String>,
        text: impl Into<String>,
        append: bool,
        last_chunk: bool,
    ) -> ProtocolUpdate {
        ProtocolUpdate::ArtifactUpdate(TaskArtifactUpdateEvent {
            task_id: self.task_id.clone(),
            context_id: self.context_id.clone(),
            artifact: Artifact {
                artifact_id: artifact_id.into(),
                parts: vec![Part::text(text)],
            },
            append,
            last_chunk,
        })
    }
}

/// Serialize to a JSON string, falling back to the `Debug` rendering
pub fn to_json_string<T: Serialize + Debug>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| {
        tracing::debug!(error = %e, "Falling back to debug rendering");
        format!("{value:?}")
    })
}

/// Serialize to a JSON value, falling back to the `Debug` rendering as a string
pub fn to_json_value<T: Serialize + Debug>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or_else(|e| {
        tracing::debug!(error = %e, "Falling back to debug rendering");
        Value::String(format!("{value:?}"))
    })
}

fn new_message_id() -> String {
    Uuid::new_v4().to_string()
}
