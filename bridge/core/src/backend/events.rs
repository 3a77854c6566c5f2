//! Backend Event Model
//!
//! Events reported by the agent runtime while a run is streaming, one JSON
//! object per line with a `type` discriminator:
//!
//! ```text
//! {"type":"thread.started","thread_id":"th_1"}
//! {"type":"turn.started"}
//! {"type":"item.updated","item":{"id":"item_0","type":"agent_message","text":"Hel"}}
//! {"type":"turn.completed","usage":{"input_tokens":10,"cached_input_tokens":0,"output_tokens":4}}
//! ```
//!
//! Item kinds form a closed tagged union with an explicit [`ItemDetails::Unknown`]
//! arm, so a newer runtime that reports item kinds this crate does not know
//! still decodes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One event from a streamed run
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ThreadEvent {
    /// The runtime assigned (or resumed) a thread
    #[serde(rename = "thread.started")]
    ThreadStarted {
        /// Runtime thread identifier, used to resume later runs
        thread_id: String,
    },
    /// A turn began
    #[serde(rename = "turn.started")]
    TurnStarted,
    /// A turn finished
    #[serde(rename = "turn.completed")]
    TurnCompleted {
        /// Token usage for the turn
        #[serde(default)]
        usage: Usage,
    },
    /// A turn failed
    #[serde(rename = "turn.failed")]
    TurnFailed {
        /// What went wrong
        error: ThreadError,
    },
    /// An item appeared
    #[serde(rename = "item.started")]
    ItemStarted {
        /// The item
        item: ThreadItem,
    },
    /// An item changed
    #[serde(rename = "item.updated")]
    ItemUpdated {
        /// The item
        item: ThreadItem,
    },
    /// An item reached its final form
    #[serde(rename = "item.completed")]
    ItemCompleted {
        /// The item
        item: ThreadItem,
    },
    /// Unrecoverable stream-level error
    #[serde(rename = "error")]
    Error {
        /// Error description
        message: String,
    },
    /// Event type this crate does not know
    #[serde(other)]
    Unknown,
}

impl ThreadEvent {
    /// The item and lifecycle phase, for item events
    #[must_use]
    pub fn item(&self) -> Option<(ItemPhase, &ThreadItem)> {
        match self {
            Self::ItemStarted { item } => Some((ItemPhase::Started, item)),
            Self::ItemUpdated { item } => Some((ItemPhase::Updated, item)),
            Self::ItemCompleted { item } => Some((ItemPhase::Completed, item)),
            _ => None,
        }
    }

    /// Short name for logging
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::ThreadStarted { .. } => "thread.started",
            Self::TurnStarted => "turn.started",
            Self::TurnCompleted { .. } => "turn.completed",
            Self::TurnFailed { .. } => "turn.failed",
            Self::ItemStarted { .. } => "item.started",
            Self::ItemUpdated { .. } => "item.updated",
            Self::ItemCompleted { .. } => "item.completed",
            Self::Error { .. } => "error",
            Self::Unknown => "unknown",
        }
    }
}

/// Which item event carried an item
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ItemPhase {
    /// `item.started`
    Started,
    /// `item.updated`
    Updated,
    /// `item.completed`
    Completed,
}

/// Token usage for a turn
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Prompt tokens
    #[serde(default)]
    pub input_tokens: u64,
    /// Prompt tokens served from cache
    #[serde(default)]
    pub cached_input_tokens: u64,
    /// Generated tokens
    #[serde(default)]
    pub output_tokens: u64,
}

/// Error payload of a failed turn
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadError {
    /// Error description
    pub message: String,
}

/// A unit of backend-reported activity
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ThreadItem {
    /// Item id, stable across started/updated/completed
    pub id: String,
    /// Kind-specific payload
    #[serde(flatten)]
    pub details: ItemDetails,
}

impl ThreadItem {
    /// Create an item
    pub fn new(id: impl Into<String>, details: ItemDetails) -> Self {
        Self {
            id: id.into(),
            details,
        }
    }

    /// Assistant text item
    pub fn agent_message(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(id, ItemDetails::AgentMessage { text: text.into() })
    }

    /// Reasoning text item
    pub fn reasoning(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::new(id, ItemDetails::Reasoning { text: text.into() })
    }

    /// Command execution item
    pub fn command(
        id: impl Into<String>,
        command: impl Into<String>,
        aggregated_output: impl Into<String>,
        exit_code: Option<i32>,
        status: ItemStatus,
    ) -> Self {
        Self::new(
            id,
            ItemDetails::CommandExecution {
                command: command.into(),
                aggregated_output: aggregated_output.into(),
                exit_code,
                status,
            },
        )
    }
}

/// Kind-specific item payload
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ItemDetails {
    /// Assistant response text (grows monotonically)
    AgentMessage {
        /// Full text so far
        text: String,
    },
    /// Reasoning summary text (grows monotonically)
    Reasoning {
        /// Full text so far
        text: String,
    },
    /// Shell command run by the agent
    CommandExecution {
        /// Command line
        command: String,
        /// Combined stdout/stderr so far (grows monotonically)
        #[serde(default)]
        aggregated_output: String,
        /// Exit code once finished
        #[serde(default)]
        exit_code: Option<i32>,
        /// Execution status
        #[serde(default)]
        status: ItemStatus,
    },
    /// File edits applied by the agent
    FileChange {
        /// Changed files
        #[serde(default)]
        changes: Vec<FileUpdate>,
        /// Patch status
        #[serde(default)]
        status: ItemStatus,
    },
    /// Call to a tool on an MCP server
    McpToolCall {
        /// Server name
        server: String,
        /// Tool name
        tool: String,
        /// Call arguments
        #[serde(default)]
        arguments: Value,
        /// Tool result, on success
        #[serde(default)]
        result: Option<McpResult>,
        /// Tool error, on failure
        #[serde(default)]
        error: Option<ThreadError>,
        /// Call status
        #[serde(default)]
        status: ItemStatus,
    },
    /// Web search performed by the agent
    WebSearch {
        /// Search query
        query: String,
    },
    /// The agent's running todo list
    TodoList {
        /// Current items
        #[serde(default)]
        items: Vec<TodoItem>,
    },
    /// Non-fatal error surfaced as an item
    Error {
        /// Error description
        message: String,
    },
    /// Item kind this crate does not know
    #[serde(other)]
    Unknown,
}

/// Status of a tool-bearing item
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// Still running
    #[default]
    InProgress,
    /// Finished successfully
    Completed,
    /// Finished with an error
    Failed,
    /// Refused by the approval policy
    Declined,
    /// Status this crate does not know
    #[serde(other)]
    Unknown,
}

/// Kind of file change
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// File created
    Add,
    /// File removed
    Delete,
    /// File modified
    Update,
}

/// One changed file
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileUpdate {
    /// File path
    pub path: String,
    /// Change kind
    pub kind: ChangeKind,
}

/// Result returned by an MCP tool
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct McpResult {
    /// Content blocks
    #[serde(default)]
    pub content: Vec<Value>,
    /// Structured result, if the tool returned one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub structured_content: Option<Value>,
}

impl McpResult {
    /// Text of all `text` content blocks, joined by newline
    #[must_use]
    pub fn text_output(&self) -> String {
        self.content
            .iter()
            .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|block| block.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// One todo list entry
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoItem {
    /// Entry text
    pub text: String,
    /// Whether the entry is done
    #[serde(default)]
    pub completed: bool,
}
