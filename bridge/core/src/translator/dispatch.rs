//! Event dispatch
//!
//! Maps one backend event to the protocol updates it produces. Dispatch is
//! synchronous and side-effect free apart from the [`ItemState`] it is given;
//! publishing and terminal handling are left to the caller.

use serde_json::json;

use super::item_state::{output_key, ItemState};
use crate::backend::{ItemDetails, ItemPhase, ItemStatus, ThreadEvent, ThreadItem};
use crate::protocol::{
    to_json_string, to_json_value, ProtocolUpdate, ToolKind, ToolPhase, ToolUpdate,
    UpdateBuilder, UpdateKind,
};
use crate::tasks::TaskState;

/// Artifact carrying token usage for a turn
pub const TURN_USAGE_ARTIFACT: &str = "tool-turn-usage-output";

/// Artifact id for an item's output
#[must_use]
pub fn tool_artifact_id(item_id: &str) -> String {
    format!("tool-{item_id}-output")
}

/// Whether the run continues after an event
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Flow {
    /// Keep consuming events
    Continue,
    /// The run failed; publish Failed with this message and stop
    Fail(String),
}

/// Result of dispatching one event
#[derive(Clone, Debug, PartialEq)]
pub struct Dispatch {
    /// Updates to publish, in order
    pub updates: Vec<ProtocolUpdate>,
    /// What happens next
    pub flow: Flow,
}

impl Dispatch {
    fn updates(updates: Vec<ProtocolUpdate>) -> Self {
        Self {
            updates,
            flow: Flow::Continue,
        }
    }

    fn fail(message: impl Into<String>) -> Self {
        Self {
            updates: Vec::new(),
            flow: Flow::Fail(message.into()),
        }
    }
}

/// Translate one backend event
pub fn dispatch(event: &ThreadEvent, items: &mut ItemState, builder: &UpdateBuilder) -> Dispatch {
    match event {
        ThreadEvent::ThreadStarted { thread_id } => {
            tracing::debug!(thread_id = %thread_id, "Backend thread started");
            Dispatch::updates(Vec::new())
        }
        ThreadEvent::TurnStarted => Dispatch::updates(vec![builder.status(
            TaskState::Working,
            None,
            UpdateKind::TurnStarted,
            false,
        )]),
        ThreadEvent::TurnCompleted { usage } => Dispatch::updates(vec![
            builder.artifact_text(TURN_USAGE_ARTIFACT, to_json_string(usage), false, true),
            builder.status(TaskState::Working, None, UpdateKind::TurnCompleted, false),
        ]),
        ThreadEvent::TurnFailed { error } => Dispatch::fail(error.message.clone()),
        ThreadEvent::Error { message } => Dispatch::fail(message.clone()),
        ThreadEvent::ItemStarted { .. }
        | ThreadEvent::ItemUpdated { .. }
        | ThreadEvent::ItemCompleted { .. } => match event.item() {
            Some((phase, item)) => Dispatch::updates(dispatch_item(phase, item, items, builder)),
            None => Dispatch::updates(Vec::new()),
        },
        ThreadEvent::Unknown => {
            tracing::debug!("Ignoring unknown backend event");
            Dispatch::updates(Vec::new())
        }
    }
}

fn dispatch_item(
    phase: ItemPhase,
    item: &ThreadItem,
    items: &mut ItemState,
    builder: &UpdateBuilder,
) -> Vec<ProtocolUpdate> {
    let id = item.id.as_str();
    let completed = phase == ItemPhase::Completed;
    let mut updates = Vec::new();

    match &item.details {
        ItemDetails::AgentMessage { text } => {
            if let Some(delta) = items.delta(id, text) {
                updates.push(builder.working_text(delta, UpdateKind::TextContent));
            }
        }
        ItemDetails::Reasoning { text } => {
            if let Some(delta) = items.delta(id, text) {
                updates.push(builder.working_text(delta, UpdateKind::Thought));
            }
        }
        ItemDetails::CommandExecution {
            command,
            aggregated_output,
            exit_code,
            status,
        } => {
            if items.mark_started(id) {
                updates.push(tool(
                    builder,
                    id,
                    ToolKind::CommandExecution,
                    ToolPhase::Started,
                    json!({ "command": command, "status": status }),
                ));
            }

            let key = output_key(id);
            let append = items.has_sent(&key);
            if let Some(delta) = items.delta(&key, aggregated_output) {
                updates.push(builder.artifact_text(tool_artifact_id(id), delta, append, completed));
            }

            if completed && items.mark_completed(id) {
                updates.push(tool(
                    builder,
                    id,
                    ToolKind::CommandExecution,
                    ToolPhase::Completed,
                    json!({ "status": status, "exit_code": exit_code }),
                ));
            }
        }
        ItemDetails::FileChange { changes, status } => {
            if completed && items.mark_completed(id) {
                updates.push(builder.artifact_text(
                    tool_artifact_id(id),
                    to_json_string(changes),
                    false,
                    true,
                ));
                updates.push(tool(
                    builder,
                    id,
                    ToolKind::FileChange,
                    ToolPhase::Completed,
                    json!({ "status": status, "changes": to_json_value(changes) }),
                ));
            }
        }
        ItemDetails::McpToolCall {
            server,
            tool: tool_name,
            arguments,
            result,
            error,
            status,
        } => {
            if items.mark_started(id) {
                updates.push(tool(
                    builder,
                    id,
                    ToolKind::McpToolCall,
                    ToolPhase::Started,
                    json!({ "server": server, "tool": tool_name, "arguments": arguments }),
                ));
            }

            if completed && items.mark_completed(id) {
                if error.is_some() || *status == ItemStatus::Failed {
                    let message = error
                        .as_ref()
                        .map_or("MCP tool call failed", |e| e.message.as_str());
                    updates.push(tool(
                        builder,
                        id,
                        ToolKind::McpToolCall,
                        ToolPhase::Failed,
                        json!({ "error": message }),
                    ));
                } else {
                    let output = result.as_ref().map(|r| r.text_output()).unwrap_or_default();
                    updates.push(builder.artifact_text(
                        tool_artifact_id(id),
                        to_json_string(result),
                        false,
                        true,
                    ));
                    updates.push(tool(
                        builder,
                        id,
                        ToolKind::McpToolCall,
                        ToolPhase::Completed,
                        json!({ "result": to_json_value(result), "output": output }),
                    ));
                }
            }
        }
        ItemDetails::WebSearch { query } => {
            updates.push(tool(
                builder,
                id,
                ToolKind::WebSearch,
                ToolPhase::Completed,
                json!({ "query": query }),
            ));
        }
        ItemDetails::TodoList { items: todos } => {
            updates.push(builder.artifact_text(
                tool_artifact_id(id),
                to_json_string(todos),
                false,
                true,
            ));
            updates.push(tool(
                builder,
                id,
                ToolKind::TodoList,
                ToolPhase::Updated,
                json!({ "items": to_json_value(todos) }),
            ));
        }
        ItemDetails::Error { message } => {
            updates.push(builder.working_text(format!("Error: {message}"), UpdateKind::TextContent));
        }
        ItemDetails::Unknown => {
            tracing::debug!(item_id = %id, "Ignoring unknown item kind");
        }
    }

    updates
}

fn tool(
    builder: &UpdateBuilder,
    item_id: &str,
    kind: ToolKind,
    phase: ToolPhase,
    detail: serde_json::Value,
) -> ProtocolUpdate {
    builder.tool_update(&ToolUpdate {
        item_id: item_id.to_string(),
        tool: kind,
        phase,
        detail,
    })
}
