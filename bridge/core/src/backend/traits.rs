//! Agent Backend Traits
//!
//! Trait definitions for agent runtimes. The translator only ever talks to a
//! backend through these two traits, so the runtime CLI, a recorded replay, or
//! any other event source can sit behind the bridge without changing core
//! logic.
//!
//! # Design Philosophy
//!
//! - [`AgentBackend`] is a factory: it turns resolved options into a session.
//!   It is synchronous so the session registry can call it while holding the
//!   context's entry lock.
//! - [`BackendSession`] is a stateful run handle. Each `run_streamed` call is
//!   one turn; the session remembers whatever it needs (such as the runtime's
//!   thread id) to continue the conversation on the next call.
//! - Runs are reported as an [`EventStream`]. Dropping the stream abandons the
//!   run.

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures::Stream;
use thiserror::Error;

use super::events::ThreadEvent;
use crate::config::{AgentConfig, ApprovalPolicy, ReasoningEffort, SandboxMode, WebSearchMode};

/// Stream of events for one run
pub type EventStream = Pin<Box<dyn Stream<Item = Result<ThreadEvent, BackendError>> + Send>>;

/// Errors raised by backends
#[derive(Debug, Error)]
pub enum BackendError {
    /// The runtime process could not be started
    #[error("Failed to spawn {binary}: {source}")]
    Spawn {
        /// Binary that was launched
        binary: String,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Reading from or writing to the runtime failed
    #[error("Backend I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The runtime emitted a line that is not a valid event
    #[error("Failed to decode backend event: {source} (line: {line})")]
    Decode {
        /// The offending line
        line: String,
        /// The underlying parse error
        source: serde_json::Error,
    },

    /// The runtime exited unsuccessfully
    #[error("Backend exited with {}: {stderr}", describe_exit(.code))]
    Exited {
        /// Exit code, if the process was not killed by a signal
        code: Option<i32>,
        /// Captured standard error
        stderr: String,
    },

    /// Session-level failure
    #[error("Session error: {0}")]
    Session(String),
}

fn describe_exit(code: &Option<i32>) -> String {
    code.map_or_else(|| "signal".to_string(), |c| format!("code {c}"))
}

/// Web search settings for a session
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WebSearchOptions {
    /// Whether the agent may search
    pub enabled: bool,
    /// Fetch mode
    pub mode: WebSearchMode,
}

/// Options a session is created with
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SessionOptions {
    /// Model identifier
    pub model: Option<String>,
    /// Output token limit
    pub max_tokens: Option<u32>,
    /// Sandbox mode
    pub sandbox_mode: SandboxMode,
    /// Whether sandboxed commands may use the network
    pub network_access: bool,
    /// Web search settings
    pub web_search: WebSearchOptions,
    /// Working directory (always set; the session binding key)
    pub working_directory: String,
    /// Approval policy
    pub approval_policy: ApprovalPolicy,
    /// Reasoning effort
    pub reasoning_effort: Option<ReasoningEffort>,
    /// Extra writable directories
    pub writable_roots: Vec<String>,
}

impl SessionOptions {
    /// Build session options from a resolved configuration
    #[must_use]
    pub fn from_config(config: &AgentConfig, working_directory: impl Into<String>) -> Self {
        Self {
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            sandbox_mode: config.sandbox_mode,
            network_access: config.network_access,
            web_search: WebSearchOptions {
                enabled: config.web_search,
                mode: config.web_search_mode,
            },
            working_directory: working_directory.into(),
            approval_policy: config.approval_policy,
            reasoning_effort: config.reasoning_effort,
            writable_roots: config.writable_roots.clone(),
        }
    }
}

/// Factory for backend sessions
pub trait AgentBackend: Send + Sync {
    /// Backend name (for logging)
    fn name(&self) -> &str;

    /// Create a new session
    ///
    /// Must not block: the registry calls this while holding a lock.
    fn start_session(&self, options: SessionOptions) -> Result<Arc<dyn BackendSession>, BackendError>;
}

/// A live session with the agent runtime
#[async_trait]
pub trait BackendSession: Send + Sync {
    /// Options the session was created with
    fn options(&self) -> &SessionOptions;

    /// Runtime thread id, once the runtime has reported one
    fn thread_id(&self) -> Option<String>;

    /// Start a run with the given input and stream its events
    async fn run_streamed(&self, input: &str) -> Result<EventStream, BackendError>;
}
