//! Agent Backends
//!
//! Abstractions over the agent runtime the bridge drives:
//!
//! - [`traits`]: the `AgentBackend` factory and `BackendSession` run handle
//! - [`events`]: the event model a run streams back
//! - [`exec`]: the runtime CLI in JSON-lines mode, one child process per run
//! - [`replay`]: recorded runs played back from JSON-lines scripts

pub mod events;
pub mod exec;
pub mod replay;
pub mod traits;

pub use events::{
    ChangeKind, FileUpdate, ItemDetails, ItemPhase, ItemStatus, McpResult, ThreadError,
    ThreadEvent, ThreadItem, TodoItem, Usage,
};
pub use exec::ExecBackend;
pub use replay::{load_script, parse_script, RecordedRun, ReplayBackend, ReplayStep};
pub use traits::{
    AgentBackend, BackendError, BackendSession, EventStream, SessionOptions, WebSearchOptions,
};
