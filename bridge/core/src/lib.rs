//! Bridge Core - Agent Runtime to Task-Update Protocol
//!
//! This crate bridges the event feed of a conversational agent runtime onto a
//! task-update protocol. It turns an unbounded stream of heterogeneous backend
//! events into an ordered sequence of protocol updates, keeps each context on
//! the same backend session while its working directory is unchanged, and
//! supports cooperative cancellation.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                 Caller (daemon, server, tests)               │
//! │        execute(task, sink)              cancel(task_id)      │
//! └──────────────────┬───────────────────────────┬───────────────┘
//!                    │                           │
//! ┌──────────────────┼───────────────────────────┼───────────────┐
//! │                  │    EVENT TRANSLATOR       │               │
//! │  ┌───────────────┴──┐  ┌──────────────┐  ┌───┴────────────┐  │
//! │  │ ConfigResolver   │  │ TaskStore    │  │ Cancellation   │  │
//! │  └──────────────────┘  └──────────────┘  │ Tracker        │  │
//! │  ┌──────────────────┐  ┌──────────────┐  └────────────────┘  │
//! │  │ SessionRegistry  │  │ ItemState    │──▶ UpdateSink        │
//! │  └────────┬─────────┘  └──────────────┘                      │
//! └───────────┼──────────────────────────────────────────────────┘
//!             │ start_session / run_streamed
//! ┌───────────┴──────────────────────────────────────────────────┐
//! │        AgentBackend: ExecBackend (CLI) | ReplayBackend       │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use bridge_core::{
//!     AgentConfig, ConfigResolver, EventTranslator, ExecBackend, Message, TaskContext,
//!     sink::ChannelSink,
//! };
//!
//! #[tokio::main]
//! async fn main() {
//!     let translator = EventTranslator::new(
//!         Arc::new(ExecBackend::default()),
//!         ConfigResolver::new(AgentConfig::default()),
//!     );
//!     let (sink, mut rx) = ChannelSink::channel(64);
//!
//!     tokio::spawn(async move {
//!         while let Some(message) = rx.recv().await {
//!             println!("{message:?}");
//!         }
//!     });
//!
//!     let task = TaskContext::new("task-1".into(), "ctx-1".into(), Message::user_text("List files"));
//!     translator.execute(task, &sink).await.unwrap();
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`backend`]: Agent runtime abstraction, event model, exec and replay backends
//! - [`cancellation`]: Cooperative cancellation tracking
//! - [`config`]: Agent configuration, layering and per-context resolution
//! - [`error`]: Bridge error types
//! - [`protocol`]: Task-update protocol types
//! - [`session`]: Context to session affinity
//! - [`sink`]: Update sinks
//! - [`tasks`]: Task identifiers, states and the task store
//! - [`translator`]: The event translator

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod cancellation;
pub mod config;
pub mod error;
pub mod protocol;
pub mod session;
pub mod sink;
pub mod tasks;
pub mod translator;

pub use backend::{
    AgentBackend, BackendError, BackendSession, EventStream, ExecBackend, ReplayBackend,
    SessionOptions, ThreadEvent, ThreadItem,
};
pub use cancellation::{CancelOutcome, CancellationTracker};
pub use config::{AgentConfig, ConfigError, ConfigOverrides, ConfigResolver, ConfigSource};
pub use error::BridgeError;
pub use protocol::{Message, Part, ProtocolUpdate, UpdateKind};
pub use session::SessionRegistry;
pub use sink::{ChannelSink, SinkMessage, UpdateSink};
pub use tasks::{ContextId, TaskId, TaskState, TaskStore};
pub use translator::{EventTranslator, TaskContext};
