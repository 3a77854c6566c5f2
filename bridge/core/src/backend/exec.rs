//! Exec Backend
//!
//! Drives the agent runtime's CLI in JSON-lines mode. Every run spawns
//! `<binary> exec --experimental-json ...`, writes the prompt to the child's
//! stdin and decodes one [`ThreadEvent`] per stdout line.
//!
//! The first run of a session starts a fresh runtime thread; the thread id
//! reported by `thread.started` is kept on the session and later runs append
//! `resume <thread_id>` so the conversation continues.
//!
//! The child is spawned with `kill_on_drop`, and the reader task stops as soon
//! as the event stream is dropped, so abandoning a run (for example on
//! cancellation) terminates the process.

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::events::ThreadEvent;
use super::traits::{AgentBackend, BackendError, BackendSession, EventStream, SessionOptions};
use crate::config::{ExecToml, WebSearchMode};

/// Binary used when none is configured
pub const DEFAULT_BINARY: &str = "codex";

/// Buffered events between the reader task and the consumer
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Backend that runs the agent runtime CLI as a child process
#[derive(Clone, Debug)]
pub struct ExecBackend {
    binary: String,
    extra_args: Vec<String>,
}

impl Default for ExecBackend {
    fn default() -> Self {
        Self::new(DEFAULT_BINARY)
    }
}

impl ExecBackend {
    /// Create a backend for the given binary
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            extra_args: Vec::new(),
        }
    }

    /// Create a backend from the `[exec]` configuration section
    #[must_use]
    pub fn from_toml(exec: &ExecToml) -> Self {
        let binary = exec
            .binary
            .as_deref()
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .unwrap_or(DEFAULT_BINARY);
        Self::new(binary).with_extra_args(exec.extra_args.clone())
    }

    /// Append arguments after the generated ones
    #[must_use]
    pub fn with_extra_args(mut self, extra_args: Vec<String>) -> Self {
        self.extra_args = extra_args;
        self
    }

    /// The configured binary
    #[must_use]
    pub fn binary(&self) -> &str {
        &self.binary
    }
}

impl AgentBackend for ExecBackend {
    fn name(&self) -> &str {
        "exec"
    }

    fn start_session(
        &self,
        options: SessionOptions,
    ) -> Result<Arc<dyn BackendSession>, BackendError> {
        tracing::debug!(
            binary = %self.binary,
            working_directory = %options.working_directory,
            "Creating exec session"
        );
        Ok(Arc::new(ExecSession {
            binary: self.binary.clone(),
            extra_args: self.extra_args.clone(),
            options,
            thread_id: Arc::new(Mutex::new(None)),
        }))
    }
}

/// One conversation with the runtime CLI
struct ExecSession {
    binary: String,
    extra_args: Vec<String>,
    options: SessionOptions,
    thread_id: Arc<Mutex<Option<String>>>,
}

#[async_trait]
impl BackendSession for ExecSession {
    fn options(&self) -> &SessionOptions {
        &self.options
    }

    fn thread_id(&self) -> Option<String> {
        self.thread_id.lock().clone()
    }

    async fn run_streamed(&self, input: &str) -> Result<EventStream, BackendError> {
        let resume = self.thread_id();
        let args = build_exec_args(&self.options, &self.extra_args, resume.as_deref());

        let mut child = Command::new(&self.binary)
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| BackendError::Spawn {
                binary: self.binary.clone(),
                source,
            })?;

        tracing::debug!(
            binary = %self.binary,
            resume = resume.as_deref().unwrap_or("-"),
            pid = child.id().unwrap_or_default(),
            "Spawned runtime"
        );

        if let Some(mut stdin) = child.stdin.take() {
            // A child that exits early closes its stdin; the exit status reports why
            if let Err(e) = stdin.write_all(input.as_bytes()).await {
                tracing::debug!(error = %e, "Failed to write prompt to runtime");
            } else if let Err(e) = stdin.shutdown().await {
                tracing::debug!(error = %e, "Failed to close runtime stdin");
            }
        }

        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        tokio::spawn(pump_events(child, tx, Arc::clone(&self.thread_id)));

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

type EventSender = mpsc::Sender<Result<ThreadEvent, BackendError>>;

/// Read events from the child until EOF, then report a failed exit
async fn pump_events(mut child: Child, tx: EventSender, thread_id: Arc<Mutex<Option<String>>>) {
    let Some(stdout) = child.stdout.take() else {
        let _ = tx
            .send(Err(BackendError::Session("runtime stdout unavailable".to_string())))
            .await;
        return;
    };
    let stderr_task = child.stderr.take().map(|stderr| tokio::spawn(drain(stderr)));

    let mut lines = BufReader::new(stdout).lines();
    loop {
        let line = tokio::select! {
            () = tx.closed() => {
                tracing::debug!("Event stream dropped; stopping runtime");
                return;
            }
            line = lines.next_line() => line,
        };

        match line {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if !line.starts_with('{') {
                    tracing::debug!(line = %line, "Skipping non-JSON runtime output");
                    continue;
                }
                let event = match serde_json::from_str::<ThreadEvent>(line) {
                    Ok(event) => event,
                    Err(source) => {
                        let _ = tx
                            .send(Err(BackendError::Decode {
                                line: line.to_string(),
                                source,
                            }))
                            .await;
                        return;
                    }
                };
                if let ThreadEvent::ThreadStarted { thread_id: id } = &event {
                    tracing::debug!(thread_id = %id, "Runtime thread started");
                    *thread_id.lock() = Some(id.clone());
                }
                if tx.send(Ok(event)).await.is_err() {
                    return;
                }
            }
            Ok(None) => break,
            Err(e) => {
                let _ = tx.send(Err(BackendError::Io(e))).await;
                return;
            }
        }
    }

    let status = child.wait().await;
    let stderr = match stderr_task {
        Some(task) => task.await.unwrap_or_default(),
        None => String::new(),
    };

    match status {
        Ok(status) if status.success() => {
            tracing::debug!("Runtime exited cleanly");
        }
        Ok(status) => {
            let _ = tx
                .send(Err(BackendError::Exited {
                    code: status.code(),
                    stderr: stderr.trim().to_string(),
                }))
                .await;
        }
        Err(e) => {
            let _ = tx.send(Err(BackendError::Io(e))).await;
        }
    }
}

async fn drain(mut stderr: ChildStderr) -> String {
    let mut buf = String::new();
    if let Err(e) = stderr.read_to_string(&mut buf).await {
        tracing::debug!(error = %e, "Failed to read runtime stderr");
    }
    buf
}

/// Command line for one run
fn build_exec_args(
    options: &SessionOptions,
    extra_args: &[String],
    resume_thread: Option<&str>,
) -> Vec<String> {
    let mut args = vec!["exec".to_string(), "--experimental-json".to_string()];

    if let Some(model) = options.model.as_deref().map(str::trim).filter(|m| !m.is_empty()) {
        args.push("--model".to_string());
        args.push(model.to_string());
    }

    args.push("--sandbox".to_string());
    args.push(options.sandbox_mode.as_cli_arg().to_string());

    args.push("--cd".to_string());
    args.push(options.working_directory.clone());

    for root in &options.writable_roots {
        args.push("--add-dir".to_string());
        args.push(root.clone());
    }

    let mut config = vec![format!(
        "approval_policy=\"{}\"",
        options.approval_policy.as_str()
    )];
    if options.network_access {
        config.push("sandbox_workspace_write.network_access=true".to_string());
    }
    if options.web_search.enabled {
        config.push("tools.web_search=true".to_string());
        if options.web_search.mode == WebSearchMode::Cached {
            config.push(format!("web_search=\"{}\"", WebSearchMode::Cached.as_str()));
        }
    }
    if let Some(effort) = options.reasoning_effort {
        config.push(format!("model_reasoning_effort=\"{}\"", effort.as_str()));
    }
    if let Some(max_tokens) = options.max_tokens {
        config.push(format!("model_max_output_tokens={max_tokens}"));
    }
    for entry in config {
        args.push("--config".to_string());
        args.push(entry);
    }

    args.push("--skip-git-repo-check".to_string());
    args.extend(extra_args.iter().cloned());

    if let Some(thread_id) = resume_thread {
        args.push("resume".to_string());
        args.push(thread_id.to_string());
    }

    args
}
