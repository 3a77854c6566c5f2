//! Stdio Server
//!
//! Serves bridge requests read as JSON lines and writes every protocol update
//! as one JSON line:
//!
//! ```text
//! → {"type":"execute","task_id":"t1","context_id":"c1","text":"List files"}
//! ← {"kind":"task","id":"t1","contextId":"c1","status":{"state":"submitted",...},...}
//! ← {"kind":"status-update","taskId":"t1","contextId":"c1","status":{"state":"working",...},...}
//! → {"type":"cancel","task_id":"t1"}
//! ← {"kind":"cancel-result","taskId":"t1","outcome":"signaled"}
//! ```
//!
//! Each execute request runs as its own task so requests for different
//! contexts proceed concurrently. A context runs one task at a time; an
//! execute for a busy context is answered with an error line.

use std::sync::Arc;

use anyhow::Result;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn, Instrument};

use bridge_core::protocol::to_json_string;
use bridge_core::{
    CancelOutcome, ChannelSink, ContextId, EventTranslator, Message, SinkMessage, TaskContext,
    TaskId, TaskState,
};

/// Output lines buffered ahead of the writer
const OUTPUT_CAPACITY: usize = 256;

/// Updates buffered per running task
const SINK_CAPACITY: usize = 64;

/// A request line
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Run a task
    Execute {
        /// Task identifier
        task_id: TaskId,
        /// Context identifier
        context_id: ContextId,
        /// Plain-text input (ignored when `message` is given)
        #[serde(default)]
        text: Option<String>,
        /// Full protocol message
        #[serde(default)]
        message: Option<Message>,
        /// Per-task working directory
        #[serde(default)]
        working_directory: Option<String>,
    },
    /// Cancel a task
    Cancel {
        /// Task identifier
        task_id: TaskId,
    },
}

/// A daemon-level response line (protocol updates are written as-is)
#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Response {
    /// Result of a cancel request
    #[serde(rename_all = "camelCase")]
    CancelResult {
        /// Task identifier
        task_id: TaskId,
        /// `deferred`, `signaled` or `already-terminal`
        outcome: &'static str,
        /// Terminal state, when already terminal
        #[serde(skip_serializing_if = "Option::is_none")]
        state: Option<TaskState>,
    },
    /// A request could not be served
    #[serde(rename_all = "camelCase")]
    Error {
        /// Task the request referred to, if known
        #[serde(skip_serializing_if = "Option::is_none")]
        task_id: Option<TaskId>,
        /// What went wrong
        message: String,
    },
}

impl Response {
    fn cancel_result(task_id: TaskId, outcome: CancelOutcome) -> Self {
        let (outcome, state) = match outcome {
            CancelOutcome::Deferred => ("deferred", None),
            CancelOutcome::Signaled => ("signaled", None),
            CancelOutcome::AlreadyTerminal(state) => ("already-terminal", Some(state)),
        };
        Self::CancelResult {
            task_id,
            outcome,
            state,
        }
    }

    fn error(task_id: Option<TaskId>, message: impl Into<String>) -> Self {
        Self::Error {
            task_id,
            message: message.into(),
        }
    }
}

/// JSON-lines request server
pub struct StdioServer {
    translator: Arc<EventTranslator>,
    busy: Arc<DashMap<ContextId, TaskId>>,
}

impl StdioServer {
    /// Create a server over a translator
    pub fn new(translator: Arc<EventTranslator>) -> Self {
        Self {
            translator,
            busy: Arc::new(DashMap::new()),
        }
    }

    /// Serve requests until `input` ends and every running task finished
    ///
    /// Returns the output writer once everything has been flushed.
    pub async fn run<R, W>(&self, input: R, output: W) -> Result<W>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (out_tx, out_rx) = mpsc::channel::<String>(OUTPUT_CAPACITY);
        let writer = tokio::spawn(write_lines(out_rx, output));

        let mut running = JoinSet::new();
        let mut lines = input.lines();
        while let Some(line) = lines.next_line().await? {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            match serde_json::from_str::<Request>(line) {
                Ok(request) => self.handle(request, &out_tx, &mut running).await,
                Err(e) => {
                    warn!(error = %e, "Malformed request");
                    send(&out_tx, &Response::error(None, format!("Malformed request: {e}"))).await;
                }
            }
        }

        debug!(running = running.len(), "Input closed; waiting for running tasks");
        while let Some(result) = running.join_next().await {
            if let Err(e) = result {
                warn!(error = %e, "Task handler panicked");
            }
        }

        drop(out_tx);
        let output = writer.await??;
        info!("All tasks finished");
        Ok(output)
    }

    async fn handle(
        &self,
        request: Request,
        out_tx: &mpsc::Sender<String>,
        running: &mut JoinSet<()>,
    ) {
        match request {
            Request::Cancel { task_id } => {
                let outcome = self.translator.cancel(&task_id);
                send(out_tx, &Response::cancel_result(task_id, outcome)).await;
            }
            Request::Execute {
                task_id,
                context_id,
                text,
                message,
                working_directory,
            } => {
                match self.busy.entry(context_id.clone()) {
                    Entry::Occupied(entry) => {
                        let message = format!("Context {context_id} is busy with task {}", entry.get());
                        drop(entry);
                        send(out_tx, &Response::error(Some(task_id), message)).await;
                        return;
                    }
                    Entry::Vacant(entry) => {
                        entry.insert(task_id.clone());
                    }
                }

                let message = message.unwrap_or_else(|| Message::user_text(text.unwrap_or_default()));
                let mut task = TaskContext::new(task_id.clone(), context_id.clone(), message);
                task.working_directory = working_directory;

                let span = tracing::info_span!("execute", task_id = %task_id, context_id = %context_id);
                let translator = Arc::clone(&self.translator);
                let busy = Arc::clone(&self.busy);
                let out_tx = out_tx.clone();
                running.spawn(
                    async move {
                        run_task(&translator, task, &out_tx).await;
                        busy.remove(&context_id);
                    }
                    .instrument(span),
                );
            }
        }
    }
}

/// Execute one task, forwarding its updates to the output
async fn run_task(translator: &EventTranslator, task: TaskContext, out_tx: &mpsc::Sender<String>) {
    let task_id = task.task_id.clone();
    let (sink, mut updates) = ChannelSink::channel(SINK_CAPACITY);

    let forward_tx = out_tx.clone();
    let forwarder = tokio::spawn(
        async move {
            while let Some(message) = updates.recv().await {
                match message {
                    SinkMessage::Update(update) => {
                        if forward_tx.send(to_json_string(&update)).await.is_err() {
                            warn!("Output closed; dropping update");
                        }
                    }
                    SinkMessage::Finished => debug!("Sink finished"),
                }
            }
        }
        .in_current_span(),
    );

    let result = translator.execute(task, &sink).await;
    drop(sink);
    if let Err(e) = forwarder.await {
        warn!(error = %e, "Update forwarder failed");
    }

    match result {
        Ok(state) => debug!(state = %state, "Task done"),
        Err(e) => {
            warn!(error = %e, "Task rejected");
            send(out_tx, &Response::error(Some(task_id), e.to_string())).await;
        }
    }
}

async fn send(out_tx: &mpsc::Sender<String>, response: &Response) {
    if out_tx.send(to_json_string(response)).await.is_err() {
        warn!("Output closed; dropping response");
    }
}

async fn write_lines<W: AsyncWrite + Unpin>(
    mut lines: mpsc::Receiver<String>,
    mut output: W,
) -> std::io::Result<W> {
    while let Some(line) = lines.recv().await {
        output.write_all(line.as_bytes()).await?;
        output.write_all(b"\n").await?;
        output.flush().await?;
    }
    Ok(output)
}
