//! Integration tests for the event translator
//!
//! These drive `EventTranslator::execute` end to end against scripted
//! backends and check the published update sequence:
//! - Update order for a complete turn
//! - Text deltas and tool lifecycle deduplication
//! - Cancellation before and during a run
//! - Input validation and backend failures
//! - Session affinity across executions and contexts

use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use serde_json::json;
use tempfile::NamedTempFile;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use bridge_core::backend::{
    load_script, parse_script, AgentBackend, BackendError, BackendSession, EventStream,
    ReplayBackend, ReplayStep, SessionOptions, ThreadEvent, ThreadItem,
};
use bridge_core::config::{AgentConfig, ConfigOverrides, ConfigResolver};
use bridge_core::protocol::{to_json_value, Message, Part, ProtocolUpdate, ToolPhase, ToolUpdate};
use bridge_core::sink::{ChannelSink, MemorySink, SinkMessage};
use bridge_core::{CancelOutcome, ContextId, EventTranslator, TaskContext, TaskId, TaskState};

// =============================================================================
// Helpers
// =============================================================================

const HELLO_SCRIPT: &str = r#"
{"type":"thread.started","thread_id":"th_1"}
{"type":"turn.started"}
{"type":"item.completed","item":{"id":"item_0","type":"agent_message","text":"Hi"}}
{"type":"turn.completed","usage":{"input_tokens":5,"cached_input_tokens":0,"output_tokens":1}}
"#;

fn translator_with(backend: Arc<ReplayBackend>, defaults: AgentConfig) -> EventTranslator {
    EventTranslator::new(backend as Arc<dyn AgentBackend>, ConfigResolver::new(defaults))
}

fn replay(script: &str) -> Arc<ReplayBackend> {
    Arc::new(ReplayBackend::repeating(parse_script(script).unwrap()))
}

fn task(id: &str, ctx: &str, text: &str) -> TaskContext {
    TaskContext::new(TaskId::new(id), ContextId::new(ctx), Message::user_text(text))
}

/// One-line rendering of an update for sequence comparisons
fn summarize(update: &ProtocolUpdate) -> String {
    match update {
        ProtocolUpdate::Task(task) => format!("task {}", task.status.state),
        ProtocolUpdate::StatusUpdate(status) => {
            let kind = status
                .kind()
                .map(|k| to_json_value(&k).as_str().unwrap_or_default().to_string())
                .unwrap_or_default();
            let mut line = format!("status {} {kind}", status.status.state);
            if let Some(text) = status.text().filter(|t| !t.is_empty()) {
                line.push_str(&format!(": {text}"));
            }
            if status.is_final {
                line.push_str(" final");
            }
            line
        }
        ProtocolUpdate::ArtifactUpdate(artifact) => {
            let mut line = format!("artifact {}", artifact.artifact.artifact_id);
            if artifact.append {
                line.push_str(" append");
            }
            if artifact.last_chunk {
                line.push_str(" last");
            }
            line
        }
    }
}

fn summaries(updates: &[ProtocolUpdate]) -> Vec<String> {
    updates.iter().map(summarize).collect()
}

fn tool_updates(updates: &[ProtocolUpdate]) -> Vec<ToolUpdate> {
    updates
        .iter()
        .filter_map(|update| match update {
            ProtocolUpdate::StatusUpdate(status) => status.status.message.as_ref(),
            _ => None,
        })
        .filter_map(|message| match message.parts.first() {
            Some(Part::Data { data }) => serde_json::from_value(data.clone()).ok(),
            _ => None,
        })
        .collect()
}

// =============================================================================
// Update Ordering
// =============================================================================

#[tokio::test]
async fn test_complete_turn_update_order() {
    let backend = replay(HELLO_SCRIPT);
    let translator = translator_with(Arc::clone(&backend), AgentConfig::default());
    let sink = MemorySink::new();

    let state = translator
        .execute(task("t1", "ctx", "Say hi"), &sink)
        .await
        .unwrap();

    assert_eq!(state, TaskState::Completed);
    assert_eq!(
        summaries(&sink.updates()),
        vec![
            "task submitted",
            "status working state-change",
            "status working turn-started",
            "status working text-content: Hi",
            "artifact tool-turn-usage-output last",
            "status working turn-completed",
            "status completed state-change final",
        ]
    );
    assert_eq!(sink.finished_count(), 1);
    assert_eq!(backend.runs()[0].input, "Say hi");
}

#[tokio::test]
async fn test_submitted_record_carries_input_history() {
    let translator = translator_with(replay(HELLO_SCRIPT), AgentConfig::default());
    let sink = MemorySink::new();

    translator
        .execute(task("t1", "ctx", "Say hi"), &sink)
        .await
        .unwrap();

    match &sink.updates()[0] {
        ProtocolUpdate::Task(record) => {
            assert_eq!(record.id, TaskId::new("t1"));
            assert_eq!(record.context_id, ContextId::new("ctx"));
            assert_eq!(record.history.len(), 1);
            assert_eq!(record.history[0].text_content(), "Say hi");
        }
        other => panic!("Expected task record, got {other:?}"),
    }
}

#[tokio::test]
async fn test_streamed_text_concatenates_to_final_text() {
    let script = r#"
{"type":"turn.started"}
{"type":"item.started","item":{"id":"r","type":"reasoning","text":"Look"}}
{"type":"item.started","item":{"id":"m","type":"agent_message","text":""}}
{"type":"item.updated","item":{"id":"m","type":"agent_message","text":"The answer"}}
{"type":"item.completed","item":{"id":"r","type":"reasoning","text":"Looking it up"}}
{"type":"item.updated","item":{"id":"m","type":"agent_message","text":"The answer is"}}
{"type":"item.updated","item":{"id":"m","type":"agent_message","text":"The answer is"}}
{"type":"item.completed","item":{"id":"m","type":"agent_message","text":"The answer is 42."}}
{"type":"turn.completed","usage":{}}
"#;
    let translator = translator_with(replay(script), AgentConfig::default());
    let sink = MemorySink::new();

    translator
        .execute(task("t1", "ctx", "question"), &sink)
        .await
        .unwrap();

    let collect = |kind: &str| -> String {
        sink.updates()
            .iter()
            .filter_map(|update| match update {
                ProtocolUpdate::StatusUpdate(status)
                    if to_json_value(&status.kind()) == json!(kind) =>
                {
                    status.text()
                }
                _ => None,
            })
            .collect()
    };

    assert_eq!(collect("text-content"), "The answer is 42.");
    assert_eq!(collect("thought"), "Looking it up");
}

#[tokio::test]
async fn test_tool_items_start_and_finish_once() {
    let script = r#"
{"type":"turn.started"}
{"type":"item.started","item":{"id":"cmd","type":"command_execution","command":"cargo fmt","aggregated_output":"","status":"in_progress"}}
{"type":"item.updated","item":{"id":"cmd","type":"command_execution","command":"cargo fmt","aggregated_output":"formatting\n","status":"in_progress"}}
{"type":"item.updated","item":{"id":"cmd","type":"command_execution","command":"cargo fmt","aggregated_output":"formatting\n","status":"in_progress"}}
{"type":"item.completed","item":{"id":"cmd","type":"command_execution","command":"cargo fmt","aggregated_output":"formatting\ndone\n","exit_code":0,"status":"completed"}}
{"type":"item.completed","item":{"id":"cmd","type":"command_execution","command":"cargo fmt","aggregated_output":"formatting\ndone\n","exit_code":0,"status":"completed"}}
{"type":"item.started","item":{"id":"mcp","type":"mcp_tool_call","server":"fs","tool":"read","arguments":{"path":"a.txt"},"status":"in_progress"}}
{"type":"item.updated","item":{"id":"mcp","type":"mcp_tool_call","server":"fs","tool":"read","arguments":{"path":"a.txt"},"status":"in_progress"}}
{"type":"item.completed","item":{"id":"mcp","type":"mcp_tool_call","server":"fs","tool":"read","arguments":{"path":"a.txt"},"status":"completed","result":{"content":[{"type":"text","text":"contents"}]}}}
{"type":"item.completed","item":{"id":"patch","type":"file_change","changes":[{"path":"a.txt","kind":"add"}],"status":"completed"}}
{"type":"turn.completed","usage":{}}
"#;
    let translator = translator_with(replay(script), AgentConfig::default());
    let sink = MemorySink::new();

    translator
        .execute(task("t1", "ctx", "tidy up"), &sink)
        .await
        .unwrap();

    let tools = tool_updates(&sink.updates());
    for id in ["cmd", "mcp"] {
        let phases: Vec<ToolPhase> = tools
            .iter()
            .filter(|t| t.item_id == id)
            .map(|t| t.phase)
            .collect();
        assert_eq!(phases, vec![ToolPhase::Started, ToolPhase::Completed], "item {id}");
    }
    let patch: Vec<ToolPhase> = tools
        .iter()
        .filter(|t| t.item_id == "patch")
        .map(|t| t.phase)
        .collect();
    assert_eq!(patch, vec![ToolPhase::Completed]);

    let command_chunks: Vec<String> = sink
        .updates()
        .iter()
        .filter(|u| summarize(u).starts_with("artifact tool-cmd-output"))
        .map(summarize)
        .collect();
    assert_eq!(
        command_chunks,
        vec!["artifact tool-cmd-output", "artifact tool-cmd-output append last"]
    );
}

// =============================================================================
// Cancellation
// =============================================================================

#[tokio::test]
async fn test_cancel_before_execute() {
    let backend = replay(HELLO_SCRIPT);
    let translator = translator_with(Arc::clone(&backend), AgentConfig::default());
    let sink = MemorySink::new();

    assert_eq!(translator.cancel(&TaskId::new("t1")), CancelOutcome::Deferred);

    let state = translator
        .execute(task("t1", "ctx", "never runs"), &sink)
        .await
        .unwrap();

    assert_eq!(state, TaskState::Canceled);
    assert_eq!(
        summaries(&sink.updates()),
        vec![
            "task submitted",
            "status working state-change",
            "status canceled state-change final",
        ]
    );
    assert_eq!(sink.finished_count(), 1);
    assert_eq!(backend.sessions_created(), 0);
    assert!(translator.sessions().is_empty());
    assert!(!translator.cancellations().is_marked(&TaskId::new("t1")));

    // Already terminal: a second cancel publishes nothing
    assert_eq!(
        translator.cancel(&TaskId::new("t1")),
        CancelOutcome::AlreadyTerminal(TaskState::Canceled)
    );
}

/// Backend whose single run is fed by the test through a channel
struct FeedBackend {
    feed: parking_lot::Mutex<Option<mpsc::Receiver<Result<ThreadEvent, BackendError>>>>,
}

struct FeedSession {
    options: SessionOptions,
    feed: parking_lot::Mutex<Option<mpsc::Receiver<Result<ThreadEvent, BackendError>>>>,
}

impl AgentBackend for FeedBackend {
    fn name(&self) -> &str {
        "feed"
    }

    fn start_session(
        &self,
        options: SessionOptions,
    ) -> Result<Arc<dyn BackendSession>, BackendError> {
        Ok(Arc::new(FeedSession {
            options,
            feed: parking_lot::Mutex::new(self.feed.lock().take()),
        }))
    }
}

#[async_trait]
impl BackendSession for FeedSession {
    fn options(&self) -> &SessionOptions {
        &self.options
    }

    fn thread_id(&self) -> Option<String> {
        None
    }

    async fn run_streamed(&self, _input: &str) -> Result<EventStream, BackendError> {
        let rx = self
            .feed
            .lock()
            .take()
            .ok_or_else(|| BackendError::Session("feed already used".to_string()))?;
        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}

async fn next_update(rx: &mut mpsc::Receiver<SinkMessage>) -> String {
    match rx.recv().await {
        Some(SinkMessage::Update(update)) => summarize(&update),
        Some(SinkMessage::Finished) => "finished".to_string(),
        None => "closed".to_string(),
    }
}

#[tokio::test]
async fn test_cancel_mid_stream() {
    let (feed_tx, feed_rx) = mpsc::channel(8);
    let backend = Arc::new(FeedBackend {
        feed: parking_lot::Mutex::new(Some(feed_rx)),
    });
    let translator = Arc::new(EventTranslator::new(
        backend,
        ConfigResolver::new(AgentConfig::default()),
    ));
    let (sink, mut rx) = ChannelSink::channel(32);

    let runner = {
        let translator = Arc::clone(&translator);
        tokio::spawn(async move { translator.execute(task("t1", "ctx", "go"), &sink).await })
    };

    assert_eq!(next_update(&mut rx).await, "task submitted");
    assert_eq!(next_update(&mut rx).await, "status working state-change");

    feed_tx.send(Ok(ThreadEvent::TurnStarted)).await.unwrap();
    assert_eq!(next_update(&mut rx).await, "status working turn-started");

    assert_eq!(translator.cancel(&TaskId::new("t1")), CancelOutcome::Signaled);

    // The next event reaches the boundary check and is not dispatched
    feed_tx
        .send(Ok(ThreadEvent::ItemCompleted {
            item: ThreadItem::agent_message("item_0", "too late"),
        }))
        .await
        .unwrap();

    assert_eq!(next_update(&mut rx).await, "status canceled state-change final");
    assert_eq!(next_update(&mut rx).await, "finished");

    let state = runner.await.unwrap().unwrap();
    assert_eq!(state, TaskState::Canceled);

    // The run was abandoned: the feed has no consumer anymore
    assert!(feed_tx.is_closed());
    assert_eq!(next_update(&mut rx).await, "closed");
    assert_eq!(translator.cancellations().pending(), 0);
}

// =============================================================================
// Failures
// =============================================================================

#[tokio::test]
async fn test_empty_input_fails_without_session() {
    let backend = replay(HELLO_SCRIPT);
    let translator = translator_with(Arc::clone(&backend), AgentConfig::default());
    let sink = MemorySink::new();

    let mut message = Message::user_text("");
    message.parts = vec![Part::Data {
        data: json!({"attachment": true}),
    }];
    let state = translator
        .execute(
            TaskContext::new(TaskId::new("t1"), ContextId::new("ctx"), message),
            &sink,
        )
        .await
        .unwrap();

    assert_eq!(state, TaskState::Failed);
    assert_eq!(
        summaries(&sink.updates()),
        vec![
            "task submitted",
            "status working state-change",
            "status failed state-change: No text content final",
        ]
    );
    assert_eq!(backend.sessions_created(), 0);
    assert!(translator.sessions().is_empty());
}

#[tokio::test]
async fn test_turn_failure_stops_dispatch() {
    let script = r#"
{"type":"turn.started"}
{"type":"turn.failed","error":{"message":"usage limit reached"}}
{"type":"item.completed","item":{"id":"late","type":"agent_message","text":"ignored"}}
"#;
    let translator = translator_with(replay(script), AgentConfig::default());
    let sink = MemorySink::new();

    let state = translator
        .execute(task("t1", "ctx", "work"), &sink)
        .await
        .unwrap();

    assert_eq!(state, TaskState::Failed);
    assert_eq!(
        summaries(&sink.updates())[2..],
        [
            "status working turn-started",
            "status failed state-change: usage limit reached final",
        ]
    );
}

#[tokio::test]
async fn test_stream_error_fails_task() {
    let script = r#"
{"type":"turn.started"}
{"replay_error":"connection reset"}
"#;
    let translator = translator_with(replay(script), AgentConfig::default());
    let sink = MemorySink::new();

    let state = translator
        .execute(task("t1", "ctx", "work"), &sink)
        .await
        .unwrap();

    assert_eq!(state, TaskState::Failed);
    assert_eq!(
        summaries(&sink.updates()).last().map(String::as_str),
        Some("status failed state-change: Session error: connection reset final")
    );
}

// =============================================================================
// Session Affinity
// =============================================================================

#[tokio::test]
async fn test_same_context_reuses_session() {
    let backend = replay(HELLO_SCRIPT);
    let translator = translator_with(Arc::clone(&backend), AgentConfig::default());

    let mut texts = Vec::new();
    for id in ["t1", "t2"] {
        let sink = MemorySink::new();
        translator.execute(task(id, "ctx", id), &sink).await.unwrap();
        texts.extend(
            summaries(&sink.updates())
                .into_iter()
                .filter(|line| line.contains("text-content")),
        );
    }

    assert_eq!(backend.sessions_created(), 1);
    let inputs: Vec<String> = backend.runs().into_iter().map(|r| r.input).collect();
    assert_eq!(inputs, vec!["t1", "t2"]);

    // Item ids repeat across turns; each turn streams its text from scratch
    assert_eq!(
        texts,
        vec![
            "status working text-content: Hi",
            "status working text-content: Hi",
        ]
    );
}

#[tokio::test]
async fn test_working_directory_change_creates_new_session() {
    let backend = replay(HELLO_SCRIPT);
    let translator = translator_with(Arc::clone(&backend), AgentConfig::default());
    let ctx = ContextId::new("ctx");

    translator
        .execute(
            task("t1", "ctx", "one").with_working_directory("/srv/a"),
            &MemorySink::new(),
        )
        .await
        .unwrap();
    translator
        .execute(
            task("t2", "ctx", "two").with_working_directory("  /srv/a  "),
            &MemorySink::new(),
        )
        .await
        .unwrap();
    assert_eq!(backend.sessions_created(), 1);

    let moved = Message::user_text("three").with_metadata(json!({"workingDirectory": "/srv/b"}));
    translator
        .execute(
            TaskContext::new(TaskId::new("t3"), ctx.clone(), moved),
            &MemorySink::new(),
        )
        .await
        .unwrap();

    assert_eq!(backend.sessions_created(), 2);
    assert_eq!(translator.sessions().binding_key(&ctx).as_deref(), Some("/srv/b"));
    let dirs: Vec<String> = backend
        .runs()
        .into_iter()
        .map(|r| r.working_directory)
        .collect();
    assert_eq!(dirs, vec!["/srv/a", "/srv/a", "/srv/b"]);
}

#[tokio::test]
async fn test_per_context_config_override_sets_directory() {
    let backend = replay(HELLO_SCRIPT);
    let resolver = ConfigResolver::new(AgentConfig {
        working_directory: Some("/srv/default".to_string()),
        ..Default::default()
    })
    .with_overrides(|ctx| {
        (ctx.as_str() == "special").then(|| ConfigOverrides {
            working_directory: Some("/srv/special".to_string()),
            ..Default::default()
        })
    });
    let translator = EventTranslator::new(Arc::clone(&backend) as Arc<dyn AgentBackend>, resolver);

    translator
        .execute(task("t1", "plain", "x"), &MemorySink::new())
        .await
        .unwrap();
    translator
        .execute(task("t2", "special", "y"), &MemorySink::new())
        .await
        .unwrap();

    let dirs: Vec<String> = backend
        .runs()
        .into_iter()
        .map(|r| r.working_directory)
        .collect();
    assert_eq!(dirs, vec!["/srv/default", "/srv/special"]);
}

#[tokio::test]
async fn test_concurrent_contexts() {
    let backend = replay(HELLO_SCRIPT);
    let translator = Arc::new(translator_with(Arc::clone(&backend), AgentConfig::default()));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let translator = Arc::clone(&translator);
            tokio::spawn(async move {
                let sink = MemorySink::new();
                let state = translator
                    .execute(task(&format!("t{i}"), &format!("ctx{i}"), "hello"), &sink)
                    .await
                    .unwrap();
                (state, sink.updates())
            })
        })
        .collect();

    for handle in handles {
        let (state, updates) = handle.await.unwrap();
        assert_eq!(state, TaskState::Completed);
        assert_eq!(updates.len(), 7);
        assert_eq!(updates.iter().filter(|u| u.is_final()).count(), 1);
    }
    assert_eq!(backend.sessions_created(), 8);
    assert_eq!(translator.sessions().len(), 8);
}

// =============================================================================
// Replay Scripts
// =============================================================================

#[tokio::test]
async fn test_replay_script_from_file() {
    let mut file = NamedTempFile::new().unwrap();
    write!(file, "{HELLO_SCRIPT}").unwrap();

    let steps = load_script(file.path()).unwrap();
    assert!(matches!(
        steps.first(),
        Some(ReplayStep::Event(ThreadEvent::ThreadStarted { .. }))
    ));

    let translator = translator_with(
        Arc::new(ReplayBackend::repeating(steps)),
        AgentConfig::default(),
    );
    let sink = MemorySink::new();
    let state = translator
        .execute(task("t1", "ctx", "hi"), &sink)
        .await
        .unwrap();
    assert_eq!(state, TaskState::Completed);
}
