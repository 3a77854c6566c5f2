//! Replay Backend
//!
//! Plays back recorded runs instead of talking to a live runtime. A script is
//! a JSON-lines file in the same format the runtime CLI emits; blank lines and
//! lines starting with `#` are ignored, and a line of the form
//! `{"replay_error": "..."}` makes the stream yield a backend error at that
//! point.
//!
//! Used by the daemon's `--replay` mode and by the integration tests.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use serde::Deserialize;

use super::events::ThreadEvent;
use super::traits::{AgentBackend, BackendError, BackendSession, EventStream, SessionOptions};

/// One scripted stream element
#[derive(Clone, Debug, PartialEq)]
pub enum ReplayStep {
    /// Yield an event
    Event(ThreadEvent),
    /// Yield a backend error
    Error(String),
}

impl From<ThreadEvent> for ReplayStep {
    fn from(event: ThreadEvent) -> Self {
        Self::Event(event)
    }
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ScriptedError {
    replay_error: String,
}

/// Parse a JSON-lines script
pub fn parse_script(text: &str) -> Result<Vec<ReplayStep>, BackendError> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| {
            if let Ok(scripted) = serde_json::from_str::<ScriptedError>(line) {
                return Ok(ReplayStep::Error(scripted.replay_error));
            }
            serde_json::from_str::<ThreadEvent>(line)
                .map(ReplayStep::Event)
                .map_err(|source| BackendError::Decode {
                    line: line.to_string(),
                    source,
                })
        })
        .collect()
}

/// Load a JSON-lines script from disk
pub fn load_script(path: &Path) -> Result<Vec<ReplayStep>, BackendError> {
    let text = std::fs::read_to_string(path)?;
    let steps = parse_script(&text)?;
    tracing::debug!(path = %path.display(), steps = steps.len(), "Loaded replay script");
    Ok(steps)
}

/// A run observed by the replay backend
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedRun {
    /// Working directory of the session that ran it
    pub working_directory: String,
    /// Input text
    pub input: String,
}

/// Scripts and observations shared by a backend and all its sessions
#[derive(Debug)]
struct ReplayState {
    scripts: Mutex<VecDeque<Vec<ReplayStep>>>,
    repeat: bool,
    runs: Mutex<Vec<RecordedRun>>,
}

impl ReplayState {
    fn next_script(&self) -> Option<Vec<ReplayStep>> {
        let mut scripts = self.scripts.lock();
        if self.repeat {
            scripts.front().cloned()
        } else {
            scripts.pop_front()
        }
    }
}

/// Backend that replays scripted runs
///
/// In sequence mode every run (across all sessions) consumes the next script,
/// and runs past the end fail to start. In repeating mode every run replays
/// the same script.
#[derive(Debug)]
pub struct ReplayBackend {
    state: Arc<ReplayState>,
    start_error: Option<String>,
    sessions_created: AtomicUsize,
}

impl ReplayBackend {
    /// Replay the given scripts in order, one per run
    #[must_use]
    pub fn sequence(scripts: Vec<Vec<ReplayStep>>) -> Self {
        Self::build(scripts, false)
    }

    /// Replay one script for every run
    #[must_use]
    pub fn repeating(script: Vec<ReplayStep>) -> Self {
        Self::build(vec![script], true)
    }

    fn build(scripts: Vec<Vec<ReplayStep>>, repeat: bool) -> Self {
        Self {
            state: Arc::new(ReplayState {
                scripts: Mutex::new(scripts.into()),
                repeat,
                runs: Mutex::new(Vec::new()),
            }),
            start_error: None,
            sessions_created: AtomicUsize::new(0),
        }
    }

    /// Make every `start_session` call fail
    #[must_use]
    pub fn with_start_error(mut self, message: impl Into<String>) -> Self {
        self.start_error = Some(message.into());
        self
    }

    /// Number of sessions created so far
    #[must_use]
    pub fn sessions_created(&self) -> usize {
        self.sessions_created.load(Ordering::SeqCst)
    }

    /// Runs observed so far
    #[must_use]
    pub fn runs(&self) -> Vec<RecordedRun> {
        self.state.runs.lock().clone()
    }
}

impl AgentBackend for ReplayBackend {
    fn name(&self) -> &str {
        "replay"
    }

    fn start_session(
        &self,
        options: SessionOptions,
    ) -> Result<Arc<dyn BackendSession>, BackendError> {
        if let Some(message) = &self.start_error {
            return Err(BackendError::Session(message.clone()));
        }
        self.sessions_created.fetch_add(1, Ordering::SeqCst);

        Ok(Arc::new(ReplaySession {
            options,
            state: Arc::clone(&self.state),
            thread_id: Arc::new(Mutex::new(None)),
        }))
    }
}

struct ReplaySession {
    options: SessionOptions,
    state: Arc<ReplayState>,
    thread_id: Arc<Mutex<Option<String>>>,
}

#[async_trait]
impl BackendSession for ReplaySession {
    fn options(&self) -> &SessionOptions {
        &self.options
    }

    fn thread_id(&self) -> Option<String> {
        self.thread_id.lock().clone()
    }

    async fn run_streamed(&self, input: &str) -> Result<EventStream, BackendError> {
        let script = self
            .state
            .next_script()
            .ok_or_else(|| BackendError::Session("replay script exhausted".to_string()))?;

        self.state.runs.lock().push(RecordedRun {
            working_directory: self.options.working_directory.clone(),
            input: input.to_string(),
        });

        let thread_id = Arc::clone(&self.thread_id);
        let stream = futures::stream::iter(script).map(move |step| match step {
            ReplayStep::Event(event) => {
                if let ThreadEvent::ThreadStarted { thread_id: id } = &event {
                    *thread_id.lock() = Some(id.clone());
                }
                Ok(event)
            }
            ReplayStep::Error(message) => Err(BackendError::Session(message)),
        });

        Ok(Box::pin(stream))
    }
}
