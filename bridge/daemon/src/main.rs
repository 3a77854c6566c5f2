//! Bridge Daemon
//!
//! Runs the event translator over stdio: requests arrive as JSON lines on
//! stdin, protocol updates leave as JSON lines on stdout, and logs go to
//! stderr.
//!
//! # Usage
//!
//! ```bash
//! # Drive the runtime CLI found on PATH
//! bridge-daemon
//!
//! # Replay a recorded run for every request
//! bridge-daemon --replay demos/hello.jsonl
//!
//! # With verbose logging
//! RUST_LOG=debug bridge-daemon --working-directory ~/src/project
//! ```
//!
//! # Configuration
//!
//! CLI flags override `BRIDGE_*` environment variables, which override the
//! config file (`$XDG_CONFIG_HOME/agent-bridge/bridge.toml` or `--config`).
//!
//! # Signals
//!
//! - SIGINT: stop reading requests and exit

mod server;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use clap::Parser;
use tokio::io::BufReader;
use tracing::info;

use bridge_core::backend::load_script;
use bridge_core::config::{
    load_config, load_config_from_path, ApprovalPolicy, ConfigLayers, ReasoningEffort,
    SandboxMode, WebSearchMode,
};
use bridge_core::translator::DEFERRED_CANCEL_TTL;
use bridge_core::{
    AgentBackend, ConfigOverrides, ConfigResolver, ConfigSource, EventTranslator, ExecBackend,
    ReplayBackend,
};

use crate::server::StdioServer;

/// Serve agent-bridge requests over stdio
#[derive(Debug, Parser)]
#[command(name = "bridge-daemon", version, about)]
struct Cli {
    /// Configuration file (defaults to $XDG_CONFIG_HOME/agent-bridge/bridge.toml)
    #[arg(long, env = "BRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Replay this JSON-lines script for every run instead of driving the runtime
    #[arg(long)]
    replay: Option<PathBuf>,

    /// Runtime CLI binary
    #[arg(long)]
    binary: Option<String>,

    /// Model identifier
    #[arg(long)]
    model: Option<String>,

    /// Sandbox mode (read-only, workspace-write, full-access)
    #[arg(long)]
    sandbox: Option<String>,

    /// Approval policy (untrusted, on-failure, on-request, never)
    #[arg(long)]
    approval_policy: Option<String>,

    /// Reasoning effort (minimal, low, medium, high)
    #[arg(long)]
    reasoning_effort: Option<String>,

    /// Default working directory for sessions
    #[arg(long)]
    working_directory: Option<String>,

    /// Allow network access inside the sandbox
    #[arg(long)]
    network_access: bool,

    /// Allow web search
    #[arg(long)]
    web_search: bool,

    /// Web search source (live, cached)
    #[arg(long)]
    web_search_mode: Option<String>,

    /// Seconds a cancel for a task that has not started stays pending
    #[arg(long, default_value_t = DEFERRED_CANCEL_TTL.as_secs())]
    deferred_cancel_ttl: u64,
}

impl Cli {
    fn overrides(&self) -> anyhow::Result<ConfigOverrides> {
        Ok(ConfigOverrides {
            model: self.model.clone(),
            sandbox_mode: self
                .sandbox
                .as_deref()
                .map(|s| SandboxMode::parse(s).ok_or_else(|| anyhow!("Unknown sandbox mode '{s}'")))
                .transpose()?,
            approval_policy: self
                .approval_policy
                .as_deref()
                .map(|s| {
                    ApprovalPolicy::parse(s).ok_or_else(|| anyhow!("Unknown approval policy '{s}'"))
                })
                .transpose()?,
            reasoning_effort: self
                .reasoning_effort
                .as_deref()
                .map(|s| {
                    ReasoningEffort::parse(s)
                        .ok_or_else(|| anyhow!("Unknown reasoning effort '{s}'"))
                })
                .transpose()?,
            working_directory: self.working_directory.clone(),
            network_access: self.network_access.then_some(true),
            web_search: self.web_search.then_some(true),
            web_search_mode: self
                .web_search_mode
                .as_deref()
                .map(|s| {
                    WebSearchMode::parse(s).ok_or_else(|| anyhow!("Unknown web search mode '{s}'"))
                })
                .transpose()?,
            ..Default::default()
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries protocol updates
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("bridge_daemon=info".parse()?)
                .add_directive("bridge_core=info".parse()?),
        )
        .with_target(true)
        .init();

    let cli = Cli::parse();
    info!(pid = std::process::id(), "Starting bridge daemon");

    let file = match &cli.config {
        Some(path) => load_config_from_path(path)?,
        None => load_config()?,
    };

    let layers = ConfigLayers::default()
        .layer(file.agent.to_overrides()?, ConfigSource::File)
        .layer(ConfigOverrides::from_env()?, ConfigSource::Env)
        .layer(cli.overrides()?, ConfigSource::Cli);
    info!(source = %layers.working_directory_source(), "Working directory source");
    let defaults = layers.finish();

    let backend: Arc<dyn AgentBackend> = match &cli.replay {
        Some(path) => {
            let script = load_script(path)
                .with_context(|| format!("Failed to load replay script {}", path.display()))?;
            info!(path = %path.display(), "Replaying recorded run");
            Arc::new(ReplayBackend::repeating(script))
        }
        None => {
            let mut exec = file.exec.clone();
            if let Some(binary) = &cli.binary {
                exec.binary = Some(binary.clone());
            }
            let backend = ExecBackend::from_toml(&exec);
            info!(binary = backend.binary(), "Driving runtime CLI");
            Arc::new(backend)
        }
    };

    let translator = Arc::new(
        EventTranslator::new(backend, ConfigResolver::new(defaults))
            .with_deferred_cancel_ttl(Duration::from_secs(cli.deferred_cancel_ttl)),
    );
    let server = StdioServer::new(translator);

    tokio::select! {
        result = server.run(BufReader::new(tokio::io::stdin()), tokio::io::stdout()) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted; shutting down");
        }
    }

    Ok(())
}
