//! Agent Configuration
//!
//! Per-run configuration for the agent runtime and the layers it is assembled
//! from.
//!
//! # Configuration Priority
//!
//! Values are layered with the following priority (highest first):
//! 1. Per-context override callback (see [`ConfigResolver`])
//! 2. CLI arguments (daemon only)
//! 3. Environment variables (`BRIDGE_*`)
//! 4. TOML configuration file
//! 5. Default values
//!
//! The configuration file lives at `$XDG_CONFIG_HOME/agent-bridge/bridge.toml`:
//!
//! ```toml
//! [agent]
//! model = "gpt-5-codex"
//! sandbox_mode = "workspace-write"
//! approval_policy = "never"
//! network_access = false
//! web_search = true
//! web_search_mode = "live"
//! reasoning_effort = "medium"
//! working_directory = "/srv/projects/demo"
//! writable_roots = ["/tmp/scratch"]
//!
//! [exec]
//! binary = "codex"
//! extra_args = []
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::tasks::ContextId;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Enumerations
// =============================================================================

/// Filesystem and process isolation applied to the agent
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SandboxMode {
    /// No writes anywhere
    ReadOnly,
    /// Writes inside the working directory and writable roots
    #[default]
    WorkspaceWrite,
    /// No sandbox
    #[serde(alias = "danger-full-access")]
    FullAccess,
}

impl SandboxMode {
    /// Parse from a string, case-insensitively
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "read-only" | "readonly" => Some(Self::ReadOnly),
            "workspace-write" => Some(Self::WorkspaceWrite),
            "full-access" | "danger-full-access" => Some(Self::FullAccess),
            _ => None,
        }
    }

    /// Value understood by the runtime CLI's `--sandbox` flag
    #[must_use]
    pub fn as_cli_arg(&self) -> &'static str {
        match self {
            Self::ReadOnly => "read-only",
            Self::WorkspaceWrite => "workspace-write",
            Self::FullAccess => "danger-full-access",
        }
    }
}

/// When the agent must ask before acting
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ApprovalPolicy {
    /// Ask for anything not known safe
    Untrusted,
    /// Ask only when a sandboxed command fails
    OnFailure,
    /// Let the model decide when to ask
    OnRequest,
    /// Never ask
    #[default]
    Never,
}

impl ApprovalPolicy {
    /// Parse from a string, case-insensitively
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace('_', "-").as_str() {
            "untrusted" => Some(Self::Untrusted),
            "on-failure" => Some(Self::OnFailure),
            "on-request" => Some(Self::OnRequest),
            "never" => Some(Self::Never),
            _ => None,
        }
    }

    /// Wire value
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Untrusted => "untrusted",
            Self::OnFailure => "on-failure",
            Self::OnRequest => "on-request",
            Self::Never => "never",
        }
    }
}

/// How hard the model should reason
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    /// Minimal reasoning
    Minimal,
    /// Low effort
    Low,
    /// Medium effort
    Medium,
    /// High effort
    High,
}

impl ReasoningEffort {
    /// Parse from a string, case-insensitively
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "minimal" => Some(Self::Minimal),
            "low" => Some(Self::Low),
            "medium" => Some(Self::Medium),
            "high" => Some(Self::High),
            _ => None,
        }
    }

    /// Wire value
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Minimal => "minimal",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

/// Where web search results come from
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebSearchMode {
    /// Live requests
    #[default]
    Live,
    /// Cached results only
    Cached,
}

impl WebSearchMode {
    /// Parse from a string, case-insensitively
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "live" => Some(Self::Live),
            "cached" | "cache" => Some(Self::Cached),
            _ => None,
        }
    }

    /// Wire value
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Cached => "cached",
        }
    }
}

// =============================================================================
// Agent Configuration
// =============================================================================

/// Configuration for one run of the agent
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Model identifier (runtime default when unset)
    pub model: Option<String>,
    /// Output token limit (runtime default when unset)
    pub max_tokens: Option<u32>,
    /// Sandbox mode
    pub sandbox_mode: SandboxMode,
    /// Extra directories the agent may write to
    pub writable_roots: Vec<String>,
    /// Whether sandboxed commands may use the network
    pub network_access: bool,
    /// Approval policy
    pub approval_policy: ApprovalPolicy,
    /// Whether the agent may search the web
    pub web_search: bool,
    /// Web search source
    pub web_search_mode: WebSearchMode,
    /// Reasoning effort (runtime default when unset)
    pub reasoning_effort: Option<ReasoningEffort>,
    /// Working directory for the agent
    pub working_directory: Option<String>,
}

impl AgentConfig {
    /// Shallow merge: every field present in `overrides` replaces ours
    #[must_use]
    pub fn merged(mut self, overrides: ConfigOverrides) -> Self {
        if let Some(model) = overrides.model {
            self.model = Some(model);
        }
        if let Some(max_tokens) = overrides.max_tokens {
            self.max_tokens = Some(max_tokens);
        }
        if let Some(sandbox_mode) = overrides.sandbox_mode {
            self.sandbox_mode = sandbox_mode;
        }
        if let Some(writable_roots) = overrides.writable_roots {
            self.writable_roots = writable_roots;
        }
        if let Some(network_access) = overrides.network_access {
            self.network_access = network_access;
        }
        if let Some(approval_policy) = overrides.approval_policy {
            self.approval_policy = approval_policy;
        }
        if let Some(web_search) = overrides.web_search {
            self.web_search = web_search;
        }
        if let Some(web_search_mode) = overrides.web_search_mode {
            self.web_search_mode = web_search_mode;
        }
        if let Some(reasoning_effort) = overrides.reasoning_effort {
            self.reasoning_effort = Some(reasoning_effort);
        }
        if let Some(working_directory) = overrides.working_directory {
            self.working_directory = Some(working_directory);
        }
        self
    }
}

/// A partial [`AgentConfig`]; unset fields leave the base untouched
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    /// Model identifier
    pub model: Option<String>,
    /// Output token limit
    pub max_tokens: Option<u32>,
    /// Sandbox mode
    pub sandbox_mode: Option<SandboxMode>,
    /// Extra writable directories
    pub writable_roots: Option<Vec<String>>,
    /// Network access flag
    pub network_access: Option<bool>,
    /// Approval policy
    pub approval_policy: Option<ApprovalPolicy>,
    /// Web search flag
    pub web_search: Option<bool>,
    /// Web search source
    pub web_search_mode: Option<WebSearchMode>,
    /// Reasoning effort
    pub reasoning_effort: Option<ReasoningEffort>,
    /// Working directory
    pub working_directory: Option<String>,
}

impl ConfigOverrides {
    /// Read overrides from `BRIDGE_*` environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read overrides through an arbitrary key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(Self {
            model: get("BRIDGE_MODEL"),
            max_tokens: get("BRIDGE_MAX_TOKENS")
                .map(|v| {
                    v.trim().parse().map_err(|_| {
                        ConfigError::ValidationError(format!("BRIDGE_MAX_TOKENS: '{v}' is not a number"))
                    })
                })
                .transpose()?,
            sandbox_mode: get("BRIDGE_SANDBOX_MODE")
                .map(|v| parse_field("BRIDGE_SANDBOX_MODE", &v, SandboxMode::parse))
                .transpose()?,
            writable_roots: get("BRIDGE_WRITABLE_ROOTS").map(|v| {
                v.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            }),
            network_access: get("BRIDGE_NETWORK_ACCESS").map(|v| parse_flag(&v)),
            approval_policy: get("BRIDGE_APPROVAL_POLICY")
                .map(|v| parse_field("BRIDGE_APPROVAL_POLICY", &v, ApprovalPolicy::parse))
                .transpose()?,
            web_search: get("BRIDGE_WEB_SEARCH").map(|v| parse_flag(&v)),
            web_search_mode: get("BRIDGE_WEB_SEARCH_MODE")
                .map(|v| parse_field("BRIDGE_WEB_SEARCH_MODE", &v, WebSearchMode::parse))
                .transpose()?,
            reasoning_effort: get("BRIDGE_REASONING_EFFORT")
                .map(|v| parse_field("BRIDGE_REASONING_EFFORT", &v, ReasoningEffort::parse))
                .transpose()?,
            working_directory: get("BRIDGE_WORKING_DIRECTORY"),
        })
    }

    /// Whether no field is set
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

fn parse_field<T>(name: &str, value: &str, parse: fn(&str) -> Option<T>) -> Result<T, ConfigError> {
    parse(value).ok_or_else(|| ConfigError::ValidationError(format!("{name}: unknown value '{value}'")))
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

/// Applies override layers in increasing priority, remembering where the
/// working directory came from
#[derive(Clone, Debug)]
pub struct ConfigLayers {
    config: AgentConfig,
    working_directory_source: ConfigSource,
}

impl Default for ConfigLayers {
    fn default() -> Self {
        Self::new(AgentConfig::default())
    }
}

impl ConfigLayers {
    /// Start from a base configuration
    #[must_use]
    pub fn new(base: AgentConfig) -> Self {
        Self {
            config: base,
            working_directory_source: ConfigSource::Default,
        }
    }

    /// Apply a higher-priority layer
    #[must_use]
    pub fn layer(mut self, overrides: ConfigOverrides, source: ConfigSource) -> Self {
        if overrides.working_directory.is_some() {
            self.working_directory_source = source;
        }
        self.config = self.config.merged(overrides);
        self
    }

    /// Where the working directory came from
    #[must_use]
    pub fn working_directory_source(&self) -> ConfigSource {
        self.working_directory_source
    }

    /// The merged configuration
    #[must_use]
    pub fn finish(self) -> AgentConfig {
        self.config
    }
}

// =============================================================================
// Per-Context Resolution
// =============================================================================

/// Callback returning per-context overrides
pub type OverrideFn = Arc<dyn Fn(&ContextId) -> Option<ConfigOverrides> + Send + Sync>;

/// Resolves the configuration for a context
///
/// Pure: holds an immutable defaults record and an optional override
/// callback, and keeps no state between calls.
#[derive(Clone)]
pub struct ConfigResolver {
    defaults: Arc<AgentConfig>,
    overrides: Option<OverrideFn>,
}

impl fmt::Debug for ConfigResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigResolver")
            .field("defaults", &self.defaults)
            .field("has_overrides", &self.overrides.is_some())
            .finish()
    }
}

impl ConfigResolver {
    /// Create a resolver with no per-context overrides
    #[must_use]
    pub fn new(defaults: AgentConfig) -> Self {
        Self {
            defaults: Arc::new(defaults),
            overrides: None,
        }
    }

    /// Install a per-context override callback
    #[must_use]
    pub fn with_overrides(
        mut self,
        overrides: impl Fn(&ContextId) -> Option<ConfigOverrides> + Send + Sync + 'static,
    ) -> Self {
        self.overrides = Some(Arc::new(overrides));
        self
    }

    /// The defaults record
    #[must_use]
    pub fn defaults(&self) -> &AgentConfig {
        &self.defaults
    }

    /// Configuration for a context: defaults shallow-merged with its overrides
    #[must_use]
    pub fn resolve(&self, context_id: &ContextId) -> AgentConfig {
        let base = (*self.defaults).clone();
        match self.overrides.as_ref().and_then(|f| f(context_id)) {
            Some(overrides) => base.merged(overrides),
            None => base,
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Agent section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentToml {
    /// Model identifier
    pub model: Option<String>,
    /// Output token limit
    pub max_tokens: Option<u32>,
    /// Sandbox mode
    pub sandbox_mode: Option<String>,
    /// Extra writable directories
    pub writable_roots: Option<Vec<String>>,
    /// Network access flag
    pub network_access: Option<bool>,
    /// Approval policy
    pub approval_policy: Option<String>,
    /// Web search flag
    pub web_search: Option<bool>,
    /// Web search source (`live` or `cached`)
    pub web_search_mode: Option<String>,
    /// Reasoning effort
    pub reasoning_effort: Option<String>,
    /// Working directory
    pub working_directory: Option<String>,
}

impl AgentToml {
    /// Validate and convert into an override layer
    pub fn to_overrides(&self) -> Result<ConfigOverrides, ConfigError> {
        Ok(ConfigOverrides {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            sandbox_mode: self
                .sandbox_mode
                .as_deref()
                .map(|v| parse_field("agent.sandbox_mode", v, SandboxMode::parse))
                .transpose()?,
            writable_roots: self.writable_roots.clone(),
            network_access: self.network_access,
            approval_policy: self
                .approval_policy
                .as_deref()
                .map(|v| parse_field("agent.approval_policy", v, ApprovalPolicy::parse))
                .transpose()?,
            web_search: self.web_search,
            web_search_mode: self
                .web_search_mode
                .as_deref()
                .map(|v| parse_field("agent.web_search_mode", v, WebSearchMode::parse))
                .transpose()?,
            reasoning_effort: self
                .reasoning_effort
                .as_deref()
                .map(|v| parse_field("agent.reasoning_effort", v, ReasoningEffort::parse))
                .transpose()?,
            working_directory: self.working_directory.clone(),
        })
    }
}

/// Exec backend section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecToml {
    /// Runtime CLI binary (name on `PATH` or absolute path)
    pub binary: Option<String>,
    /// Extra arguments appended after the generated ones
    pub extra_args: Vec<String>,
}

/// Complete TOML configuration file structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeToml {
    /// Agent settings
    pub agent: AgentToml,
    /// Exec backend settings
    pub exec: ExecToml,
}

/// Default configuration file path
///
/// `$XDG_CONFIG_HOME/agent-bridge/bridge.toml`, or `None` when no config
/// directory can be determined.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("agent-bridge").join("bridge.toml"))
}

/// Load configuration from a specific path
pub fn load_config_from_path(path: &Path) -> Result<BridgeToml, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadError {
        path: path.to_path_buf(),
        source,
    })?;
    let config: BridgeToml = toml::from_str(&content)?;

    // Unknown enum values are rejected at load time
    config.agent.to_overrides()?;

    tracing::debug!(path = %path.display(), "Loaded configuration file");
    Ok(config)
}

/// Load configuration from the default path
///
/// A missing file is not an error and yields the defaults.
pub fn load_config() -> Result<BridgeToml, ConfigError> {
    match default_config_path() {
        Some(path) if path.exists() => load_config_from_path(&path),
        _ => Ok(BridgeToml::default()),
    }
}
