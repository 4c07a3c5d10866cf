//! Error taxonomy
//!
//! Each concern has its own `thiserror` enum:
//!
//! - [`ConfigurationError`]: fatal at startup, no agent is built
//! - [`ProviderError`] / [`ToolError`]: raised by external capabilities. Retryable
//!   failures become graph observations, the rest fail the turn
//! - [`StorageError`]: checkpoint and recall persistence. The turn fails without committing
//! - [`EngineError`]: turn-level failures reported to the caller
//!
//! [`AgentBuilderError`] aggregates all of them for callers that only want one type.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::capability::{CapabilityKind, CapabilityRef};

/// Startup failures. The process must not serve traffic with an unresolved spec.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("environment variable '{name}' is not set and has no default")]
    MissingEnvVar { name: String },

    #[error("unresolved reference(s): {}", format_refs(.references))]
    UnresolvedReference { references: Vec<CapabilityRef> },

    #[error("invalid agent spec: field '{field}': {reason}")]
    InvalidAgentSpec { field: String, reason: String },

    #[error("duplicate {kind} capability '{name}'")]
    DuplicateCapability { name: String, kind: CapabilityKind },

    #[error("no {kind} provider registered for '{provider}'")]
    UnknownProvider { kind: CapabilityKind, provider: String },

    #[error("failed to construct {kind} capability '{name}': {reason}")]
    CapabilityConstruction {
        name: String,
        kind: CapabilityKind,
        reason: String,
    },

    #[error("invalid agent graph: {0}")]
    InvalidGraph(String),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("failed to read '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ConfigurationError {
    pub fn invalid(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidAgentSpec {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

fn format_refs(refs: &[CapabilityRef]) -> String {
    refs.iter()
        .map(|r| format!("{} '{}'", r.kind, r.name))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Failure reported by an LLM or embedding provider.
#[derive(Debug, Clone, Error)]
#[error("provider '{provider}' failed: {message}")]
pub struct ProviderError {
    pub provider: String,
    pub message: String,
    pub retryable: bool,
}

impl ProviderError {
    pub fn retryable(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            message: message.into(),
            retryable: true,
        }
    }

    pub fn fatal(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            message: message.into(),
            retryable: false,
        }
    }
}

/// Normalized tool failure. Graph nodes only ever see this shape.
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("unknown tool '{tool_name}'")]
    UnknownTool { tool_name: String },

    #[error("tool '{tool_name}' timed out after {timeout:?}")]
    Timeout { tool_name: String, timeout: Duration },

    #[error("tool '{tool_name}' failed: {message}")]
    Failed { tool_name: String, message: String },
}

impl ToolError {
    pub fn tool_name(&self) -> &str {
        match self {
            ToolError::UnknownTool { tool_name }
            | ToolError::Timeout { tool_name, .. }
            | ToolError::Failed { tool_name, .. } => tool_name,
        }
    }

    pub fn message(&self) -> String {
        match self {
            ToolError::UnknownTool { .. } => "unknown tool".to_string(),
            ToolError::Timeout { .. } => "timeout".to_string(),
            ToolError::Failed { message, .. } => message.clone(),
        }
    }

    /// Unknown tools fail fast; everything else is fed back to the model.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ToolError::UnknownTool { .. })
    }

    /// Text fed back into the graph, e.g. `tool calculator failed: timeout`.
    pub fn to_observation(&self) -> String {
        format!("tool {} failed: {}", self.tool_name(), self.message())
    }
}

/// Checkpoint persistence failures.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("stale checkpoint for thread '{thread_id}': stored sequence {stored}, attempted {attempted}")]
    StaleCheckpoint {
        thread_id: String,
        stored: u64,
        attempted: u64,
    },

    #[error("{backend} checkpoint store unreachable: {message}")]
    Unreachable { backend: String, message: String },

    #[error("checkpoint codec error: {0}")]
    Codec(String),

    #[error("checkpoint I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("checkpoint for thread '{actual}' written under key '{expected}'")]
    ThreadMismatch { expected: String, actual: String },

    #[error("unsupported checkpointer connection string '{connection_str}'")]
    UnsupportedBackend { connection_str: String },

    #[error("invalid {backend} store configuration: {reason}")]
    InvalidConfiguration { backend: String, reason: String },
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Codec(err.to_string())
    }
}

/// Turn-level failures. Thread state is never advanced when one of these is returned.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("thread '{thread_id}' is busy with another turn")]
    ThreadBusy { thread_id: String },

    #[error("turn on thread '{thread_id}' exceeded its deadline of {timeout:?}")]
    TurnTimeout { thread_id: String, timeout: Duration },

    #[error("thread id must not be empty")]
    InvalidThreadId,

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("engine invariant violated: {0}")]
    Invariant(String),
}

/// Crate-wide error.
#[derive(Debug, Error)]
pub enum AgentBuilderError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type Result<T, E = AgentBuilderError> = std::result::Result<T, E>;
