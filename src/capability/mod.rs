//! Capabilities: named external resources an agent is wired to
//!
//! - [`CapabilityRef`]: a typed name used in specs
//! - [`Tool`]: the calling contract every tool implements
//! - [`CapabilityRegistry`]: name → live handle, built once at startup
//! - [`ProviderSet`]: factories that turn config declarations into handles

pub mod providers;
pub mod registry;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use providers::{EmbedderFactory, LlmFactory, ProviderSet, ToolDependencies, ToolFactory};
pub use registry::{CapabilityRegistry, RegisteredTool, RegistryBuilder};

/// Kind of a capability. Names are unique within a kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityKind {
    Llm,
    Embedder,
    Tool,
    Checkpointer,
}

impl fmt::Display for CapabilityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CapabilityKind::Llm => "llm",
            CapabilityKind::Embedder => "embedder",
            CapabilityKind::Tool => "tool",
            CapabilityKind::Checkpointer => "checkpointer",
        };
        f.write_str(label)
    }
}

/// Reference to a declared capability.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CapabilityRef {
    pub name: String,
    pub kind: CapabilityKind,
}

impl CapabilityRef {
    pub fn new(name: impl Into<String>, kind: CapabilityKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

impl fmt::Display for CapabilityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.name)
    }
}

/// Schema offered to a model for one tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Error type tool implementations may return; the dispatcher normalizes it.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A callable tool: one input, one output.
#[async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDefinition;

    async fn call(&self, input: serde_json::Value) -> Result<String, BoxError>;
}

pub type DynTool = dyn Tool;
