//! Model capabilities
//!
//! Concrete provider clients live outside this crate. The engine only sees an
//! [`LLMProvider`] that completes a prompt (optionally offering a tool schema)
//! and an [`Embedder`] that turns text into a vector.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::capability::ToolDefinition;
use crate::error::ProviderError;
use crate::state::Message;

/// Tool call requested by a model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub name: String,
    #[serde(default)]
    pub input: serde_json::Value,
}

impl ToolCallRequest {
    pub fn new(name: impl Into<String>, input: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            input,
        }
    }
}

/// Prompt handed to a provider.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub messages: Vec<Message>,
    /// Tool schema offered to the model. Empty means tool calling is off.
    pub tools: Vec<ToolDefinition>,
}

impl CompletionRequest {
    pub fn new(system: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            system: system.into(),
            messages,
            tools: Vec::new(),
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }
}

/// Provider output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Completion {
    pub content: String,
    pub tool_call: Option<ToolCallRequest>,
}

impl Completion {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            tool_call: None,
        }
    }

    pub fn tool_call(content: impl Into<String>, call: ToolCallRequest) -> Self {
        Self {
            content: content.into(),
            tool_call: Some(call),
        }
    }
}

/// Language model capability.
#[async_trait]
pub trait LLMProvider: Send + Sync {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion, ProviderError>;

    fn name(&self) -> &str;
}

/// Embedding capability.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError>;

    fn name(&self) -> &str;
}
