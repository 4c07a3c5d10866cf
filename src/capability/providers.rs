//! Provider factories
//!
//! Concrete clients are linked in by the embedding application: it registers a
//! factory per `provider` (LLMs, embedders) or `tool_type` (tools). Factories
//! must be cheap and must not open connections; connectivity is checked on
//! first use.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{EmbeddingDeclaration, LlmDeclaration, ToolDeclaration};
use crate::error::{ConfigurationError, ProviderError};
use crate::llm::{Completion, CompletionRequest, Embedder, LLMProvider};

use super::{BoxError, CapabilityKind, DynTool, Tool, ToolDefinition};

pub type LlmFactory =
    Arc<dyn Fn(&LlmDeclaration) -> Result<Arc<dyn LLMProvider>, String> + Send + Sync>;
pub type EmbedderFactory =
    Arc<dyn Fn(&EmbeddingDeclaration) -> Result<Arc<dyn Embedder>, String> + Send + Sync>;
pub type ToolFactory =
    Arc<dyn Fn(&ToolDeclaration, &ToolDependencies) -> Result<Arc<DynTool>, String> + Send + Sync>;

/// Capabilities a tool declaration referenced by name, already resolved.
#[derive(Clone, Default)]
pub struct ToolDependencies {
    pub llm: Option<Arc<dyn LLMProvider>>,
    pub embedder: Option<Arc<dyn Embedder>>,
}

/// Named factories used to build a registry from declarations.
#[derive(Clone, Default)]
pub struct ProviderSet {
    llms: HashMap<String, LlmFactory>,
    embedders: HashMap<String, EmbedderFactory>,
    tools: HashMap<String, ToolFactory>,
    placeholders: bool,
}

impl ProviderSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// A set that accepts any provider name and installs deferred handles
    /// failing on first use. Lets a config be validated without any client linked.
    pub fn placeholders() -> Self {
        Self {
            placeholders: true,
            ..Self::default()
        }
    }

    pub fn with_llm_provider<F>(mut self, provider: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&LlmDeclaration) -> Result<Arc<dyn LLMProvider>, String> + Send + Sync + 'static,
    {
        self.llms.insert(provider.into().to_lowercase(), Arc::new(factory));
        self
    }

    pub fn with_embedding_provider<F>(mut self, provider: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&EmbeddingDeclaration) -> Result<Arc<dyn Embedder>, String> + Send + Sync + 'static,
    {
        self.embedders
            .insert(provider.into().to_lowercase(), Arc::new(factory));
        self
    }

    pub fn with_tool_type<F>(mut self, tool_type: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&ToolDeclaration, &ToolDependencies) -> Result<Arc<DynTool>, String>
            + Send
            + Sync
            + 'static,
    {
        self.tools.insert(tool_type.into().to_lowercase(), Arc::new(factory));
        self
    }

    pub(crate) fn build_llm(
        &self,
        decl: &LlmDeclaration,
    ) -> Result<Arc<dyn LLMProvider>, ConfigurationError> {
        match self.llms.get(&decl.provider.to_lowercase()) {
            Some(factory) => factory(decl).map_err(|reason| construction(&decl.name, CapabilityKind::Llm, reason)),
            None if self.placeholders => Ok(Arc::new(DeferredCapability::new(
                &decl.name,
                &decl.provider,
            ))),
            None => Err(ConfigurationError::UnknownProvider {
                kind: CapabilityKind::Llm,
                provider: decl.provider.clone(),
            }),
        }
    }

    pub(crate) fn build_embedder(
        &self,
        decl: &EmbeddingDeclaration,
    ) -> Result<Arc<dyn Embedder>, ConfigurationError> {
        match self.embedders.get(&decl.provider.to_lowercase()) {
            Some(factory) => factory(decl)
                .map_err(|reason| construction(&decl.name, CapabilityKind::Embedder, reason)),
            None if self.placeholders => Ok(Arc::new(DeferredCapability::new(
                &decl.name,
                &decl.provider,
            ))),
            None => Err(ConfigurationError::UnknownProvider {
                kind: CapabilityKind::Embedder,
                provider: decl.provider.clone(),
            }),
        }
    }

    pub(crate) fn build_tool(
        &self,
        decl: &ToolDeclaration,
        deps: &ToolDependencies,
    ) -> Result<Arc<DynTool>, ConfigurationError> {
        match self.tools.get(&decl.tool_type.to_lowercase()) {
            Some(factory) => factory(decl, deps)
                .map_err(|reason| construction(&decl.name, CapabilityKind::Tool, reason)),
            None if self.placeholders => {
                let mut deferred = DeferredCapability::new(&decl.name, &decl.tool_type);
                deferred.description = decl.description.clone();
                Ok(Arc::new(deferred))
            }
            None => Err(ConfigurationError::UnknownProvider {
                kind: CapabilityKind::Tool,
                provider: decl.tool_type.clone(),
            }),
        }
    }
}

fn construction(name: &str, kind: CapabilityKind, reason: String) -> ConfigurationError {
    ConfigurationError::CapabilityConstruction {
        name: name.to_string(),
        kind,
        reason,
    }
}

/// Stand-in for a capability whose client is not linked into this process.
struct DeferredCapability {
    name: String,
    provider: String,
    description: Option<String>,
}

impl DeferredCapability {
    fn new(name: &str, provider: &str) -> Self {
        Self {
            name: name.to_string(),
            provider: provider.to_string(),
            description: None,
        }
    }

    fn unavailable(&self) -> String {
        format!("no '{}' client is linked into this process", self.provider)
    }
}

#[async_trait]
impl LLMProvider for DeferredCapability {
    async fn complete(&self, _request: &CompletionRequest) -> Result<Completion, ProviderError> {
        Err(ProviderError::fatal(&self.name, self.unavailable()))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl Embedder for DeferredCapability {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, ProviderError> {
        Err(ProviderError::fatal(&self.name, self.unavailable()))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl Tool for DeferredCapability {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone().unwrap_or_default(),
            parameters: serde_json::json!({ "type": "object", "properties": {} }),
        }
    }

    async fn call(&self, _input: serde_json::Value) -> Result<String, BoxError> {
        Err(self.unavailable().into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn llm_decl(provider: &str) -> LlmDeclaration {
        serde_yaml::from_str(&format!("{{name: main, provider: {provider}, model_name: m}}")).unwrap()
    }

    #[tokio::test]
    async fn test_placeholder_handles_fail_on_first_use() {
        let providers = ProviderSet::placeholders();
        let llm = providers.build_llm(&llm_decl("openai")).unwrap();

        let err = llm.complete(&CompletionRequest::default()).await.unwrap_err();
        assert!(!err.retryable);
        assert!(err.message.contains("openai"));
    }

    #[test]
    fn test_provider_lookup_is_case_insensitive() {
        let providers = ProviderSet::new().with_llm_provider("OpenAI", |decl| {
            Ok(Arc::new(crate::testing::ScriptedLLM::new(&decl.name)) as Arc<dyn LLMProvider>)
        });
        assert!(providers.build_llm(&llm_decl("openai")).is_ok());
    }
}
