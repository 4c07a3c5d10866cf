//! Capability registry
//!
//! Read-only after construction and shared across every thread without locking.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::checkpoint::{create_checkpointer, Checkpointer};
use crate::config::RawConfig;
use crate::error::ConfigurationError;
use crate::llm::{Embedder, LLMProvider};

use super::providers::{ProviderSet, ToolDependencies};
use super::{CapabilityKind, CapabilityRef, DynTool};

/// A tool handle plus its per-call timeout override.
#[derive(Clone)]
pub struct RegisteredTool {
    pub tool: Arc<DynTool>,
    pub timeout: Option<Duration>,
}

/// Mapping from declared name to live handle, per kind.
#[derive(Clone, Default)]
pub struct CapabilityRegistry {
    llms: BTreeMap<String, Arc<dyn LLMProvider>>,
    embedders: BTreeMap<String, Arc<dyn Embedder>>,
    tools: BTreeMap<String, RegisteredTool>,
    checkpointers: BTreeMap<String, Arc<dyn Checkpointer>>,
}

impl std::fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("llms", &self.llms.keys().collect::<Vec<_>>())
            .field("embedders", &self.embedders.keys().collect::<Vec<_>>())
            .field("tools", &self.tools.keys().collect::<Vec<_>>())
            .field("checkpointers", &self.checkpointers.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl CapabilityRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Builds every capability declared in `config` through `providers`.
    ///
    /// All declaration-level references (the agent's and each tool's `llm` /
    /// `embedding_model`) are checked before any handle is constructed, so a
    /// single error reports every missing name.
    pub fn from_config(
        config: &RawConfig,
        providers: &ProviderSet,
    ) -> Result<Self, ConfigurationError> {
        let missing = config.unresolved_references();
        if !missing.is_empty() {
            return Err(ConfigurationError::UnresolvedReference {
                references: missing,
            });
        }

        let mut builder = Self::builder();

        for decl in &config.llms {
            let llm = providers.build_llm(decl)?;
            builder = builder.try_llm(&decl.name, llm)?;
        }
        for decl in &config.embeddings {
            let embedder = providers.build_embedder(decl)?;
            builder = builder.try_embedder(&decl.name, embedder)?;
        }
        for decl in &config.tools {
            let deps = ToolDependencies {
                llm: decl.llm.as_ref().and_then(|n| builder.registry.llms.get(n).cloned()),
                embedder: decl
                    .embedding_model
                    .as_ref()
                    .and_then(|n| builder.registry.embedders.get(n).cloned()),
            };
            let tool = providers.build_tool(decl, &deps)?;
            builder = builder.try_tool(&decl.name, tool, decl.timeout)?;
        }
        if let Some(ckpt) = &config.checkpointer {
            let store = create_checkpointer(ckpt).map_err(|e| {
                ConfigurationError::CapabilityConstruction {
                    name: ckpt.name.clone(),
                    kind: CapabilityKind::Checkpointer,
                    reason: e.to_string(),
                }
            })?;
            builder = builder.try_checkpointer(&ckpt.name, store)?;
        }

        let registry = builder.build();
        tracing::info!(
            llms = registry.llms.len(),
            embedders = registry.embedders.len(),
            tools = registry.tools.len(),
            checkpointers = registry.checkpointers.len(),
            "Capability registry built"
        );
        Ok(registry)
    }

    pub fn llm(&self, name: &str) -> Option<Arc<dyn LLMProvider>> {
        self.llms.get(name).cloned()
    }

    pub fn embedder(&self, name: &str) -> Option<Arc<dyn Embedder>> {
        self.embedders.get(name).cloned()
    }

    pub fn tool(&self, name: &str) -> Option<RegisteredTool> {
        self.tools.get(name).cloned()
    }

    pub fn checkpointer(&self, name: &str) -> Option<Arc<dyn Checkpointer>> {
        self.checkpointers.get(name).cloned()
    }

    pub fn contains(&self, reference: &CapabilityRef) -> bool {
        let name = reference.name.as_str();
        match reference.kind {
            CapabilityKind::Llm => self.llms.contains_key(name),
            CapabilityKind::Embedder => self.embedders.contains_key(name),
            CapabilityKind::Tool => self.tools.contains_key(name),
            CapabilityKind::Checkpointer => self.checkpointers.contains_key(name),
        }
    }

    pub fn names(&self, kind: CapabilityKind) -> Vec<String> {
        match kind {
            CapabilityKind::Llm => self.llms.keys().cloned().collect(),
            CapabilityKind::Embedder => self.embedders.keys().cloned().collect(),
            CapabilityKind::Tool => self.tools.keys().cloned().collect(),
            CapabilityKind::Checkpointer => self.checkpointers.keys().cloned().collect(),
        }
    }
}

/// Programmatic construction, mostly used by embedders of the crate and tests.
#[derive(Default)]
pub struct RegistryBuilder {
    registry: CapabilityRegistry,
}

impl RegistryBuilder {
    /// Registers an LLM, replacing any previous handle with the same name.
    pub fn llm(mut self, name: impl Into<String>, llm: Arc<dyn LLMProvider>) -> Self {
        self.registry.llms.insert(name.into(), llm);
        self
    }

    pub fn embedder(mut self, name: impl Into<String>, embedder: Arc<dyn Embedder>) -> Self {
        self.registry.embedders.insert(name.into(), embedder);
        self
    }

    pub fn tool(mut self, name: impl Into<String>, tool: Arc<DynTool>) -> Self {
        self.registry.tools.insert(
            name.into(),
            RegisteredTool {
                tool,
                timeout: None,
            },
        );
        self
    }

    pub fn tool_with_timeout(
        mut self,
        name: impl Into<String>,
        tool: Arc<DynTool>,
        timeout: Duration,
    ) -> Self {
        self.registry.tools.insert(
            name.into(),
            RegisteredTool {
                tool,
                timeout: Some(timeout),
            },
        );
        self
    }

    pub fn checkpointer(mut self, name: impl Into<String>, store: Arc<dyn Checkpointer>) -> Self {
        self.registry.checkpointers.insert(name.into(), store);
        self
    }

    fn try_llm(self, name: &str, llm: Arc<dyn LLMProvider>) -> Result<Self, ConfigurationError> {
        if self.registry.llms.contains_key(name) {
            return Err(duplicate(name, CapabilityKind::Llm));
        }
        Ok(self.llm(name, llm))
    }

    fn try_embedder(
        self,
        name: &str,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self, ConfigurationError> {
        if self.registry.embedders.contains_key(name) {
            return Err(duplicate(name, CapabilityKind::Embedder));
        }
        Ok(self.embedder(name, embedder))
    }

    fn try_tool(
        mut self,
        name: &str,
        tool: Arc<DynTool>,
        timeout: Option<Duration>,
    ) -> Result<Self, ConfigurationError> {
        if self.registry.tools.contains_key(name) {
            return Err(duplicate(name, CapabilityKind::Tool));
        }
        self.registry
            .tools
            .insert(name.to_string(), RegisteredTool { tool, timeout });
        Ok(self)
    }

    fn try_checkpointer(
        self,
        name: &str,
        store: Arc<dyn Checkpointer>,
    ) -> Result<Self, ConfigurationError> {
        if self.registry.checkpointers.contains_key(name) {
            return Err(duplicate(name, CapabilityKind::Checkpointer));
        }
        Ok(self.checkpointer(name, store))
    }

    pub fn build(self) -> CapabilityRegistry {
        self.registry
    }
}

fn duplicate(name: &str, kind: CapabilityKind) -> ConfigurationError {
    ConfigurationError::DuplicateCapability {
        name: name.to_string(),
        kind,
    }
}
