//! The explicit agent runtime value shared by every thread.

use std::sync::Arc;
use std::time::Duration;

use crate::capability::CapabilityRegistry;
use crate::dispatch::ToolDispatcher;
use crate::error::ConfigurationError;
use crate::graph::{compile, CompiledGraph};
use crate::llm::{Embedder, LLMProvider};
use crate::memory::RecallMemory;
use crate::resolver::AgentSpec;

/// Resolved spec, compiled graph and bound capability handles. Immutable
/// after construction; the engine shares it across threads through `Arc`.
pub struct AgentRuntime {
    pub(crate) spec: AgentSpec,
    pub(crate) graph: CompiledGraph,
    pub(crate) llm: Arc<dyn LLMProvider>,
    pub(crate) embedder: Option<Arc<dyn Embedder>>,
    pub(crate) dispatcher: ToolDispatcher,
    pub(crate) recall: Option<Arc<RecallMemory>>,
}

impl std::fmt::Debug for AgentRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRuntime")
            .field("agent", &self.spec.name)
            .field("agent_type", &self.spec.agent_type)
            .field("llm", &self.llm.name())
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}

impl AgentRuntime {
    /// Compiles `spec` and binds its references to handles in `registry`.
    pub fn new(
        spec: AgentSpec,
        registry: &CapabilityRegistry,
        default_tool_timeout: Duration,
    ) -> Result<Self, ConfigurationError> {
        let graph = compile(&spec)?;

        let llm = registry.llm(&spec.llm.name).ok_or_else(|| {
            ConfigurationError::UnresolvedReference {
                references: vec![spec.llm.clone()],
            }
        })?;
        let embedder = match &spec.memory {
            Some(reference) => Some(registry.embedder(&reference.name).ok_or_else(|| {
                ConfigurationError::UnresolvedReference {
                    references: vec![reference.clone()],
                }
            })?),
            None => None,
        };
        let dispatcher = ToolDispatcher::new(registry, &spec.tools, default_tool_timeout)?;
        // Process-local until a durable store is attached.
        let recall = spec
            .memory_options
            .as_ref()
            .map(|_| Arc::new(RecallMemory::new()));

        Ok(Self {
            spec,
            graph,
            llm,
            embedder,
            dispatcher,
            recall,
        })
    }

    /// Replaces the recall memory, e.g. with one backed by the checkpoint
    /// store. Ignored for agents without long-term memory.
    pub fn with_recall_memory(mut self, memory: Arc<RecallMemory>) -> Self {
        if self.spec.memory_options.is_some() {
            self.recall = Some(memory);
        }
        self
    }

    pub fn spec(&self) -> &AgentSpec {
        &self.spec
    }

    pub fn graph(&self) -> &CompiledGraph {
        &self.graph
    }

    pub fn recall_memory(&self) -> Option<&Arc<RecallMemory>> {
        self.recall.as_ref()
    }
}
