//! Declarative Agent Builder
//!
//! Turns a YAML agent configuration into a runnable, checkpointed agent.
//! Key concepts:
//!
//! - **Capability**: named LLM, embedder, tool or checkpointer, built once at startup
//! - **Agent spec**: the resolved, validated form of the `agent` section
//! - **Graph**: nodes and predicate edges compiled from the agent type
//! - **Thread**: a conversation whose state is persisted after every turn
//!
//! # Architecture
//!
//! ```text
//! YAML ──► RawConfig ──► CapabilityRegistry ──► AgentSpec ──► CompiledGraph
//!                                                                  │
//!                          ┌───────────────────────────────────────┘
//!                          ▼
//!   run_turn(thread, msg) ─► ThreadEngine ─► lock ─► load ─► interpret ─► commit
//!                                                  ▲                        │
//!                                                  └──── Checkpointer ◄─────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use agent_builder::{ProviderSet, RawConfig, ThreadEngine};
//!
//! # async fn example(providers: ProviderSet) -> anyhow::Result<()> {
//! let config = RawConfig::load("agent.yaml")?;
//! let engine = ThreadEngine::from_config(&config, &providers)?;
//!
//! let outcome = engine.run_turn("user-42", "What is 2+2?").await?;
//! println!("{}", outcome.response);
//! # Ok(())
//! # }
//! ```

pub mod capability;
pub mod checkpoint;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod graph;
pub mod llm;
pub mod memory;
pub mod prompts;
pub mod resolver;
pub mod state;
pub mod testing;

// Re-exports
pub use capability::{
    CapabilityKind, CapabilityRef, CapabilityRegistry, ProviderSet, Tool, ToolDefinition,
};
pub use checkpoint::{create_checkpointer, Checkpoint, Checkpointer, CheckpointerConfig};
pub use config::{BusyPolicy, EngineConfig, RawConfig};
pub use dispatch::ToolDispatcher;
pub use engine::{AgentRuntime, ThreadEngine, TurnOutcome};
pub use error::{
    AgentBuilderError, ConfigurationError, EngineError, ProviderError, Result, StorageError,
    ToolError,
};
pub use graph::{compile, CompiledGraph};
pub use llm::{Completion, CompletionRequest, Embedder, LLMProvider, ToolCallRequest};
pub use memory::{create_recall_store, RecallMemory, RecallStore};
pub use resolver::{resolve, AgentSpec, AgentType};
pub use state::{Message, Role, ThreadState};
