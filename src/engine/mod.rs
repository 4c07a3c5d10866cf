//! Thread Execution Engine
//!
//! Runs one turn at a time per thread:
//!
//! ```text
//! Idle -> Loaded -> Running -> Checkpointed -> Idle
//! ```
//!
//! The thread's lock is taken before the checkpoint is loaded and released
//! after the new checkpoint is written or the turn fails. A failed turn writes
//! nothing, so retrying it starts from the same pre-turn state.
//!
//! The turn deadline bounds loading and interpretation. A commit that has
//! started is never cancelled: its outcome is what the caller sees.

mod interpreter;
mod locks;
mod parse;
mod runtime;

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::capability::{CapabilityKind, CapabilityRegistry, ProviderSet};
use crate::checkpoint::{Checkpoint, Checkpointer, MemoryCheckpointer};
use crate::config::{EngineConfig, RawConfig};
use crate::error::{ConfigurationError, EngineError};
use crate::memory::{create_recall_store, RecallMemory};
use crate::resolver::resolve;
use crate::state::{Message, PendingMemory, ThreadState};

use interpreter::Interpreter;
pub use locks::{ThreadGuard, ThreadLocks};
pub use runtime::AgentRuntime;

/// Result of a committed turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub thread_id: String,
    pub response: String,
    pub checkpoint: Checkpoint,
}

pub struct ThreadEngine {
    runtime: Arc<AgentRuntime>,
    checkpointer: Arc<dyn Checkpointer>,
    config: EngineConfig,
    locks: ThreadLocks,
}

impl std::fmt::Debug for ThreadEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadEngine")
            .field("runtime", &self.runtime)
            .field("checkpointer", &self.checkpointer.backend())
            .field("config", &self.config)
            .finish()
    }
}

impl ThreadEngine {
    pub fn new(
        runtime: Arc<AgentRuntime>,
        checkpointer: Arc<dyn Checkpointer>,
        config: EngineConfig,
    ) -> Self {
        Self {
            runtime,
            checkpointer,
            config,
            locks: ThreadLocks::new(),
        }
    }

    /// Loads everything from one configuration: registry, spec, graph,
    /// checkpointer and engine limits.
    ///
    /// Without a declared checkpointer, threads and recall memories live in
    /// process memory. With one, recall memories are stored next to the
    /// checkpoints.
    pub fn from_config(
        config: &RawConfig,
        providers: &ProviderSet,
    ) -> Result<Self, ConfigurationError> {
        let registry = CapabilityRegistry::from_config(config, providers)?;
        let spec = resolve(config, &registry)?;
        let checkpointer = match &spec.checkpointer {
            Some(reference) => registry.checkpointer(&reference.name).ok_or_else(|| {
                ConfigurationError::UnresolvedReference {
                    references: vec![reference.clone()],
                }
            })?,
            None => {
                tracing::warn!("No checkpointer configured, thread state will not survive a restart");
                Arc::new(MemoryCheckpointer::new())
            }
        };
        let store_config = spec
            .checkpointer
            .as_ref()
            .and_then(|reference| config.checkpointer.as_ref().filter(|c| c.name == reference.name));
        let needs_recall = spec.memory_options.is_some();

        let mut runtime = AgentRuntime::new(spec, &registry, config.engine.default_tool_timeout)?;
        if let Some(store_config) = store_config.filter(|_| needs_recall) {
            let store = create_recall_store(store_config).map_err(|e| {
                ConfigurationError::CapabilityConstruction {
                    name: store_config.name.clone(),
                    kind: CapabilityKind::Checkpointer,
                    reason: e.to_string(),
                }
            })?;
            runtime = runtime.with_recall_memory(Arc::new(RecallMemory::with_store(store)));
        }
        Ok(Self::new(Arc::new(runtime), checkpointer, config.engine.clone()))
    }

    pub fn runtime(&self) -> &Arc<AgentRuntime> {
        &self.runtime
    }

    pub fn checkpointer(&self) -> &Arc<dyn Checkpointer> {
        &self.checkpointer
    }

    /// Runs one turn: `user_message` in, assistant response out.
    ///
    /// Turns on the same thread run one at a time. Whatever the failure, the
    /// thread's stored state is left as it was before the call.
    pub async fn run_turn(
        &self,
        thread_id: &str,
        user_message: &str,
    ) -> Result<TurnOutcome, EngineError> {
        validate_thread_id(thread_id)?;
        let guard = self
            .locks
            .acquire(thread_id, self.config.busy_policy, self.config.lock_wait_timeout)
            .await;
        let guard = match guard {
            Ok(guard) => guard,
            Err(err) => {
                tracing::warn!(thread_id = %thread_id, error = %err, "Turn rejected");
                return Err(err);
            }
        };

        let deadline = self.config.turn_timeout;
        let prepared = tokio::time::timeout(deadline, self.prepare(thread_id, user_message))
            .await
            .unwrap_or_else(|_| {
                Err(EngineError::TurnTimeout {
                    thread_id: thread_id.to_string(),
                    timeout: deadline,
                })
            });
        let result = match prepared {
            Ok((checkpoint, response)) => self.commit(thread_id, checkpoint, response).await,
            Err(err) => Err(err),
        };
        drop(guard);
        self.locks.prune();

        match result {
            Ok(outcome) => {
                self.flush_memories(&outcome.checkpoint.state.scratch.pending_memories)
                    .await;
                Ok(outcome)
            }
            Err(err) => {
                tracing::warn!(thread_id = %thread_id, error = %err, "Turn failed, no checkpoint written");
                Err(err)
            }
        }
    }

    /// Loads the thread and interprets the graph. Returns the checkpoint to
    /// commit and the response.
    async fn prepare(
        &self,
        thread_id: &str,
        user_message: &str,
    ) -> Result<(Checkpoint, String), EngineError> {
        let graph = &self.runtime.graph;
        let previous = self.checkpointer.get(thread_id).await?;
        let sequence = previous.as_ref().map_or(0, |c| c.sequence) + 1;
        let mut state = previous
            .map(|c| c.state)
            .unwrap_or_else(|| ThreadState::new(thread_id, &graph.entry));
        tracing::info!(
            thread_id = %thread_id,
            history = state.messages.len(),
            sequence = sequence - 1,
            "Thread loaded"
        );

        state.begin_turn(&graph.entry, user_message);
        let response = Interpreter::new(&self.runtime, thread_id)
            .run(&mut state)
            .await?;

        state.messages.push(Message::assistant(response.clone()));
        state.node_cursor = graph.entry.clone();
        Ok((Checkpoint::new(sequence, state), response))
    }

    async fn commit(
        &self,
        thread_id: &str,
        checkpoint: Checkpoint,
        response: String,
    ) -> Result<TurnOutcome, EngineError> {
        self.checkpointer.put(thread_id, &checkpoint).await?;

        tracing::info!(
            thread_id = %thread_id,
            sequence = checkpoint.sequence,
            iterations = checkpoint.state.iteration_count,
            tool_calls = checkpoint.state.scratch.tool_calls.len(),
            "Turn checkpointed"
        );
        for record in &checkpoint.state.scratch.tool_calls {
            tracing::info!(
                thread_id = %thread_id,
                tool = %record.tool_name,
                success = record.is_success(),
                duration_ms = record.duration.as_millis() as u64,
                "Tool call record"
            );
        }

        Ok(TurnOutcome {
            thread_id: thread_id.to_string(),
            response,
            checkpoint,
        })
    }

    /// Writes memories staged by a committed turn into recall memory. The
    /// turn is already committed, so a store failure is logged, not returned.
    async fn flush_memories(&self, pending: &[PendingMemory]) {
        let (Some(recall), Some(options)) =
            (&self.runtime.recall, &self.runtime.spec.memory_options)
        else {
            return;
        };
        for memory in pending {
            if let Err(err) = recall
                .insert(&options.namespace, memory.text.clone(), memory.embedding.clone())
                .await
            {
                tracing::warn!(
                    namespace = %options.namespace,
                    error = %err,
                    "Recall memory not stored"
                );
            }
        }
    }

    /// Deletes one thread's checkpoint, or every thread's when `thread_id`
    /// is `None`. Returns the ids that were removed.
    ///
    /// Each deletion takes the thread's lock, so a reset never interleaves
    /// with a running turn.
    pub async fn reset_thread(&self, thread_id: Option<&str>) -> Result<Vec<String>, EngineError> {
        let targets: Vec<String> = match thread_id {
            Some(id) => {
                validate_thread_id(id)?;
                vec![id.to_string()]
            }
            None => self.checkpointer.list_thread_ids().await?.into_iter().collect(),
        };

        let mut removed = Vec::new();
        for id in targets {
            let guard = self
                .locks
                .acquire(&id, self.config.busy_policy, self.config.lock_wait_timeout)
                .await?;
            let existed = self.checkpointer.delete(&id).await;
            drop(guard);
            if existed? {
                removed.push(id);
            }
        }
        self.locks.prune();
        tracing::info!(removed = removed.len(), all = thread_id.is_none(), "Threads reset");
        Ok(removed)
    }

    pub async fn list_threads(&self) -> Result<BTreeSet<String>, EngineError> {
        Ok(self.checkpointer.list_thread_ids().await?)
    }

    /// Latest committed checkpoint of a thread.
    pub async fn thread_checkpoint(&self, thread_id: &str) -> Result<Option<Checkpoint>, EngineError> {
        validate_thread_id(thread_id)?;
        Ok(self.checkpointer.get(thread_id).await?)
    }
}

fn validate_thread_id(thread_id: &str) -> Result<(), EngineError> {
    if thread_id.trim().is_empty() {
        Err(EngineError::InvalidThreadId)
    } else {
        Ok(())
    }
}
