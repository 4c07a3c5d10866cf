//! Graph interpreter: runs one turn of a compiled graph against a thread state.

use crate::error::{EngineError, ProviderError, StorageError};
use crate::graph::{NodeKind, NodeSpec, BEST_EFFORT};
use crate::llm::{Completion, CompletionRequest, Embedder, ToolCallRequest};
use crate::memory::{recall_query, RecallMemory};
use crate::prompts;
use crate::resolver::{AgentType, MemoryOptions};
use crate::state::{Evaluation, Message, PendingMemory, Scratch, StepResult, ThreadState, Warning};

use super::parse;
use super::runtime::AgentRuntime;

/// How a node failed.
enum NodeError {
    /// Recoverable: recorded as a failure and the node is re-entered.
    Retry(String),
    Fatal(EngineError),
}

impl From<ProviderError> for NodeError {
    fn from(err: ProviderError) -> Self {
        if err.retryable {
            NodeError::Retry(err.to_string())
        } else {
            NodeError::Fatal(err.into())
        }
    }
}

impl From<StorageError> for NodeError {
    fn from(err: StorageError) -> Self {
        NodeError::Fatal(err.into())
    }
}

impl From<EngineError> for NodeError {
    fn from(err: EngineError) -> Self {
        NodeError::Fatal(err)
    }
}

fn invariant(message: impl Into<String>) -> NodeError {
    NodeError::Fatal(EngineError::Invariant(message.into()))
}

pub(crate) struct Interpreter<'a> {
    runtime: &'a AgentRuntime,
    thread_id: &'a str,
}

impl<'a> Interpreter<'a> {
    pub(crate) fn new(runtime: &'a AgentRuntime, thread_id: &'a str) -> Self {
        Self { runtime, thread_id }
    }

    /// Runs from `state.node_cursor` until a terminal node produces the answer.
    ///
    /// The iteration budget is charged on every loop-head entry and every
    /// retry. When it is spent, the next charge diverts to `best_effort`.
    pub(crate) async fn run(&self, state: &mut ThreadState) -> Result<String, EngineError> {
        let max = self.runtime.spec.max_iterations;
        loop {
            let node = self.node(&state.node_cursor)?;
            if node.loop_head {
                if state.iteration_count >= max {
                    self.exhaust(state);
                    continue;
                }
                state.iteration_count += 1;
            }
            tracing::debug!(
                thread_id = %self.thread_id,
                node = %node.id,
                iteration = state.iteration_count,
                "Entering node"
            );

            match self.execute(node, state).await {
                Ok(Some(answer)) => return Ok(answer),
                Ok(None) => {}
                Err(NodeError::Retry(failure)) => {
                    tracing::warn!(
                        thread_id = %self.thread_id,
                        node = %node.id,
                        error = %failure,
                        "Retryable failure, re-entering node"
                    );
                    state.scratch.failures.push(failure);
                    if !node.loop_head {
                        if state.iteration_count >= max {
                            self.exhaust(state);
                        } else {
                            state.iteration_count += 1;
                        }
                    }
                    continue;
                }
                Err(NodeError::Fatal(err)) => return Err(err),
            }

            let next = self
                .runtime
                .graph
                .next(&node.id, &state.scratch)
                .ok_or_else(|| {
                    EngineError::Invariant(format!("no edge out of '{}' is satisfied", node.id))
                })?;
            state.node_cursor = next.to_string();
        }
    }

    fn node(&self, id: &str) -> Result<&'a NodeSpec, EngineError> {
        self.runtime
            .graph
            .node(id)
            .ok_or_else(|| EngineError::Invariant(format!("cursor at unknown node '{id}'")))
    }

    fn exhaust(&self, state: &mut ThreadState) {
        let max_iterations = self.runtime.spec.max_iterations;
        tracing::warn!(
            thread_id = %self.thread_id,
            node = %state.node_cursor,
            max_iterations,
            "Iteration limit reached, returning best-effort answer"
        );
        state
            .scratch
            .warnings
            .push(Warning::IterationLimitReached { max_iterations });
        state.node_cursor = BEST_EFFORT.to_string();
    }

    async fn execute(
        &self,
        node: &NodeSpec,
        state: &mut ThreadState,
    ) -> Result<Option<String>, NodeError> {
        match node.kind {
            NodeKind::Generate | NodeKind::Think => self.generate(node, state).await?,
            NodeKind::ToolExec => self.tool_exec(state).await?,
            NodeKind::ActOrAnswer => self.act_or_answer(state).await?,
            NodeKind::Observe => {
                let message = state
                    .scratch
                    .pending_observation
                    .take()
                    .ok_or_else(|| invariant("observe entered without an observation"))?;
                state.scratch.observations.push(message.content.clone());
                state.messages.push(message);
            }
            NodeKind::Reflect => self.reflect(node, state).await?,
            NodeKind::Revise => self.revise(node, state).await?,
            NodeKind::Plan => self.plan(node, state).await?,
            NodeKind::ExecuteStep => self.execute_step(node, state).await?,
            NodeKind::Evaluate => self.evaluate(node, state).await?,
            NodeKind::Replan => self.replan(node, state).await?,
            NodeKind::Retrieve => self.retrieve(state).await?,
            NodeKind::Store => self.store(state).await?,
            NodeKind::Finalize => {
                let scratch = &mut state.scratch;
                let answer = scratch
                    .final_answer
                    .clone()
                    .or_else(|| scratch.draft.clone())
                    .filter(|a| !a.trim().is_empty())
                    .unwrap_or_else(|| prompts::BEST_EFFORT_NOTICE.to_string());
                scratch.final_answer = Some(answer.clone());
                return Ok(Some(answer));
            }
            NodeKind::BestEffort => {
                let scratch = &mut state.scratch;
                let answer = scratch
                    .draft
                    .clone()
                    .or_else(|| scratch.observations.last().cloned())
                    .unwrap_or_else(|| prompts::BEST_EFFORT_NOTICE.to_string());
                scratch.final_answer = Some(answer.clone());
                return Ok(Some(answer));
            }
        }
        Ok(None)
    }

    async fn complete(&self, request: CompletionRequest) -> Result<Completion, NodeError> {
        Ok(self.runtime.llm.complete(&request).await?)
    }

    fn system(node: &NodeSpec) -> String {
        node.prompt.clone().unwrap_or_default()
    }

    /// Splits model output into a tool request or text. A request without a
    /// tool name is treated as text and recorded as a warning.
    fn accept(&self, node: &NodeSpec, completion: Completion, scratch: &mut Scratch) -> Option<String> {
        scratch.pending_tool = None;
        match completion.tool_call {
            Some(call) if !call.name.trim().is_empty() => {
                scratch.pending_tool = Some(call);
                None
            }
            Some(call) => {
                let detail = format!("tool request without a tool name (input: {})", call.input);
                tracing::warn!(
                    thread_id = %self.thread_id,
                    node = %node.id,
                    detail = %detail,
                    "Malformed tool request, treating output as final"
                );
                scratch.warnings.push(Warning::MalformedToolRequest {
                    node: node.id.clone(),
                    detail,
                });
                Some(completion.content)
            }
            None => Some(completion.content),
        }
    }

    /// Retryable tool failures come back as an observation message.
    async fn dispatch(
        &self,
        call: ToolCallRequest,
        scratch: &mut Scratch,
    ) -> Result<Message, NodeError> {
        let name = call.name;
        match self
            .runtime
            .dispatcher
            .invoke(&name, call.input, None, scratch)
            .await
        {
            Ok(output) => Ok(Message::tool(name, output)),
            Err(err) if err.is_retryable() => {
                let observation = err.to_observation();
                Ok(Message::tool(name, observation))
            }
            Err(err) => Err(NodeError::Fatal(err.into())),
        }
    }

    async fn generate(&self, node: &NodeSpec, state: &mut ThreadState) -> Result<(), NodeError> {
        let mut system = Self::system(node);
        if !state.scratch.recalled.is_empty() {
            system.push_str("\n\n");
            system.push_str(&prompts::recall_block(&state.scratch.recalled));
        }
        let request = CompletionRequest::new(system, state.messages.clone())
            .with_tools(self.runtime.dispatcher.definitions(&node.tools));
        let completion = self.complete(request).await?;
        if let Some(text) = self.accept(node, completion, &mut state.scratch) {
            state.scratch.draft = Some(text);
        }
        Ok(())
    }

    async fn tool_exec(&self, state: &mut ThreadState) -> Result<(), NodeError> {
        let call = state
            .scratch
            .pending_tool
            .take()
            .ok_or_else(|| invariant("tool_exec entered without a pending tool request"))?;
        let message = self.dispatch(call, &mut state.scratch).await?;
        state.scratch.observations.push(message.content.clone());
        if self.runtime.graph.agent_type == AgentType::PlanExecuteReplan {
            state.scratch.step_transcript.push(message.clone());
        }
        state.messages.push(message);
        Ok(())
    }

    async fn act_or_answer(&self, state: &mut ThreadState) -> Result<(), NodeError> {
        match state.scratch.pending_tool.take() {
            Some(call) => {
                let message = self.dispatch(call, &mut state.scratch).await?;
                state.scratch.pending_observation = Some(message);
            }
            None => {
                let text = state.scratch.draft.clone().unwrap_or_default();
                let answer = parse::final_answer(&text).unwrap_or_else(|| text.trim().to_string());
                state.scratch.final_answer = Some(answer);
            }
        }
        Ok(())
    }

    async fn reflect(&self, node: &NodeSpec, state: &mut ThreadState) -> Result<(), NodeError> {
        let mut messages = state.messages.clone();
        messages.push(Message::assistant(
            state.scratch.draft.clone().unwrap_or_default(),
        ));
        let completion = self
            .complete(CompletionRequest::new(Self::system(node), messages))
            .await?;

        let critique = completion.content.trim().to_string();
        let round = state.scratch.reflections.len() + 1;
        state.scratch.reflection_satisfied =
            self.runtime.spec.reflection.converged(round, &critique);
        tracing::debug!(
            thread_id = %self.thread_id,
            round,
            satisfied = state.scratch.reflection_satisfied,
            "Reflection recorded"
        );
        state.scratch.reflections.push(critique);
        Ok(())
    }

    async fn revise(&self, node: &NodeSpec, state: &mut ThreadState) -> Result<(), NodeError> {
        let critique = state
            .scratch
            .reflections
            .last()
            .cloned()
            .ok_or_else(|| invariant("revise entered without a critique"))?;
        let mut messages = state.messages.clone();
        messages.push(Message::assistant(
            state.scratch.draft.clone().unwrap_or_default(),
        ));
        messages.push(Message::user(format!("Critique:\n{critique}")));

        let completion = self
            .complete(CompletionRequest::new(Self::system(node), messages))
            .await?;
        state.scratch.draft = Some(completion.content);
        Ok(())
    }

    async fn plan(&self, node: &NodeSpec, state: &mut ThreadState) -> Result<(), NodeError> {
        let completion = self
            .complete(CompletionRequest::new(
                Self::system(node),
                state.messages.clone(),
            ))
            .await?;
        state.scratch.plan = parse::plan(&completion.content);
        if state.scratch.plan.is_empty() {
            // The planner answered directly.
            state.scratch.draft = Some(completion.content.trim().to_string());
        }
        tracing::debug!(
            thread_id = %self.thread_id,
            steps = state.scratch.plan.len(),
            "Plan created"
        );
        Ok(())
    }

    async fn execute_step(&self, node: &NodeSpec, state: &mut ThreadState) -> Result<(), NodeError> {
        let task = state
            .scratch
            .plan
            .first()
            .cloned()
            .ok_or_else(|| invariant("execute_step entered with an empty plan"))?;
        let mut messages = vec![Message::user(prompts::execute_step(
            &state.scratch.plan,
            &task,
        ))];
        messages.extend(state.scratch.step_transcript.iter().cloned());

        let request = CompletionRequest::new(Self::system(node), messages)
            .with_tools(self.runtime.dispatcher.definitions(&node.tools));
        let completion = self.complete(request).await?;

        if let Some(result) = self.accept(node, completion, &mut state.scratch) {
            let scratch = &mut state.scratch;
            scratch.plan.remove(0);
            scratch.step_transcript.clear();
            scratch.past_steps.push(StepResult {
                step: task,
                result: result.clone(),
            });
            scratch.draft = Some(result);
        }
        Ok(())
    }

    async fn evaluate(&self, node: &NodeSpec, state: &mut ThreadState) -> Result<(), NodeError> {
        let objective = state.last_user_message().unwrap_or_default().to_string();
        let request = CompletionRequest::new(
            Self::system(node),
            vec![Message::user(prompts::evaluation_request(
                &objective,
                &state.scratch.past_steps,
            ))],
        );
        let content = self.complete(request).await?.content;

        let scratch = &mut state.scratch;
        let evaluation = match parse::evaluation(&content) {
            // Complete without a response: the last step result is the answer.
            Some(Evaluation::Complete { response }) if response.trim().is_empty() => {
                Evaluation::Complete {
                    response: scratch.draft.clone().unwrap_or_default(),
                }
            }
            Some(evaluation) => evaluation,
            None => {
                tracing::warn!(
                    thread_id = %self.thread_id,
                    "Malformed evaluation, treating output as the final response"
                );
                scratch.warnings.push(Warning::MalformedEvaluation {
                    detail: content.clone(),
                });
                let response = match content.trim() {
                    "" => scratch.draft.clone().unwrap_or_default(),
                    text => text.to_string(),
                };
                Evaluation::Complete { response }
            }
        };
        if let Evaluation::Complete { response } = &evaluation {
            scratch.final_answer = Some(response.clone());
        }
        scratch.evaluation = Some(evaluation);
        Ok(())
    }

    async fn replan(&self, node: &NodeSpec, state: &mut ThreadState) -> Result<(), NodeError> {
        let objective = state.last_user_message().unwrap_or_default().to_string();
        let done: Vec<String> = state
            .scratch
            .past_steps
            .iter()
            .map(|s| s.step.clone())
            .collect();
        let request = CompletionRequest::new(
            Self::system(node),
            vec![Message::user(prompts::replanner(
                &objective,
                &done,
                &state.scratch.past_steps,
            ))],
        );
        let completion = self.complete(request).await?;
        state.scratch.plan = parse::plan(&completion.content);
        state.scratch.evaluation = None;
        tracing::debug!(
            thread_id = %self.thread_id,
            steps = state.scratch.plan.len(),
            "Replanned"
        );
        Ok(())
    }

    fn memory(&self) -> Result<(&'a dyn Embedder, &'a RecallMemory, &'a MemoryOptions), NodeError> {
        let runtime = self.runtime;
        match (&runtime.embedder, &runtime.recall, &runtime.spec.memory_options) {
            (Some(embedder), Some(recall), Some(options)) => {
                Ok((embedder.as_ref(), recall.as_ref(), options))
            }
            _ => Err(invariant("memory node in an agent without recall memory")),
        }
    }

    async fn retrieve(&self, state: &mut ThreadState) -> Result<(), NodeError> {
        let (embedder, recall, options) = self.memory()?;
        let query = recall_query(&state.messages);
        let embedding = embedder.embed(&query).await?;
        state.scratch.recalled = recall
            .search(&options.namespace, &embedding, options.recall_limit)
            .await?;
        tracing::debug!(
            thread_id = %self.thread_id,
            recalled = state.scratch.recalled.len(),
            "Recall memories retrieved"
        );
        Ok(())
    }

    async fn store(&self, state: &mut ThreadState) -> Result<(), NodeError> {
        let (embedder, _, _) = self.memory()?;
        let text = format!(
            "user: {}\nassistant: {}",
            state.last_user_message().unwrap_or_default(),
            state.scratch.draft.as_deref().unwrap_or_default()
        );
        let embedding = embedder.embed(&text).await?;
        state
            .scratch
            .pending_memories
            .push(PendingMemory { text, embedding });
        Ok(())
    }
}
