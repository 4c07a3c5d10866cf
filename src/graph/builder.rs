//! One topology per agent type.

use std::collections::BTreeMap;

use crate::error::ConfigurationError;
use crate::prompts;
use crate::resolver::{AgentSpec, AgentType};

use super::{CompiledGraph, Edge, NodeKind, NodeSpec, Predicate, BEST_EFFORT, FINALIZE};

/// Compiles the fixed topology for `spec.agent_type`, parametrized by the
/// spec's prompts and tools.
///
/// The output depends only on `spec`: compiling the same spec twice yields
/// equal graphs.
pub fn compile(spec: &AgentSpec) -> Result<CompiledGraph, ConfigurationError> {
    let tools = spec.tool_names();
    let system = spec.system_prompt.as_str();

    let graph = match spec.agent_type {
        AgentType::ToolCall => GraphBuilder::new(AgentType::ToolCall, "generate")
            .node("generate", NodeKind::Generate, |n| {
                n.loop_head().prompt(system).tools(&tools)
            })
            .node("tool_exec", NodeKind::ToolExec, |n| n)
            .edge("generate", Predicate::ToolRequested, "tool_exec")
            .edge("generate", Predicate::Always, FINALIZE)
            .edge("tool_exec", Predicate::Always, "generate"),

        AgentType::React => {
            let think = format!("{system}\n\n{}", prompts::REACT_INSTRUCTIONS);
            GraphBuilder::new(AgentType::React, "think")
                .node("think", NodeKind::Think, |n| {
                    n.loop_head().prompt(&think).tools(&tools)
                })
                .node("act_or_answer", NodeKind::ActOrAnswer, |n| n)
                .node("observe", NodeKind::Observe, |n| n)
                .edge("think", Predicate::Always, "act_or_answer")
                .edge("act_or_answer", Predicate::FinalAnswer, FINALIZE)
                .edge("act_or_answer", Predicate::Always, "observe")
                .edge("observe", Predicate::Always, "think")
        }

        AgentType::Reflect => {
            let critique = spec
                .reflection_prompt
                .as_deref()
                .unwrap_or(prompts::REFLECTION_SYSTEM);
            let revise = format!("{system}\n\n{}", prompts::REVISE_INSTRUCTIONS);
            GraphBuilder::new(AgentType::Reflect, "generate")
                .node("generate", NodeKind::Generate, |n| {
                    n.loop_head().prompt(system).tools(&tools)
                })
                .node("tool_exec", NodeKind::ToolExec, |n| n)
                .node("reflect", NodeKind::Reflect, |n| n.loop_head().prompt(critique))
                .node("revise", NodeKind::Revise, |n| n.prompt(&revise))
                .edge("generate", Predicate::ToolRequested, "tool_exec")
                .edge("generate", Predicate::Always, "reflect")
                .edge("tool_exec", Predicate::Always, "generate")
                .edge("reflect", Predicate::ReflectionConverged, FINALIZE)
                .edge("reflect", Predicate::Always, "revise")
                .edge("revise", Predicate::Always, "reflect")
        }

        AgentType::PlanExecuteReplan => GraphBuilder::new(AgentType::PlanExecuteReplan, "plan")
            .node("plan", NodeKind::Plan, |n| n.prompt(prompts::PLANNER_SYSTEM))
            .node("execute_step", NodeKind::ExecuteStep, |n| {
                n.loop_head().prompt(system).tools(&tools)
            })
            .node("tool_exec", NodeKind::ToolExec, |n| n)
            .node("evaluate", NodeKind::Evaluate, |n| n.prompt(prompts::EVALUATOR_SYSTEM))
            .node("replan", NodeKind::Replan, |n| n.prompt(prompts::PLANNER_SYSTEM))
            .edge("plan", Predicate::PlanHasSteps, "execute_step")
            .edge("plan", Predicate::Always, FINALIZE)
            .edge("execute_step", Predicate::ToolRequested, "tool_exec")
            .edge("execute_step", Predicate::PlanHasSteps, "execute_step")
            .edge("execute_step", Predicate::Always, "evaluate")
            .edge("tool_exec", Predicate::Always, "execute_step")
            .edge("evaluate", Predicate::EvaluationComplete, FINALIZE)
            .edge("evaluate", Predicate::Always, "replan")
            .edge("replan", Predicate::PlanHasSteps, "execute_step")
            .edge("replan", Predicate::Always, FINALIZE),

        AgentType::LongTermMemory => GraphBuilder::new(AgentType::LongTermMemory, "retrieve")
            .node("retrieve", NodeKind::Retrieve, |n| n)
            .node("generate", NodeKind::Generate, |n| {
                n.loop_head().prompt(system).tools(&tools)
            })
            .node("tool_exec", NodeKind::ToolExec, |n| n)
            .node("store", NodeKind::Store, |n| n)
            .edge("retrieve", Predicate::Always, "generate")
            .edge("generate", Predicate::ToolRequested, "tool_exec")
            .edge("generate", Predicate::Always, "store")
            .edge("tool_exec", Predicate::Always, "generate")
            .edge("store", Predicate::Always, FINALIZE),
    }
    .build();

    graph.validate()?;
    tracing::info!(
        agent = %spec.name,
        agent_type = %graph.agent_type,
        nodes = graph.nodes.len(),
        entry = %graph.entry,
        "Agent graph compiled"
    );
    Ok(graph)
}

struct GraphBuilder {
    agent_type: AgentType,
    entry: String,
    nodes: BTreeMap<String, NodeSpec>,
    edges: BTreeMap<String, Vec<Edge>>,
}

impl GraphBuilder {
    fn new(agent_type: AgentType, entry: &str) -> Self {
        Self {
            agent_type,
            entry: entry.to_string(),
            nodes: BTreeMap::new(),
            edges: BTreeMap::new(),
        }
    }

    fn node(mut self, id: &str, kind: NodeKind, configure: impl FnOnce(NodeSpec) -> NodeSpec) -> Self {
        let node = configure(NodeSpec {
            id: id.to_string(),
            kind,
            terminal: false,
            loop_head: false,
            prompt: None,
            tools: Vec::new(),
        });
        self.nodes.insert(id.to_string(), node);
        self
    }

    fn edge(mut self, from: &str, predicate: Predicate, to: &str) -> Self {
        self.edges.entry(from.to_string()).or_default().push(Edge {
            predicate,
            target: to.to_string(),
        });
        self
    }

    /// Adds the two terminals every topology shares.
    fn build(self) -> CompiledGraph {
        let this = self
            .node(FINALIZE, NodeKind::Finalize, NodeSpec::terminal)
            .node(BEST_EFFORT, NodeKind::BestEffort, NodeSpec::terminal);
        CompiledGraph {
            agent_type: this.agent_type,
            entry: this.entry,
            nodes: this.nodes,
            edges: this.edges,
        }
    }
}

impl NodeSpec {
    fn loop_head(mut self) -> Self {
        self.loop_head = true;
        self
    }

    fn terminal(mut self) -> Self {
        self.terminal = true;
        self
    }

    fn prompt(mut self, prompt: &str) -> Self {
        self.prompt = Some(prompt.to_string());
        self
    }

    fn tools(mut self, tools: &[String]) -> Self {
        self.tools = tools.to_vec();
        self
    }
}
