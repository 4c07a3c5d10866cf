//! Agent Graph Builder
//!
//! Every agent type compiles to the same structure: named nodes, and per node
//! an ordered list of `(predicate, target)` edges. The interpreter follows the
//! first edge whose predicate holds. A compiled graph holds no mutable state;
//! one instance serves every thread and every turn.
//!
//! Nodes marked `loop_head` are where the iteration budget is charged. Each
//! graph also carries a `best_effort` terminal the interpreter jumps to when
//! the budget is exhausted.

mod builder;
mod validate;

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::resolver::AgentType;
use crate::state::{Evaluation, Scratch};

pub use builder::compile;

pub const FINALIZE: &str = "finalize";
pub const BEST_EFFORT: &str = "best_effort";

/// What a node does when the interpreter enters it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Model call that may request a tool or produce a draft.
    Generate,
    /// Dispatches the pending tool request.
    ToolExec,
    Think,
    ActOrAnswer,
    Observe,
    Reflect,
    Revise,
    Plan,
    ExecuteStep,
    Evaluate,
    Replan,
    Retrieve,
    Store,
    Finalize,
    BestEffort,
}

/// Transition condition, evaluated against turn scratch after a node runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
    Always,
    ToolRequested,
    FinalAnswer,
    ReflectionConverged,
    PlanHasSteps,
    EvaluationComplete,
}

impl Predicate {
    pub fn holds(&self, scratch: &Scratch) -> bool {
        match self {
            Predicate::Always => true,
            Predicate::ToolRequested => scratch.pending_tool.is_some(),
            Predicate::FinalAnswer => scratch.final_answer.is_some(),
            Predicate::ReflectionConverged => scratch.reflection_satisfied,
            Predicate::PlanHasSteps => !scratch.plan.is_empty(),
            Predicate::EvaluationComplete => {
                matches!(scratch.evaluation, Some(Evaluation::Complete { .. }))
            }
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Predicate::Always => "always",
            Predicate::ToolRequested => "tool_requested",
            Predicate::FinalAnswer => "final_answer",
            Predicate::ReflectionConverged => "reflection_converged",
            Predicate::PlanHasSteps => "plan_has_steps",
            Predicate::EvaluationComplete => "evaluation_complete",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub predicate: Predicate,
    pub target: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: String,
    pub kind: NodeKind,
    pub terminal: bool,
    pub loop_head: bool,
    /// System prompt used when the node calls the model.
    pub prompt: Option<String>,
    /// Tools offered to the model from this node.
    pub tools: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledGraph {
    pub agent_type: AgentType,
    pub entry: String,
    pub nodes: BTreeMap<String, NodeSpec>,
    pub edges: BTreeMap<String, Vec<Edge>>,
}

impl CompiledGraph {
    pub fn node(&self, id: &str) -> Option<&NodeSpec> {
        self.nodes.get(id)
    }

    pub fn edges_from(&self, id: &str) -> &[Edge] {
        self.edges.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Target of the first edge out of `id` whose predicate holds.
    pub fn next(&self, id: &str, scratch: &Scratch) -> Option<&str> {
        self.edges_from(id)
            .iter()
            .find(|edge| edge.predicate.holds(scratch))
            .map(|edge| edge.target.as_str())
    }

    pub fn loop_heads(&self) -> impl Iterator<Item = &NodeSpec> {
        self.nodes.values().filter(|n| n.loop_head)
    }
}

impl fmt::Display for CompiledGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} (entry: {})", self.agent_type, self.entry)?;
        for node in self.nodes.values() {
            let mut marks = Vec::new();
            if node.loop_head {
                marks.push("loop head");
            }
            if node.terminal {
                marks.push("terminal");
            }
            if marks.is_empty() {
                writeln!(f, "  {}", node.id)?;
            } else {
                writeln!(f, "  {} [{}]", node.id, marks.join(", "))?;
            }
            for edge in self.edges_from(&node.id) {
                writeln!(f, "    --{}--> {}", edge.predicate.label(), edge.target)?;
            }
        }
        Ok(())
    }
}
