//! The resolved, immutable agent description.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::capability::CapabilityRef;
use crate::error::ConfigurationError;
use crate::prompts;

/// Closed set of agent behaviors. Each selects one compiled topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    ToolCall,
    React,
    Reflect,
    PlanExecuteReplan,
    LongTermMemory,
}

impl AgentType {
    pub const ALL: [AgentType; 5] = [
        AgentType::ToolCall,
        AgentType::React,
        AgentType::Reflect,
        AgentType::PlanExecuteReplan,
        AgentType::LongTermMemory,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentType::ToolCall => "tool_call",
            AgentType::React => "react",
            AgentType::Reflect => "reflect",
            AgentType::PlanExecuteReplan => "plan_execute_replan",
            AgentType::LongTermMemory => "long_term_memory",
        }
    }

    /// Built-in system prompt used when none is configured. Types without
    /// one require an operator-supplied prompt.
    pub fn default_system_prompt(&self) -> Option<&'static str> {
        match self {
            AgentType::ToolCall => Some(prompts::TOOL_CALL_SYSTEM),
            AgentType::LongTermMemory => Some(prompts::LONG_TERM_MEMORY_SYSTEM),
            AgentType::React | AgentType::Reflect | AgentType::PlanExecuteReplan => None,
        }
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentType {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        AgentType::ALL
            .into_iter()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| {
                ConfigurationError::invalid(
                    "agent_type",
                    format!(
                        "unknown agent type '{s}', expected one of: {}",
                        AgentType::ALL.map(|t| t.as_str()).join(", ")
                    ),
                )
            })
    }
}

/// When a `reflect` agent stops critiquing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReflectionStop {
    /// Exactly `rounds` critique rounds.
    #[default]
    FixedRounds,
    /// Up to `rounds`, ending early once a critique contains the marker.
    ModelSignal,
}

impl FromStr for ReflectionStop {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fixed_rounds" => Ok(ReflectionStop::FixedRounds),
            "model_signal" => Ok(ReflectionStop::ModelSignal),
            other => Err(ConfigurationError::invalid(
                "reflection.stop",
                format!("expected 'fixed_rounds' or 'model_signal', got '{other}'"),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReflectionPolicy {
    pub stop: ReflectionStop,
    pub rounds: u32,
    pub satisfaction_marker: String,
}

impl Default for ReflectionPolicy {
    fn default() -> Self {
        Self {
            stop: ReflectionStop::FixedRounds,
            rounds: 3,
            satisfaction_marker: "APPROVED".to_string(),
        }
    }
}

impl ReflectionPolicy {
    /// Whether the loop ends after `critique`, the `round`-th one (1-based).
    pub fn converged(&self, round: usize, critique: &str) -> bool {
        if round >= self.rounds as usize {
            return true;
        }
        self.stop == ReflectionStop::ModelSignal && critique.contains(&self.satisfaction_marker)
    }
}

/// Recall memory settings for `long_term_memory` agents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryOptions {
    pub namespace: String,
    pub recall_limit: usize,
}

/// Fully linked agent description. Built once; shared read-only by every thread.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSpec {
    pub name: String,
    pub agent_type: AgentType,
    pub llm: CapabilityRef,
    /// Ordered and duplicate-free.
    pub tools: Vec<CapabilityRef>,
    pub system_prompt: String,
    pub reflection_prompt: Option<String>,
    pub max_iterations: u32,
    pub memory: Option<CapabilityRef>,
    pub memory_options: Option<MemoryOptions>,
    pub reflection: ReflectionPolicy,
    pub checkpointer: Option<CapabilityRef>,
}

impl AgentSpec {
    pub fn tool_names(&self) -> Vec<String> {
        self.tools.iter().map(|t| t.name.clone()).collect()
    }
}
