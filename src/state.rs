//! Per-thread conversation state
//!
//! A [`ThreadState`] is owned by the engine while a turn runs and persisted as a
//! checkpoint between turns. [`Scratch`] is turn-scoped working memory: it is
//! cleared when the next turn starts.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::llm::ToolCallRequest;

/// Message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

/// One entry of a thread's append-only history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_name: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_name: None,
        }
    }

    pub fn tool(tool_name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_name: Some(tool_name.into()),
        }
    }
}

/// Result of one tool invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolOutcome {
    Output(String),
    Error(String),
}

/// Record of a tool invocation, appended by the dispatcher whatever the outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub tool_name: String,
    pub input: serde_json::Value,
    pub outcome: ToolOutcome,
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
}

impl ToolCallRecord {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, ToolOutcome::Output(_))
    }
}

/// A completed plan step and what executing it produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResult {
    pub step: String,
    pub result: String,
}

/// Verdict of the plan evaluator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Evaluation {
    Complete { response: String },
    Incomplete,
}

/// A recall memory embedded during the turn, written to the memory store only
/// after the turn's checkpoint commits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingMemory {
    pub text: String,
    pub embedding: Vec<f32>,
}

/// Non-fatal conditions recorded during a turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    MalformedToolRequest { node: String, detail: String },
    MalformedEvaluation { detail: String },
    IterationLimitReached { max_iterations: u32 },
}

/// Turn-scoped working memory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Scratch {
    pub tool_calls: Vec<ToolCallRecord>,
    /// Tool call requested by the last model output, not yet dispatched.
    pub pending_tool: Option<ToolCallRequest>,
    /// Tool output produced by an act step, not yet observed.
    pub pending_observation: Option<Message>,
    /// Latest model answer or draft.
    pub draft: Option<String>,
    pub final_answer: Option<String>,
    /// Tool outputs and tool failures, as fed back to the model.
    pub observations: Vec<String>,
    /// Retryable provider failures. Never surfaced as an answer.
    #[serde(default)]
    pub failures: Vec<String>,
    pub reflections: Vec<String>,
    pub reflection_satisfied: bool,
    pub plan: Vec<String>,
    pub past_steps: Vec<StepResult>,
    /// Tool messages exchanged while executing the current plan step.
    pub step_transcript: Vec<Message>,
    pub evaluation: Option<Evaluation>,
    pub recalled: Vec<String>,
    pub pending_memories: Vec<PendingMemory>,
    pub warnings: Vec<Warning>,
}

/// Mutable per-thread record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadState {
    pub thread_id: String,
    pub messages: Vec<Message>,
    pub scratch: Scratch,
    pub node_cursor: String,
    pub iteration_count: u32,
}

impl ThreadState {
    /// Empty state for a thread seen for the first time.
    pub fn new(thread_id: impl Into<String>, entry_node: impl Into<String>) -> Self {
        Self {
            thread_id: thread_id.into(),
            messages: Vec::new(),
            scratch: Scratch::default(),
            node_cursor: entry_node.into(),
            iteration_count: 0,
        }
    }

    /// Prepares the state for a new turn: turn-scoped data from the previous
    /// turn is dropped and the cursor returns to the entry node.
    pub fn begin_turn(&mut self, entry_node: &str, user_message: impl Into<String>) {
        self.scratch = Scratch::default();
        self.iteration_count = 0;
        self.node_cursor = entry_node.to_string();
        self.messages.push(Message::user(user_message));
    }

    /// Content of the most recent user message.
    pub fn last_user_message(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }

    pub fn tool_message_count(&self) -> usize {
        self.messages.iter().filter(|m| m.role == Role::Tool).count()
    }
}
