//! Built-in prompt texts and the small templates filled in at run time.

use crate::state::StepResult;

pub const TOOL_CALL_SYSTEM: &str = "You are a helpful assistant. Use the available tools \
when they help you answer the user, then answer directly.";

/// Appended to a ReAct system prompt so the final answer is recognizable.
pub const REACT_INSTRUCTIONS: &str = "Work step by step. When you need information, call one \
of the available tools and wait for its result. When you know the answer, reply with a line \
starting with 'Final Answer:' followed by the answer.";

/// Marker a ReAct model uses to end the loop.
pub const FINAL_ANSWER_MARKER: &str = "Final Answer:";

pub const REFLECTION_SYSTEM: &str = "You are a careful reviewer. Critique the latest answer \
to the user's request: point out errors, omissions and unclear parts, and say concretely \
how to improve it. If the answer needs no changes, reply with APPROVED.";

pub const REVISE_INSTRUCTIONS: &str = "Revise your previous answer using the critique below. \
Reply with the improved answer only.";

pub const PLANNER_SYSTEM: &str = "For the given objective, come up with a simple step by step \
plan. This plan should involve individual tasks, that if executed correctly will yield the \
correct answer. Do not add any superfluous steps. The result of the final step should be the \
final answer. Make sure that each step has all the information needed - do not skip steps. \
Reply with JSON of the form {\"steps\": [\"...\"]}.";

pub const EVALUATOR_SYSTEM: &str = "Decide whether the steps done so far fully achieve the \
objective. Reply with JSON only: {\"complete\": true, \"response\": \"<answer for the user>\"} \
when it is achieved, otherwise {\"complete\": false}.";

pub const LONG_TERM_MEMORY_SYSTEM: &str = "You are a helpful assistant with long-term memory. \
Relevant memories from earlier conversations are provided below; use them to personalize your \
answer and to stay consistent with what the user told you before.";

/// Answer used when the iteration budget runs out before anything was drafted.
pub const BEST_EFFORT_NOTICE: &str = "I could not reach a final answer within the allowed \
number of reasoning steps.";

pub fn replanner(objective: &str, plan: &[String], past_steps: &[StepResult]) -> String {
    format!(
        "For the given objective, come up with a simple step by step plan. Only add steps \
that still NEED to be done. Do not return previously done steps as part of the plan. If no \
more steps are needed, reply with {{\"steps\": []}}.\n\n\
Your objective was this:\n{objective}\n\n\
Your original plan was this:\n{}\n\n\
You have currently done the follow steps:\n{}\n\n\
Reply with JSON of the form {{\"steps\": [\"...\"]}}.",
        numbered(plan),
        done_steps(past_steps),
    )
}

/// Executor instruction for the head of `plan`.
pub fn execute_step(plan: &[String], task: &str) -> String {
    format!(
        "For the following plan:\n{}\n\nYou are tasked with executing step 1, {task}.",
        numbered(plan)
    )
}

pub fn evaluation_request(objective: &str, past_steps: &[StepResult]) -> String {
    format!(
        "Objective:\n{objective}\n\nSteps done so far:\n{}",
        done_steps(past_steps)
    )
}

/// `<recall_memory>` block appended to a system prompt.
pub fn recall_block(memories: &[String]) -> String {
    let mut block = String::from("<recall_memory>\n");
    for memory in memories {
        block.push_str(memory);
        block.push('\n');
    }
    block.push_str("</recall_memory>");
    block
}

fn numbered(items: &[String]) -> String {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| format!("{}. {item}", i + 1))
        .collect::<Vec<_>>()
        .join("\n")
}

fn done_steps(steps: &[StepResult]) -> String {
    if steps.is_empty() {
        return "(none)".to_string();
    }
    steps
        .iter()
        .map(|s| format!("- {}: {}", s.step, s.result))
        .collect::<Vec<_>>()
        .join("\n")
}
