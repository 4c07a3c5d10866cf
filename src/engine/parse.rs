//! Lenient readers for structured model output.

use serde::Deserialize;

use crate::prompts::FINAL_ANSWER_MARKER;
use crate::state::Evaluation;

/// Text after the last final-answer marker, if the marker is present.
pub fn final_answer(text: &str) -> Option<String> {
    text.rfind(FINAL_ANSWER_MARKER)
        .map(|at| text[at + FINAL_ANSWER_MARKER.len()..].trim().to_string())
}

#[derive(Deserialize)]
struct PlanJson {
    steps: Vec<String>,
}

/// Plan steps from `{"steps": [...]}` or from numbered / bulleted lines.
/// Prose without list markers yields no steps.
pub fn plan(text: &str) -> Vec<String> {
    if let Some(parsed) = json_object::<PlanJson>(text) {
        return parsed
            .steps
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }
    text.lines().filter_map(list_item).collect()
}

#[derive(Deserialize)]
struct EvaluationJson {
    complete: bool,
    #[serde(default)]
    response: Option<String>,
}

/// `None` when the text is not a recognizable verdict. A completion verdict
/// without a `response` yields an empty response for the caller to fill.
pub fn evaluation(text: &str) -> Option<Evaluation> {
    let parsed = json_object::<EvaluationJson>(text)?;
    if parsed.complete {
        Some(Evaluation::Complete {
            response: parsed.response.unwrap_or_default(),
        })
    } else {
        Some(Evaluation::Incomplete)
    }
}

/// The outermost `{...}` span of `text`, deserialized.
fn json_object<T: for<'de> Deserialize<'de>>(text: &str) -> Option<T> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end < start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

fn list_item(line: &str) -> Option<String> {
    let line = line.trim();
    let rest = if let Some(rest) = line.strip_prefix(['-', '*', '•']) {
        rest
    } else {
        let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
        if digits == 0 {
            return None;
        }
        line[digits..].strip_prefix(['.', ')'])?
    };
    let item = rest.trim();
    (!item.is_empty()).then(|| item.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_final_answer_takes_text_after_marker() {
        assert_eq!(
            final_answer("Thought: easy.\nFinal Answer: 4").as_deref(),
            Some("4")
        );
        assert_eq!(final_answer("just text"), None);
    }

    #[test]
    fn test_plan_from_json_or_lists() {
        assert_eq!(
            plan("Here you go: {\"steps\": [\"a\", \" \", \"b\"]}"),
            vec!["a", "b"]
        );
        assert_eq!(
            plan("1. find rate\n2) convert\n- check\nnotes"),
            vec!["find rate", "convert", "check"]
        );
        assert!(plan("The answer is 4.").is_empty());
    }

    #[test]
    fn test_evaluation_verdicts() {
        assert_eq!(
            evaluation("{\"complete\": true, \"response\": \"42\"}"),
            Some(Evaluation::Complete {
                response: "42".into()
            })
        );
        assert_eq!(evaluation("{\"complete\": false}"), Some(Evaluation::Incomplete));
        assert_eq!(evaluation("yes it is done"), None);
    }

    #[test]
    fn test_evaluation_without_response_is_still_complete() {
        assert_eq!(
            evaluation("{\"complete\": true}"),
            Some(Evaluation::Complete {
                response: String::new()
            })
        );
        assert_eq!(
            evaluation("Verdict: {\"complete\": true, \"response\": null}"),
            Some(Evaluation::Complete {
                response: String::new()
            })
        );
    }
}
