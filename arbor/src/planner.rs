//! Planners inject a planning instruction and post-process the model's
//! planning output into thought-marked parts.

use crate::content::Part;
use crate::context::{CallbackContext, ReadonlyContext};
use crate::model::LlmRequest;

/// Tag opening the initial plan.
pub const PLANNING_TAG: &str = "/*PLANNING*/";
/// Tag opening a revised plan.
pub const REPLANNING_TAG: &str = "/*REPLANNING*/";
/// Tag opening reasoning between actions.
pub const REASONING_TAG: &str = "/*REASONING*/";
/// Tag opening an action.
pub const ACTION_TAG: &str = "/*ACTION*/";
/// Tag opening the final answer.
pub const FINAL_ANSWER_TAG: &str = "/*FINAL_ANSWER*/";

/// The planning contract consumed by the flow.
pub trait Planner: Send + Sync {
    /// The instruction to append to the request, if any.
    fn build_planning_instruction(
        &self,
        ctx: &ReadonlyContext,
        request: &LlmRequest,
    ) -> Option<String>;

    /// Rewrite response parts (e.g. marking planning text as thought).
    /// `None` leaves the parts untouched.
    fn process_planning_response(
        &self,
        ctx: &CallbackContext,
        parts: &[Part],
    ) -> Option<Vec<Part>>;
}

/// A plan-re-act planner: the model writes a tagged plan first, interleaves
/// reasoning with actions, and closes with a tagged final answer. All
/// tagged sections before the final answer are marked as thoughts.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanReActPlanner;

impl PlanReActPlanner {
    /// Create the planner.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn split_final_answer(text: &str) -> Option<(String, String)> {
        let idx = text.rfind(FINAL_ANSWER_TAG)?;
        let before = text[..idx].to_string();
        let after = text[idx + FINAL_ANSWER_TAG.len()..].trim_start().to_string();
        Some((before, after))
    }

    fn is_planning_text(text: &str) -> bool {
        let trimmed = text.trim_start();
        [PLANNING_TAG, REPLANNING_TAG, REASONING_TAG, ACTION_TAG]
            .iter()
            .any(|tag| trimmed.starts_with(tag))
    }
}

impl Planner for PlanReActPlanner {
    fn build_planning_instruction(
        &self,
        _ctx: &ReadonlyContext,
        _request: &LlmRequest,
    ) -> Option<String> {
        Some(format!(
            "Answer by planning first. Write your plan under {PLANNING_TAG}, then \
alternate {REASONING_TAG} and {ACTION_TAG} sections while you work, using \
{REPLANNING_TAG} when the plan has to change. When the task is solved, write \
the answer under {FINAL_ANSWER_TAG}. Only the text after {FINAL_ANSWER_TAG} is \
shown to the user, so it must stand alone."
        ))
    }

    fn process_planning_response(
        &self,
        _ctx: &CallbackContext,
        parts: &[Part],
    ) -> Option<Vec<Part>> {
        let mut processed = Vec::with_capacity(parts.len());
        let mut changed = false;
        for part in parts {
            match part {
                Part::Text { text, thought: false } => {
                    if let Some((before, answer)) = Self::split_final_answer(text) {
                        if !before.trim().is_empty() {
                            processed.push(Part::thought(before));
                        }
                        processed.push(Part::text(answer));
                        changed = true;
                    } else if Self::is_planning_text(text) {
                        processed.push(Part::thought(text.clone()));
                        changed = true;
                    } else {
                        processed.push(part.clone());
                    }
                }
                _ => processed.push(part.clone()),
            }
        }
        changed.then_some(processed)
    }
}
