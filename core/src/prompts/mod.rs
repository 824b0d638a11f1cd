use crate::schema::{DecisionRequest, Screenshot};
use serde_json::json;

/// Only the most recent history entries are shown to the engine.
pub const HISTORY_WINDOW: usize = 5;

const TASK_DESCRIPTION: &str =
    "Choose the next action from the screenshot and the fixed farming goals.";
const OUTPUT_NOTE: &str = "Output one strict JSON object only. No markdown, no code fences.";
const CLOSING_DIRECTIVE: &str = "Output exactly one JSON object.";

/// Serializes the per-request context the engine reasons over.
///
/// File-backed screenshots are left out; they travel as a process argument instead.
pub fn build_user_prompt(req: &DecisionRequest) -> String {
    let skip = req.history.len().saturating_sub(HISTORY_WINDOW);
    let recent = &req.history[skip..];

    let mut payload = json!({
        "task": TASK_DESCRIPTION,
        "current_goal_id": req.current_goal_id,
        "goal_list": req.goal_list,
        "history": recent,
        "note": OUTPUT_NOTE,
    });

    if let Screenshot::Inline(base64) = &req.screenshot {
        payload["screenshot_base64"] = json!(base64);
    }

    payload.to_string()
}

/// Frames the static system rules and the user context into one engine prompt.
pub fn build_combined_prompt(system_rules: &str, user_prompt: &str) -> String {
    format!(
        "[SYSTEM_RULES]\n{}\n\n[USER_CONTEXT]\n{}\n\n{}",
        system_rules, user_prompt, CLOSING_DIRECTIVE
    )
}
