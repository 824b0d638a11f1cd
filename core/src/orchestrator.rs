use crate::action_schema::{resolve_decision, GuardPolicy};
use crate::cli_llm::DecisionEngine;
use crate::error::GatewayError;
use crate::json_extract::extract_json;
use crate::prompts::{build_combined_prompt, build_user_prompt};
use crate::schema::{DecisionRequest, DecisionResponse};
use tracing::{debug, info};

/// Runs one request forward through prompt assembly, the engine, extraction and the
/// guardrail. Holds no state between calls.
pub struct Orchestrator<'a> {
    pub engine: &'a dyn DecisionEngine,
    pub system_rules: &'a str,
    pub guard: GuardPolicy,
}

impl<'a> Orchestrator<'a> {
    pub async fn decide(&self, req: &DecisionRequest) -> Result<DecisionResponse, GatewayError> {
        let user_prompt = build_user_prompt(req);
        let prompt = build_combined_prompt(self.system_rules, &user_prompt);
        debug!(
            session_id = %req.session_id,
            timestamp_ms = req.timestamp_ms,
            prompt_bytes = prompt.len(),
            history = req.history.len(),
            "prompt assembled"
        );

        let raw = self
            .engine
            .run(&prompt, req.screenshot.file_path().map(|p| p.as_path()))
            .await?;
        let payload = extract_json(&raw)?;

        let validation = resolve_decision(&payload, &req.current_goal_id, &self.guard);
        if let Some(reason) = &validation.error {
            info!(
                fallback = %validation.response.reason,
                %reason,
                "engine decision replaced"
            );
        }
        Ok(validation.response)
    }
}
