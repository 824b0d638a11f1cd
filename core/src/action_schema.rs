use crate::schema::{Action, DecisionResponse};
use serde::Deserialize;
use serde_json::Value;

pub const SCHEMA_FALLBACK: &str = "schema_fallback";
pub const LOW_CONFIDENCE: &str = "low_confidence";

const FALLBACK_DURATION_MS: u32 = 100;
const FALLBACK_NEXT_CAPTURE_MS: u32 = 1400;
const FALLBACK_CONFIDENCE: f64 = 0.2;

const DURATION_RANGE: (u32, u32) = (50, 1200);
const NEXT_CAPTURE_RANGE: (u32, u32) = (300, 5000);

#[derive(Debug, Clone)]
pub struct ActionValidation {
    pub response: DecisionResponse,
    /// Why the engine's decision was replaced, if it was.
    pub error: Option<String>,
}

/// Deployment-dependent acceptance rules applied after schema validation.
#[derive(Debug, Clone, Copy, Default)]
pub struct GuardPolicy {
    pub min_confidence: Option<f64>,
}

// Integer fields arrive as f64 so `120.0` is accepted alongside `120`.
#[derive(Deserialize)]
struct RawDecision {
    action: Action,
    x_norm: f64,
    y_norm: f64,
    swipe_to_x_norm: f64,
    swipe_to_y_norm: f64,
    duration_ms: f64,
    next_capture_ms: f64,
    goal_id: String,
    confidence: f64,
    reason: String,
}

fn check_unit(field: &str, value: f64) -> Result<f64, String> {
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(format!("{} must be within [0, 1], got {}", field, value))
    }
}

fn check_millis(field: &str, value: f64, (min, max): (u32, u32)) -> Result<u32, String> {
    if value.fract() != 0.0 {
        return Err(format!("{} must be an integer, got {}", field, value));
    }
    if value < f64::from(min) || value > f64::from(max) {
        return Err(format!("{} must be within [{}, {}], got {}", field, min, max, value));
    }
    Ok(value as u32)
}

/// Strict validation: every field present, known action, every number in range.
pub fn validate_decision(value: &Value) -> Result<DecisionResponse, String> {
    let raw: RawDecision = serde_json::from_value(value.clone()).map_err(|e| e.to_string())?;

    Ok(DecisionResponse {
        action: raw.action,
        x_norm: check_unit("x_norm", raw.x_norm)?,
        y_norm: check_unit("y_norm", raw.y_norm)?,
        swipe_to_x_norm: check_unit("swipe_to_x_norm", raw.swipe_to_x_norm)?,
        swipe_to_y_norm: check_unit("swipe_to_y_norm", raw.swipe_to_y_norm)?,
        duration_ms: check_millis("duration_ms", raw.duration_ms, DURATION_RANGE)?,
        next_capture_ms: check_millis("next_capture_ms", raw.next_capture_ms, NEXT_CAPTURE_RANGE)?,
        goal_id: raw.goal_id,
        confidence: check_unit("confidence", raw.confidence)?,
        reason: raw.reason,
    })
}

pub fn fallback_wait(goal_id: &str, reason: &str) -> DecisionResponse {
    DecisionResponse {
        action: Action::Wait,
        x_norm: 0.0,
        y_norm: 0.0,
        swipe_to_x_norm: 0.0,
        swipe_to_y_norm: 0.0,
        duration_ms: FALLBACK_DURATION_MS,
        next_capture_ms: FALLBACK_NEXT_CAPTURE_MS,
        goal_id: goal_id.to_string(),
        confidence: FALLBACK_CONFIDENCE,
        reason: reason.to_string(),
    }
}

/// Canned decision served by the mock endpoint and mock mode.
pub fn mock_tap(goal_id: &str) -> DecisionResponse {
    DecisionResponse {
        action: Action::Tap,
        x_norm: 0.52,
        y_norm: 0.78,
        swipe_to_x_norm: 0.0,
        swipe_to_y_norm: 0.0,
        duration_ms: 120,
        next_capture_ms: 1000,
        goal_id: goal_id.to_string(),
        confidence: 0.95,
        reason: "mock_decision".to_string(),
    }
}

/// Zeroes coordinates the resolved action does not use.
pub fn enforce_action_consistency(mut response: DecisionResponse) -> DecisionResponse {
    match response.action {
        Action::Wait | Action::Back | Action::Stop => {
            response.x_norm = 0.0;
            response.y_norm = 0.0;
            response.swipe_to_x_norm = 0.0;
            response.swipe_to_y_norm = 0.0;
        }
        Action::Tap => {
            response.swipe_to_x_norm = 0.0;
            response.swipe_to_y_norm = 0.0;
        }
        Action::Swipe => {}
    }
    response
}

/// Turns an extracted engine object into a response that is safe to return.
///
/// Schema failures degrade to `schema_fallback` for `goal_id`. The confidence gate
/// only judges decisions that passed validation and keeps their goal id.
pub fn resolve_decision(value: &Value, goal_id: &str, policy: &GuardPolicy) -> ActionValidation {
    let (response, error) = match validate_decision(value) {
        Ok(response) => match policy.min_confidence {
            Some(min) if response.confidence < min => {
                let error = format!("confidence {} below threshold {}", response.confidence, min);
                (fallback_wait(&response.goal_id, LOW_CONFIDENCE), Some(error))
            }
            _ => (response, None),
        },
        Err(error) => (fallback_wait(goal_id, SCHEMA_FALLBACK), Some(error)),
    };

    ActionValidation {
        response: enforce_action_consistency(response),
        error,
    }
}
