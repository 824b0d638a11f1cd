use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct GoalItem {
    pub id: String,
    #[serde(alias = "description")]
    pub desc: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default = "default_priority")]
    pub priority: i64,
}

fn default_priority() -> i64 {
    99
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct HistoryItem {
    pub action: String,
    #[serde(default)]
    pub x: i64,
    #[serde(default)]
    pub y: i64,
    #[serde(default = "default_result")]
    pub result: String,
}

fn default_result() -> String {
    "unknown".to_string()
}

/// Exactly one screenshot channel per request.
#[derive(Debug, Clone, PartialEq)]
pub enum Screenshot {
    /// Base64 text as received in JSON mode.
    Inline(String),
    /// Scratch file written by the multipart decoder.
    File(PathBuf),
}

impl Screenshot {
    pub fn file_path(&self) -> Option<&PathBuf> {
        match self {
            Self::File(path) => Some(path),
            Self::Inline(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecisionRequest {
    pub session_id: String,
    pub timestamp_ms: i64,
    pub goal_list: Vec<GoalItem>,
    pub current_goal_id: String,
    pub history: Vec<HistoryItem>,
    pub screenshot: Screenshot,
}

/// JSON-mode wire shape of `/decide`.
#[derive(Deserialize, Debug)]
pub struct DecisionRequestBody {
    pub session_id: String,
    pub timestamp_ms: i64,
    pub goal_list: Vec<GoalItem>,
    pub current_goal_id: String,
    pub history: Vec<HistoryItem>,
    pub screenshot_base64: String,
}

impl From<DecisionRequestBody> for DecisionRequest {
    fn from(body: DecisionRequestBody) -> Self {
        Self {
            session_id: body.session_id,
            timestamp_ms: body.timestamp_ms,
            goal_list: body.goal_list,
            current_goal_id: body.current_goal_id,
            history: body.history,
            screenshot: Screenshot::Inline(body.screenshot_base64),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Tap,
    Swipe,
    Wait,
    Back,
    Stop,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tap => "tap",
            Self::Swipe => "swipe",
            Self::Wait => "wait",
            Self::Back => "back",
            Self::Stop => "stop",
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DecisionResponse {
    pub action: Action,
    pub x_norm: f64,
    pub y_norm: f64,
    pub swipe_to_x_norm: f64,
    pub swipe_to_y_norm: f64,
    pub duration_ms: u32,
    pub next_capture_ms: u32,
    pub goal_id: String,
    pub confidence: f64,
    pub reason: String,
}
