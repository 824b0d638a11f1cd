use axum::{
    extract::{DefaultBodyLimit, Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use futures::FutureExt;
use serde::Serialize;
use serde_json::json;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;
use tracing::{field, info, warn};
use uuid::Uuid;

use crate::action_schema::{enforce_action_consistency, mock_tap};
use crate::cli_llm::{CliEngine, DecisionEngine};
use crate::config_manager::GatewayConfig;
use crate::error::{ErrorClass, GatewayError};
use crate::orchestrator::Orchestrator;
use crate::request_normalizer;
use crate::schema::DecisionResponse;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub engine: Arc<dyn DecisionEngine>,
}

impl AppState {
    pub fn new(config: GatewayConfig) -> Self {
        let engine = CliEngine::new(config.strategies.clone(), config.engine_timeout);
        Self {
            config: Arc::new(config),
            engine: Arc::new(engine),
        }
    }
}

#[derive(Serialize, Debug)]
pub struct ErrorEnvelope {
    pub error_code: String,
    pub error_message: String,
    pub request_id: String,
}

/// A pipeline failure bound to the request that produced it.
pub struct ApiError {
    pub error: GatewayError,
    pub request_id: String,
}

fn status_for(class: ErrorClass) -> StatusCode {
    match class {
        ErrorClass::ClientInput | ErrorClass::Extraction => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorClass::Engine => StatusCode::SERVICE_UNAVAILABLE,
        ErrorClass::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(self.error.class());
        let envelope = ErrorEnvelope {
            error_code: self.error.code().to_string(),
            error_message: self.error.to_string(),
            request_id: self.request_id,
        };
        (status, Json(envelope)).into_response()
    }
}

/// Short opaque id tying log lines and error envelopes together.
fn new_request_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(12);
    id
}

pub fn build_router(state: AppState) -> Router {
    let max_body_bytes = state.config.max_body_bytes;
    Router::new()
        .route("/health", get(health_handler))
        .route("/decide", post(decide_handler))
        .route("/decide/mock", post(decide_mock_handler))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the decision gateway HTTP server
pub async fn start_api_server(config: GatewayConfig) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let mock_mode = config.mock_mode;
    let strategies: Vec<String> = config.strategies.iter().map(|s| s.name.clone()).collect();
    let app = build_router(AppState::new(config));

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind {}: {}", addr, e))?;
    info!(%addr, mock_mode, ?strategies, "decision gateway listening");

    axum::serve(listener, app)
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;
    Ok(())
}

async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "ok": true,
        "default_goals": state.config.default_goals,
    }))
}

async fn decide_handler(State(state): State<AppState>, request: Request) -> Response {
    let mock = state.config.mock_mode;
    serve_decision(state, request, mock).await
}

async fn decide_mock_handler(State(state): State<AppState>, request: Request) -> Response {
    serve_decision(state, request, true).await
}

async fn run_pipeline(state: &AppState, request: Request, mock: bool) -> Result<DecisionResponse, GatewayError> {
    let req = request_normalizer::normalize(request, &state.config.scratch_dir).await?;
    if mock {
        return Ok(enforce_action_consistency(mock_tap(&req.current_goal_id)));
    }

    let orchestrator = Orchestrator {
        engine: state.engine.as_ref(),
        system_rules: &state.config.system_rules,
        guard: state.config.guard,
    };
    orchestrator.decide(&req).await
}

async fn serve_decision(state: AppState, request: Request, mock: bool) -> Response {
    let request_id = new_request_id();
    let started = Instant::now();

    let outcome = AssertUnwindSafe(run_pipeline(&state, request, mock))
        .catch_unwind()
        .await
        .unwrap_or_else(|_| Err(GatewayError::Internal("decision pipeline panicked".to_string())));
    let elapsed_ms = started.elapsed().as_millis() as u64;

    match outcome {
        Ok(decision) => {
            info!(
                request_id = %request_id,
                action = decision.action.as_str(),
                x_norm = decision.x_norm,
                y_norm = decision.y_norm,
                swipe_to_x_norm = decision.swipe_to_x_norm,
                swipe_to_y_norm = decision.swipe_to_y_norm,
                confidence = decision.confidence,
                next_capture_ms = decision.next_capture_ms,
                elapsed_ms,
                reason = %decision.reason,
                "decide"
            );
            Json(decision).into_response()
        }
        Err(error) => {
            // No decision exists here, so the decision fields stay unrecorded.
            warn!(
                request_id = %request_id,
                error_code = error.code(),
                confidence = field::Empty,
                next_capture_ms = field::Empty,
                elapsed_ms,
                reason = field::Empty,
                error = %error,
                "decide"
            );
            ApiError { error, request_id }.into_response()
        }
    }
}
