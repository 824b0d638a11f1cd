use crate::action_schema::GuardPolicy;
use crate::cli_llm::{default_strategies, EngineStrategy};
use anyhow::{Context, Result};
use serde_json::Value;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const MIN_ENGINE_TIMEOUT_SECS: u64 = 40;
const MAX_ENGINE_TIMEOUT_SECS: u64 = 60;
const DEFAULT_MAX_BODY_BYTES: usize = 16 * 1024 * 1024;
const DEFAULT_CONFIG_DIR: &str = "config";

/// Read-only process configuration, built once at startup.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub host: String,
    pub port: u16,
    pub system_rules: String,
    pub default_goals: Value,
    pub scratch_dir: PathBuf,
    pub engine_timeout: Duration,
    pub strategies: Vec<EngineStrategy>,
    pub guard: GuardPolicy,
    pub mock_mode: bool,
    pub max_body_bytes: usize,
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

pub fn clamp_engine_timeout(secs: u64) -> Duration {
    Duration::from_secs(secs.clamp(MIN_ENGINE_TIMEOUT_SECS, MAX_ENGINE_TIMEOUT_SECS))
}

/// Confidence floor for the guardrail; must lie in `[0, 1]`.
pub fn parse_min_confidence(raw: &str) -> Result<f64> {
    let value = raw
        .trim()
        .parse::<f64>()
        .with_context(|| format!("GATEWAY_MIN_CONFIDENCE is not a number: {}", raw))?;
    if !(0.0..=1.0).contains(&value) {
        anyhow::bail!("GATEWAY_MIN_CONFIDENCE must be within [0, 1], got {}", raw);
    }
    Ok(value)
}

pub fn load_system_rules(config_dir: &Path) -> Result<String> {
    let path = config_dir.join("system_prompt.txt");
    fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))
}

pub fn load_default_goals(config_dir: &Path) -> Result<Value> {
    let path = config_dir.join("goals.json");
    let raw = fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("{} is not valid JSON", path.display()))
}

pub fn load_strategies(path: &Path) -> Result<Vec<EngineStrategy>> {
    let raw = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let strategies: Vec<EngineStrategy> = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not a valid strategy list", path.display()))?;
    if strategies.is_empty() {
        anyhow::bail!("{} lists no engine strategies", path.display());
    }
    Ok(strategies)
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let config_dir = env::var("GATEWAY_CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_DIR));

        let strategies = match env::var("GATEWAY_ENGINE_STRATEGIES") {
            Ok(path) => load_strategies(Path::new(&path))?,
            Err(_) => default_strategies(),
        };

        let min_confidence = match env::var("GATEWAY_MIN_CONFIDENCE") {
            Ok(raw) => Some(parse_min_confidence(&raw)?),
            Err(_) => None,
        };

        Ok(Self {
            host: env::var("GATEWAY_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env_parse("GATEWAY_PORT").unwrap_or(8787),
            system_rules: load_system_rules(&config_dir)?,
            default_goals: load_default_goals(&config_dir)?,
            scratch_dir: env::var("GATEWAY_SCRATCH_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| env::temp_dir().join("decision-gateway-frames")),
            engine_timeout: clamp_engine_timeout(
                env_parse("GATEWAY_ENGINE_TIMEOUT_SECS").unwrap_or(MIN_ENGINE_TIMEOUT_SECS),
            ),
            strategies,
            guard: GuardPolicy { min_confidence },
            mock_mode: env::var("MOCK_DECISION").map(|v| v == "1").unwrap_or(false),
            max_body_bytes: env_parse("GATEWAY_MAX_BODY_BYTES").unwrap_or(DEFAULT_MAX_BODY_BYTES),
        })
    }
}
