//! CLI-based reasoning engine client
//!
//! The engine binary's install location and calling convention differ between
//! deployments, so invocation walks an ordered list of strategies and returns the
//! first clean run.

use crate::error::GatewayError;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

const STDERR_EXCERPT_CHARS: usize = 240;
const FAILURE_DETAIL_CHARS: usize = 1400;

/// How the combined prompt reaches the engine process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptDelivery {
    Stdin,
    Argument,
}

/// One way of invoking the engine. Bare program names go through PATH lookup.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineStrategy {
    pub name: String,
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub prompt_delivery: PromptDelivery,
    /// Flag placed before the screenshot path; `None` drops the path.
    #[serde(default = "default_file_flag")]
    pub file_flag: Option<String>,
}

fn default_file_flag() -> Option<String> {
    Some("--file".to_string())
}

impl EngineStrategy {
    pub fn new(name: &str, program: &str, args: &[&str], prompt_delivery: PromptDelivery) -> Self {
        Self {
            name: name.to_string(),
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
            prompt_delivery,
            file_flag: default_file_flag(),
        }
    }

    /// Argument vector after the program name.
    pub fn build_args(&self, prompt: &str, screenshot: Option<&Path>) -> Vec<String> {
        let mut args = self.args.clone();
        if let (Some(flag), Some(path)) = (&self.file_flag, screenshot) {
            args.push(flag.clone());
            args.push(path.to_string_lossy().to_string());
        }
        if self.prompt_delivery == PromptDelivery::Argument {
            args.push(prompt.to_string());
        }
        args
    }
}

/// Priority order used when no strategy file is configured.
pub fn default_strategies() -> Vec<EngineStrategy> {
    vec![
        EngineStrategy::new("positional_combined", "opencode", &["run"], PromptDelivery::Argument),
        EngineStrategy::new(
            "absolute_path_positional",
            "/root/.opencode/bin/opencode",
            &["run"],
            PromptDelivery::Argument,
        ),
        EngineStrategy::new("stdin_combined", "opencode", &["run"], PromptDelivery::Stdin),
    ]
}

#[async_trait]
pub trait DecisionEngine: Send + Sync {
    /// Raw text produced by the engine for an already combined prompt.
    async fn run(&self, prompt: &str, screenshot: Option<&Path>) -> Result<String, GatewayError>;
}

pub struct CliEngine {
    strategies: Vec<EngineStrategy>,
    timeout: Duration,
}

impl CliEngine {
    pub fn new(strategies: Vec<EngineStrategy>, timeout: Duration) -> Self {
        Self { strategies, timeout }
    }

    async fn run_attempt(
        &self,
        strategy: &EngineStrategy,
        prompt: &str,
        screenshot: Option<&Path>,
    ) -> Result<String, String> {
        let mut cmd = Command::new(&strategy.program);
        cmd.args(strategy.build_args(prompt, screenshot))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let use_stdin = strategy.prompt_delivery == PromptDelivery::Stdin;
        if use_stdin {
            cmd.stdin(Stdio::piped());
        } else {
            cmd.stdin(Stdio::null());
        }

        let mut child = cmd.spawn().map_err(|e| format!("spawn failed: {}", e))?;

        if use_stdin {
            if let Some(mut stdin) = child.stdin.take() {
                // Written concurrently so a chatty child can't deadlock on a full stdout pipe.
                let payload = prompt.as_bytes().to_vec();
                tokio::spawn(async move {
                    if let Err(e) = stdin.write_all(&payload).await {
                        debug!("engine stdin closed early: {}", e);
                    }
                });
            }
        }

        // On timeout or cancellation the child is dropped with the future and killed.
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(format!("wait failed: {}", e)),
            Err(_) => return Err(format!("timed out after {:?}", self.timeout)),
        };

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let rc = output
            .status
            .code()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "signal".to_string());

        if output.status.success() && !stdout.is_empty() {
            return Ok(stdout);
        }

        if stderr.is_empty() {
            Err(format!("rc={}, empty output", rc))
        } else {
            Err(format!(
                "rc={}, err={}",
                rc,
                truncate_chars(&stderr, STDERR_EXCERPT_CHARS)
            ))
        }
    }
}

#[async_trait]
impl DecisionEngine for CliEngine {
    async fn run(&self, prompt: &str, screenshot: Option<&Path>) -> Result<String, GatewayError> {
        if self.strategies.is_empty() {
            return Err(GatewayError::EngineUnavailable(
                "no engine strategies configured".to_string(),
            ));
        }

        let mut errors: Vec<String> = Vec::new();
        for strategy in &self.strategies {
            debug!(strategy = %strategy.name, prompt_bytes = prompt.len(), "invoking engine");
            match self.run_attempt(strategy, prompt, screenshot).await {
                Ok(stdout) => {
                    debug!(strategy = %strategy.name, output_bytes = stdout.len(), "engine succeeded");
                    return Ok(stdout);
                }
                Err(reason) => {
                    warn!(strategy = %strategy.name, %reason, "engine attempt failed");
                    errors.push(format!("{}: {}", strategy.name, reason));
                }
            }
        }

        let detail = truncate_chars(&errors.join(" | "), FAILURE_DETAIL_CHARS);
        Err(GatewayError::EngineUnavailable(detail))
    }
}

/// Char-boundary safe prefix of at most `max` characters.
pub fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}
