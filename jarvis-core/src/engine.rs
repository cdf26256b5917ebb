// ABOUTME: Spawns the external reasoning engine CLI for one message and parses its JSON result.
// ABOUTME: Timeouts, nonzero exits and spawn errors all degrade to plain response text.

use crate::config::EngineConfig;
use crate::integrations::{filter_manifest, CapabilityManifest, IntegrationRegistry};
use crate::metrics;
use crate::session::ConversationRegistry;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::process::Command;

/// Parameters for a single engine run
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InvocationRequest {
    pub prompt: String,
    pub max_turns: u32,
    pub max_budget_usd: String,
    /// Filtered capability manifest written for this invocation only
    pub mcp_config: Option<PathBuf>,
    pub allowed_tools: Option<String>,
    /// Continuation token from the previous turn of this conversation
    pub resume: Option<String>,
}

impl InvocationRequest {
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(),
            self.prompt.clone(),
            "--output-format".to_string(),
            "json".to_string(),
            "--max-turns".to_string(),
            self.max_turns.to_string(),
            "--max-budget-usd".to_string(),
            self.max_budget_usd.clone(),
        ];
        if let Some(ref path) = self.mcp_config {
            args.push("--mcp-config".to_string());
            args.push(path.to_string_lossy().into_owned());
        }
        if let Some(ref tools) = self.allowed_tools {
            args.push("--allowedTools".to_string());
            args.push(tools.clone());
        }
        if let Some(ref token) = self.resume {
            args.push("--resume".to_string());
            args.push(token.clone());
        }
        args
    }
}

/// Captured result of a finished engine process
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EngineOutput {
    /// Exit code, None when killed by a signal
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl EngineOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// Runs the engine process. The invoker owns timeouts; runners only spawn and collect.
#[async_trait]
pub trait EngineRunner: Send + Sync {
    async fn run(&self, request: &InvocationRequest, working_dir: &Path) -> Result<EngineOutput>;
}

/// Runs the engine CLI as a child process, inheriting the environment
#[derive(Debug, Clone)]
pub struct CliRunner {
    binary: String,
}

impl CliRunner {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl EngineRunner for CliRunner {
    async fn run(&self, request: &InvocationRequest, working_dir: &Path) -> Result<EngineOutput> {
        if self.binary.contains('\0') {
            anyhow::bail!("Invalid engine binary path");
        }
        if !working_dir.is_dir() {
            anyhow::bail!("Working directory does not exist: {}", working_dir.display());
        }

        let args = request.to_args();
        tracing::debug!(
            binary = %self.binary,
            working_dir = %working_dir.display(),
            resume = request.resume.is_some(),
            tools = request.allowed_tools.as_deref().unwrap_or(""),
            "Spawning engine CLI"
        );

        // kill_on_drop: an invocation abandoned by timeout or cancellation takes its child with it
        let output = Command::new(&self.binary)
            .args(&args)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("Failed to spawn {} in {}", self.binary, working_dir.display()))?;

        Ok(EngineOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[derive(Debug, Error)]
pub enum InvocationError {
    #[error("engine did not respond within {} seconds", .0.as_secs())]
    Timeout(Duration),
    #[error("engine exited with status {code:?}: {stderr}")]
    Failed { code: Option<i32>, stderr: String },
    #[error("failed to run engine: {0:#}")]
    Spawn(anyhow::Error),
}

impl InvocationError {
    /// Text handed back to the caller in place of a response
    pub fn user_message(&self) -> String {
        match self {
            InvocationError::Timeout(limit) => format!(
                "Timeout: the engine did not respond within {} seconds.",
                limit.as_secs()
            ),
            InvocationError::Failed { stderr, .. } => format!("Engine error: {}", stderr),
            InvocationError::Spawn(e) => format!("Internal error: {:#}", e),
        }
    }

    fn metric_label(&self) -> &'static str {
        match self {
            InvocationError::Timeout(_) => "timeout",
            InvocationError::Failed { .. } => "failed",
            InvocationError::Spawn(_) => "spawn_error",
        }
    }
}

#[derive(Debug, Deserialize)]
struct EngineResponse {
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    session_id: Option<String>,
}

/// Response text plus the continuation token to store, if any
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedResponse {
    pub text: String,
    pub continuation_token: Option<String>,
}

/// Parse the engine's JSON output. Anything that is not the expected record
/// is passed through as raw text.
pub fn parse_output(stdout: &str) -> ParsedResponse {
    let raw = stdout.trim();
    match serde_json::from_str::<EngineResponse>(raw) {
        Ok(response) => ParsedResponse {
            text: response.result.unwrap_or_else(|| raw.to_string()),
            continuation_token: response.session_id.filter(|s| !s.is_empty()),
        },
        Err(_) => ParsedResponse {
            text: raw.to_string(),
            continuation_token: None,
        },
    }
}

/// Manifest file owned by a single invocation, deleted when dropped
struct EphemeralManifest {
    path: PathBuf,
}

impl EphemeralManifest {
    fn write(dir: &Path, manifest: &CapabilityManifest) -> Result<Self> {
        let path = dir.join(format!("jarvis-mcp-{}.json", uuid::Uuid::new_v4()));
        let json = serde_json::to_vec_pretty(manifest).context("Failed to serialize manifest")?;
        std::fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(Self { path })
    }
}

impl Drop for EphemeralManifest {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.path.display(), error = %e, "Failed to remove manifest file");
            }
        }
    }
}

/// Invocation settings derived from [`EngineConfig`]
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub project_dir: PathBuf,
    pub base_manifest: Option<PathBuf>,
    pub scratch_dir: PathBuf,
    pub max_turns: u32,
    pub max_budget_usd: String,
    pub timeout: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for EngineSettings {
    fn from(config: &EngineConfig) -> Self {
        Self {
            project_dir: PathBuf::from(&config.project_dir),
            base_manifest: Some(config.mcp_config_path()),
            scratch_dir: config
                .scratch_dir
                .as_ref()
                .map(PathBuf::from)
                .unwrap_or_else(std::env::temp_dir),
            max_turns: config.max_turns,
            max_budget_usd: config.max_budget_usd.clone(),
            timeout: config.timeout(),
        }
    }
}

/// Sends messages to the engine on behalf of a conversation session
pub struct EngineInvoker {
    sessions: ConversationRegistry,
    integrations: IntegrationRegistry,
    runner: Arc<dyn EngineRunner>,
    settings: EngineSettings,
}

impl EngineInvoker {
    pub fn new(
        settings: EngineSettings,
        sessions: ConversationRegistry,
        integrations: IntegrationRegistry,
        runner: Arc<dyn EngineRunner>,
    ) -> Self {
        Self {
            sessions,
            integrations,
            runner,
            settings,
        }
    }

    pub fn sessions(&self) -> &ConversationRegistry {
        &self.sessions
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Send a message and return the engine's reply. Never fails: every error
    /// is turned into readable text so all callers share one code path.
    pub async fn send(&self, session_id: &str, message: &str) -> String {
        let started = Instant::now();
        let session = self.sessions.get_or_create(session_id);
        // One invocation per session at a time, so the token read below is
        // always the one written by the previous turn.
        let _slot = session.acquire().await;
        let resume = self.sessions.continuation_token(session_id);
        metrics::set_active_sessions(self.sessions.len());

        tracing::info!(
            session = %session_id,
            resume = resume.is_some(),
            message_len = message.len(),
            "Sending message to engine"
        );

        let result = self.invoke(message, resume).await;
        metrics::record_invocation_duration(started.elapsed());

        match result {
            Ok(parsed) => {
                metrics::record_invocation("success");
                if let Some(token) = parsed.continuation_token {
                    self.sessions.update_token_for(&session, token);
                }
                tracing::info!(
                    session = %session_id,
                    response_len = parsed.text.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Engine responded"
                );
                parsed.text
            }
            Err(e) => {
                metrics::record_invocation(e.metric_label());
                match &e {
                    InvocationError::Timeout(_) => {
                        tracing::error!(session = %session_id, error = %e, "Engine timeout")
                    }
                    _ => tracing::error!(session = %session_id, error = %e, "Engine invocation failed"),
                }
                e.user_message()
            }
        }
    }

    /// Forget a conversation; the next message starts without a continuation token
    pub fn clear_session(&self, session_id: &str) {
        self.sessions.clear(session_id);
    }

    async fn invoke(&self, message: &str, resume: Option<String>) -> Result<ParsedResponse, InvocationError> {
        let active = self.integrations.active_integrations();
        let base = self
            .settings
            .base_manifest
            .as_deref()
            .and_then(CapabilityManifest::load);
        let manifest = filter_manifest(base.as_ref(), &active);

        let ephemeral = if manifest.is_empty() {
            None
        } else {
            match EphemeralManifest::write(&self.settings.scratch_dir, &manifest) {
                Ok(file) => Some(file),
                Err(e) => {
                    tracing::warn!(error = %e, "Could not write capability manifest, invoking without tools");
                    None
                }
            }
        };
        let allowed_tools = ephemeral
            .as_ref()
            .map(|_| self.integrations.tool_allowlist_string(manifest.names()));

        let request = InvocationRequest {
            prompt: message.to_string(),
            max_turns: self.settings.max_turns,
            max_budget_usd: self.settings.max_budget_usd.clone(),
            mcp_config: ephemeral.as_ref().map(|f| f.path.clone()),
            allowed_tools,
            resume,
        };

        let run = self.runner.run(&request, &self.settings.project_dir);
        let output = match tokio::time::timeout(self.settings.timeout, run).await {
            Err(_) => return Err(InvocationError::Timeout(self.settings.timeout)),
            Ok(Err(e)) => return Err(InvocationError::Spawn(e)),
            Ok(Ok(output)) => output,
        };

        let stderr = output.stderr.trim();
        if !stderr.is_empty() {
            tracing::debug!(stderr = %stderr, "Engine stderr");
        }
        if !output.success() {
            return Err(InvocationError::Failed {
                code: output.status,
                stderr: stderr.to_string(),
            });
        }

        Ok(parse_output(&output.stdout))
    }
}
