// ABOUTME: Shared fakes for the integration suites: scripted engine runner and recording sink
// ABOUTME: Lets tests drive the invoker and scheduler without spawning real processes

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use jarvis_core::engine::{EngineOutput, EngineRunner, EngineSettings, InvocationRequest};
use jarvis_core::integrations::{default_descriptors, IntegrationRegistry, StaticEnvironment};
use jarvis_core::notify::ChannelSink;
use jarvis_core::session::ConversationRegistry;
use jarvis_core::EngineInvoker;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn json_output(result: &str, token: &str) -> EngineOutput {
    EngineOutput {
        status: Some(0),
        stdout: serde_json::json!({ "result": result, "session_id": token }).to_string(),
        stderr: String::new(),
    }
}

/// What the runner saw for one invocation
#[derive(Debug, Clone)]
pub struct RecordedRun {
    pub request: InvocationRequest,
    /// Contents of the manifest file while the engine was "running"
    pub manifest: Option<String>,
}

/// Engine runner that replays scripted outputs and records every request
#[derive(Clone, Default)]
pub struct FakeRunner {
    runs: Arc<Mutex<Vec<RecordedRun>>>,
    script: Arc<Mutex<VecDeque<Result<EngineOutput, String>>>>,
    delay: Option<Duration>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn push(&self, output: EngineOutput) -> &Self {
        self.script.lock().unwrap().push_back(Ok(output));
        self
    }

    pub fn push_spawn_error(&self, message: &str) -> &Self {
        self.script.lock().unwrap().push_back(Err(message.to_string()));
        self
    }

    pub fn runs(&self) -> Vec<RecordedRun> {
        self.runs.lock().unwrap().clone()
    }

    pub fn requests(&self) -> Vec<InvocationRequest> {
        self.runs().into_iter().map(|r| r.request).collect()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.prompt).collect()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EngineRunner for FakeRunner {
    async fn run(&self, request: &InvocationRequest, _working_dir: &Path) -> Result<EngineOutput> {
        let manifest = request
            .mcp_config
            .as_ref()
            .and_then(|p| std::fs::read_to_string(p).ok());
        self.runs.lock().unwrap().push(RecordedRun {
            request: request.clone(),
            manifest,
        });

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Ok(output)) => Ok(output),
            Some(Err(message)) => Err(anyhow::anyhow!(message)),
            None => Ok(json_output("ok", "tok-default")),
        }
    }
}

/// Sink that records every message it receives, optionally failing
#[derive(Clone)]
pub struct RecordingSink {
    name: String,
    fail: bool,
    pub messages: Arc<Mutex<Vec<String>>>,
}

impl RecordingSink {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fail: false,
            messages: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn failing(name: &str) -> Self {
        Self {
            fail: true,
            ..Self::new(name)
        }
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChannelSink for RecordingSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deliver(&self, message: &str) -> Result<()> {
        self.messages.lock().unwrap().push(message.to_string());
        if self.fail {
            anyhow::bail!("{} is down", self.name);
        }
        Ok(())
    }
}

pub fn settings(project_dir: &Path, timeout: Duration) -> EngineSettings {
    EngineSettings {
        project_dir: project_dir.to_path_buf(),
        base_manifest: Some(project_dir.join("mcp.json")),
        scratch_dir: project_dir.to_path_buf(),
        max_turns: 10,
        max_budget_usd: "1.00".to_string(),
        timeout,
    }
}

pub fn registry(env: StaticEnvironment) -> IntegrationRegistry {
    IntegrationRegistry::new(default_descriptors(), Arc::new(env))
}

pub fn invoker(project_dir: &Path, env: StaticEnvironment, runner: &FakeRunner) -> EngineInvoker {
    EngineInvoker::new(
        settings(project_dir, Duration::from_secs(300)),
        ConversationRegistry::new(),
        registry(env),
        Arc::new(runner.clone()),
    )
}

pub fn write_manifest(project_dir: &Path) -> PathBuf {
    let path = project_dir.join("mcp.json");
    let manifest = serde_json::json!({
        "mcpServers": {
            "homeassistant": { "command": "ha-mcp", "args": ["--stdio"] },
            "git": { "command": "git-mcp" },
            "kubernetes": { "command": "kubectl-mcp" }
        }
    });
    std::fs::write(&path, manifest.to_string()).unwrap();
    path
}

/// Manifest files left behind in the scratch directory
pub fn leftover_manifests(scratch_dir: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(scratch_dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("jarvis-mcp-"))
        })
        .collect()
}
