// ABOUTME: Test helpers for the binary crate: echoing engine runner and dispatcher wiring
// ABOUTME: The echo runner replies "echo: <prompt>" and hands out sequential continuation tokens

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use jarvis::app::Dispatcher;
use jarvis::config::Config;
use jarvis::engine::{EngineOutput, EngineRunner, InvocationRequest};
use jarvis::integrations::StaticEnvironment;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

#[derive(Clone, Default)]
pub struct EchoRunner {
    pub requests: Arc<Mutex<Vec<InvocationRequest>>>,
}

impl EchoRunner {
    pub fn requests(&self) -> Vec<InvocationRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl EngineRunner for EchoRunner {
    async fn run(&self, request: &InvocationRequest, _working_dir: &Path) -> Result<EngineOutput> {
        let mut requests = self.requests.lock().unwrap();
        requests.push(request.clone());
        let token = format!("tok-{}", requests.len());
        Ok(EngineOutput {
            status: Some(0),
            stdout: serde_json::json!({
                "result": format!("echo: {}", request.prompt),
                "session_id": token,
            })
            .to_string(),
            stderr: String::new(),
        })
    }
}

pub struct TestDispatcher {
    pub dir: TempDir,
    pub runner: EchoRunner,
    pub dispatcher: Dispatcher,
}

pub fn dispatcher() -> TestDispatcher {
    let dir = TempDir::new().unwrap();
    let mut config = Config::default();
    config.engine.project_dir = dir.path().to_string_lossy().into_owned();
    config.engine.scratch_dir = Some(dir.path().to_string_lossy().into_owned());
    config.monitoring.enabled = false;

    let runner = EchoRunner::default();
    let dispatcher = Dispatcher::with_parts(
        config,
        Arc::new(runner.clone()),
        Arc::new(StaticEnvironment::new()),
    );
    TestDispatcher {
        dir,
        runner,
        dispatcher,
    }
}
