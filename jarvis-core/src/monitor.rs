// ABOUTME: Periodic health checks: one background loop per eligible check, alerts on actionable results.
// ABOUTME: Each iteration runs in its own throwaway conversation session that is cleared afterwards.

use crate::config::{default_all_clear_markers, MonitoringConfig};
use crate::engine::EngineInvoker;
use crate::integrations::IntegrationRegistry;
use crate::metrics;
use crate::notify::{NotificationFanout, NotificationResult};
use anyhow::Result;
use futures_util::FutureExt;
use std::collections::{BTreeMap, BTreeSet};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;

/// A recurring prompt sent to the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Check {
    pub name: String,
    pub prompt: String,
    pub interval: Duration,
    /// Integrations the check needs; one active dependency is enough
    pub dependencies: BTreeSet<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    AllClear,
    Actionable,
    /// The engine returned nothing worth reporting
    Empty,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::AllClear => "all_clear",
            Classification::Actionable => "actionable",
            Classification::Empty => "empty",
        }
    }
}

/// Phrases whose presence in a check response means nothing needs attention
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllClearMarkers {
    markers: Vec<String>,
}

impl AllClearMarkers {
    pub fn new<'a, I>(markers: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        Self {
            markers: markers
                .into_iter()
                .map(|m| m.trim().to_lowercase())
                .filter(|m| !m.is_empty())
                .collect(),
        }
    }

    pub fn classify(&self, response: &str) -> Classification {
        let body = response.trim();
        if body.is_empty() {
            return Classification::Empty;
        }
        let lowered = body.to_lowercase();
        if self.markers.iter().any(|m| contains_phrase(&lowered, m)) {
            Classification::AllClear
        } else {
            Classification::Actionable
        }
    }
}

/// True when `phrase` occurs in `text` as whole words, so a short marker
/// like "ras" does not fire inside "infrastructure".
fn contains_phrase(text: &str, phrase: &str) -> bool {
    let is_word = |c: Option<char>| c.is_some_and(char::is_alphanumeric);
    text.match_indices(phrase).any(|(start, _)| {
        let before = text[..start].chars().next_back();
        let after = text[start + phrase.len()..].chars().next();
        !is_word(before) && !is_word(after)
    })
}

impl Default for AllClearMarkers {
    fn default() -> Self {
        let defaults = default_all_clear_markers();
        Self::new(defaults.iter().map(String::as_str))
    }
}

pub fn check_session_id(check_name: &str) -> String {
    format!("jarvis-monitor-{}", check_name)
}

pub fn format_alert(check_name: &str, body: &str) -> String {
    format!("🔔 **Monitoring - {}**\n\n{}", check_name, body)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckState {
    /// Waiting out the startup grace delay
    Pending,
    Looping,
    /// No dependency was active at start; never runs
    Skipped,
    Cancelled,
}

/// Outcome of one check iteration
#[derive(Debug, Clone)]
pub struct CheckReport {
    pub check: String,
    pub classification: Classification,
    pub response: String,
    pub notifications: Vec<NotificationResult>,
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub enabled: bool,
    pub startup_delay: Duration,
    pub markers: AllClearMarkers,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self::from(&MonitoringConfig::default())
    }
}

impl From<&MonitoringConfig> for SchedulerSettings {
    fn from(config: &MonitoringConfig) -> Self {
        Self {
            enabled: config.enabled,
            startup_delay: config.startup_delay(),
            markers: config.markers(),
        }
    }
}

/// Everything a loop needs, shared between the scheduler and its tasks
struct CheckRunner {
    invoker: Arc<EngineInvoker>,
    fanout: Arc<NotificationFanout>,
    markers: AllClearMarkers,
}

impl CheckRunner {
    async fn execute(&self, check: &Check, notify: bool) -> CheckReport {
        let session_id = check_session_id(&check.name);
        let response = self.invoker.send(&session_id, &check.prompt).await;
        let classification = self.markers.classify(&response);
        metrics::record_check_run(&check.name, classification.as_str());

        let notifications = match classification {
            Classification::Actionable if notify => {
                tracing::warn!(check = %check.name, "Check reported an issue, alerting");
                self.fanout
                    .notify_all(&format_alert(&check.name, &response))
                    .await
            }
            Classification::Actionable => Vec::new(),
            Classification::AllClear => {
                tracing::info!(check = %check.name, "Check all clear");
                Vec::new()
            }
            Classification::Empty => {
                tracing::info!(check = %check.name, "Check returned an empty response");
                Vec::new()
            }
        };

        CheckReport {
            check: check.name.clone(),
            classification,
            response,
            notifications,
        }
    }

    /// Run one iteration, containing any panic, then discard the check's session
    async fn iterate(&self, check: &Check, notify: bool) -> Result<CheckReport> {
        let outcome = AssertUnwindSafe(self.execute(check, notify))
            .catch_unwind()
            .await;
        self.invoker.clear_session(&check_session_id(&check.name));
        outcome.map_err(|_| anyhow::anyhow!("check {} panicked", check.name))
    }
}

type StateMap = Arc<Mutex<BTreeMap<String, CheckState>>>;

fn lock_states(states: &StateMap) -> MutexGuard<'_, BTreeMap<String, CheckState>> {
    states.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owns the background loops for all configured checks
pub struct CheckScheduler {
    checks: Vec<Check>,
    integrations: IntegrationRegistry,
    runner: Arc<CheckRunner>,
    enabled: bool,
    startup_delay: Duration,
    states: StateMap,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl CheckScheduler {
    pub fn new(
        checks: Vec<Check>,
        invoker: Arc<EngineInvoker>,
        fanout: Arc<NotificationFanout>,
        integrations: IntegrationRegistry,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            checks,
            integrations,
            runner: Arc::new(CheckRunner {
                invoker,
                fanout,
                markers: settings.markers,
            }),
            enabled: settings.enabled,
            startup_delay: settings.startup_delay,
            states: Arc::new(Mutex::new(BTreeMap::new())),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn checks(&self) -> &[Check] {
        &self.checks
    }

    /// Launch a loop for every eligible check. Eligibility is decided here,
    /// once; a check skipped now stays skipped until the next start.
    /// Must be called from within a tokio runtime. Returns the number of loops started.
    pub fn start(&self) -> usize {
        if !self.enabled {
            tracing::info!("Monitoring disabled");
            return 0;
        }

        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        if !tasks.is_empty() {
            tracing::warn!("Check scheduler already running");
            return tasks.len();
        }

        for check in &self.checks {
            if !self.integrations.check_is_eligible(check) {
                let deps: Vec<&str> = check.dependencies.iter().map(String::as_str).collect();
                tracing::info!(
                    check = %check.name,
                    dependencies = %deps.join(", "),
                    "Check skipped (no active dependency)"
                );
                metrics::record_check_skipped(&check.name);
                lock_states(&self.states).insert(check.name.clone(), CheckState::Skipped);
                continue;
            }

            lock_states(&self.states).insert(check.name.clone(), CheckState::Pending);
            tracing::info!(
                check = %check.name,
                interval_secs = check.interval.as_secs(),
                "Check scheduled"
            );
            tasks.push(tokio::spawn(check_loop(
                check.clone(),
                Arc::clone(&self.runner),
                Arc::clone(&self.states),
                self.startup_delay,
            )));
        }

        tracing::info!(count = tasks.len(), "Monitoring started");
        tasks.len()
    }

    /// Cancel every loop. In-flight invocations are dropped, not awaited.
    pub fn stop(&self) {
        let handles: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        if handles.is_empty() {
            return;
        }
        for handle in &handles {
            handle.abort();
        }
        for state in lock_states(&self.states).values_mut() {
            if *state != CheckState::Skipped {
                *state = CheckState::Cancelled;
            }
        }
        tracing::info!(count = handles.len(), "Monitoring stopped");
    }

    pub fn states(&self) -> BTreeMap<String, CheckState> {
        lock_states(&self.states).clone()
    }

    pub fn state(&self, check_name: &str) -> Option<CheckState> {
        lock_states(&self.states).get(check_name).copied()
    }

    pub fn skipped(&self) -> Vec<String> {
        lock_states(&self.states)
            .iter()
            .filter(|(_, s)| **s == CheckState::Skipped)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Run a single iteration of `check_name` right now, outside any loop
    pub async fn run_check_once(&self, check_name: &str, notify: bool) -> Result<CheckReport> {
        let check = self
            .checks
            .iter()
            .find(|c| c.name == check_name)
            .ok_or_else(|| anyhow::anyhow!("Unknown check: {}", check_name))?;
        self.runner.iterate(check, notify).await
    }
}

impl Drop for CheckScheduler {
    fn drop(&mut self) {
        let tasks = self.tasks.get_mut().unwrap_or_else(PoisonError::into_inner);
        for handle in tasks.drain(..) {
            handle.abort();
        }
    }
}

async fn check_loop(check: Check, runner: Arc<CheckRunner>, states: StateMap, startup_delay: Duration) {
    tokio::time::sleep(startup_delay).await;
    lock_states(&states).insert(check.name.clone(), CheckState::Looping);

    loop {
        tracing::debug!(check = %check.name, "Running check");
        if let Err(e) = runner.iterate(&check, true).await {
            tracing::error!(check = %check.name, error = %e, "Check iteration failed");
        }
        tokio::time::sleep(check.interval).await;
    }
}
