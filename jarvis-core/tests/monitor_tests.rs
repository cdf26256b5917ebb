// ABOUTME: Tests for CheckScheduler - eligibility, grace delay, classification, alerting and cancellation
// ABOUTME: Runs on paused tokio time so minute-scale intervals complete instantly

mod common;

use async_trait::async_trait;
use common::{invoker, json_output, FakeRunner, RecordingSink};
use jarvis_core::integrations::{default_descriptors, IntegrationRegistry, StaticEnvironment};
use jarvis_core::monitor::{
    check_session_id, AllClearMarkers, Check, CheckScheduler, CheckState, Classification,
    SchedulerSettings,
};
use jarvis_core::notify::{ChannelSink, NotificationFanout};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

const GRACE: Duration = Duration::from_secs(60);

fn check(name: &str, minutes: u64, deps: &[&str]) -> Check {
    Check {
        name: name.to_string(),
        prompt: format!("Vérifie {}", name),
        interval: Duration::from_secs(minutes * 60),
        dependencies: deps.iter().map(|d| d.to_string()).collect::<BTreeSet<_>>(),
    }
}

struct Harness {
    _dir: TempDir,
    runner: FakeRunner,
    sink: RecordingSink,
    scheduler: CheckScheduler,
}

fn harness(checks: Vec<Check>, env: StaticEnvironment, enabled: bool) -> Harness {
    harness_with_sinks(checks, env, enabled, Vec::new())
}

fn harness_with_sinks(
    checks: Vec<Check>,
    env: StaticEnvironment,
    enabled: bool,
    extra: Vec<Arc<dyn ChannelSink>>,
) -> Harness {
    let dir = TempDir::new().unwrap();
    let runner = FakeRunner::new();
    let sink = RecordingSink::new("discord");
    let integrations = IntegrationRegistry::new(default_descriptors(), Arc::new(env.clone()));
    let invoker = Arc::new(invoker(dir.path(), env, &runner));

    let mut fanout = NotificationFanout::new().with_sink(Arc::new(sink.clone()));
    for s in extra {
        fanout.register(s);
    }

    let scheduler = CheckScheduler::new(
        checks,
        invoker,
        Arc::new(fanout),
        integrations,
        SchedulerSettings {
            enabled,
            startup_delay: GRACE,
            markers: AllClearMarkers::default(),
        },
    );
    Harness {
        _dir: dir,
        runner,
        sink,
        scheduler,
    }
}

fn ha_env() -> StaticEnvironment {
    StaticEnvironment::new().with_var("HA_TOKEN", "secret")
}

// =============================================================================
// Eligibility and grace delay
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_eligible_check_runs_after_grace_delay() {
    let h = harness(vec![check("homeassistant", 30, &["homeassistant"])], ha_env(), true);

    assert_eq!(h.scheduler.start(), 1);
    assert_eq!(h.scheduler.state("homeassistant"), Some(CheckState::Pending));

    tokio::time::sleep(GRACE - Duration::from_secs(1)).await;
    assert!(h.runner.requests().is_empty(), "nothing runs during the grace delay");

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(h.runner.prompts(), vec!["Vérifie homeassistant".to_string()]);
    assert_eq!(h.scheduler.state("homeassistant"), Some(CheckState::Looping));
}

#[tokio::test(start_paused = true)]
async fn test_check_without_active_dependency_is_skipped() {
    let h = harness(
        vec![
            check("homeassistant", 30, &["homeassistant"]),
            check("git-status", 15, &["git"]),
        ],
        StaticEnvironment::new().with_var("GIT_REPOS", "/srv/git"),
        true,
    );

    assert_eq!(h.scheduler.start(), 1);
    assert_eq!(h.scheduler.skipped(), vec!["homeassistant".to_string()]);
    assert_eq!(h.scheduler.state("homeassistant"), Some(CheckState::Skipped));

    tokio::time::sleep(Duration::from_secs(2 * 3600)).await;
    assert!(h
        .runner
        .prompts()
        .iter()
        .all(|p| p != "Vérifie homeassistant"));
    assert!(!h.runner.prompts().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_any_single_dependency_is_enough() {
    let h = harness(
        vec![check("cluster-health", 15, &["kubernetes", "grafana-prometheus"])],
        StaticEnvironment::new().with_var("PROMETHEUS_URL", "http://prometheus:9090"),
        true,
    );
    assert_eq!(h.scheduler.start(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_check_without_dependencies_always_runs() {
    let h = harness(vec![check("heartbeat", 5, &[])], StaticEnvironment::new(), true);
    assert_eq!(h.scheduler.start(), 1);
    tokio::time::sleep(GRACE + Duration::from_secs(1)).await;
    assert_eq!(h.runner.requests().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_disabled_monitoring_starts_nothing() {
    let h = harness(vec![check("homeassistant", 30, &["homeassistant"])], ha_env(), false);

    assert_eq!(h.scheduler.start(), 0);
    tokio::time::sleep(Duration::from_secs(3600)).await;
    assert!(h.runner.requests().is_empty());
    assert!(h.scheduler.states().is_empty());
}

// =============================================================================
// Classification and alerting
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_all_clear_response_suppresses_alert() {
    let h = harness(vec![check("homeassistant", 30, &["homeassistant"])], ha_env(), true);
    h.runner.push(json_output("RAS. Tout va bien à la maison.", "tok"));

    h.scheduler.start();
    tokio::time::sleep(GRACE + Duration::from_secs(1)).await;

    assert_eq!(h.runner.requests().len(), 1);
    assert!(h.sink.messages().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_actionable_response_alerts_exactly_once() {
    let h = harness(vec![check("homeassistant", 30, &["homeassistant"])], ha_env(), true);
    h.runner.push(json_output("La porte du garage est ouverte depuis 3h.", "tok"));

    h.scheduler.start();
    tokio::time::sleep(GRACE + Duration::from_secs(1)).await;

    assert_eq!(
        h.sink.messages(),
        vec!["🔔 **Monitoring - homeassistant**\n\nLa porte du garage est ouverte depuis 3h.".to_string()]
    );
}

#[tokio::test(start_paused = true)]
async fn test_each_iteration_uses_a_fresh_session() {
    let h = harness(vec![check("homeassistant", 30, &["homeassistant"])], ha_env(), true);
    h.runner.push(json_output("RAS", "tok-1"));
    h.runner.push(json_output("RAS", "tok-2"));

    h.scheduler.start();
    tokio::time::sleep(GRACE + Duration::from_secs(30 * 60 + 1)).await;

    let requests = h.runner.requests();
    assert_eq!(requests.len(), 2);
    assert!(requests.iter().all(|r| r.resume.is_none()));
}

#[tokio::test(start_paused = true)]
async fn test_loop_repeats_at_interval() {
    let h = harness(vec![check("fluxcd", 10, &["homeassistant"])], ha_env(), true);

    h.scheduler.start();
    // Iterations at 1, 11, 21 and 31 minutes
    tokio::time::sleep(GRACE + Duration::from_secs(30 * 60 + 1)).await;

    assert_eq!(h.runner.requests().len(), 4);
}

struct PanickingSink;

#[async_trait]
impl ChannelSink for PanickingSink {
    fn name(&self) -> &str {
        "broken"
    }

    async fn deliver(&self, _message: &str) -> anyhow::Result<()> {
        panic!("sink exploded");
    }
}

#[tokio::test(start_paused = true)]
async fn test_fault_in_iteration_does_not_kill_the_loop() {
    let h = harness_with_sinks(
        vec![check("homeassistant", 30, &["homeassistant"])],
        ha_env(),
        true,
        vec![Arc::new(PanickingSink)],
    );
    h.runner.push(json_output("Alerte: capteur hors ligne", "tok-1"));
    h.runner.push(json_output("Alerte: capteur hors ligne", "tok-2"));

    h.scheduler.start();
    tokio::time::sleep(GRACE + Duration::from_secs(30 * 60 + 1)).await;

    assert_eq!(h.runner.requests().len(), 2, "loop survived the panic");
    assert_eq!(h.scheduler.state("homeassistant"), Some(CheckState::Looping));
}

// =============================================================================
// Cancellation and manual runs
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_stop_cancels_loops() {
    let h = harness(vec![check("homeassistant", 30, &["homeassistant"])], ha_env(), true);

    h.scheduler.start();
    tokio::time::sleep(GRACE + Duration::from_secs(1)).await;
    assert_eq!(h.runner.requests().len(), 1);

    h.scheduler.stop();
    assert_eq!(h.scheduler.state("homeassistant"), Some(CheckState::Cancelled));

    tokio::time::sleep(Duration::from_secs(5 * 3600)).await;
    assert_eq!(h.runner.requests().len(), 1);
}

#[tokio::test]
async fn test_run_check_once_without_notify() {
    let h = harness(vec![check("homeassistant", 30, &["homeassistant"])], ha_env(), true);
    h.runner.push(json_output("Le chauffage est en panne", "tok"));

    let report = h.scheduler.run_check_once("homeassistant", false).await.unwrap();

    assert_eq!(report.classification, Classification::Actionable);
    assert!(report.notifications.is_empty());
    assert!(h.sink.messages().is_empty());
    assert_eq!(h.runner.requests().len(), 1);
}

#[tokio::test]
async fn test_run_check_once_with_notify_reports_sinks() {
    let h = harness(vec![check("homeassistant", 30, &["homeassistant"])], ha_env(), true);
    h.runner.push(json_output("Le chauffage est en panne", "tok"));

    let report = h.scheduler.run_check_once("homeassistant", true).await.unwrap();

    assert_eq!(report.notifications.len(), 1);
    assert!(report.notifications[0].is_ok());
    assert_eq!(h.sink.messages().len(), 1);
}

#[tokio::test]
async fn test_run_unknown_check_is_error() {
    let h = harness(vec![], ha_env(), true);
    assert!(h.scheduler.run_check_once("nope", false).await.is_err());
}

#[test]
fn test_check_session_naming() {
    assert_eq!(check_session_id("cluster-health"), "jarvis-monitor-cluster-health");
}
