// ABOUTME: Prometheus metrics for engine invocations, health checks and notifications
// ABOUTME: Recording is a no-op until init_metrics installs the global recorder

use anyhow::{Context, Result};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Install the global Prometheus recorder. Call once from the binary.
pub fn init_metrics() -> Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install Prometheus recorder")
}

/// outcome: "success", "timeout", "failed", "spawn_error"
pub fn record_invocation(outcome: &'static str) {
    counter!("jarvis_engine_invocations_total", "outcome" => outcome).increment(1);
}

pub fn record_invocation_duration(duration: Duration) {
    histogram!("jarvis_engine_invocation_seconds").record(duration.as_secs_f64());
}

pub fn record_check_run(check: &str, classification: &'static str) {
    counter!(
        "jarvis_check_runs_total",
        "check" => check.to_string(),
        "classification" => classification
    )
    .increment(1);
}

pub fn record_check_skipped(check: &str) {
    counter!("jarvis_checks_skipped_total", "check" => check.to_string()).increment(1);
}

pub fn record_notification(sink: &str, ok: bool) {
    let outcome = if ok { "ok" } else { "error" };
    counter!(
        "jarvis_notifications_total",
        "sink" => sink.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn set_active_integrations(count: usize) {
    gauge!("jarvis_active_integrations").set(count as f64);
}

pub fn set_active_sessions(count: usize) {
    gauge!("jarvis_active_sessions").set(count as f64);
}
