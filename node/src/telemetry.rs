// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use std::sync::OnceLock;

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize telemetry (logs + metrics)
pub fn init_telemetry() {
    // 1. Logs
    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "idstate_node=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .try_init();

    // 2. Metrics (Prometheus)
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            if PROM_HANDLE.set(handle).is_err() {
                tracing::warn!("Prometheus handle already set. Telemetry re-initialized?");
            }
        }
        Err(e) => tracing::warn!("Prometheus recorder not installed: {}", e),
    }

    metrics::describe_counter!("idstate_claims_issued_total", "Claims inserted into claims trees");
    metrics::describe_counter!("idstate_revocations_total", "Nonces newly revoked");
    metrics::describe_counter!("idstate_transitions_total", "State transitions by resulting status");
    metrics::describe_histogram!("idstate_transition_duration_seconds", "Time from compute start to pending record");
    metrics::describe_counter!("idstate_publish_attempts_total", "Delivery attempts to the reverse hash service");
    metrics::describe_counter!("idstate_publish_degraded_total", "Publish jobs dropped as degraded");
    metrics::describe_gauge!("idstate_publish_queue_depth", "Publish jobs waiting for delivery");

    metrics::gauge!("idstate_node_up", 1.0);
}

/// Get the Prometheus handle to render metrics
pub fn get_metrics() -> String {
    if let Some(handle) = PROM_HANDLE.get() {
        handle.render()
    } else {
        "# metrics not initialized".to_string()
    }
}
