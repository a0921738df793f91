// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Prometheus metrics for the Fleetsteer controller.
//!
//! All metrics carry the namespace prefix `fleetsteer_firestoned_io`
//! (prometheus-safe version of "fleetsteer.firestoned.io") and are exposed via
//! the `/metrics` endpoint.
//!
//! The central series is the backend status gauge
//! `fleetsteer_firestoned_io_traffic_manager_backend_status_last_timestamp_seconds`:
//! after every status write it records the wall-clock time of the write,
//! labeled with the backend identity and the `Accepted` condition it
//! persisted. Because the label set includes generation, status and reason,
//! one backend accumulates several series over its lifetime; the gauge tracks
//! the label sets it emitted per backend so the whole family can be dropped
//! when the backend's metrics finalizer is removed, bounding cardinality.

use crate::crd::{CONDITION_ACCEPTED, TrafficManagerBackend};
use crate::reconcilers::status::find_condition;
use chrono::Utc;
use kube::ResourceExt;
use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::collections::{HashMap, HashSet};
use std::sync::{LazyLock, Mutex};
use std::time::Duration;
use tracing::debug;

/// Namespace prefix for all Fleetsteer metrics (prometheus-safe)
const METRICS_NAMESPACE: &str = "fleetsteer_firestoned_io";

/// Global Prometheus metrics registry
///
/// All metrics are registered in this registry and exposed via the `/metrics`
/// endpoint.
pub static METRICS_REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// ============================================================================
// Reconciliation Metrics
// ============================================================================

/// Total number of reconciliations by outcome
///
/// Labels:
/// - `status`: Outcome (`success`, `error`)
pub static RECONCILIATION_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_reconciliations_total"),
        "Total number of trafficManagerBackend reconciliations by status",
    );
    let counter = CounterVec::new(opts, &["status"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Duration of reconciliations in seconds
pub static RECONCILIATION_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    let opts = HistogramOpts::new(
        format!("{METRICS_NAMESPACE}_reconciliation_duration_seconds"),
        "Duration of trafficManagerBackend reconciliations in seconds",
    )
    .buckets(vec![0.01, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]);
    let histogram = HistogramVec::new(opts, &["status"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(histogram.clone()))
        .unwrap();
    histogram
});

// ============================================================================
// Backend Status Gauge
// ============================================================================

/// Last status-write timestamp per backend and persisted Accepted condition.
pub static BACKEND_STATUS_LAST_TIMESTAMP: LazyLock<BackendStatusGauge> =
    LazyLock::new(BackendStatusGauge::new);

/// Gauge tracking the emitted label sets per backend so that all series of a
/// backend can be removed on teardown (the prometheus crate has no
/// partial-match delete).
pub struct BackendStatusGauge {
    gauge: GaugeVec,
    emitted: Mutex<HashMap<(String, String), HashSet<[String; 4]>>>,
}

impl BackendStatusGauge {
    fn new() -> Self {
        let opts = Opts::new(
            format!("{METRICS_NAMESPACE}_traffic_manager_backend_status_last_timestamp_seconds"),
            "Last update timestamp of traffic manager backend status in seconds",
        );
        let gauge = GaugeVec::new(
            opts,
            &["namespace", "name", "generation", "condition", "status", "reason"],
        )
        .unwrap();
        METRICS_REGISTRY.register(Box::new(gauge.clone())).unwrap();
        Self {
            gauge,
            emitted: Mutex::new(HashMap::new()),
        }
    }

    /// Set the series for one persisted condition to the current time.
    pub fn emit(
        &self,
        namespace: &str,
        name: &str,
        generation: i64,
        condition: &str,
        status: &str,
        reason: &str,
    ) {
        let generation = generation.to_string();
        self.gauge
            .with_label_values(&[namespace, name, generation.as_str(), condition, status, reason])
            .set(Utc::now().timestamp_millis() as f64 / 1000.0);
        self.emitted
            .lock()
            .unwrap()
            .entry((namespace.to_string(), name.to_string()))
            .or_default()
            .insert([
                generation,
                condition.to_string(),
                status.to_string(),
                reason.to_string(),
            ]);
    }

    /// Drop every series emitted for the backend.
    pub fn forget(&self, namespace: &str, name: &str) {
        let Some(series) = self
            .emitted
            .lock()
            .unwrap()
            .remove(&(namespace.to_string(), name.to_string()))
        else {
            return;
        };
        for [generation, condition, status, reason] in series {
            let _ = self.gauge.remove_label_values(&[
                namespace,
                name,
                generation.as_str(),
                condition.as_str(),
                status.as_str(),
                reason.as_str(),
            ]);
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Record a successful reconciliation
pub fn record_reconciliation_success(duration: Duration) {
    RECONCILIATION_TOTAL.with_label_values(&["success"]).inc();
    RECONCILIATION_DURATION_SECONDS
        .with_label_values(&["success"])
        .observe(duration.as_secs_f64());
}

/// Record a failed reconciliation
pub fn record_reconciliation_error(duration: Duration) {
    RECONCILIATION_TOTAL.with_label_values(&["error"]).inc();
    RECONCILIATION_DURATION_SECONDS
        .with_label_values(&["error"])
        .observe(duration.as_secs_f64());
}

/// Emit the backend status gauge from the backend's persisted `Accepted`
/// condition.
///
/// The gauge is only written when the condition was computed against the
/// backend's current generation; a missing or stale condition means the
/// status write failed and the previous series stands.
pub fn emit_backend_status(backend: &TrafficManagerBackend) {
    let generation = backend.metadata.generation.unwrap_or_default();
    let conditions = backend
        .status
        .as_ref()
        .map(|s| s.conditions.as_slice())
        .unwrap_or_default();
    match find_condition(conditions, CONDITION_ACCEPTED) {
        Some(cond) if cond.observed_generation == Some(generation) => {
            BACKEND_STATUS_LAST_TIMESTAMP.emit(
                backend.namespace().unwrap_or_default().as_str(),
                &backend.name_any(),
                generation,
                CONDITION_ACCEPTED,
                &cond.status,
                cond.reason.as_deref().unwrap_or_default(),
            );
        }
        _ => {
            debug!(
                backend = %backend.name_any(),
                "No current Accepted condition on trafficManagerBackend, status update likely failed"
            );
        }
    }
}

/// Drop all status gauge series of a backend on teardown.
pub fn forget_backend_status(namespace: &str, name: &str) {
    BACKEND_STATUS_LAST_TIMESTAMP.forget(namespace, name);
}

/// Gather and encode all metrics in Prometheus text format
///
/// # Errors
/// Returns error if encoding fails
pub fn gather_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = METRICS_REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(format!("UTF-8 error: {e}")))
}
