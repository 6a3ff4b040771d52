//! Prometheus export for the resilience core.
//!
//! Recording goes through the `metrics` facade; without an installed
//! recorder every call is a no-op, so library code records unconditionally
//! and the host decides whether to call [`init_metrics`].

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Duration;

use crate::resilience::circuit_breaker::CircuitState;
use crate::resilience::fallback::FallbackReason;
use llm_tutor_core::ErrorKind;

// ============================================================================
// Global Metrics Registry
// ============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Installs the Prometheus recorder. Later calls return Ok without re-installing.
pub fn init_metrics() -> Result<(), MetricsError> {
    if PROMETHEUS_HANDLE.get().is_some() {
        return Ok(());
    }

    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("tutor_operation_duration".to_string()),
            &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0],
        )
        .map_err(|e| MetricsError::Installation(e.to_string()))?
        .set_buckets_for_metric(
            Matcher::Prefix("tutor_cache_similarity".to_string()),
            &[0.5, 0.6, 0.7, 0.75, 0.8, 0.85, 0.9, 0.95, 1.0],
        )
        .map_err(|e| MetricsError::Installation(e.to_string()))?
        .install_recorder()
        .map_err(|e| MetricsError::Installation(e.to_string()))?;

    PROMETHEUS_HANDLE
        .set(handle)
        .map_err(|_| MetricsError::Installation("Handle already set".to_string()))?;

    register_metric_descriptions();

    Ok(())
}

/// Current exposition text.
pub fn render_metrics() -> Result<String, MetricsError> {
    PROMETHEUS_HANDLE
        .get()
        .map(PrometheusHandle::render)
        .ok_or(MetricsError::NotInitialized)
}

fn register_metric_descriptions() {
    describe_counter!(
        "tutor_requests_total",
        Unit::Count,
        "Calls through the execution pipeline by outcome"
    );
    describe_counter!(
        "tutor_errors_total",
        Unit::Count,
        "Failed attempts by error kind"
    );
    describe_counter!("tutor_retries_total", Unit::Count, "Retries scheduled");
    describe_counter!(
        "tutor_fallbacks_total",
        Unit::Count,
        "Degraded responses served by reason"
    );
    describe_counter!(
        "tutor_circuit_rejections_total",
        Unit::Count,
        "Calls rejected by the circuit breaker"
    );
    describe_counter!("tutor_alerts_total", Unit::Count, "Alerts raised by kind");
    describe_gauge!(
        "tutor_error_rate",
        Unit::Percent,
        "Failed attempts over total attempts"
    );
    describe_gauge!(
        "tutor_circuit_state",
        Unit::Count,
        "Circuit state: 0 closed, 1 half-open, 2 open"
    );
    describe_histogram!(
        "tutor_operation_duration_seconds",
        Unit::Seconds,
        "Wall time of a pipeline call including retries"
    );

    describe_counter!(
        "tutor_cache_lookups_total",
        Unit::Count,
        "Similarity cache lookups by result"
    );
    describe_counter!(
        "tutor_cache_evictions_total",
        Unit::Count,
        "Entries evicted by policy"
    );
    describe_gauge!("tutor_cache_entries", Unit::Count, "Entries held in the cache");
    describe_histogram!(
        "tutor_cache_similarity_score",
        Unit::Count,
        "Weighted similarity of accepted fuzzy matches"
    );
}

// ============================================================================
// Metrics Error Types
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Failed to install metrics exporter: {0}")]
    Installation(String),

    #[error("Metrics not initialized")]
    NotInitialized,
}

// ============================================================================
// Resilience Metrics
// ============================================================================

pub struct ResilienceMetrics;

impl ResilienceMetrics {
    pub fn request(outcome: &'static str, duration: Duration) {
        counter!("tutor_requests_total", "outcome" => outcome).increment(1);
        histogram!("tutor_operation_duration_seconds", "outcome" => outcome)
            .record(duration.as_secs_f64());
    }

    pub fn error(kind: ErrorKind) {
        counter!("tutor_errors_total", "kind" => kind.as_str()).increment(1);
    }

    pub fn retry() {
        counter!("tutor_retries_total").increment(1);
    }

    pub fn fallback(reason: FallbackReason) {
        counter!("tutor_fallbacks_total", "reason" => reason.as_str()).increment(1);
    }

    pub fn circuit_rejection() {
        counter!("tutor_circuit_rejections_total").increment(1);
    }

    pub fn circuit_state(breaker: &str, state: CircuitState) {
        gauge!("tutor_circuit_state", "breaker" => breaker.to_string()).set(state.as_gauge());
    }

    pub fn alert(kind: &'static str) {
        counter!("tutor_alerts_total", "alert" => kind).increment(1);
    }

    pub fn error_rate(rate: f64) {
        gauge!("tutor_error_rate").set(rate);
    }
}
