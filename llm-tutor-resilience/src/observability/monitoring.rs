//! In-process error accounting and the observability hooks fed from it.

use llm_tutor_core::{ClassifiedError, ErrorKind, RequestContext};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use super::alerting::{Alert, AlertKind, AlertReceiver};
use super::metrics::ResilienceMetrics;
use crate::resilience::circuit_breaker::StateTransition;
use crate::resilience::fallback::FallbackReason;

/// Alerts kept for inspection.
const RECENT_ALERT_LIMIT: usize = 100;

/// Receives every classified failure with the context of the call.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, error: &ClassifiedError, context: &RequestContext);
}

/// Receives a metrics snapshot after every completed call.
pub trait MetricsCollector: Send + Sync {
    fn collect(&self, snapshot: &ErrorMetricsSnapshot);
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// Error rate at or above which `high_error_rate` fires
    pub error_rate_threshold: f64,
    /// Attempts required before the error rate is judged
    pub min_requests_for_alert: u64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            error_rate_threshold: 0.1,
            min_requests_for_alert: 10,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ErrorMetricsSnapshot {
    /// Attempts made against the unit of work
    pub total_requests: u64,
    pub total_errors: u64,
    pub error_rate: f64,
    pub errors_by_type: BTreeMap<ErrorKind, u64>,
    /// Mean retries per finished call
    pub avg_retry_count: f64,
    /// Calls that succeeded after at least one failed attempt
    pub successful_recoveries: u64,
    pub fallback_triggers: u64,
    pub circuit_rejections: u64,
    pub completed_calls: u64,
}

#[derive(Debug, Default)]
struct MetricsState {
    total_requests: u64,
    total_errors: u64,
    errors_by_type: BTreeMap<ErrorKind, u64>,
    total_retries: u64,
    completed_calls: u64,
    successful_recoveries: u64,
    fallback_triggers: u64,
    circuit_rejections: u64,
    high_error_rate_active: bool,
}

impl MetricsState {
    fn error_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.total_errors as f64 / self.total_requests as f64
        }
    }
}

/// Counters for one pipeline. All monotonic except the derived error rate.
#[derive(Debug, Default)]
pub struct ErrorMetrics {
    state: Mutex<MetricsState>,
}

impl ErrorMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MetricsState> {
        // counters stay consistent even if a holder panicked
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn record_attempt_success(&self) {
        let mut state = self.lock();
        state.total_requests += 1;
        ResilienceMetrics::error_rate(state.error_rate());
    }

    /// Returns the new error rate.
    pub fn record_attempt_failure(&self, kind: ErrorKind) -> f64 {
        let mut state = self.lock();
        state.total_requests += 1;
        state.total_errors += 1;
        *state.errors_by_type.entry(kind).or_insert(0) += 1;
        let rate = state.error_rate();
        ResilienceMetrics::error_rate(rate);
        rate
    }

    /// A call finished after `attempts` attempts, however it ended.
    pub fn record_call_completed(&self, attempts: u32, recovered: bool) {
        let mut state = self.lock();
        state.completed_calls += 1;
        state.total_retries += u64::from(attempts.saturating_sub(1));
        if recovered {
            state.successful_recoveries += 1;
        }
    }

    pub fn record_fallback(&self) {
        self.lock().fallback_triggers += 1;
    }

    pub fn record_circuit_rejection(&self) {
        self.lock().circuit_rejections += 1;
    }

    pub fn snapshot(&self) -> ErrorMetricsSnapshot {
        let state = self.lock();
        ErrorMetricsSnapshot {
            total_requests: state.total_requests,
            total_errors: state.total_errors,
            error_rate: state.error_rate(),
            errors_by_type: state.errors_by_type.clone(),
            avg_retry_count: if state.completed_calls == 0 {
                0.0
            } else {
                state.total_retries as f64 / state.completed_calls as f64
            },
            successful_recoveries: state.successful_recoveries,
            fallback_triggers: state.fallback_triggers,
            circuit_rejections: state.circuit_rejections,
            completed_calls: state.completed_calls,
        }
    }

    /// Fires once when the threshold is crossed and re-arms once the rate drops below it.
    fn check_error_rate(&self, config: &MonitoringConfig) -> Option<Alert> {
        let mut state = self.lock();
        let rate = state.error_rate();
        let breached = state.total_requests >= config.min_requests_for_alert
            && rate >= config.error_rate_threshold;

        match (breached, state.high_error_rate_active) {
            (true, false) => {
                state.high_error_rate_active = true;
                Some(
                    Alert::new(
                        AlertKind::HighErrorRate,
                        format!(
                            "error rate {:.2} reached threshold {:.2}",
                            rate, config.error_rate_threshold
                        ),
                    )
                    .with_detail("error_rate", rate)
                    .with_detail("total_requests", state.total_requests)
                    .with_detail("total_errors", state.total_errors),
                )
            }
            (false, true) => {
                state.high_error_rate_active = false;
                None
            }
            _ => None,
        }
    }
}

/// Optional hooks invoked synchronously on qualifying events.
#[derive(Clone, Default)]
pub struct ObservabilityHooks {
    pub error_reporter: Option<Arc<dyn ErrorReporter>>,
    pub metrics_collector: Option<Arc<dyn MetricsCollector>>,
    pub alert_receivers: Vec<Arc<dyn AlertReceiver>>,
}

impl ObservabilityHooks {
    pub fn with_error_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.error_reporter = Some(reporter);
        self
    }

    pub fn with_metrics_collector(mut self, collector: Arc<dyn MetricsCollector>) -> Self {
        self.metrics_collector = Some(collector);
        self
    }

    pub fn with_alert_receiver(mut self, receiver: Arc<dyn AlertReceiver>) -> Self {
        self.alert_receivers.push(receiver);
        self
    }
}

impl fmt::Debug for ObservabilityHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObservabilityHooks")
            .field("error_reporter", &self.error_reporter.is_some())
            .field("metrics_collector", &self.metrics_collector.is_some())
            .field("alert_receivers", &self.alert_receivers.len())
            .finish()
    }
}

/// Turns pipeline events into counters, alerts and hook calls.
#[derive(Debug)]
pub struct Monitor {
    config: MonitoringConfig,
    metrics: ErrorMetrics,
    hooks: ObservabilityHooks,
    recent_alerts: Mutex<VecDeque<Alert>>,
}

impl Monitor {
    pub fn new(config: MonitoringConfig, hooks: ObservabilityHooks) -> Self {
        Self {
            config,
            metrics: ErrorMetrics::new(),
            hooks,
            recent_alerts: Mutex::new(VecDeque::new()),
        }
    }

    pub fn metrics(&self) -> &ErrorMetrics {
        &self.metrics
    }

    pub fn snapshot(&self) -> ErrorMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Most recent alerts, oldest first.
    pub fn recent_alerts(&self) -> Vec<Alert> {
        self.recent_alerts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .cloned()
            .collect()
    }

    pub fn attempt_succeeded(&self) {
        self.metrics.record_attempt_success();
        if let Some(alert) = self.metrics.check_error_rate(&self.config) {
            self.raise(alert);
        }
    }

    pub fn attempt_failed(&self, error: &ClassifiedError, context: &RequestContext) {
        self.metrics.record_attempt_failure(error.kind());
        ResilienceMetrics::error(error.kind());

        if let Some(reporter) = &self.hooks.error_reporter {
            reporter.report(error, context);
        }
        if let Some(alert) = self.metrics.check_error_rate(&self.config) {
            self.raise(alert);
        }
    }

    pub fn retry_scheduled(&self) {
        ResilienceMetrics::retry();
    }

    pub fn circuit_transition(&self, breaker: &str, transition: StateTransition) {
        if transition.opened() {
            self.raise(
                Alert::new(
                    AlertKind::CircuitBreakerOpen,
                    format!("circuit breaker '{breaker}' opened"),
                )
                .with_detail("breaker", breaker)
                .with_detail("from", transition.from.as_str()),
            );
        }
    }

    pub fn circuit_rejected(&self) {
        self.metrics.record_circuit_rejection();
        ResilienceMetrics::circuit_rejection();
    }

    pub fn fallback_activated(&self, reason: FallbackReason, error: &ClassifiedError) {
        self.metrics.record_fallback();
        ResilienceMetrics::fallback(reason);
        self.raise(
            Alert::new(
                AlertKind::FallbackActivated,
                format!("served degraded response after {}", error.kind()),
            )
            .with_detail("reason", reason.as_str())
            .with_detail("error_kind", error.kind().as_str())
            .with_detail("operation_id", &error.context().operation_id),
        );
    }

    /// A call is over; publish the snapshot to the collector.
    pub fn call_completed(&self, attempts: u32, recovered: bool) {
        self.metrics.record_call_completed(attempts, recovered);
        if let Some(collector) = &self.hooks.metrics_collector {
            collector.collect(&self.metrics.snapshot());
        }
    }

    pub fn raise(&self, alert: Alert) {
        ResilienceMetrics::alert(alert.kind.as_str());
        for receiver in &self.hooks.alert_receivers {
            receiver.receive(&alert);
        }

        let mut recent = self
            .recent_alerts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if recent.len() == RECENT_ALERT_LIMIT {
            recent.pop_front();
        }
        recent.push_back(alert);
    }
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new(MonitoringConfig::default(), ObservabilityHooks::default())
    }
}
