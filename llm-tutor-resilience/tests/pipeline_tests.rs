use anyhow::anyhow;
use async_trait::async_trait;
use llm_tutor_core::{
    ClassifiedError, ErrorContext, ErrorKind, ErrorOrigin, QualityChecker, RequestContext,
    ResponseGenerator,
};
use llm_tutor_resilience::observability::{
    Alert, AlertKind, AlertReceiver, ErrorMetricsSnapshot, MetricsCollector, MonitoringConfig,
    ObservabilityHooks,
};
use llm_tutor_resilience::resilience::{
    BackoffStrategy, CircuitBreakerConfig, CircuitState, FallbackConfig, FallbackReason,
    RetryConfig, RetryKey,
};
use llm_tutor_resilience::{Outcome, ResilientExecutor};
use pretty_assertions::assert_eq;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tokio_test::{assert_err, assert_ok};

// ===== Helpers =====

#[derive(Default)]
struct RecordingReceiver {
    alerts: Mutex<Vec<AlertKind>>,
}

impl RecordingReceiver {
    fn kinds(&self) -> Vec<AlertKind> {
        self.alerts.lock().unwrap().clone()
    }
}

impl AlertReceiver for RecordingReceiver {
    fn receive(&self, alert: &Alert) {
        self.alerts.lock().unwrap().push(alert.kind);
    }
}

#[derive(Default)]
struct RecordingCollector {
    snapshots: Mutex<Vec<ErrorMetricsSnapshot>>,
}

impl MetricsCollector for RecordingCollector {
    fn collect(&self, snapshot: &ErrorMetricsSnapshot) {
        self.snapshots.lock().unwrap().push(snapshot.clone());
    }
}

struct FailingGenerator;

#[async_trait]
impl ResponseGenerator for FailingGenerator {
    async fn generate(
        &self,
        _context: &RequestContext,
        _error: &ClassifiedError,
    ) -> anyhow::Result<String> {
        Err(anyhow!("template store unavailable"))
    }
}

struct FixedScore(f64);

impl QualityChecker for FixedScore {
    fn score(&self, _response: &str, _context: &RequestContext) -> f64 {
        self.0
    }
}

fn fast_retry(max_retries: u32) -> RetryConfig {
    RetryConfig::default()
        .with_max_retries(max_retries)
        .with_base_delay(Duration::from_millis(100))
        .with_strategy(BackoffStrategy::Exponential)
        .with_jitter_factor(0.0)
}

fn context() -> RequestContext {
    RequestContext::new()
        .with_level("intermediate")
        .with_case_type("cardiology")
}

// ===== Retry scenarios =====

#[tokio::test(start_paused = true)]
async fn test_three_attempts_with_exponential_delays() {
    let executor = ResilientExecutor::builder("provider")
        .retry(fast_retry(2))
        .build()
        .unwrap();
    let calls = AtomicU32::new(0);
    let invoked_at = Mutex::new(Vec::new());

    let outcome = executor
        .execute(
            || {
                invoked_at.lock().unwrap().push(Instant::now());
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n < 3 {
                        Err(anyhow!("connection reset by peer"))
                    } else {
                        Ok("explanation")
                    }
                }
            },
            &context(),
            "explain",
            "tutor-1",
        )
        .await;

    assert_eq!(assert_ok!(outcome), Outcome::Completed("explanation"));
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    let times = invoked_at.lock().unwrap().clone();
    assert_eq!(times[1] - times[0], Duration::from_millis(100));
    assert_eq!(times[2] - times[1], Duration::from_millis(200));

    let metrics = executor.metrics();
    assert_eq!(metrics.total_requests, 3);
    assert_eq!(metrics.total_errors, 2);
    assert_eq!(metrics.errors_by_type.get(&ErrorKind::Network), Some(&2));
    assert_eq!(metrics.successful_recoveries, 1);
    assert_eq!(metrics.avg_retry_count, 2.0);
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_surface_error_without_fallback() {
    let executor = ResilientExecutor::builder("provider")
        .retry(fast_retry(2))
        .fallback(FallbackConfig::disabled())
        .build()
        .unwrap();
    let calls = AtomicU32::new(0);

    let result: Result<Outcome<()>, _> = executor
        .execute(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(anyhow!("upstream connection refused")) }
            },
            &context(),
            "explain",
            "tutor-1",
        )
        .await;

    let error = assert_err!(result);
    assert_eq!(error.kind(), ErrorKind::Network);
    assert_eq!(error.context().attempt, 3);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_quota_errors_retried_at_most_twice() {
    let executor = ResilientExecutor::builder("provider")
        .retry(fast_retry(5))
        .fallback(FallbackConfig::disabled())
        .build()
        .unwrap();
    let calls = AtomicU32::new(0);

    let result: Result<Outcome<()>, _> = executor
        .execute(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err(ClassifiedError::new(
                        ErrorKind::Quota,
                        "monthly budget spent",
                        ErrorContext::default(),
                    ))
                }
            },
            &context(),
            "explain",
            "tutor-1",
        )
        .await;

    assert_eq!(assert_err!(result).kind(), ErrorKind::Quota);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_structural_errors_are_not_retried() {
    let executor = ResilientExecutor::builder("provider")
        .retry(fast_retry(3))
        .build()
        .unwrap();
    let calls = AtomicU32::new(0);

    let result: Result<Outcome<()>, _> = executor
        .execute(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(anyhow!("maximum context length is 8192 tokens")) }
            },
            &context(),
            "explain",
            "tutor-1",
        )
        .await;

    // not in the fallback error types and only one attempt was made
    assert_eq!(assert_err!(result).kind(), ErrorKind::ContextTooLong);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_is_classified_as_network() {
    let executor = ResilientExecutor::builder("provider")
        .retry(fast_retry(0))
        .fallback(FallbackConfig::disabled())
        .operation_timeout(Duration::from_millis(50))
        .build()
        .unwrap();

    let result: Result<Outcome<()>, _> = executor
        .execute(
            || async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                Ok::<_, anyhow::Error>(())
            },
            &context(),
            "explain",
            "tutor-1",
        )
        .await;

    let error = assert_err!(result);
    assert_eq!(error.kind(), ErrorKind::Network);
    assert_eq!(error.origin(), ErrorOrigin::Timeout);
}

// ===== Circuit breaker scenarios =====

#[tokio::test]
async fn test_fourth_call_rejected_without_invoking() {
    let receiver = Arc::new(RecordingReceiver::default());
    let executor = ResilientExecutor::builder("provider")
        .retry(fast_retry(0))
        .circuit_breaker(CircuitBreakerConfig::default().with_failure_threshold(3))
        .fallback(FallbackConfig::disabled())
        .hooks(ObservabilityHooks::default().with_alert_receiver(receiver.clone()))
        .build()
        .unwrap();
    let calls = AtomicU32::new(0);

    for _ in 0..3 {
        let result: Result<Outcome<()>, _> = executor
            .execute(
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(anyhow!("503 service unavailable: network")) }
                },
                &context(),
                "explain",
                "tutor-1",
            )
            .await;
        assert_err!(result);
    }
    assert_eq!(executor.breaker().state().await, CircuitState::Open);

    let result: Result<Outcome<()>, _> = executor
        .execute(
            || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, anyhow::Error>(()) }
            },
            &context(),
            "explain",
            "tutor-1",
        )
        .await;

    let error = assert_err!(result);
    assert!(error.is_circuit_open());
    assert_eq!(error.kind(), ErrorKind::Network);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(executor.metrics().circuit_rejections, 1);
    assert!(receiver.kinds().contains(&AlertKind::CircuitBreakerOpen));
}

#[tokio::test]
async fn test_open_circuit_serves_fallback() {
    let executor = ResilientExecutor::builder("provider")
        .retry(fast_retry(0))
        .circuit_breaker(CircuitBreakerConfig::default().with_failure_threshold(1))
        .fallback(FallbackConfig::default().with_error_types(Vec::<ErrorKind>::new()))
        .build()
        .unwrap();

    let first: Result<Outcome<()>, _> = executor
        .execute(
            || async { Err(anyhow!("socket hang up")) },
            &context(),
            "explain",
            "tutor-1",
        )
        .await;
    assert_err!(first);

    let second: Result<Outcome<()>, _> = executor
        .execute(
            || async { Ok::<_, anyhow::Error>(()) },
            &context(),
            "explain",
            "tutor-1",
        )
        .await;

    let outcome = assert_ok!(second);
    let response = outcome.degraded().unwrap();
    assert_eq!(response.reason, FallbackReason::CircuitOpen);
    assert!(response.degraded);
    assert!(!response.cached);
}

#[tokio::test(start_paused = true)]
async fn test_half_open_success_closes_circuit() {
    let executor = ResilientExecutor::builder("provider")
        .retry(fast_retry(0))
        .circuit_breaker(
            CircuitBreakerConfig::default()
                .with_failure_threshold(1)
                .with_success_threshold(1)
                .with_timeout(Duration::from_secs(1)),
        )
        .fallback(FallbackConfig::disabled())
        .build()
        .unwrap();

    let result: Result<Outcome<()>, _> = executor
        .execute(
            || async { Err(anyhow!("network unreachable")) },
            &context(),
            "explain",
            "tutor-1",
        )
        .await;
    assert_err!(result);
    assert_eq!(executor.breaker().state().await, CircuitState::Open);

    tokio::time::advance(Duration::from_secs(1)).await;

    let result = executor
        .execute(
            || async { Ok::<_, anyhow::Error>("recovered") },
            &context(),
            "explain",
            "tutor-1",
        )
        .await;
    assert_eq!(assert_ok!(result), Outcome::Completed("recovered"));
    assert_eq!(executor.breaker().state().await, CircuitState::Closed);
}

// ===== Fallback scenarios =====

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_degrade_to_fallback() {
    let receiver = Arc::new(RecordingReceiver::default());
    let executor = ResilientExecutor::builder("provider")
        .retry(fast_retry(2))
        .hooks(ObservabilityHooks::default().with_alert_receiver(receiver.clone()))
        .build()
        .unwrap();

    let result: Result<Outcome<()>, _> = executor
        .execute(
            || async { Err(anyhow!("fetch failed")) },
            &context(),
            "explain",
            "tutor-1",
        )
        .await;

    let outcome = assert_ok!(result);
    assert!(outcome.is_degraded());
    let response = outcome.degraded().unwrap();
    assert_eq!(response.reason, FallbackReason::RetriesExhausted);
    assert_eq!(response.error_kind, ErrorKind::Network);
    assert_eq!(executor.metrics().fallback_triggers, 1);
    assert_eq!(receiver.kinds(), vec![AlertKind::FallbackActivated]);
}

#[tokio::test(start_paused = true)]
async fn test_consecutive_failures_trigger_fallback() {
    let executor = ResilientExecutor::builder("provider")
        .retry(fast_retry(3).with_retryable_errors([ErrorKind::InvalidInput]))
        .fallback(
            FallbackConfig::default()
                .with_error_types(Vec::<ErrorKind>::new())
                .with_consecutive_failures(2),
        )
        .build()
        .unwrap();

    let result: Result<Outcome<()>, _> = executor
        .execute(
            || async { Err(anyhow!("invalid value for temperature")) },
            &context(),
            "explain",
            "tutor-1",
        )
        .await;

    let outcome = assert_ok!(result);
    assert_eq!(
        outcome.degraded().unwrap().reason,
        FallbackReason::ConsecutiveFailures
    );
}

#[tokio::test]
async fn test_failing_generator_surfaces_original_error() {
    let executor = ResilientExecutor::builder("provider")
        .retry(fast_retry(0))
        .fallback(FallbackConfig::default().with_generator(Arc::new(FailingGenerator)))
        .build()
        .unwrap();

    let result: Result<Outcome<()>, _> = executor
        .execute(
            || async { Err(anyhow!("connection closed before message completed")) },
            &context(),
            "explain",
            "tutor-1",
        )
        .await;

    let error = assert_err!(result);
    assert_eq!(error.kind(), ErrorKind::Network);
    assert_eq!(error.message(), "connection closed before message completed");
    assert_eq!(executor.metrics().fallback_triggers, 0);
}

#[tokio::test]
async fn test_low_quality_fallback_surfaces_original_error() {
    let executor = ResilientExecutor::builder("provider")
        .retry(fast_retry(0))
        .fallback(FallbackConfig::default().with_quality_checker(Arc::new(FixedScore(0.2)), 0.5))
        .build()
        .unwrap();

    let result: Result<Outcome<()>, _> = executor
        .execute(
            || async { Err(anyhow!("something odd happened")) },
            &context(),
            "explain",
            "tutor-1",
        )
        .await;

    assert_eq!(assert_err!(result).kind(), ErrorKind::Unknown);
}

// ===== Retry state and monitoring =====

#[tokio::test(start_paused = true)]
async fn test_retry_state_cleared_on_success() {
    let executor = ResilientExecutor::builder("provider")
        .retry(fast_retry(2))
        .build()
        .unwrap();
    let key = RetryKey::new("tutor-1", "explain");
    let calls = AtomicU32::new(0);

    let result = executor
        .execute(
            || {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if n == 1 {
                        Err(anyhow!("timed out"))
                    } else {
                        Ok(n)
                    }
                }
            },
            &context(),
            "explain",
            "tutor-1",
        )
        .await;

    assert_eq!(assert_ok!(result), Outcome::Completed(2));
    assert!(executor.retry_states().get(&key).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_retry_state_kept_after_terminal_failure() {
    let executor = ResilientExecutor::builder("provider")
        .retry(fast_retry(1))
        .fallback(FallbackConfig::disabled())
        .build()
        .unwrap();

    let result: Result<Outcome<()>, _> = executor
        .execute(
            || async { Err(anyhow!("network is down")) },
            &context(),
            "quiz",
            "tutor-2",
        )
        .await;
    assert_err!(result);

    let state = executor
        .retry_states()
        .get(&RetryKey::new("tutor-2", "quiz"))
        .unwrap();
    assert_eq!(state.attempt_count, 2);
    assert_eq!(state.error_history.len(), 2);
    assert!(state.next_retry_time.is_none());
}

#[tokio::test]
async fn test_high_error_rate_alert() {
    let receiver = Arc::new(RecordingReceiver::default());
    let executor = ResilientExecutor::builder("provider")
        .retry(fast_retry(0))
        .circuit_breaker(CircuitBreakerConfig::disabled())
        .fallback(FallbackConfig::disabled())
        .monitoring(MonitoringConfig {
            error_rate_threshold: 0.5,
            min_requests_for_alert: 4,
        })
        .hooks(ObservabilityHooks::default().with_alert_receiver(receiver.clone()))
        .build()
        .unwrap();

    for _ in 0..4 {
        let result: Result<Outcome<()>, _> = executor
            .execute(
                || async { Err(anyhow!("rate limit reached")) },
                &context(),
                "explain",
                "tutor-1",
            )
            .await;
        assert_err!(result);
    }

    assert_eq!(receiver.kinds(), vec![AlertKind::HighErrorRate]);
    assert_eq!(executor.metrics().errors_by_type.get(&ErrorKind::Quota), Some(&4));
}

#[tokio::test]
async fn test_metrics_collector_sees_every_completed_call() {
    let collector = Arc::new(RecordingCollector::default());
    let executor = ResilientExecutor::builder("provider")
        .hooks(ObservabilityHooks::default().with_metrics_collector(collector.clone()))
        .build()
        .unwrap();

    for answer in ["a", "b"] {
        let result = executor
            .execute(
                || async move { Ok::<_, anyhow::Error>(answer) },
                &context(),
                "explain",
                "tutor-1",
            )
            .await;
        assert_ok!(result);
    }

    let snapshots = collector.snapshots.lock().unwrap();
    assert_eq!(snapshots.len(), 2);
    assert_eq!(snapshots[1].completed_calls, 2);
    assert_eq!(snapshots[1].error_rate, 0.0);
}

#[tokio::test(start_paused = true)]
async fn test_maintenance_sweeps_idle_retry_state() {
    let executor = Arc::new(
        ResilientExecutor::builder("provider")
            .retry(fast_retry(0))
            .fallback(FallbackConfig::disabled())
            .retry_state_idle_timeout(Duration::from_secs(90))
            .build()
            .unwrap(),
    );
    let handle = executor.spawn_maintenance();

    let result: Result<Outcome<()>, _> = executor
        .execute(
            || async { Err(anyhow!("network error")) },
            &context(),
            "explain",
            "tutor-1",
        )
        .await;
    assert_err!(result);
    assert_eq!(executor.retry_states().len(), 1);

    // first sweep at 60s sees a fresh entry, the one at 120s removes it
    tokio::time::sleep(Duration::from_secs(121)).await;
    assert!(executor.retry_states().is_empty());

    handle.shutdown().await;
}
