//! Process-wide admission gate for calls to the generation provider.
//!
//! # States
//!
//! - **Closed**: requests pass through. Failures raise the failure count,
//!   successes lower it again (never below zero).
//! - **Open**: requests are rejected until `timeout` has passed since the
//!   circuit opened.
//! - **HalfOpen**: a limited number of trial requests are admitted. One
//!   failure re-opens the circuit; `success_threshold` successes close it.
//!
//! A sliding window of recent outcomes is kept for diagnostics only. It is
//! pruned on every state check and never drives a transition.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use llm_tutor_core::CoreError;

use crate::observability::metrics::ResilienceMetrics;

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }

    /// Numeric encoding exported as a gauge.
    pub fn as_gauge(&self) -> f64 {
        match self {
            CircuitState::Closed => 0.0,
            CircuitState::HalfOpen => 1.0,
            CircuitState::Open => 2.0,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for circuit breaker
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// When false every request is admitted and nothing is recorded
    pub enabled: bool,
    /// Net failures in closed state before opening
    pub failure_threshold: u32,
    /// Successes in half-open state before closing
    pub success_threshold: u32,
    /// Time spent open before probing again
    pub timeout: Duration,
    /// Span of the diagnostic request window
    pub monitoring_window: Duration,
    /// Trial requests admitted while half-open
    pub half_open_max_requests: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 5,
            success_threshold: 2,
            timeout: Duration::from_secs(60),
            monitoring_window: Duration::from_secs(60),
            half_open_max_requests: 3,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_monitoring_window(mut self, window: Duration) -> Self {
        self.monitoring_window = window;
        self
    }

    pub fn with_half_open_max_requests(mut self, max: u32) -> Self {
        self.half_open_max_requests = max;
        self
    }

    /// Reject thresholds that would leave the circuit stuck open or never
    /// let it close from half-open.
    pub fn validate(&self) -> Result<(), CoreError> {
        if !self.enabled {
            return Ok(());
        }
        if self.failure_threshold == 0 {
            return Err(CoreError::Validation(
                "circuit breaker failure_threshold must be at least 1".to_string(),
            ));
        }
        if self.success_threshold == 0 {
            return Err(CoreError::Validation(
                "circuit breaker success_threshold must be at least 1".to_string(),
            ));
        }
        if self.half_open_max_requests < self.success_threshold {
            return Err(CoreError::Validation(format!(
                "circuit breaker half_open_max_requests ({}) must be at least success_threshold ({})",
                self.half_open_max_requests, self.success_threshold
            )));
        }
        Ok(())
    }
}

/// An edge taken in the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateTransition {
    pub from: CircuitState,
    pub to: CircuitState,
}

impl StateTransition {
    pub fn opened(&self) -> bool {
        self.to == CircuitState::Open
    }
}

/// Lifetime counters for circuit breaker
#[derive(Debug, Default)]
struct CircuitBreakerMetrics {
    failures: AtomicU64,
    successes: AtomicU64,
    opened_count: AtomicU64,
    closed_count: AtomicU64,
    rejected_count: AtomicU64,
}

#[derive(Debug, Clone, Copy)]
struct WindowEvent {
    at: Instant,
    success: bool,
}

struct CircuitBreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_state_change: Instant,
    request_window: VecDeque<WindowEvent>,
    half_open_requests: u32,
}

impl CircuitBreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_state_change: Instant::now(),
            request_window: VecDeque::new(),
            half_open_requests: 0,
        }
    }

    fn prune(&mut self, window: Duration) {
        let now = Instant::now();
        while let Some(event) = self.request_window.front() {
            if now.duration_since(event.at) > window {
                self.request_window.pop_front();
            } else {
                break;
            }
        }
    }

    fn transition(&mut self, to: CircuitState) -> StateTransition {
        let from = self.state;
        self.state = to;
        self.last_state_change = Instant::now();
        StateTransition { from, to }
    }
}

/// Circuit breaker statistics
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitBreakerStats {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub half_open_requests: u32,
    pub window_successes: usize,
    pub window_failures: usize,
    pub failures: u64,
    pub successes: u64,
    pub opened_count: u64,
    pub closed_count: u64,
    pub rejected_count: u64,
}

/// Circuit breaker shared by every call routed through one pipeline.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: Arc<RwLock<CircuitBreakerState>>,
    metrics: Arc<CircuitBreakerMetrics>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let name = name.into();
        info!("Creating circuit breaker: {}", name);

        Self {
            name,
            config,
            state: Arc::new(RwLock::new(CircuitBreakerState::new())),
            metrics: Arc::new(CircuitBreakerMetrics::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub async fn state(&self) -> CircuitState {
        self.state.read().await.state
    }

    /// Admission check. May move an expired open circuit to half-open.
    pub async fn allow_request(&self) -> bool {
        if !self.config.enabled {
            return true;
        }

        let mut state = self.state.write().await;
        state.prune(self.config.monitoring_window);
        self.expire_open(&mut state);

        let current = state.state;
        let admitted = match current {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                if state.half_open_requests < self.config.half_open_max_requests {
                    state.half_open_requests += 1;
                    true
                } else {
                    false
                }
            }
        };

        if !admitted {
            self.metrics.rejected_count.fetch_add(1, Ordering::Relaxed);
            debug!(
                "Circuit breaker {} rejected request in state {}",
                self.name, current
            );
        }
        admitted
    }

    pub async fn record_success(&self) -> Option<StateTransition> {
        if !self.config.enabled {
            return None;
        }

        let mut state = self.state.write().await;
        self.metrics.successes.fetch_add(1, Ordering::Relaxed);
        state.request_window.push_back(WindowEvent {
            at: Instant::now(),
            success: true,
        });
        state.prune(self.config.monitoring_window);

        let current = state.state;
        match current {
            CircuitState::Closed => {
                state.failure_count = state.failure_count.saturating_sub(1);
                None
            }
            CircuitState::HalfOpen => {
                state.success_count += 1;
                if state.success_count >= self.config.success_threshold {
                    info!(
                        "Circuit breaker {} closing after {} successes",
                        self.name, state.success_count
                    );
                    state.failure_count = 0;
                    state.success_count = 0;
                    state.half_open_requests = 0;
                    self.metrics.closed_count.fetch_add(1, Ordering::Relaxed);
                    Some(self.announce(state.transition(CircuitState::Closed)))
                } else {
                    None
                }
            }
            // a call admitted before the circuit opened
            CircuitState::Open => None,
        }
    }

    pub async fn record_failure(&self) -> Option<StateTransition> {
        if !self.config.enabled {
            return None;
        }

        let mut state = self.state.write().await;
        self.metrics.failures.fetch_add(1, Ordering::Relaxed);
        state.request_window.push_back(WindowEvent {
            at: Instant::now(),
            success: false,
        });
        state.prune(self.config.monitoring_window);

        let current = state.state;
        if current == CircuitState::Closed {
            state.failure_count += 1;
        }
        match current {
            CircuitState::Closed if state.failure_count >= self.config.failure_threshold => {
                warn!(
                    "Circuit breaker {} opening after {} failures",
                    self.name, state.failure_count
                );
                self.metrics.opened_count.fetch_add(1, Ordering::Relaxed);
                Some(self.announce(state.transition(CircuitState::Open)))
            }
            CircuitState::HalfOpen => {
                warn!(
                    "Circuit breaker {} re-opening due to failure in half-open state",
                    self.name
                );
                state.success_count = 0;
                state.half_open_requests = 0;
                self.metrics.opened_count.fetch_add(1, Ordering::Relaxed);
                Some(self.announce(state.transition(CircuitState::Open)))
            }
            _ => None,
        }
    }

    /// Periodic maintenance: prune the window and expire an open circuit.
    pub async fn refresh(&self) -> Option<StateTransition> {
        if !self.config.enabled {
            return None;
        }
        let mut state = self.state.write().await;
        state.prune(self.config.monitoring_window);
        self.expire_open(&mut state)
    }

    pub async fn reset(&self) {
        let mut state = self.state.write().await;
        info!("Manually resetting circuit breaker: {}", self.name);
        *state = CircuitBreakerState::new();
        ResilienceMetrics::circuit_state(&self.name, CircuitState::Closed);
    }

    pub async fn stats(&self) -> CircuitBreakerStats {
        let mut state = self.state.write().await;
        state.prune(self.config.monitoring_window);
        let window_successes = state.request_window.iter().filter(|e| e.success).count();

        CircuitBreakerStats {
            state: state.state,
            failure_count: state.failure_count,
            success_count: state.success_count,
            half_open_requests: state.half_open_requests,
            window_successes,
            window_failures: state.request_window.len() - window_successes,
            failures: self.metrics.failures.load(Ordering::Relaxed),
            successes: self.metrics.successes.load(Ordering::Relaxed),
            opened_count: self.metrics.opened_count.load(Ordering::Relaxed),
            closed_count: self.metrics.closed_count.load(Ordering::Relaxed),
            rejected_count: self.metrics.rejected_count.load(Ordering::Relaxed),
        }
    }

    fn expire_open(&self, state: &mut CircuitBreakerState) -> Option<StateTransition> {
        if state.state == CircuitState::Open
            && state.last_state_change.elapsed() >= self.config.timeout
        {
            info!("Circuit breaker {} transitioning to half-open", self.name);
            state.success_count = 0;
            state.half_open_requests = 0;
            return Some(self.announce(state.transition(CircuitState::HalfOpen)));
        }
        None
    }

    fn announce(&self, transition: StateTransition) -> StateTransition {
        ResilienceMetrics::circuit_state(&self.name, transition.to);
        transition
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use tokio::time::advance;

    fn breaker(failure_threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(
            "test",
            CircuitBreakerConfig::default()
                .with_failure_threshold(failure_threshold)
                .with_timeout(Duration::from_secs(10)),
        )
    }

    async fn trip(breaker: &CircuitBreaker) {
        for _ in 0..breaker.config().failure_threshold {
            breaker.record_failure().await;
        }
    }

    #[rstest]
    #[case::zero_failure_threshold(CircuitBreakerConfig::default().with_failure_threshold(0))]
    #[case::zero_success_threshold(CircuitBreakerConfig::default().with_success_threshold(0))]
    #[case::half_open_budget_too_small(
        CircuitBreakerConfig::default()
            .with_success_threshold(2)
            .with_half_open_max_requests(1)
    )]
    fn test_invalid_config_rejected(#[case] config: CircuitBreakerConfig) {
        assert!(matches!(config.validate(), Err(CoreError::Validation(_))));
    }

    #[rstest]
    #[case::defaults(CircuitBreakerConfig::default())]
    #[case::budget_equals_threshold(
        CircuitBreakerConfig::default()
            .with_success_threshold(1)
            .with_half_open_max_requests(1)
    )]
    #[case::disabled_ignores_thresholds(CircuitBreakerConfig::disabled().with_success_threshold(0))]
    fn test_valid_config_accepted(#[case] config: CircuitBreakerConfig) {
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_circuit_breaker_starts_closed() {
        let breaker = CircuitBreaker::new("test", CircuitBreakerConfig::default());
        assert_eq!(breaker.state().await, CircuitState::Closed);
        assert!(breaker.allow_request().await);
    }

    #[tokio::test]
    async fn test_circuit_opens_after_threshold_failures() {
        let breaker = breaker(3);

        assert_eq!(breaker.record_failure().await, None);
        assert_eq!(breaker.record_failure().await, None);
        let transition = breaker.record_failure().await.unwrap();

        assert!(transition.opened());
        assert_eq!(transition.from, CircuitState::Closed);
        assert_eq!(breaker.state().await, CircuitState::Open);
        assert!(!breaker.allow_request().await);

        let stats = breaker.stats().await;
        assert_eq!(stats.failures, 3);
        assert_eq!(stats.opened_count, 1);
        assert_eq!(stats.rejected_count, 1);
    }

    #[tokio::test]
    async fn test_success_decrements_failure_count() {
        let breaker = breaker(3);

        breaker.record_failure().await;
        breaker.record_failure().await;
        breaker.record_success().await;
        breaker.record_failure().await;
        assert_eq!(breaker.state().await, CircuitState::Closed);
        assert_eq!(breaker.stats().await.failure_count, 2);

        // never below zero
        for _ in 0..5 {
            breaker.record_success().await;
        }
        assert_eq!(breaker.stats().await.failure_count, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_transitions_to_half_open_after_timeout() {
        let breaker = breaker(2);
        trip(&breaker).await;

        advance(Duration::from_secs(9)).await;
        assert!(!breaker.allow_request().await);
        assert_eq!(breaker.state().await, CircuitState::Open);

        advance(Duration::from_secs(1)).await;
        assert!(breaker.allow_request().await);
        assert_eq!(breaker.state().await, CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_closes_after_success_threshold() {
        let breaker = breaker(2);
        trip(&breaker).await;
        advance(Duration::from_secs(10)).await;

        assert!(breaker.allow_request().await);
        assert_eq!(breaker.record_success().await, None);
        assert!(breaker.allow_request().await);
        let transition = breaker.record_success().await.unwrap();

        assert_eq!(transition.to, CircuitState::Closed);
        let stats = breaker.stats().await;
        assert_eq!(stats.state, CircuitState::Closed);
        assert_eq!(stats.failure_count, 0);
        assert_eq!(stats.closed_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_reopens_on_failure() {
        let breaker = breaker(2);
        trip(&breaker).await;
        advance(Duration::from_secs(10)).await;

        assert!(breaker.allow_request().await);
        let transition = breaker.record_failure().await.unwrap();

        assert_eq!(transition.from, CircuitState::HalfOpen);
        assert_eq!(transition.to, CircuitState::Open);
        assert_eq!(breaker.stats().await.opened_count, 2);
        assert!(!breaker.allow_request().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_count_only_grows_while_closed() {
        let breaker = breaker(2);
        trip(&breaker).await;
        assert_eq!(breaker.stats().await.failure_count, 2);

        // a late failure from a call admitted before opening
        assert_eq!(breaker.record_failure().await, None);
        assert_eq!(breaker.stats().await.failure_count, 2);

        advance(Duration::from_secs(10)).await;
        assert!(breaker.allow_request().await);
        breaker.record_failure().await.unwrap();

        let stats = breaker.stats().await;
        assert_eq!(stats.state, CircuitState::Open);
        assert_eq!(stats.failure_count, 2);
        assert_eq!(stats.failures, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_limits_trial_requests() {
        let breaker = CircuitBreaker::new(
            "test",
            CircuitBreakerConfig::default()
                .with_failure_threshold(1)
                .with_timeout(Duration::from_secs(1))
                .with_half_open_max_requests(2),
        );
        trip(&breaker).await;
        advance(Duration::from_secs(1)).await;

        assert!(breaker.allow_request().await);
        assert!(breaker.allow_request().await);
        assert!(!breaker.allow_request().await);
        assert_eq!(breaker.stats().await.half_open_requests, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_expires_open_circuit() {
        let breaker = breaker(1);
        trip(&breaker).await;

        assert_eq!(breaker.refresh().await, None);
        advance(Duration::from_secs(10)).await;
        let transition = breaker.refresh().await.unwrap();
        assert_eq!(transition.to, CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_is_pruned() {
        let breaker = CircuitBreaker::new(
            "test",
            CircuitBreakerConfig::default().with_monitoring_window(Duration::from_secs(5)),
        );
        breaker.record_failure().await;
        breaker.record_success().await;
        breaker.record_success().await;

        let stats = breaker.stats().await;
        assert_eq!(stats.window_successes, 2);
        assert_eq!(stats.window_failures, 1);

        advance(Duration::from_secs(6)).await;
        let stats = breaker.stats().await;
        assert_eq!(stats.window_successes + stats.window_failures, 0);
    }

    #[tokio::test]
    async fn test_disabled_breaker_always_admits() {
        let breaker = CircuitBreaker::new(
            "test",
            CircuitBreakerConfig::disabled().with_failure_threshold(1),
        );
        for _ in 0..5 {
            assert_eq!(breaker.record_failure().await, None);
        }
        assert!(breaker.allow_request().await);
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_manual_reset() {
        let breaker = breaker(2);
        trip(&breaker).await;
        assert_eq!(breaker.state().await, CircuitState::Open);

        breaker.reset().await;

        assert_eq!(breaker.state().await, CircuitState::Closed);
        assert!(breaker.allow_request().await);
    }
}
