//! The resilient execution pipeline.
//!
//! Every call passes the circuit breaker gate once, then runs the unit of
//! work under a per-attempt timeout inside the retry loop. Failures that
//! will not be retried are offered to the fallback handler before they
//! surface to the caller.

use futures::future::join_all;
use llm_tutor_core::{ClassifiedError, CoreError, ErrorClassifier, ErrorContext, RequestContext};
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::observability::metrics::ResilienceMetrics;
use crate::observability::monitoring::{
    ErrorMetricsSnapshot, Monitor, MonitoringConfig, ObservabilityHooks,
};
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, StateTransition};
use crate::resilience::fallback::{FallbackConfig, FallbackHandler, FallbackResponse};
use crate::resilience::retry::{RetryConfig, RetryController};
use crate::resilience::retry_state::{
    RetryKey, RetryStateStore, DEFAULT_IDLE_TIMEOUT, SWEEP_INTERVAL,
};
use crate::resilience::timeout::{with_timeout, TimeoutConfig, TimeoutError};

pub const BREAKER_REFRESH_INTERVAL: Duration = Duration::from_secs(10);

/// Result of a call that did not fail outright.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    /// The unit of work succeeded.
    Completed(T),
    /// A labeled substitute produced by the fallback handler.
    Degraded(FallbackResponse),
}

impl<T> Outcome<T> {
    pub fn is_degraded(&self) -> bool {
        matches!(self, Outcome::Degraded(_))
    }

    pub fn completed(self) -> Option<T> {
        match self {
            Outcome::Completed(value) => Some(value),
            Outcome::Degraded(_) => None,
        }
    }

    pub fn degraded(&self) -> Option<&FallbackResponse> {
        match self {
            Outcome::Completed(_) => None,
            Outcome::Degraded(response) => Some(response),
        }
    }
}

#[derive(Debug)]
pub struct ResilientExecutor {
    breaker: Arc<CircuitBreaker>,
    monitor: Arc<Monitor>,
    retry: RetryController,
    fallback: FallbackHandler,
    retry_states: Arc<RetryStateStore>,
    timeouts: TimeoutConfig,
    classifier: ErrorClassifier,
}

impl ResilientExecutor {
    pub fn builder(breaker_name: impl Into<String>) -> ExecutorBuilder {
        ExecutorBuilder::new(breaker_name)
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn monitor(&self) -> &Arc<Monitor> {
        &self.monitor
    }

    pub fn retry_states(&self) -> &Arc<RetryStateStore> {
        &self.retry_states
    }

    pub fn retry_controller(&self) -> &RetryController {
        &self.retry
    }

    pub fn metrics(&self) -> ErrorMetricsSnapshot {
        self.monitor.snapshot()
    }

    /// Run `operation` with breaker admission, retries, timeouts and fallback.
    ///
    /// `operation` is invoked once per attempt; a circuit-open rejection
    /// never invokes it.
    pub async fn execute<T, E, F, Fut>(
        &self,
        operation: F,
        context: &RequestContext,
        operation_id: &str,
        agent_id: &str,
    ) -> Result<Outcome<T>, ClassifiedError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<anyhow::Error>,
    {
        let span = info_span!("execute", operation_id, agent_id);
        self.run(operation, context, operation_id, agent_id)
            .instrument(span)
            .await
    }

    async fn run<T, E, F, Fut>(
        &self,
        mut operation: F,
        context: &RequestContext,
        operation_id: &str,
        agent_id: &str,
    ) -> Result<Outcome<T>, ClassifiedError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<anyhow::Error>,
    {
        let started = Instant::now();
        let key = RetryKey::new(agent_id, operation_id);
        let error_context = ErrorContext::new(operation_id, agent_id).with_request(context.clone());

        if !self.breaker.allow_request().await {
            self.monitor.circuit_rejected();
            let error = ClassifiedError::circuit_open(self.breaker.name(), error_context);
            return self.recover(context, error, 0, started).await;
        }

        let deadline = self.timeouts.get_timeout(operation_id);
        let max_retries = self.retry.max_retries();
        let mut attempt: u32 = 1;

        loop {
            let attempt_context = error_context.clone().with_attempt(attempt);
            let error = match with_timeout(deadline, operation()).await {
                Ok(value) => {
                    let transition = self.breaker.record_success().await;
                    self.on_transition(transition);
                    self.monitor.attempt_succeeded();
                    self.retry_states.clear(&key);
                    self.monitor.call_completed(attempt, attempt > 1);
                    ResilienceMetrics::request("success", started.elapsed());
                    if attempt > 1 {
                        info!(attempt, "Operation recovered after retries");
                    }
                    return Ok(Outcome::Completed(value));
                }
                Err(TimeoutError::Elapsed { elapsed }) => {
                    ClassifiedError::timeout(elapsed, attempt_context)
                }
                Err(TimeoutError::Inner(e)) => self.classifier.classify(e.into(), &attempt_context),
            };

            let transition = self.breaker.record_failure().await;
            self.on_transition(transition);
            self.monitor.attempt_failed(&error, context);

            let next_delay = (attempt <= max_retries && self.retry.should_retry(&error, attempt))
                .then(|| self.retry.calculate_delay(attempt));
            self.retry_states
                .record_failure(&key, &error, attempt, next_delay);

            match next_delay {
                Some(delay) => {
                    warn!(
                        attempt,
                        max_retries,
                        kind = %error.kind(),
                        delay_ms = delay.as_millis() as u64,
                        "Attempt failed, retrying: {}",
                        error.message()
                    );
                    self.monitor.retry_scheduled();
                    sleep(delay).await;
                    attempt += 1;
                }
                None => {
                    self.monitor.call_completed(attempt, false);
                    return self.recover(context, error, attempt, started).await;
                }
            }
        }
    }

    /// Hand a terminal failure to the fallback handler, or surface it.
    async fn recover<T>(
        &self,
        context: &RequestContext,
        error: ClassifiedError,
        attempt: u32,
        started: Instant,
    ) -> Result<Outcome<T>, ClassifiedError> {
        let Some(reason) = self.fallback.trigger(&error, attempt) else {
            debug!(kind = %error.kind(), attempt, "No fallback applies; surfacing error");
            ResilienceMetrics::request("failure", started.elapsed());
            return Err(error);
        };

        match self.fallback.handle(context, error.clone(), reason).await {
            Ok(response) => {
                warn!(
                    reason = %reason,
                    kind = %error.kind(),
                    attempt,
                    "Serving degraded fallback response"
                );
                self.monitor.fallback_activated(reason, &error);
                ResilienceMetrics::request("degraded", started.elapsed());
                Ok(Outcome::Degraded(response))
            }
            Err(original) => {
                ResilienceMetrics::request("failure", started.elapsed());
                Err(original)
            }
        }
    }

    fn on_transition(&self, transition: Option<StateTransition>) {
        if let Some(transition) = transition {
            self.monitor.circuit_transition(self.breaker.name(), transition);
        }
    }

    /// Start the periodic retry-state sweep and breaker refresh.
    ///
    /// The tasks hold only a weak reference and end once the executor is
    /// dropped; dropping the handle aborts them as well.
    pub fn spawn_maintenance(self: &Arc<Self>) -> MaintenanceHandle {
        let sweeper = {
            let executor = Arc::downgrade(self);
            tokio::spawn(async move {
                let mut ticker = interval(SWEEP_INTERVAL);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    let Some(executor) = Weak::upgrade(&executor) else {
                        break;
                    };
                    executor.retry_states.sweep_expired();
                }
            })
        };

        let refresher = {
            let executor = Arc::downgrade(self);
            tokio::spawn(async move {
                let mut ticker = interval(BREAKER_REFRESH_INTERVAL);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    let Some(executor) = Weak::upgrade(&executor) else {
                        break;
                    };
                    let transition = executor.breaker.refresh().await;
                    executor.on_transition(transition);
                }
            })
        };

        MaintenanceHandle {
            tasks: vec![sweeper, refresher],
        }
    }
}

/// Owns the background maintenance tasks.
#[derive(Debug)]
pub struct MaintenanceHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl MaintenanceHandle {
    /// Abort the tasks and wait for them to finish.
    pub async fn shutdown(mut self) {
        let tasks = std::mem::take(&mut self.tasks);
        for task in &tasks {
            task.abort();
        }
        join_all(tasks).await;
    }

    pub fn is_finished(&self) -> bool {
        self.tasks.iter().all(JoinHandle::is_finished)
    }
}

impl Drop for MaintenanceHandle {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Assembles a [`ResilientExecutor`] from component configs.
#[derive(Debug)]
pub struct ExecutorBuilder {
    breaker_name: String,
    breaker: Option<Arc<CircuitBreaker>>,
    breaker_config: CircuitBreakerConfig,
    retry: RetryConfig,
    fallback: FallbackConfig,
    monitoring: MonitoringConfig,
    hooks: ObservabilityHooks,
    timeouts: TimeoutConfig,
    retry_state_idle: Duration,
}

impl ExecutorBuilder {
    pub fn new(breaker_name: impl Into<String>) -> Self {
        Self {
            breaker_name: breaker_name.into(),
            breaker: None,
            breaker_config: CircuitBreakerConfig::default(),
            retry: RetryConfig::default(),
            fallback: FallbackConfig::default(),
            monitoring: MonitoringConfig::default(),
            hooks: ObservabilityHooks::default(),
            timeouts: TimeoutConfig::default(),
            retry_state_idle: DEFAULT_IDLE_TIMEOUT,
        }
    }

    pub fn retry(mut self, config: RetryConfig) -> Self {
        self.retry = config;
        self
    }

    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.breaker_config = config;
        self
    }

    /// Share an existing breaker instead of creating one.
    pub fn shared_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn fallback(mut self, config: FallbackConfig) -> Self {
        self.fallback = config;
        self
    }

    pub fn monitoring(mut self, config: MonitoringConfig) -> Self {
        self.monitoring = config;
        self
    }

    pub fn hooks(mut self, hooks: ObservabilityHooks) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn timeouts(mut self, config: TimeoutConfig) -> Self {
        self.timeouts = config;
        self
    }

    pub fn operation_timeout(mut self, timeout: Duration) -> Self {
        self.timeouts = TimeoutConfig::new(timeout);
        self
    }

    pub fn retry_state_idle_timeout(mut self, idle: Duration) -> Self {
        self.retry_state_idle = idle;
        self
    }

    pub fn build(self) -> Result<ResilientExecutor, CoreError> {
        self.retry.validate()?;
        match &self.breaker {
            Some(shared) => shared.config().validate()?,
            None => self.breaker_config.validate()?,
        }

        let breaker = self.breaker.unwrap_or_else(|| {
            Arc::new(CircuitBreaker::new(self.breaker_name, self.breaker_config))
        });

        Ok(ResilientExecutor {
            breaker,
            monitor: Arc::new(Monitor::new(self.monitoring, self.hooks)),
            retry: RetryController::new(self.retry),
            fallback: FallbackHandler::new(self.fallback),
            retry_states: Arc::new(RetryStateStore::new(self.retry_state_idle)),
            timeouts: self.timeouts,
            classifier: ErrorClassifier::new(),
        })
    }
}
