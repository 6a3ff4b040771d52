//! Retry decisions and backoff delays.
//!
//! The controller never sleeps on its own; the execution pipeline asks it
//! whether a classified failure deserves another attempt and how long to
//! pause before making it.
//!
//! # Example
//!
//! ```
//! use llm_tutor_resilience::resilience::retry::{BackoffStrategy, RetryConfig, RetryController};
//! use std::time::Duration;
//!
//! let controller = RetryController::new(
//!     RetryConfig::default()
//!         .with_base_delay(Duration::from_millis(100))
//!         .with_strategy(BackoffStrategy::Fibonacci)
//!         .with_jitter_factor(0.0),
//! );
//!
//! assert_eq!(controller.calculate_delay(4), Duration::from_millis(300));
//! ```

use llm_tutor_core::{ClassifiedError, CoreError, ErrorKind, RetryCondition};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Quota failures get at most this many retries.
pub const QUOTA_RETRY_LIMIT: u32 = 2;

/// How the pause between attempts grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// `base · attempt`
    Linear,
    /// `base · multiplier^(attempt - 1)`
    #[default]
    Exponential,
    /// `base · fib(attempt)`
    Fibonacci,
}

impl fmt::Display for BackoffStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackoffStrategy::Linear => write!(f, "linear"),
            BackoffStrategy::Exponential => write!(f, "exponential"),
            BackoffStrategy::Fibonacci => write!(f, "fibonacci"),
        }
    }
}

impl FromStr for BackoffStrategy {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "linear" => Ok(BackoffStrategy::Linear),
            "exponential" => Ok(BackoffStrategy::Exponential),
            "fibonacci" => Ok(BackoffStrategy::Fibonacci),
            other => Err(CoreError::Validation(format!(
                "unknown backoff strategy: {other}"
            ))),
        }
    }
}

/// Configuration for retry behavior
#[derive(Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt; a call runs at most `max_retries + 1` times
    pub max_retries: u32,
    pub base_delay: Duration,
    /// Upper bound applied after jitter
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
    /// Growth factor for the exponential strategy
    pub multiplier: f64,
    /// Fraction of the delay added as random noise, `0.0..=1.0`
    pub jitter_factor: f64,
    pub retryable_errors: HashSet<ErrorKind>,
    /// Replaces the kind-based decision when set
    pub custom_condition: Option<Arc<dyn RetryCondition>>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
            strategy: BackoffStrategy::Exponential,
            multiplier: 2.0,
            jitter_factor: 0.1,
            retryable_errors: [ErrorKind::Network, ErrorKind::Quota, ErrorKind::Unknown]
                .into_iter()
                .collect(),
            custom_condition: None,
        }
    }
}

impl fmt::Debug for RetryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryConfig")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("strategy", &self.strategy)
            .field("multiplier", &self.multiplier)
            .field("jitter_factor", &self.jitter_factor)
            .field("retryable_errors", &self.retryable_errors)
            .field("custom_condition", &self.custom_condition.is_some())
            .finish()
    }
}

impl RetryConfig {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_strategy(mut self, strategy: BackoffStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_jitter_factor(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = jitter_factor;
        self
    }

    pub fn with_retryable_errors<I>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = ErrorKind>,
    {
        self.retryable_errors = kinds.into_iter().collect();
        self
    }

    pub fn with_custom_condition(mut self, condition: Arc<dyn RetryCondition>) -> Self {
        self.custom_condition = Some(condition);
        self
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.multiplier < 1.0 || !self.multiplier.is_finite() {
            return Err(CoreError::Validation(format!(
                "backoff multiplier must be >= 1.0, got {}",
                self.multiplier
            )));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(CoreError::Validation(format!(
                "jitter factor must be within 0.0..=1.0, got {}",
                self.jitter_factor
            )));
        }
        if self.base_delay > self.max_delay {
            return Err(CoreError::Validation(
                "base delay must not exceed max delay".to_string(),
            ));
        }
        Ok(())
    }
}

/// Decides whether a failed attempt is retried and how long to wait first.
#[derive(Debug, Clone, Default)]
pub struct RetryController {
    config: RetryConfig,
}

impl RetryController {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn max_retries(&self) -> u32 {
        self.config.max_retries
    }

    /// True once `attempt` has used up the retry budget.
    pub fn is_exhausted(&self, attempt: u32) -> bool {
        attempt > self.config.max_retries
    }

    pub fn should_retry(&self, error: &ClassifiedError, attempt: u32) -> bool {
        let kind = error.kind();
        if kind.is_structural() {
            return false;
        }

        if let Some(condition) = &self.config.custom_condition {
            return condition.should_retry(error, attempt);
        }

        if !self.config.retryable_errors.contains(&kind) {
            return false;
        }

        match kind {
            ErrorKind::Quota => attempt <= QUOTA_RETRY_LIMIT,
            _ => true,
        }
    }

    /// Delay before the attempt following `attempt`, without jitter, clamped to `max_delay`.
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let base = self.config.base_delay.as_nanos() as f64;
        let factor = match self.config.strategy {
            BackoffStrategy::Linear => attempt as f64,
            BackoffStrategy::Exponential => {
                self.config.multiplier.powi((attempt - 1).min(i32::MAX as u32) as i32)
            }
            BackoffStrategy::Fibonacci => fibonacci(attempt) as f64,
        };

        self.clamp(base * factor)
    }

    /// Delay before the attempt following `attempt`, jitter included.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let delay = self.base_delay_for(attempt).as_nanos() as f64;
        let jitter = delay * self.config.jitter_factor * rand::random::<f64>();
        self.clamp(delay + jitter)
    }

    fn clamp(&self, nanos: f64) -> Duration {
        let max = self.config.max_delay.as_nanos() as f64;
        if !nanos.is_finite() || nanos >= max {
            self.config.max_delay
        } else {
            Duration::from_nanos(nanos.max(0.0).round() as u64)
        }
    }
}

/// `fib(1) = fib(2) = 1`, saturating.
fn fibonacci(n: u32) -> u64 {
    let (mut previous, mut current) = (0u64, 1u64);
    for _ in 1..n {
        if current == u64::MAX {
            break;
        }
        let next = previous.saturating_add(current);
        previous = current;
        current = next;
    }
    current
}

#[cfg(test)]
mod tests {
    use super::*;
    use llm_tutor_core::ErrorContext;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use rstest::rstest;

    fn error(kind: ErrorKind) -> ClassifiedError {
        ClassifiedError::new(kind, "failure", ErrorContext::default())
    }

    fn no_jitter(strategy: BackoffStrategy) -> RetryController {
        RetryController::new(
            RetryConfig::default()
                .with_base_delay(Duration::from_millis(100))
                .with_max_delay(Duration::from_secs(10))
                .with_strategy(strategy)
                .with_jitter_factor(0.0),
        )
    }

    #[test]
    fn test_default_config() {
        let config = RetryConfig::default();
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.base_delay, Duration::from_secs(1));
        assert_eq!(config.strategy, BackoffStrategy::Exponential);
        assert!(config.retryable_errors.contains(&ErrorKind::Unknown));
        assert!(!config.retryable_errors.contains(&ErrorKind::InvalidInput));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        assert!(RetryConfig::default().with_multiplier(0.5).validate().is_err());
        assert!(RetryConfig::default().with_jitter_factor(1.5).validate().is_err());
        assert!(RetryConfig::default()
            .with_base_delay(Duration::from_secs(60))
            .validate()
            .is_err());
    }

    #[rstest]
    #[case(BackoffStrategy::Exponential, [100, 200, 400, 800, 1600])]
    #[case(BackoffStrategy::Linear, [100, 200, 300, 400, 500])]
    #[case(BackoffStrategy::Fibonacci, [100, 100, 200, 300, 500])]
    fn test_pre_jitter_delays(#[case] strategy: BackoffStrategy, #[case] expected: [u64; 5]) {
        let controller = no_jitter(strategy);
        let delays: Vec<u64> = (1..=5)
            .map(|attempt| controller.base_delay_for(attempt).as_millis() as u64)
            .collect();
        assert_eq!(delays, expected.to_vec());
    }

    #[test]
    fn test_delay_clamped_to_max() {
        let controller = RetryController::new(
            RetryConfig::default()
                .with_base_delay(Duration::from_secs(1))
                .with_max_delay(Duration::from_secs(5))
                .with_jitter_factor(0.0),
        );
        assert_eq!(controller.calculate_delay(6), Duration::from_secs(5));
        assert_eq!(controller.calculate_delay(u32::MAX), Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_stays_within_factor() {
        let controller = RetryController::new(
            RetryConfig::default()
                .with_base_delay(Duration::from_millis(100))
                .with_jitter_factor(0.5),
        );
        for _ in 0..50 {
            let delay = controller.calculate_delay(2);
            assert!(delay >= Duration::from_millis(200));
            assert!(delay <= Duration::from_millis(300));
        }
    }

    #[rstest]
    #[case(ErrorKind::Network, 1, true)]
    #[case(ErrorKind::Unknown, 3, true)]
    #[case(ErrorKind::Quota, 1, true)]
    #[case(ErrorKind::Quota, 2, true)]
    #[case(ErrorKind::Quota, 3, false)]
    #[case(ErrorKind::InvalidInput, 1, false)]
    fn test_should_retry_defaults(
        #[case] kind: ErrorKind,
        #[case] attempt: u32,
        #[case] expected: bool,
    ) {
        let controller = RetryController::default();
        assert_eq!(controller.should_retry(&error(kind), attempt), expected);
    }

    #[test]
    fn test_custom_condition_overrides_kind_set() {
        let controller = RetryController::new(
            RetryConfig::default().with_custom_condition(Arc::new(
                |error: &ClassifiedError, attempt: u32| {
                    error.kind() == ErrorKind::InvalidInput && attempt == 1
                },
            )),
        );

        assert!(controller.should_retry(&error(ErrorKind::InvalidInput), 1));
        assert!(!controller.should_retry(&error(ErrorKind::Network), 1));
    }

    #[test]
    fn test_structural_kinds_never_retried_even_with_custom_condition() {
        let controller = RetryController::new(
            RetryConfig::default()
                .with_retryable_errors(ErrorKind::ALL)
                .with_custom_condition(Arc::new(|_: &ClassifiedError, _: u32| true)),
        );

        for kind in [
            ErrorKind::ContextTooLong,
            ErrorKind::ContentFilter,
            ErrorKind::Parsing,
        ] {
            assert!(!controller.should_retry(&error(kind), 1));
        }
    }

    #[test]
    fn test_exhaustion() {
        let controller = RetryController::new(RetryConfig::default().with_max_retries(2));
        assert!(!controller.is_exhausted(2));
        assert!(controller.is_exhausted(3));
    }

    proptest! {
        #[test]
        fn prop_structural_kinds_never_retry(attempt in 0u32..1000) {
            let controller = RetryController::new(
                RetryConfig::default().with_retryable_errors(ErrorKind::ALL),
            );
            prop_assert!(!controller.should_retry(&error(ErrorKind::ContextTooLong), attempt));
            prop_assert!(!controller.should_retry(&error(ErrorKind::ContentFilter), attempt));
            prop_assert!(!controller.should_retry(&error(ErrorKind::Parsing), attempt));
        }

        #[test]
        fn prop_exponential_delay_monotonic_and_bounded(
            base_ms in 1u64..5_000,
            max_ms in 5_000u64..120_000,
            multiplier in 1.0f64..4.0,
            attempt in 1u32..64,
        ) {
            let controller = RetryController::new(
                RetryConfig::default()
                    .with_base_delay(Duration::from_millis(base_ms))
                    .with_max_delay(Duration::from_millis(max_ms))
                    .with_multiplier(multiplier)
                    .with_jitter_factor(0.0),
            );
            let current = controller.base_delay_for(attempt);
            let next = controller.base_delay_for(attempt + 1);
            prop_assert!(current <= next);
            prop_assert!(next <= Duration::from_millis(max_ms));
        }

        #[test]
        fn prop_jittered_delay_never_exceeds_max(attempt in 1u32..40, jitter in 0.0f64..=1.0) {
            let controller = RetryController::new(
                RetryConfig::default()
                    .with_max_delay(Duration::from_secs(8))
                    .with_jitter_factor(jitter),
            );
            prop_assert!(controller.calculate_delay(attempt) <= Duration::from_secs(8));
        }
    }
}
