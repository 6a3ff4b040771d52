//! Resilience patterns applied around every unit of work.
//!
//! - **Retry**: backoff schedules and the retry decision per error kind
//! - **Circuit Breaker**: fails fast while the dependency is unhealthy
//! - **Fallback**: degraded substitute responses
//! - **Timeout**: per-attempt deadline that cancels the in-flight future
//! - **Retry State**: per-call failure history keyed by agent and operation
//!
//! # Example
//!
//! ```no_run
//! use llm_tutor_resilience::resilience::{
//!     circuit_breaker::{CircuitBreaker, CircuitBreakerConfig},
//!     retry::{BackoffStrategy, RetryConfig, RetryController},
//! };
//! use std::time::Duration;
//!
//! let controller = RetryController::new(
//!     RetryConfig::default()
//!         .with_strategy(BackoffStrategy::Fibonacci)
//!         .with_base_delay(Duration::from_millis(250)),
//! );
//! let breaker = CircuitBreaker::new("provider", CircuitBreakerConfig::default());
//! assert_eq!(controller.base_delay_for(3), Duration::from_millis(500));
//! # let _ = breaker;
//! ```

pub mod circuit_breaker;
pub mod fallback;
pub mod retry;
pub mod retry_state;
pub mod timeout;

// Re-export commonly used types
pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState, StateTransition,
};
pub use fallback::{
    FallbackConfig, FallbackHandler, FallbackReason, FallbackResponse, QualityMetrics,
    StaticResponseGenerator, TriggerConditions, DEFAULT_FALLBACK_MESSAGE,
};
pub use retry::{BackoffStrategy, RetryConfig, RetryController, QUOTA_RETRY_LIMIT};
pub use retry_state::{RetryKey, RetryState, RetryStateStore};
pub use timeout::{with_timeout, TimeoutConfig, TimeoutError};
