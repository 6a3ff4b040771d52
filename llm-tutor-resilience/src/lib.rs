//! Resilient invocation core for the tutoring agent.
//!
//! Wraps calls to a generation provider with error classification, retries
//! with backoff, a circuit breaker, fallback responses and monitoring.
//!
//! ```no_run
//! use llm_tutor_core::RequestContext;
//! use llm_tutor_resilience::{Outcome, ResilientExecutor};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let executor = ResilientExecutor::builder("provider").build()?;
//! let context = RequestContext::new().with_level("beginner");
//!
//! match executor
//!     .execute(|| async { Ok::<_, anyhow::Error>("answer") }, &context, "explain", "tutor-1")
//!     .await?
//! {
//!     Outcome::Completed(answer) => println!("{answer}"),
//!     Outcome::Degraded(fallback) => println!("degraded: {}", fallback.content),
//! }
//! # Ok(())
//! # }
//! ```

pub mod observability;
pub mod pipeline;
pub mod resilience;

pub use observability::{
    Alert, AlertKind, AlertReceiver, ErrorMetricsSnapshot, ErrorReporter, MetricsCollector,
    Monitor, MonitoringConfig, ObservabilityHooks,
};
pub use pipeline::{ExecutorBuilder, MaintenanceHandle, Outcome, ResilientExecutor};
pub use resilience::{
    BackoffStrategy, CircuitBreaker, CircuitBreakerConfig, CircuitState, FallbackConfig,
    FallbackHandler, FallbackReason, FallbackResponse, RetryConfig, RetryController,
    TimeoutConfig,
};
