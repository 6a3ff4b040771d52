//! Gateway wiring for the tutoring core.
//!
//! Loads [`GatewayConfig`], talks to an OpenAI-compatible provider through
//! [`HttpProvider`] and answers questions with [`ResponseService`], which
//! checks the similarity cache before running the resilient executor.

pub mod config;
pub mod provider;
pub mod service;

use std::sync::Arc;

use llm_tutor_cache::SimilarityCache;
use llm_tutor_core::GenerationProvider;
use llm_tutor_resilience::{CircuitBreakerConfig, ObservabilityHooks, ResilientExecutor};

pub use config::{GatewayConfig, GatewayConfigError};
pub use provider::HttpProvider;
pub use service::{ResponseService, TutorResponse, GENERATE_OPERATION};

/// Build a [`ResponseService`] from configuration around `provider`.
pub fn build_service(
    config: &GatewayConfig,
    provider: Arc<dyn GenerationProvider>,
    hooks: ObservabilityHooks,
) -> anyhow::Result<ResponseService> {
    let executor = ResilientExecutor::builder(provider.name().to_string())
        .retry(config.retry.to_retry_config()?)
        .circuit_breaker(CircuitBreakerConfig::from(&config.circuit_breaker))
        .fallback(config.fallback.to_fallback_config()?)
        .monitoring(config.monitoring.clone())
        .hooks(hooks)
        .timeouts(config.timeout_config())
        .build()?;

    let mut service = ResponseService::new(Arc::new(executor), provider, "llm-tutor");
    if config.cache.enabled {
        let cache = SimilarityCache::new(config.cache.to_cache_config()?)?;
        service = service.with_cache(Arc::new(cache));
    }
    Ok(service)
}
