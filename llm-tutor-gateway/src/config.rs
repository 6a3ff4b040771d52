//! Layered gateway configuration.
//!
//! Values come from `config/default`, then `config/local` (both optional),
//! then `LLM_TUTOR__*` environment variables, e.g.
//! `LLM_TUTOR__RETRY__MAX_RETRIES=5`. Each section converts into the
//! matching component config.

use config::{Config as ConfigLoader, Environment, File};
use llm_tutor_cache::{CacheConfig, CacheError, EvictionPolicy};
use llm_tutor_core::{CoreError, ErrorKind};
use llm_tutor_resilience::observability::LogConfig;
use llm_tutor_resilience::resilience::StaticResponseGenerator;
use llm_tutor_resilience::{
    BackoffStrategy, CircuitBreakerConfig, FallbackConfig, MonitoringConfig, RetryConfig,
    TimeoutConfig,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub const ENV_PREFIX: &str = "LLM_TUTOR";

#[derive(Error, Debug)]
pub enum GatewayConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid {section} configuration: {message}")]
    Invalid { section: &'static str, message: String },
}

impl GatewayConfigError {
    fn invalid(section: &'static str, message: impl ToString) -> Self {
        Self::Invalid {
            section,
            message: message.to_string(),
        }
    }
}

impl From<CacheError> for GatewayConfigError {
    fn from(err: CacheError) -> Self {
        Self::invalid("cache", err)
    }
}

fn parse_kinds(section: &'static str, names: &[String]) -> Result<Vec<ErrorKind>, GatewayConfigError> {
    names
        .iter()
        .map(|name| ErrorKind::from_str(name))
        .collect::<Result<_, CoreError>>()
        .map_err(|err| GatewayConfigError::invalid(section, err))
}

// ============================================================================
// Sections
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    /// Base URL of an OpenAI-compatible API, without `/chat/completions`
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    pub request_timeout_ms: u64,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            endpoint: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            request_timeout_ms: 60_000,
            max_tokens: Some(1024),
            temperature: Some(0.3),
        }
    }
}

impl ProviderSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub strategy: BackoffStrategy,
    pub multiplier: f64,
    pub jitter_factor: f64,
    pub retryable_errors: Vec<String>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let defaults = RetryConfig::default();
        let mut retryable: Vec<ErrorKind> = defaults.retryable_errors.iter().copied().collect();
        retryable.sort();
        Self {
            max_retries: defaults.max_retries,
            base_delay_ms: defaults.base_delay.as_millis() as u64,
            max_delay_ms: defaults.max_delay.as_millis() as u64,
            strategy: defaults.strategy,
            multiplier: defaults.multiplier,
            jitter_factor: defaults.jitter_factor,
            retryable_errors: retryable.iter().map(|k| k.as_str().to_string()).collect(),
        }
    }
}

impl RetrySettings {
    pub fn to_retry_config(&self) -> Result<RetryConfig, GatewayConfigError> {
        let config = RetryConfig::default()
            .with_max_retries(self.max_retries)
            .with_base_delay(Duration::from_millis(self.base_delay_ms))
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
            .with_strategy(self.strategy)
            .with_multiplier(self.multiplier)
            .with_jitter_factor(self.jitter_factor)
            .with_retryable_errors(parse_kinds("retry", &self.retryable_errors)?);
        config
            .validate()
            .map_err(|err| GatewayConfigError::invalid("retry", err))?;
        Ok(config)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerSettings {
    pub enabled: bool,
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub timeout_ms: u64,
    pub monitoring_window_ms: u64,
    pub half_open_max_requests: u32,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        let defaults = CircuitBreakerConfig::default();
        Self {
            enabled: defaults.enabled,
            failure_threshold: defaults.failure_threshold,
            success_threshold: defaults.success_threshold,
            timeout_ms: defaults.timeout.as_millis() as u64,
            monitoring_window_ms: defaults.monitoring_window.as_millis() as u64,
            half_open_max_requests: defaults.half_open_max_requests,
        }
    }
}

impl From<&CircuitBreakerSettings> for CircuitBreakerConfig {
    fn from(settings: &CircuitBreakerSettings) -> Self {
        let config = CircuitBreakerConfig::default()
            .with_failure_threshold(settings.failure_threshold)
            .with_success_threshold(settings.success_threshold)
            .with_timeout(Duration::from_millis(settings.timeout_ms))
            .with_monitoring_window(Duration::from_millis(settings.monitoring_window_ms))
            .with_half_open_max_requests(settings.half_open_max_requests);
        CircuitBreakerConfig {
            enabled: settings.enabled,
            ..config
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackSettings {
    pub enabled: bool,
    pub error_types: Vec<String>,
    pub consecutive_failures: u32,
    /// Static text served when degraded; the built-in message when unset
    pub message: Option<String>,
}

impl Default for FallbackSettings {
    fn default() -> Self {
        let defaults = FallbackConfig::default().trigger_conditions;
        let mut kinds: Vec<ErrorKind> = defaults.error_types.iter().copied().collect();
        kinds.sort();
        Self {
            enabled: true,
            error_types: kinds.iter().map(|k| k.as_str().to_string()).collect(),
            consecutive_failures: defaults.consecutive_failures,
            message: None,
        }
    }
}

impl FallbackSettings {
    pub fn to_fallback_config(&self) -> Result<FallbackConfig, GatewayConfigError> {
        let mut config = if self.enabled {
            FallbackConfig::default()
        } else {
            FallbackConfig::disabled()
        };
        config = config
            .with_error_types(parse_kinds("fallback", &self.error_types)?)
            .with_consecutive_failures(self.consecutive_failures);
        if let Some(message) = &self.message {
            config = config.with_generator(Arc::new(StaticResponseGenerator::new(message.clone())));
        }
        Ok(config)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub enabled: bool,
    pub similarity_threshold: f64,
    pub max_entries: usize,
    pub default_ttl_secs: u64,
    pub context_sensitive: bool,
    pub level_sensitive: bool,
    pub eviction_policy: EvictionPolicy,
    pub max_search_time_ms: u64,
    pub fuzzy_match: bool,
}

impl Default for CacheSettings {
    fn default() -> Self {
        let defaults = CacheConfig::default();
        Self {
            enabled: true,
            similarity_threshold: defaults.similarity_threshold,
            max_entries: defaults.max_entries,
            default_ttl_secs: defaults.default_ttl.as_secs(),
            context_sensitive: defaults.context_sensitive,
            level_sensitive: defaults.level_sensitive,
            eviction_policy: defaults.eviction_policy,
            max_search_time_ms: defaults.performance.max_search_time.as_millis() as u64,
            fuzzy_match: defaults.performance.fuzzy_match,
        }
    }
}

impl CacheSettings {
    pub fn to_cache_config(&self) -> Result<CacheConfig, GatewayConfigError> {
        Ok(CacheConfig::builder()
            .similarity_threshold(self.similarity_threshold)
            .max_entries(self.max_entries)
            .default_ttl(Duration::from_secs(self.default_ttl_secs))
            .context_sensitive(self.context_sensitive)
            .level_sensitive(self.level_sensitive)
            .eviction_policy(self.eviction_policy)
            .max_search_time(Duration::from_millis(self.max_search_time_ms))
            .fuzzy_match(self.fuzzy_match)
            .build()?)
    }
}

// ============================================================================
// Root
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub provider: ProviderSettings,
    pub retry: RetrySettings,
    pub circuit_breaker: CircuitBreakerSettings,
    pub fallback: FallbackSettings,
    pub monitoring: MonitoringConfig,
    pub cache: CacheSettings,
    pub log: LogConfig,
    /// Per-attempt timeout for provider calls
    pub operation_timeout_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            provider: ProviderSettings::default(),
            retry: RetrySettings::default(),
            circuit_breaker: CircuitBreakerSettings::default(),
            fallback: FallbackSettings::default(),
            monitoring: MonitoringConfig::default(),
            cache: CacheSettings::default(),
            log: LogConfig::default(),
            operation_timeout_ms: TimeoutConfig::default().default.as_millis() as u64,
        }
    }
}

impl GatewayConfig {
    /// Load from `./config` and the environment.
    pub fn load() -> Result<Self, GatewayConfigError> {
        Self::load_from("config")
    }

    /// Load from `<dir>/default.*`, `<dir>/local.*` and the environment.
    pub fn load_from(dir: impl AsRef<Path>) -> Result<Self, GatewayConfigError> {
        let dir = dir.as_ref();
        let config = ConfigLoader::builder()
            .add_source(File::from(dir.join("default")).required(false))
            .add_source(File::from(dir.join("local")).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("retry.retryable_errors")
                    .with_list_parse_key("fallback.error_types"),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Load a single file, then apply the environment.
    pub fn load_file(path: impl AsRef<Path>) -> Result<Self, GatewayConfigError> {
        let config = ConfigLoader::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_millis(self.operation_timeout_ms)
    }

    pub fn timeout_config(&self) -> TimeoutConfig {
        TimeoutConfig::new(self.operation_timeout())
    }
}
