//! Structured logging setup.
//!
//! ```rust,no_run
//! use llm_tutor_resilience::observability::logging::{init_logging, LogConfig};
//!
//! init_logging(&LogConfig::default()).expect("Failed to initialize logging");
//! ```

use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON format for production (machine-readable)
    Json,
    /// Pretty format for development (human-readable)
    Pretty,
    /// Compact format for minimal output
    Compact,
}

impl Default for LogFormat {
    fn default() -> Self {
        #[cfg(debug_assertions)]
        return Self::Pretty;

        #[cfg(not(debug_assertions))]
        return Self::Json;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub format: LogFormat,
    /// Default log level
    pub level: String,
    /// Per-module directives (e.g., "llm_tutor_cache=debug,reqwest=warn"); overrides `level`
    pub filter: Option<String>,
    /// Emit span close events with timings
    pub span_events: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: "info".to_string(),
            filter: None,
            span_events: false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Invalid log filter: {0}")]
    InvalidFilter(String),

    #[error("Failed to install subscriber: {0}")]
    Install(String),
}

// ============================================================================
// Initialization
// ============================================================================

/// Explicit filter first, then `RUST_LOG`, then the configured level.
pub fn build_filter(config: &LogConfig) -> Result<EnvFilter, LoggingError> {
    match &config.filter {
        Some(filter) => {
            EnvFilter::try_new(filter).map_err(|e| LoggingError::InvalidFilter(e.to_string()))
        }
        None => EnvFilter::try_from_default_env().or_else(|_| {
            EnvFilter::try_new(&config.level)
                .map_err(|e| LoggingError::InvalidFilter(e.to_string()))
        }),
    }
}

pub fn init_logging(config: &LogConfig) -> Result<(), LoggingError> {
    let env_filter = build_filter(config)?;
    let span_events = if config.span_events {
        FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let result = match config.format {
        LogFormat::Json => {
            let json_layer = fmt::layer()
                .json()
                .with_span_events(span_events)
                .with_current_span(true)
                .with_thread_ids(true)
                .with_filter(env_filter);

            tracing_subscriber::registry().with(json_layer).try_init()
        }
        LogFormat::Pretty => {
            let pretty_layer = fmt::layer()
                .pretty()
                .with_span_events(span_events)
                .with_filter(env_filter);

            tracing_subscriber::registry().with(pretty_layer).try_init()
        }
        LogFormat::Compact => {
            let compact_layer = fmt::layer()
                .compact()
                .with_span_events(span_events)
                .with_filter(env_filter);

            tracing_subscriber::registry().with(compact_layer).try_init()
        }
    };
    result.map_err(|e| LoggingError::Install(e.to_string()))?;

    info!("Logging system initialized with format: {:?}", config.format);
    Ok(())
}
