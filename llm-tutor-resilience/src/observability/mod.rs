//! Observability for the execution pipeline
//!
//! - Structured logging setup on `tracing-subscriber`
//! - Prometheus metrics through the `metrics` facade
//! - In-process error accounting with alert thresholds
//! - Alert definitions and receivers

pub mod alerting;
pub mod logging;
pub mod metrics;
pub mod monitoring;

pub use alerting::{Alert, AlertKind, AlertReceiver, AlertSeverity, LoggingAlertReceiver};

pub use logging::{build_filter, init_logging, LogConfig, LogFormat, LoggingError};

pub use metrics::{init_metrics, render_metrics, MetricsError, ResilienceMetrics};

pub use monitoring::{
    ErrorMetrics, ErrorMetricsSnapshot, ErrorReporter, MetricsCollector, Monitor,
    MonitoringConfig, ObservabilityHooks,
};
