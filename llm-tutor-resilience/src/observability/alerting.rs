//! Alerts raised by the execution pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{error, info, warn};
use uuid::Uuid;

// ============================================================================
// Alert definitions
// ============================================================================

/// Alert severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    /// Page the on-call
    Critical,
    /// Needs attention soon
    Warning,
    /// Informational only
    Info,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Critical => "critical",
            AlertSeverity::Warning => "warning",
            AlertSeverity::Info => "info",
        }
    }
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    CircuitBreakerOpen,
    FallbackActivated,
    HighErrorRate,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::CircuitBreakerOpen => "circuit_breaker_open",
            AlertKind::FallbackActivated => "fallback_activated",
            AlertKind::HighErrorRate => "high_error_rate",
        }
    }

    pub fn severity(&self) -> AlertSeverity {
        match self {
            AlertKind::CircuitBreakerOpen => AlertSeverity::Critical,
            AlertKind::HighErrorRate => AlertSeverity::Warning,
            AlertKind::FallbackActivated => AlertSeverity::Info,
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub message: String,
    pub details: BTreeMap<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    pub fn new(kind: AlertKind, message: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            severity: kind.severity(),
            message: message.into(),
            details: BTreeMap::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(value) = serde_json::to_value(value) {
            self.details.insert(key.into(), value);
        }
        self
    }
}

// ============================================================================
// Receivers
// ============================================================================

/// Called synchronously for every raised alert.
pub trait AlertReceiver: Send + Sync {
    fn receive(&self, alert: &Alert);
}

/// Writes alerts to the tracing subscriber.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingAlertReceiver;

impl AlertReceiver for LoggingAlertReceiver {
    fn receive(&self, alert: &Alert) {
        let details = serde_json::to_string(&alert.details).unwrap_or_default();
        match alert.severity {
            AlertSeverity::Critical => {
                error!(alert = %alert.kind, details = %details, "{}", alert.message)
            }
            AlertSeverity::Warning => {
                warn!(alert = %alert.kind, details = %details, "{}", alert.message)
            }
            AlertSeverity::Info => {
                info!(alert = %alert.kind, details = %details, "{}", alert.message)
            }
        }
    }
}
