use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::RequestContext;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::Serialization(err.to_string())
    }
}

/// Failures reported by a generation provider.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("provider returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("failed to parse provider response: {0}")]
    InvalidResponse(String),

    #[error("response blocked by content filter: {0}")]
    ContentFiltered(String),
}

// ============================================================================
// Error taxonomy
// ============================================================================

/// Fixed taxonomy used to drive retry and fallback policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ErrorKind {
    #[serde(rename = "NETWORK_ERROR")]
    Network,
    #[serde(rename = "QUOTA_ERROR")]
    Quota,
    #[serde(rename = "PARSING_ERROR")]
    Parsing,
    #[serde(rename = "CONTEXT_TOO_LONG")]
    ContextTooLong,
    #[serde(rename = "CONTENT_FILTER")]
    ContentFilter,
    #[serde(rename = "INVALID_INPUT")]
    InvalidInput,
    #[serde(rename = "UNKNOWN_ERROR")]
    Unknown,
}

impl ErrorKind {
    pub const ALL: [ErrorKind; 7] = [
        ErrorKind::Network,
        ErrorKind::Quota,
        ErrorKind::Parsing,
        ErrorKind::ContextTooLong,
        ErrorKind::ContentFilter,
        ErrorKind::InvalidInput,
        ErrorKind::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Network => "NETWORK_ERROR",
            ErrorKind::Quota => "QUOTA_ERROR",
            ErrorKind::Parsing => "PARSING_ERROR",
            ErrorKind::ContextTooLong => "CONTEXT_TOO_LONG",
            ErrorKind::ContentFilter => "CONTENT_FILTER",
            ErrorKind::InvalidInput => "INVALID_INPUT",
            ErrorKind::Unknown => "UNKNOWN_ERROR",
        }
    }

    /// Kinds whose outcome is fixed by the request itself; retrying cannot change it.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            ErrorKind::Parsing | ErrorKind::ContextTooLong | ErrorKind::ContentFilter
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        ErrorKind::ALL
            .into_iter()
            .find(|kind| {
                kind.as_str() == normalized
                    || kind.as_str().trim_end_matches("_ERROR") == normalized
            })
            .ok_or_else(|| CoreError::Validation(format!("unknown error kind: {s}")))
    }
}

// ============================================================================
// Classified error
// ============================================================================

/// Where a classified error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorOrigin {
    /// The unit of work itself failed.
    Operation,
    /// The unit of work did not finish before its deadline.
    Timeout,
    /// The circuit breaker refused admission; nothing was invoked.
    CircuitOpen,
}

/// Call context attached to every classified error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorContext {
    pub operation_id: Option<String>,
    pub agent_id: Option<String>,
    pub attempt: u32,
    pub request: RequestContext,
}

impl ErrorContext {
    pub fn new(operation_id: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            operation_id: Some(operation_id.into()),
            agent_id: Some(agent_id.into()),
            attempt: 0,
            request: RequestContext::default(),
        }
    }

    pub fn with_request(mut self, request: RequestContext) -> Self {
        self.request = request;
        self
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }
}

/// A failure normalized into the error taxonomy. Immutable once created.
#[derive(Debug, Clone)]
pub struct ClassifiedError {
    id: Uuid,
    kind: ErrorKind,
    message: String,
    origin: ErrorOrigin,
    cause: Option<Arc<dyn StdError + Send + Sync + 'static>>,
    context: ErrorContext,
    timestamp: DateTime<Utc>,
}

impl ClassifiedError {
    pub fn new(kind: ErrorKind, message: impl Into<String>, context: ErrorContext) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            message: message.into(),
            origin: ErrorOrigin::Operation,
            cause: None,
            context,
            timestamp: Utc::now(),
        }
    }

    /// Synthetic error raised when the circuit breaker rejects a call.
    pub fn circuit_open(breaker: &str, context: ErrorContext) -> Self {
        Self {
            origin: ErrorOrigin::CircuitOpen,
            ..Self::new(
                ErrorKind::Network,
                format!("circuit breaker '{breaker}' is open"),
                context,
            )
        }
    }

    pub fn timeout(after: Duration, context: ErrorContext) -> Self {
        Self {
            origin: ErrorOrigin::Timeout,
            ..Self::new(
                ErrorKind::Network,
                format!("operation timed out after {after:?}"),
                context,
            )
        }
    }

    pub fn with_cause(mut self, cause: Arc<dyn StdError + Send + Sync + 'static>) -> Self {
        self.cause = Some(cause);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn origin(&self) -> ErrorOrigin {
        self.origin
    }

    pub fn is_circuit_open(&self) -> bool {
        self.origin == ErrorOrigin::CircuitOpen
    }

    pub fn cause(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.cause.as_deref()
    }

    pub fn context(&self) -> &ErrorContext {
        &self.context
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn record(&self) -> ErrorRecord {
        ErrorRecord {
            id: self.id,
            kind: self.kind,
            message: self.message.clone(),
            attempt: self.context.attempt,
            timestamp: self.timestamp,
        }
    }
}

impl fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl StdError for ClassifiedError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn StdError + 'static))
    }
}

/// Serializable summary of a classified error, kept in retry history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub id: Uuid,
    pub kind: ErrorKind,
    pub message: String,
    pub attempt: u32,
    pub timestamp: DateTime<Utc>,
}
