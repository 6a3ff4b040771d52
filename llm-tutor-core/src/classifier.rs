//! Maps arbitrary failures onto the [`ErrorKind`] taxonomy.
//!
//! Typed attributes (provider status codes, I/O error kinds) are inspected
//! first, then the rendered error chain is matched against ordered keyword
//! heuristics. Errors that are already classified pass through untouched.

use std::error::Error as StdError;
use std::io;
use std::sync::Arc;

use crate::error::{ClassifiedError, ErrorContext, ErrorKind, ProviderError};

const NETWORK_KEYWORDS: &[&str] = &[
    "timeout",
    "timed out",
    "deadline has elapsed",
    "network",
    "connection",
    "econnreset",
    "econnrefused",
    "socket hang up",
    "dns",
    "fetch failed",
    "unreachable",
];

const QUOTA_KEYWORDS: &[&str] = &[
    "quota",
    "rate limit",
    "rate-limit",
    "ratelimit",
    "rate_limit",
    "too many requests",
    "429",
];

const PARSING_KEYWORDS: &[&str] = &["parse", "json", "unexpected token", "deserializ"];

const CONTEXT_KEYWORDS: &[&str] = &["length", "context", "too long", "token limit"];

const CONTENT_FILTER_KEYWORDS: &[&str] = &["filter", "content", "safety", "moderation"];

const INVALID_INPUT_KEYWORDS: &[&str] = &[
    "invalid",
    "malformed request",
    "missing required",
    "empty prompt",
    "bad request",
];

/// Ordered heuristics; the first matching group wins.
const TEXT_RULES: &[(ErrorKind, &[&str])] = &[
    (ErrorKind::Network, NETWORK_KEYWORDS),
    (ErrorKind::Quota, QUOTA_KEYWORDS),
    (ErrorKind::Parsing, PARSING_KEYWORDS),
    (ErrorKind::ContextTooLong, CONTEXT_KEYWORDS),
    (ErrorKind::ContentFilter, CONTENT_FILTER_KEYWORDS),
    (ErrorKind::InvalidInput, INVALID_INPUT_KEYWORDS),
];

#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorClassifier;

impl ErrorClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Classify a failure raised by a unit of work.
    pub fn classify(&self, error: anyhow::Error, context: &ErrorContext) -> ClassifiedError {
        let error = match error.downcast::<ClassifiedError>() {
            Ok(classified) => return classified,
            Err(error) => error,
        };

        let message = format!("{error:#}");
        let kind = error
            .chain()
            .find_map(kind_from_attributes)
            .unwrap_or_else(|| kind_from_text(&message));

        let cause: Box<dyn StdError + Send + Sync + 'static> = error.into();
        ClassifiedError::new(kind, message, context.clone()).with_cause(Arc::from(cause))
    }

    /// Kind only, without building a [`ClassifiedError`].
    pub fn kind_of(&self, error: &anyhow::Error) -> ErrorKind {
        if let Some(classified) = error.downcast_ref::<ClassifiedError>() {
            return classified.kind();
        }
        error
            .chain()
            .find_map(kind_from_attributes)
            .unwrap_or_else(|| kind_from_text(&format!("{error:#}")))
    }
}

fn kind_from_attributes(error: &(dyn StdError + 'static)) -> Option<ErrorKind> {
    if let Some(provider) = error.downcast_ref::<ProviderError>() {
        return Some(kind_from_provider(provider));
    }
    if let Some(io_error) = error.downcast_ref::<io::Error>() {
        return match io_error.kind() {
            io::ErrorKind::TimedOut
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::BrokenPipe => Some(ErrorKind::Network),
            io::ErrorKind::InvalidData => Some(ErrorKind::Parsing),
            io::ErrorKind::InvalidInput => Some(ErrorKind::InvalidInput),
            _ => None,
        };
    }
    if error.downcast_ref::<serde_json::Error>().is_some() {
        return Some(ErrorKind::Parsing);
    }
    None
}

fn kind_from_provider(error: &ProviderError) -> ErrorKind {
    match error {
        ProviderError::Timeout(_) | ProviderError::Transport(_) => ErrorKind::Network,
        ProviderError::InvalidResponse(_) => ErrorKind::Parsing,
        ProviderError::ContentFiltered(_) => ErrorKind::ContentFilter,
        ProviderError::Status { status, message } => match status {
            429 => ErrorKind::Quota,
            408 | 502 | 503 | 504 => ErrorKind::Network,
            413 => ErrorKind::ContextTooLong,
            400 | 422 => match kind_from_text(message) {
                ErrorKind::Unknown => ErrorKind::InvalidInput,
                kind => kind,
            },
            _ => kind_from_text(message),
        },
    }
}

fn kind_from_text(text: &str) -> ErrorKind {
    let text = text.to_lowercase();
    TEXT_RULES
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|keyword| text.contains(keyword)))
        .map(|(kind, _)| *kind)
        .unwrap_or(ErrorKind::Unknown)
}
