//! Graceful degradation when the primary path cannot complete.
//!
//! The handler produces a labeled substitute response. When the substitute
//! itself fails (generator error or a quality score under the floor) the
//! caller gets the original error back, never the fallback's own failure.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use llm_tutor_core::{ClassifiedError, ErrorKind, QualityChecker, RequestContext, ResponseGenerator};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

pub const DEFAULT_FALLBACK_MESSAGE: &str = "I'm having trouble putting together an answer right now. \
Let's pause for a moment and try this question again shortly.";

/// Why the fallback path was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    CircuitOpen,
    RetriesExhausted,
    ConsecutiveFailures,
}

impl FallbackReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackReason::CircuitOpen => "circuit_open",
            FallbackReason::RetriesExhausted => "retries_exhausted",
            FallbackReason::ConsecutiveFailures => "consecutive_failures",
        }
    }
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A degraded substitute handed back instead of a provider result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackResponse {
    pub content: String,
    /// Always false; a degraded answer is never served from the cache
    pub cached: bool,
    pub degraded: bool,
    pub reason: FallbackReason,
    pub error_kind: ErrorKind,
    pub quality_score: Option<f64>,
    pub generated_at: DateTime<Utc>,
}

/// Returns the same text for every failure.
#[derive(Debug, Clone)]
pub struct StaticResponseGenerator {
    message: String,
}

impl StaticResponseGenerator {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl Default for StaticResponseGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_FALLBACK_MESSAGE)
    }
}

#[async_trait]
impl ResponseGenerator for StaticResponseGenerator {
    async fn generate(
        &self,
        _context: &RequestContext,
        _error: &ClassifiedError,
    ) -> anyhow::Result<String> {
        Ok(self.message.clone())
    }
}

#[derive(Debug, Clone)]
pub struct TriggerConditions {
    /// Kinds that route to the fallback once retries stop
    pub error_types: HashSet<ErrorKind>,
    /// Attempts beyond this count always route to the fallback
    pub consecutive_failures: u32,
}

impl Default for TriggerConditions {
    fn default() -> Self {
        Self {
            error_types: [ErrorKind::Network, ErrorKind::Quota, ErrorKind::Unknown]
                .into_iter()
                .collect(),
            consecutive_failures: 3,
        }
    }
}

#[derive(Clone)]
pub struct QualityMetrics {
    /// Minimum checker score, `0.0..=1.0`
    pub min_quality_score: f64,
    pub checker: Option<Arc<dyn QualityChecker>>,
}

impl Default for QualityMetrics {
    fn default() -> Self {
        Self {
            min_quality_score: 0.5,
            checker: None,
        }
    }
}

impl fmt::Debug for QualityMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QualityMetrics")
            .field("min_quality_score", &self.min_quality_score)
            .field("checker", &self.checker.is_some())
            .finish()
    }
}

#[derive(Clone)]
pub struct FallbackConfig {
    pub enabled: bool,
    pub generator: Arc<dyn ResponseGenerator>,
    pub trigger_conditions: TriggerConditions,
    pub quality_metrics: QualityMetrics,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            generator: Arc::new(StaticResponseGenerator::default()),
            trigger_conditions: TriggerConditions::default(),
            quality_metrics: QualityMetrics::default(),
        }
    }
}

impl fmt::Debug for FallbackConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FallbackConfig")
            .field("enabled", &self.enabled)
            .field("trigger_conditions", &self.trigger_conditions)
            .field("quality_metrics", &self.quality_metrics)
            .finish_non_exhaustive()
    }
}

impl FallbackConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    pub fn with_generator(mut self, generator: Arc<dyn ResponseGenerator>) -> Self {
        self.generator = generator;
        self
    }

    pub fn with_error_types<I>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = ErrorKind>,
    {
        self.trigger_conditions.error_types = kinds.into_iter().collect();
        self
    }

    pub fn with_consecutive_failures(mut self, failures: u32) -> Self {
        self.trigger_conditions.consecutive_failures = failures;
        self
    }

    pub fn with_quality_checker(
        mut self,
        checker: Arc<dyn QualityChecker>,
        min_quality_score: f64,
    ) -> Self {
        self.quality_metrics = QualityMetrics {
            min_quality_score,
            checker: Some(checker),
        };
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct FallbackHandler {
    config: FallbackConfig,
}

impl FallbackHandler {
    pub fn new(config: FallbackConfig) -> Self {
        Self { config }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Which trigger, if any, applies to a failure that will not be retried.
    pub fn trigger(&self, error: &ClassifiedError, attempt: u32) -> Option<FallbackReason> {
        if !self.config.enabled {
            return None;
        }
        let conditions = &self.config.trigger_conditions;

        if error.is_circuit_open() {
            Some(FallbackReason::CircuitOpen)
        } else if conditions.error_types.contains(&error.kind()) {
            Some(FallbackReason::RetriesExhausted)
        } else if attempt > conditions.consecutive_failures {
            Some(FallbackReason::ConsecutiveFailures)
        } else {
            None
        }
    }

    /// Build the substitute, or hand back `error` when the substitute is unusable.
    pub async fn handle(
        &self,
        context: &RequestContext,
        error: ClassifiedError,
        reason: FallbackReason,
    ) -> Result<FallbackResponse, ClassifiedError> {
        let content = match self.config.generator.generate(context, &error).await {
            Ok(content) => content,
            Err(generator_error) => {
                warn!(
                    error = %generator_error,
                    original = %error,
                    "Fallback generator failed; surfacing original error"
                );
                return Err(error);
            }
        };

        let quality_score = self
            .config
            .quality_metrics
            .checker
            .as_ref()
            .map(|checker| checker.score(&content, context));

        if let Some(score) = quality_score {
            if score < self.config.quality_metrics.min_quality_score {
                warn!(
                    score,
                    min = self.config.quality_metrics.min_quality_score,
                    original = %error,
                    "Fallback response below quality floor; surfacing original error"
                );
                return Err(error);
            }
        }

        debug!(reason = %reason, kind = %error.kind(), "Fallback response generated");
        Ok(FallbackResponse {
            content,
            cached: false,
            degraded: true,
            reason,
            error_kind: error.kind(),
            quality_score,
            generated_at: Utc::now(),
        })
    }
}
