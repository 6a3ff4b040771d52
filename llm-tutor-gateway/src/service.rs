//! Cache-first response path for tutoring questions.

use chrono::{DateTime, Utc};
use llm_tutor_cache::{AdjustmentHint, CacheHit, CacheableResponse, MatchType, SimilarityCache};
use llm_tutor_core::{
    ClassifiedError, GenerationProvider, GenerationRequest, QualityChecker, RequestContext,
    TokenUsage,
};
use llm_tutor_resilience::{FallbackReason, Outcome, ResilientExecutor};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Operation id used for provider calls; keys timeouts and retry state.
pub const GENERATE_OPERATION: &str = "generate";

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a patient medical tutor. \
Explain clearly at the learner's level and check understanding before moving on.";

/// What the caller gets back for one question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TutorResponse {
    pub content: String,
    pub cached: bool,
    pub degraded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub match_type: Option<MatchType>,
    pub needs_adjustment: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub adjustment_hints: Vec<AdjustmentHint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<FallbackReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub generated_at: DateTime<Utc>,
}

impl TutorResponse {
    fn from_hit(hit: CacheHit) -> Self {
        Self {
            content: hit.response.content,
            cached: true,
            degraded: false,
            similarity: Some(hit.similarity),
            match_type: Some(hit.match_type),
            needs_adjustment: hit.needs_adjustment,
            adjustment_hints: hit.adjustment_hints,
            fallback_reason: None,
            usage: None,
            model: None,
            generated_at: Utc::now(),
        }
    }
}

pub struct ResponseService {
    executor: Arc<ResilientExecutor>,
    provider: Arc<dyn GenerationProvider>,
    cache: Option<Arc<SimilarityCache>>,
    quality_checker: Option<Arc<dyn QualityChecker>>,
    agent_id: String,
    system_prompt: String,
}

impl fmt::Debug for ResponseService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseService")
            .field("provider", &self.provider.name())
            .field("cache", &self.cache.is_some())
            .field("quality_checker", &self.quality_checker.is_some())
            .field("agent_id", &self.agent_id)
            .finish_non_exhaustive()
    }
}

impl ResponseService {
    pub fn new(
        executor: Arc<ResilientExecutor>,
        provider: Arc<dyn GenerationProvider>,
        agent_id: impl Into<String>,
    ) -> Self {
        Self {
            executor,
            provider,
            cache: None,
            quality_checker: None,
            agent_id: agent_id.into(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }

    pub fn with_cache(mut self, cache: Arc<SimilarityCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Scores fresh answers before they are cached; `0.0..=1.0`.
    pub fn with_quality_checker(mut self, checker: Arc<dyn QualityChecker>) -> Self {
        self.quality_checker = Some(checker);
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn executor(&self) -> &Arc<ResilientExecutor> {
        &self.executor
    }

    pub fn cache(&self) -> Option<&Arc<SimilarityCache>> {
        self.cache.as_ref()
    }

    /// Answer `query`, from the cache when possible.
    ///
    /// Fresh answers are cached; degraded fallbacks never are.
    pub async fn respond(
        &self,
        query: &str,
        context: &RequestContext,
    ) -> Result<TutorResponse, ClassifiedError> {
        if let Some(hit) = self.cache.as_ref().and_then(|c| c.get(query, context)) {
            debug!(similarity = hit.similarity, match_type = ?hit.match_type, "answered from cache");
            return Ok(TutorResponse::from_hit(hit));
        }

        let request = GenerationRequest::new(query, context.clone())
            .with_system_prompt(self.system_prompt.clone());

        let outcome = self
            .executor
            .execute(
                || self.provider.generate(&request),
                context,
                GENERATE_OPERATION,
                &self.agent_id,
            )
            .await?;

        match outcome {
            Outcome::Completed(generated) => {
                if let Some(cache) = &self.cache {
                    let quality = self
                        .quality_checker
                        .as_ref()
                        .map(|checker| checker.score(&generated.content, context) * 100.0);
                    let mut cacheable = CacheableResponse::new(generated.content.clone())
                        .with_concepts(context.concepts.iter().cloned());
                    if let Some(quality) = quality {
                        cacheable = cacheable.with_quality(quality);
                    }
                    cache.set(query, cacheable, context);
                }

                info!(
                    model = %generated.model,
                    latency_ms = generated.latency.as_millis() as u64,
                    tokens = generated.usage.total_tokens,
                    "generated response"
                );

                Ok(TutorResponse {
                    content: generated.content,
                    cached: false,
                    degraded: false,
                    similarity: None,
                    match_type: None,
                    needs_adjustment: false,
                    adjustment_hints: Vec::new(),
                    fallback_reason: None,
                    usage: Some(generated.usage),
                    model: Some(generated.model),
                    generated_at: Utc::now(),
                })
            }
            Outcome::Degraded(fallback) => Ok(TutorResponse {
                content: fallback.content,
                cached: false,
                degraded: true,
                similarity: None,
                match_type: None,
                needs_adjustment: false,
                adjustment_hints: Vec::new(),
                fallback_reason: Some(fallback.reason),
                usage: None,
                model: None,
                generated_at: fallback.generated_at,
            }),
        }
    }
}
