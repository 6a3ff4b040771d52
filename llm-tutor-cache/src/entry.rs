use chrono::{DateTime, Duration as ChronoDuration, Utc};
use llm_tutor_core::RequestContext;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::keys::{BucketKey, CacheKey};
use crate::similarity::{extract_keywords, tokenize};

/// Quality assumed for responses stored without a score.
pub const DEFAULT_QUALITY_SCORE: f64 = 70.0;

/// A response offered to the cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheableResponse {
    pub content: String,
    /// 0..=100
    pub quality_score: f64,
    pub concepts: Vec<String>,
}

impl CacheableResponse {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            quality_score: DEFAULT_QUALITY_SCORE,
            concepts: Vec::new(),
        }
    }

    pub fn with_quality(mut self, quality_score: f64) -> Self {
        self.quality_score = quality_score.clamp(0.0, 100.0);
        self
    }

    pub fn with_concepts<I, S>(mut self, concepts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.concepts = concepts.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub access_count: u64,
    pub quality_score: f64,
    pub keywords: Vec<String>,
    pub level: Option<String>,
    pub case_type: Option<String>,
    pub user_satisfaction: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub original_query: String,
    pub response: CacheableResponse,
    /// Hash of the request context the entry was stored under
    pub context_hash: String,
    pub metadata: EntryMetadata,
    pub ttl: Duration,
    pub expires_at: DateTime<Utc>,
    #[serde(skip)]
    pub(crate) tokens: Vec<String>,
}

impl CacheEntry {
    pub(crate) fn new(
        key: CacheKey,
        query: &str,
        response: CacheableResponse,
        context: &RequestContext,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        let expires_at = ChronoDuration::from_std(ttl)
            .ok()
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        Self {
            context_hash: key.as_str().to_string(),
            key,
            original_query: query.to_string(),
            metadata: EntryMetadata {
                created_at: now,
                last_accessed_at: now,
                access_count: 1,
                quality_score: response.quality_score,
                keywords: extract_keywords(query),
                level: context.level.clone(),
                case_type: context.case_type.clone(),
                user_satisfaction: None,
            },
            response,
            ttl,
            expires_at,
            tokens: tokenize(query),
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn bucket(&self) -> BucketKey {
        BucketKey {
            level: self.metadata.level.clone(),
            case_type: self.metadata.case_type.clone(),
        }
    }

    pub(crate) fn touch(&mut self, now: DateTime<Utc>) {
        self.metadata.last_accessed_at = now;
        self.metadata.access_count += 1;
    }
}

/// Base TTL, ×1.5 for quality above 80, ×1.2 for more than five concepts, capped at 2× base.
pub fn intelligent_ttl(base: Duration, quality_score: f64, concept_count: usize) -> Duration {
    let base_nanos = base.as_nanos();
    let mut nanos = base_nanos;
    if quality_score > 80.0 {
        nanos = nanos * 3 / 2;
    }
    if concept_count > 5 {
        nanos = nanos * 6 / 5;
    }
    u64::try_from(nanos.min(base_nanos * 2))
        .map(Duration::from_nanos)
        .unwrap_or_else(|_| base.saturating_mul(2))
}
