//! Similarity cache for generated responses.
//!
//! Lookups try an exact match first (the full key, then the level-specific
//! and case-type-specific keys), then a time-boxed fuzzy scan over
//! the `(level, case_type)` bucket of the request (or every bucket when the
//! cache is not level-sensitive). Writes assign an intelligent TTL and run
//! an eviction pass once the cache is over capacity.
//!
//! ```rust
//! use llm_tutor_cache::{CacheConfig, CacheableResponse, MatchType, SimilarityCache};
//! use llm_tutor_core::RequestContext;
//!
//! let cache = SimilarityCache::new(CacheConfig::default()).unwrap();
//! let context = RequestContext::new().with_level("beginner").with_case_type("cardiology");
//!
//! cache.set("What is angina?", CacheableResponse::new("Chest pain from ischemia."), &context);
//! let hit = cache.get("what is angina", &context).unwrap();
//! assert_eq!(hit.match_type, MatchType::Exact);
//! ```

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use llm_tutor_core::RequestContext;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering as CmpOrdering;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::debug;

use crate::config::{CacheConfig, CacheError};
use crate::entry::{intelligent_ttl, CacheEntry, CacheableResponse};
use crate::eviction::{EvictionCandidate, EvictionScheduler};
use crate::keys::{BucketKey, CacheKey};
use crate::metrics::CacheMetrics;
use crate::similarity::{context_weight, quality_weight, token_similarity, tokenize};

/// Fuzzy candidates below `threshold * CANDIDATE_FLOOR` are discarded early.
const CANDIDATE_FLOOR: f64 = 0.8;
/// Accepted fuzzy matches inside this range are flagged for adjustment.
const ADJUSTMENT_RANGE: std::ops::Range<f64> = 0.75..0.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Exact,
    Fuzzy,
}

/// What the caller may want to adapt before reusing a fuzzy match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AdjustmentHint {
    LevelMismatch {
        cached: Option<String>,
        requested: Option<String>,
    },
    CaseTypeMismatch {
        cached: Option<String>,
        requested: Option<String>,
    },
    LowConfidence {
        similarity: f64,
    },
}

impl fmt::Display for AdjustmentHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn show(value: &Option<String>) -> &str {
            value.as_deref().unwrap_or("unspecified")
        }
        match self {
            AdjustmentHint::LevelMismatch { cached, requested } => write!(
                f,
                "written for level '{}', requested '{}'",
                show(cached),
                show(requested)
            ),
            AdjustmentHint::CaseTypeMismatch { cached, requested } => write!(
                f,
                "written for case type '{}', requested '{}'",
                show(cached),
                show(requested)
            ),
            AdjustmentHint::LowConfidence { similarity } => write!(
                f,
                "similar question ({similarity:.2}); rephrase to match the exact query"
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheHit {
    pub response: CacheableResponse,
    pub original_query: String,
    /// 1.0 for exact matches, the weighted score otherwise
    pub similarity: f64,
    pub match_type: MatchType,
    pub needs_adjustment: bool,
    pub adjustment_hints: Vec<AdjustmentHint>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub exact_hits: u64,
    pub fuzzy_hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub entries: usize,
    pub max_entries: usize,
    /// Hits over lookups, 0.0 before the first lookup
    pub hit_rate: f64,
}

#[derive(Debug, Default)]
struct CacheCounters {
    exact_hits: AtomicU64,
    fuzzy_hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

struct FuzzyCandidate {
    key: CacheKey,
    score: f64,
    level_matches: bool,
    case_type_matches: bool,
}

pub struct SimilarityCache {
    config: CacheConfig,
    entries: DashMap<CacheKey, CacheEntry>,
    index: DashMap<BucketKey, Vec<CacheKey>>,
    scheduler: EvictionScheduler,
    counters: CacheCounters,
}

impl SimilarityCache {
    pub fn new(config: CacheConfig) -> Result<Self, CacheError> {
        config.validate()?;
        Ok(Self {
            scheduler: EvictionScheduler::from_config(&config),
            config,
            entries: DashMap::new(),
            index: DashMap::new(),
            counters: CacheCounters::default(),
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn key_for(&self, query: &str, context: &RequestContext) -> CacheKey {
        CacheKey::compute(query, context, &self.config)
    }

    /// Exact lookup, then fuzzy. Expired entries count as misses.
    pub fn get(&self, query: &str, context: &RequestContext) -> Option<CacheHit> {
        let now = Utc::now();
        let keys = CacheKey::lookup_keys(query, context, &self.config);

        for key in &keys {
            if let Some(hit) = self.exact_match(key, now) {
                self.counters.exact_hits.fetch_add(1, Ordering::Relaxed);
                CacheMetrics::lookup("exact");
                debug!(key = %key, "Exact cache hit");
                return Some(hit);
            }
        }

        if self.config.performance.fuzzy_match {
            if let Some(hit) = self.fuzzy_match(query, context, now) {
                self.counters.fuzzy_hits.fetch_add(1, Ordering::Relaxed);
                CacheMetrics::lookup("fuzzy");
                CacheMetrics::similarity(hit.similarity);
                debug!(
                    similarity = hit.similarity,
                    needs_adjustment = hit.needs_adjustment,
                    "Fuzzy cache hit for '{}'",
                    hit.original_query
                );
                return Some(hit);
            }
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        CacheMetrics::lookup("miss");
        debug!(key = %keys[0], "Cache miss");
        None
    }

    fn exact_match(&self, key: &CacheKey, now: DateTime<Utc>) -> Option<CacheHit> {
        {
            let mut entry = self.entries.get_mut(key)?;
            if !entry.is_expired_at(now) {
                entry.touch(now);
                return Some(CacheHit {
                    response: entry.response.clone(),
                    original_query: entry.original_query.clone(),
                    similarity: 1.0,
                    match_type: MatchType::Exact,
                    needs_adjustment: false,
                    adjustment_hints: Vec::new(),
                });
            }
        }

        // the shard lock must be released before removal
        self.expire(key);
        None
    }

    fn fuzzy_match(
        &self,
        query: &str,
        context: &RequestContext,
        now: DateTime<Utc>,
    ) -> Option<CacheHit> {
        let threshold = self.config.similarity_threshold;
        let deadline = Instant::now() + self.config.performance.max_search_time;
        let query_tokens = tokenize(query);

        let mut candidates = Vec::new();
        let mut expired = Vec::new();
        for key in self.search_keys(context) {
            if Instant::now() >= deadline {
                debug!(
                    scanned = candidates.len(),
                    "Fuzzy scan stopped at max search time"
                );
                break;
            }
            let Some(entry) = self.entries.get(&key) else {
                continue;
            };
            if entry.is_expired_at(now) {
                expired.push(key);
                continue;
            }

            let level_matches = entry.metadata.level == context.level;
            let case_type_matches = entry.metadata.case_type == context.case_type;
            let score = token_similarity(&query_tokens, &entry.tokens)
                * context_weight(level_matches, case_type_matches)
                * quality_weight(entry.metadata.quality_score);

            if score >= threshold * CANDIDATE_FLOOR {
                candidates.push(FuzzyCandidate {
                    key,
                    score,
                    level_matches,
                    case_type_matches,
                });
            }
        }

        for key in &expired {
            self.expire(key);
        }

        candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(CmpOrdering::Equal));
        let best = candidates.into_iter().next()?;
        if best.score < threshold {
            return None;
        }

        let mut entry = self.entries.get_mut(&best.key)?;
        entry.touch(now);

        let needs_adjustment = ADJUSTMENT_RANGE.contains(&best.score);
        let mut adjustment_hints = Vec::new();
        if needs_adjustment {
            if !best.level_matches {
                adjustment_hints.push(AdjustmentHint::LevelMismatch {
                    cached: entry.metadata.level.clone(),
                    requested: context.level.clone(),
                });
            }
            if !best.case_type_matches {
                adjustment_hints.push(AdjustmentHint::CaseTypeMismatch {
                    cached: entry.metadata.case_type.clone(),
                    requested: context.case_type.clone(),
                });
            }
            adjustment_hints.push(AdjustmentHint::LowConfidence {
                similarity: best.score,
            });
        }

        Some(CacheHit {
            response: entry.response.clone(),
            original_query: entry.original_query.clone(),
            similarity: best.score,
            match_type: MatchType::Fuzzy,
            needs_adjustment,
            adjustment_hints,
        })
    }

    /// Keys of the request's bucket, or of every bucket when level-insensitive.
    fn search_keys(&self, context: &RequestContext) -> Vec<CacheKey> {
        if self.config.level_sensitive {
            self.index
                .get(&BucketKey::for_context(context))
                .map(|bucket| bucket.value().clone())
                .unwrap_or_default()
        } else {
            self.index
                .iter()
                .flat_map(|bucket| bucket.value().clone())
                .collect()
        }
    }

    /// Store `response` for `query`, replacing any entry under the same key.
    pub fn set(
        &self,
        query: &str,
        response: CacheableResponse,
        context: &RequestContext,
    ) -> CacheKey {
        let now = Utc::now();
        let key = self.key_for(query, context);
        let concept_count = if response.concepts.is_empty() {
            context.concepts.len()
        } else {
            response.concepts.len()
        };
        let ttl = intelligent_ttl(self.config.default_ttl, response.quality_score, concept_count);
        let entry = CacheEntry::new(key.clone(), query, response, context, ttl, now);
        let bucket = entry.bucket();

        if let Some(previous) = self.entries.insert(key.clone(), entry) {
            self.unindex(&previous.bucket(), &key);
        }
        self.index.entry(bucket).or_default().push(key.clone());
        debug!(key = %key, ttl_secs = ttl.as_secs(), "Cached response");

        if self.entries.len() > self.config.max_entries {
            self.evict(now);
        }
        CacheMetrics::entries(self.entries.len());
        key
    }

    /// Apply feedback to the entry stored under the exact key. Returns false when absent.
    pub fn update_quality(
        &self,
        query: &str,
        context: &RequestContext,
        quality_score: f64,
        user_satisfaction: Option<f64>,
    ) -> bool {
        let key = self.key_for(query, context);
        match self.entries.get_mut(&key) {
            Some(mut entry) => {
                let quality_score = quality_score.clamp(0.0, 100.0);
                entry.metadata.quality_score = quality_score;
                entry.response.quality_score = quality_score;
                if user_satisfaction.is_some() {
                    entry.metadata.user_satisfaction = user_satisfaction;
                }
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, query: &str, context: &RequestContext) -> Option<CacheEntry> {
        let key = self.key_for(query, context);
        self.remove_key(&key)
    }

    fn remove_key(&self, key: &CacheKey) -> Option<CacheEntry> {
        let (_, entry) = self.entries.remove(key)?;
        self.unindex(&entry.bucket(), key);
        Some(entry)
    }

    fn expire(&self, key: &CacheKey) {
        if self.remove_key(key).is_some() {
            self.counters.expirations.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn unindex(&self, bucket: &BucketKey, key: &CacheKey) {
        if let Some(mut keys) = self.index.get_mut(bucket) {
            keys.retain(|k| k != key);
        }
        self.index.remove_if(bucket, |_, keys| keys.is_empty());
    }

    /// Remove every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let expired: Vec<CacheKey> = self
            .entries
            .iter()
            .filter(|entry| entry.is_expired_at(now))
            .map(|entry| entry.key().clone())
            .collect();

        for key in &expired {
            self.expire(key);
        }
        if !expired.is_empty() {
            debug!("Purged {} expired cache entries", expired.len());
            CacheMetrics::entries(self.entries.len());
        }
        expired.len()
    }

    fn evict(&self, now: DateTime<Utc>) {
        let candidates: Vec<EvictionCandidate> = self
            .entries
            .iter()
            .map(|entry| EvictionCandidate::from(entry.value()))
            .collect();

        let victims = self.scheduler.select(candidates, now);
        let mut removed = 0;
        for key in &victims {
            if self.remove_key(key).is_some() {
                removed += 1;
            }
        }

        self.counters
            .evictions
            .fetch_add(removed as u64, Ordering::Relaxed);
        CacheMetrics::evicted(self.scheduler.policy(), removed);
        debug!(
            policy = %self.scheduler.policy(),
            removed,
            remaining = self.entries.len(),
            "Eviction pass complete"
        );
    }

    pub fn clear(&self) {
        self.entries.clear();
        self.index.clear();
        CacheMetrics::entries(0);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        let exact_hits = self.counters.exact_hits.load(Ordering::Relaxed);
        let fuzzy_hits = self.counters.fuzzy_hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let lookups = exact_hits + fuzzy_hits + misses;

        CacheStats {
            exact_hits,
            fuzzy_hits,
            misses,
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            expirations: self.counters.expirations.load(Ordering::Relaxed),
            entries: self.entries.len(),
            max_entries: self.config.max_entries,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                (exact_hits + fuzzy_hits) as f64 / lookups as f64
            },
        }
    }
}

impl fmt::Debug for SimilarityCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimilarityCache")
            .field("config", &self.config)
            .field("entries", &self.entries.len())
            .field("buckets", &self.index.len())
            .finish()
    }
}
