//! Victim selection for an over-capacity cache.
//!
//! One pass removes roughly `eviction_fraction` of the entries (at least
//! one). The TTL policy removes every entry older than the default TTL
//! instead; when none qualifies it falls back to the oldest batch so the
//! size bound still holds.

use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::time::Duration;

use crate::config::{CacheConfig, EvictionPolicy};
use crate::entry::CacheEntry;
use crate::keys::CacheKey;

const WEEK_SECS: f64 = 7.0 * 24.0 * 3600.0;
const DAY_SECS: f64 = 24.0 * 3600.0;

/// The fields eviction looks at, detached from the live entry.
#[derive(Debug, Clone, PartialEq)]
pub struct EvictionCandidate {
    pub key: CacheKey,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
    pub access_count: u64,
    pub quality_score: f64,
}

impl From<&CacheEntry> for EvictionCandidate {
    fn from(entry: &CacheEntry) -> Self {
        Self {
            key: entry.key.clone(),
            created_at: entry.metadata.created_at,
            last_accessed_at: entry.metadata.last_accessed_at,
            access_count: entry.metadata.access_count,
            quality_score: entry.metadata.quality_score,
        }
    }
}

fn seconds_between(earlier: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    (now - earlier).num_milliseconds().max(0) as f64 / 1000.0
}

/// Retention value of an entry; lower is evicted first.
///
/// `0.3·(accesses/10) + 0.3·(quality/100) + 0.2·freshness(7d) + 0.2·recency(24h)`
pub fn composite_score(candidate: &EvictionCandidate, now: DateTime<Utc>) -> f64 {
    let age = seconds_between(candidate.created_at, now);
    let idle = seconds_between(candidate.last_accessed_at, now);

    0.3 * (candidate.access_count as f64 / 10.0)
        + 0.3 * (candidate.quality_score / 100.0)
        + 0.2 * (1.0 - age / WEEK_SECS).max(0.0)
        + 0.2 * (1.0 - idle / DAY_SECS).max(0.0)
}

#[derive(Debug, Clone, PartialEq)]
pub struct EvictionScheduler {
    policy: EvictionPolicy,
    fraction: f64,
    default_ttl: Duration,
}

impl EvictionScheduler {
    pub fn new(policy: EvictionPolicy, fraction: f64, default_ttl: Duration) -> Self {
        Self {
            policy,
            fraction,
            default_ttl,
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(
            config.eviction_policy,
            config.performance.eviction_fraction,
            config.default_ttl,
        )
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    /// Entries removed by one pass over `total` entries.
    pub fn batch_size(&self, total: usize) -> usize {
        if total == 0 {
            return 0;
        }
        ((total as f64 * self.fraction).floor() as usize).clamp(1, total)
    }

    /// Keys to evict, in eviction order.
    pub fn select(&self, mut candidates: Vec<EvictionCandidate>, now: DateTime<Utc>) -> Vec<CacheKey> {
        let batch = self.batch_size(candidates.len());

        match self.policy {
            EvictionPolicy::Lru => candidates.sort_by(|a, b| {
                a.last_accessed_at
                    .cmp(&b.last_accessed_at)
                    .then_with(|| a.key.cmp(&b.key))
            }),
            EvictionPolicy::Lfu => candidates.sort_by(|a, b| {
                a.access_count
                    .cmp(&b.access_count)
                    .then_with(|| a.last_accessed_at.cmp(&b.last_accessed_at))
                    .then_with(|| a.key.cmp(&b.key))
            }),
            EvictionPolicy::Ttl => {
                let ttl = self.default_ttl.as_secs_f64();
                let aged: Vec<CacheKey> = candidates
                    .iter()
                    .filter(|c| seconds_between(c.created_at, now) > ttl)
                    .map(|c| c.key.clone())
                    .collect();
                if !aged.is_empty() {
                    return aged;
                }
                candidates.sort_by(|a, b| {
                    a.created_at
                        .cmp(&b.created_at)
                        .then_with(|| a.key.cmp(&b.key))
                });
            }
            EvictionPolicy::Intelligent => {
                let mut scored: Vec<(f64, EvictionCandidate)> = candidates
                    .into_iter()
                    .map(|c| (composite_score(&c, now), c))
                    .collect();
                scored.sort_by(|(a_score, a), (b_score, b)| {
                    a_score
                        .partial_cmp(b_score)
                        .unwrap_or(Ordering::Equal)
                        .then_with(|| a.key.cmp(&b.key))
                });
                return scored.into_iter().take(batch).map(|(_, c)| c.key).collect();
            }
        }

        candidates.into_iter().take(batch).map(|c| c.key).collect()
    }
}
