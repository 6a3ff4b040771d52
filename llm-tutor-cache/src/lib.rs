//! Similarity cache for tutoring responses.
//!
//! Responses are stored under a hash of the normalized query and its
//! request context, found again by exact key or by textual similarity, and
//! bounded by a pluggable eviction policy.

pub mod cache;
pub mod config;
pub mod entry;
pub mod eviction;
pub mod keys;
pub mod metrics;
pub mod similarity;

pub use cache::{AdjustmentHint, CacheHit, CacheStats, MatchType, SimilarityCache};
pub use config::{CacheConfig, CacheConfigBuilder, CacheError, EvictionPolicy, PerformanceConfig};
pub use entry::{intelligent_ttl, CacheEntry, CacheableResponse, EntryMetadata, DEFAULT_QUALITY_SCORE};
pub use eviction::{composite_score, EvictionCandidate, EvictionScheduler};
pub use keys::{BucketKey, CacheKey};
