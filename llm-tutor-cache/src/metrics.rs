//! Cache counters recorded through the `metrics` facade.

use metrics::{counter, gauge, histogram};

use crate::config::EvictionPolicy;

pub struct CacheMetrics;

impl CacheMetrics {
    pub fn lookup(result: &'static str) {
        counter!("tutor_cache_lookups_total", "result" => result).increment(1);
    }

    pub fn similarity(score: f64) {
        histogram!("tutor_cache_similarity_score").record(score);
    }

    pub fn evicted(policy: EvictionPolicy, count: usize) {
        counter!("tutor_cache_evictions_total", "policy" => policy.as_str()).increment(count as u64);
    }

    pub fn entries(count: usize) {
        gauge!("tutor_cache_entries").set(count as f64);
    }
}
