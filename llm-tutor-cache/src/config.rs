//! Cache configuration and errors.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CacheError {
    #[error("Invalid cache configuration: {0}")]
    InvalidConfig(String),

    #[error("Unknown eviction policy: {0}")]
    UnknownPolicy(String),
}

/// Which entries go first once the cache is over capacity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPolicy {
    /// Least recently accessed first.
    Lru,
    /// Fewest accesses first.
    Lfu,
    /// Entries older than the default TTL.
    Ttl,
    /// Lowest composite of usage, quality, age and idleness.
    #[default]
    Intelligent,
}

impl EvictionPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvictionPolicy::Lru => "lru",
            EvictionPolicy::Lfu => "lfu",
            EvictionPolicy::Ttl => "ttl",
            EvictionPolicy::Intelligent => "intelligent",
        }
    }
}

impl fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EvictionPolicy {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lru" => Ok(EvictionPolicy::Lru),
            "lfu" => Ok(EvictionPolicy::Lfu),
            "ttl" => Ok(EvictionPolicy::Ttl),
            "intelligent" => Ok(EvictionPolicy::Intelligent),
            other => Err(CacheError::UnknownPolicy(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PerformanceConfig {
    /// Upper bound on a single fuzzy scan
    pub max_search_time: Duration,
    pub fuzzy_match: bool,
    /// Share of entries removed by one eviction pass
    pub eviction_fraction: f64,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            max_search_time: Duration::from_millis(50),
            fuzzy_match: true,
            eviction_fraction: 0.1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// Minimum weighted similarity for a fuzzy hit.
    pub similarity_threshold: f64,
    pub max_entries: usize,
    /// Base lifetime before the intelligent TTL adjustments.
    pub default_ttl: Duration,
    /// Include the case id in the cache key.
    pub context_sensitive: bool,
    /// Include the learner level in the cache key and restrict fuzzy scans to its bucket.
    pub level_sensitive: bool,
    pub eviction_policy: EvictionPolicy,
    pub performance: PerformanceConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.85,
            max_entries: 1000,
            default_ttl: Duration::from_secs(60 * 60),
            context_sensitive: false,
            level_sensitive: true,
            eviction_policy: EvictionPolicy::Intelligent,
            performance: PerformanceConfig::default(),
        }
    }
}

impl CacheConfig {
    pub fn builder() -> CacheConfigBuilder {
        CacheConfigBuilder::new()
    }

    pub fn validate(&self) -> Result<(), CacheError> {
        if !(self.similarity_threshold > 0.0 && self.similarity_threshold <= 1.0) {
            return Err(CacheError::InvalidConfig(format!(
                "similarity_threshold must be within (0, 1], got {}",
                self.similarity_threshold
            )));
        }
        if self.max_entries == 0 {
            return Err(CacheError::InvalidConfig(
                "max_entries must be greater than 0".to_string(),
            ));
        }
        if self.default_ttl.is_zero() {
            return Err(CacheError::InvalidConfig(
                "default_ttl must be greater than 0".to_string(),
            ));
        }
        let fraction = self.performance.eviction_fraction;
        if !(fraction > 0.0 && fraction <= 1.0) {
            return Err(CacheError::InvalidConfig(format!(
                "eviction_fraction must be within (0, 1], got {fraction}"
            )));
        }
        Ok(())
    }
}

/// Builder for [`CacheConfig`]; unset fields keep their defaults.
#[derive(Debug, Default)]
pub struct CacheConfigBuilder {
    similarity_threshold: Option<f64>,
    max_entries: Option<usize>,
    default_ttl: Option<Duration>,
    context_sensitive: Option<bool>,
    level_sensitive: Option<bool>,
    eviction_policy: Option<EvictionPolicy>,
    max_search_time: Option<Duration>,
    fuzzy_match: Option<bool>,
    eviction_fraction: Option<f64>,
}

impl CacheConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn similarity_threshold(mut self, threshold: f64) -> Self {
        self.similarity_threshold = Some(threshold);
        self
    }

    pub fn max_entries(mut self, max: usize) -> Self {
        self.max_entries = Some(max);
        self
    }

    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    pub fn context_sensitive(mut self, enabled: bool) -> Self {
        self.context_sensitive = Some(enabled);
        self
    }

    pub fn level_sensitive(mut self, enabled: bool) -> Self {
        self.level_sensitive = Some(enabled);
        self
    }

    pub fn eviction_policy(mut self, policy: EvictionPolicy) -> Self {
        self.eviction_policy = Some(policy);
        self
    }

    pub fn max_search_time(mut self, limit: Duration) -> Self {
        self.max_search_time = Some(limit);
        self
    }

    pub fn fuzzy_match(mut self, enabled: bool) -> Self {
        self.fuzzy_match = Some(enabled);
        self
    }

    pub fn eviction_fraction(mut self, fraction: f64) -> Self {
        self.eviction_fraction = Some(fraction);
        self
    }

    pub fn build(self) -> Result<CacheConfig, CacheError> {
        let default = CacheConfig::default();
        let config = CacheConfig {
            similarity_threshold: self
                .similarity_threshold
                .unwrap_or(default.similarity_threshold),
            max_entries: self.max_entries.unwrap_or(default.max_entries),
            default_ttl: self.default_ttl.unwrap_or(default.default_ttl),
            context_sensitive: self.context_sensitive.unwrap_or(default.context_sensitive),
            level_sensitive: self.level_sensitive.unwrap_or(default.level_sensitive),
            eviction_policy: self.eviction_policy.unwrap_or(default.eviction_policy),
            performance: PerformanceConfig {
                max_search_time: self
                    .max_search_time
                    .unwrap_or(default.performance.max_search_time),
                fuzzy_match: self.fuzzy_match.unwrap_or(default.performance.fuzzy_match),
                eviction_fraction: self
                    .eviction_fraction
                    .unwrap_or(default.performance.eviction_fraction),
            },
        };
        config.validate()?;
        Ok(config)
    }
}
