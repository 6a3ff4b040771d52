//! Cache keys and index buckets.

use llm_tutor_core::RequestContext;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::config::CacheConfig;
use crate::similarity::normalize;

const FIELD_SEPARATOR: u8 = 0x1f;

/// Hex-encoded SHA-256 over the ordered key components.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey(String);

impl CacheKey {
    /// Components: normalized query, level (when level-sensitive), case type,
    /// case id (when context-sensitive).
    pub fn compute(query: &str, context: &RequestContext, config: &CacheConfig) -> Self {
        Self::from_components(
            query,
            context.level.as_deref(),
            context.case_type.as_deref(),
            context.case_id.as_deref(),
            config,
        )
    }

    /// Keys tried by an exact lookup, most specific first: the full key,
    /// then the level-specific key (no case type), then the case-type-specific
    /// key (no level). A variant is only produced when it differs from the
    /// full key.
    pub fn lookup_keys(query: &str, context: &RequestContext, config: &CacheConfig) -> Vec<Self> {
        let level = context.level.as_deref();
        let case_type = context.case_type.as_deref();
        let case_id = context.case_id.as_deref();

        let mut keys = vec![Self::from_components(query, level, case_type, case_id, config)];
        if case_type.is_some() {
            keys.push(Self::from_components(query, level, None, case_id, config));
        }
        if config.level_sensitive && level.is_some() {
            keys.push(Self::from_components(query, None, case_type, case_id, config));
        }
        keys
    }

    fn from_components(
        query: &str,
        level: Option<&str>,
        case_type: Option<&str>,
        case_id: Option<&str>,
        config: &CacheConfig,
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(normalize(query).as_bytes());
        hasher.update([FIELD_SEPARATOR]);
        if config.level_sensitive {
            hasher.update(level.unwrap_or_default().as_bytes());
        }
        hasher.update([FIELD_SEPARATOR]);
        hasher.update(case_type.unwrap_or_default().as_bytes());
        hasher.update([FIELD_SEPARATOR]);
        if config.context_sensitive {
            hasher.update(case_id.unwrap_or_default().as_bytes());
        }
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Secondary index bucket: `(level, case_type)`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BucketKey {
    pub level: Option<String>,
    pub case_type: Option<String>,
}

impl BucketKey {
    pub fn for_context(context: &RequestContext) -> Self {
        Self {
            level: context.level.clone(),
            case_type: context.case_type.clone(),
        }
    }
}
