//! Ephemeral per-call retry bookkeeping, keyed by `(agent_id, operation_id)`.
//!
//! Entries are created on the first failure, removed on success, and swept
//! once they have been idle longer than the configured window.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use llm_tutor_core::{ClassifiedError, ErrorRecord};
use serde::Serialize;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(5 * 60);
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Most recent failures kept per key.
const MAX_HISTORY: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RetryKey {
    pub agent_id: String,
    pub operation_id: String,
}

impl RetryKey {
    pub fn new(agent_id: impl Into<String>, operation_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            operation_id: operation_id.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RetryState {
    pub attempt_count: u32,
    pub first_error_time: DateTime<Utc>,
    pub last_error_time: DateTime<Utc>,
    /// Oldest first
    pub error_history: Vec<ErrorRecord>,
    pub next_retry_time: Option<DateTime<Utc>>,
    #[serde(skip)]
    last_touched: Instant,
}

#[derive(Debug)]
pub struct RetryStateStore {
    states: DashMap<RetryKey, RetryState>,
    idle_timeout: Duration,
}

impl Default for RetryStateStore {
    fn default() -> Self {
        Self::new(DEFAULT_IDLE_TIMEOUT)
    }
}

impl RetryStateStore {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            states: DashMap::new(),
            idle_timeout,
        }
    }

    /// Append a failure for `key`; `next_delay` is the pause before the next attempt, if any.
    pub fn record_failure(
        &self,
        key: &RetryKey,
        error: &ClassifiedError,
        attempt: u32,
        next_delay: Option<Duration>,
    ) {
        let now = Utc::now();
        let next_retry_time =
            next_delay.and_then(|delay| chrono::Duration::from_std(delay).ok().map(|d| now + d));

        let mut entry = self.states.entry(key.clone()).or_insert_with(|| RetryState {
            attempt_count: 0,
            first_error_time: now,
            last_error_time: now,
            error_history: Vec::new(),
            next_retry_time: None,
            last_touched: Instant::now(),
        });

        let state = entry.value_mut();
        state.attempt_count = attempt;
        state.last_error_time = now;
        state.next_retry_time = next_retry_time;
        state.last_touched = Instant::now();
        state.error_history.push(error.record());
        if state.error_history.len() > MAX_HISTORY {
            let overflow = state.error_history.len() - MAX_HISTORY;
            state.error_history.drain(..overflow);
        }
    }

    pub fn clear(&self, key: &RetryKey) -> Option<RetryState> {
        self.states.remove(key).map(|(_, state)| state)
    }

    pub fn get(&self, key: &RetryKey) -> Option<RetryState> {
        self.states.get(key).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    /// Drop entries idle for longer than the idle timeout. Returns how many were removed.
    pub fn sweep_expired(&self) -> usize {
        let before = self.states.len();
        self.states
            .retain(|_, state| state.last_touched.elapsed() <= self.idle_timeout);
        let removed = before.saturating_sub(self.states.len());
        if removed > 0 {
            debug!("Swept {} idle retry states", removed);
        }
        removed
    }
}
