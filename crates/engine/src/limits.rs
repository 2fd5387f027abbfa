//! In-process execution controls: idempotency-key deduplication, the
//! one-in-flight-per-agent ceiling, and fixed-window rate limiting.
//!
//! All three are keyed per agent and held in memory. A restart clears
//! them; the durable job and run records are unaffected.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};

use conductor_core::domain::agent::AgentId;

#[derive(Clone, Debug)]
struct DedupEntry {
    job_id: String,
    recorded_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
struct RateWindow {
    window_start: DateTime<Utc>,
    count: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    Limited { retry_after_secs: u64 },
}

/// Guard that releases an agent's in-flight slot on drop.
pub struct InFlightSlot {
    agent_key: String,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl Drop for InFlightSlot {
    fn drop(&mut self) {
        let mut in_flight =
            self.in_flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        in_flight.remove(&self.agent_key);
    }
}

#[derive(Clone, Default)]
pub struct ExecutionControls {
    dedup: Arc<Mutex<HashMap<String, DedupEntry>>>,
    in_flight: Arc<Mutex<HashSet<String>>>,
    rate: Arc<Mutex<HashMap<String, RateWindow>>>,
}

impl ExecutionControls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the job id previously recorded for this agent and key
    /// when the key was seen inside the window. Expired entries are
    /// pruned on the way through.
    pub fn check_idempotency(
        &self,
        agent_id: &AgentId,
        key: &str,
        window_secs: u64,
        now: DateTime<Utc>,
    ) -> Option<String> {
        let mut dedup = self.dedup.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let cutoff = now - Duration::seconds(window_secs as i64);
        dedup.retain(|_, entry| entry.recorded_at > cutoff);
        dedup.get(&dedup_key(agent_id, key)).map(|entry| entry.job_id.clone())
    }

    pub fn record_idempotency(
        &self,
        agent_id: &AgentId,
        key: &str,
        job_id: &str,
        now: DateTime<Utc>,
    ) {
        let mut dedup = self.dedup.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        dedup.insert(
            dedup_key(agent_id, key),
            DedupEntry { job_id: job_id.to_string(), recorded_at: now },
        );
    }

    /// At most one run may be in flight per agent. The returned slot
    /// releases on drop so every exit path of a run frees it.
    pub fn try_acquire_in_flight(&self, agent_id: &AgentId) -> Option<InFlightSlot> {
        let mut in_flight =
            self.in_flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if !in_flight.insert(agent_id.0.clone()) {
            return None;
        }
        Some(InFlightSlot { agent_key: agent_id.0.clone(), in_flight: Arc::clone(&self.in_flight) })
    }

    /// Fixed-window counter. The first request in a window starts it;
    /// request `max + 1` inside the same window is limited with the
    /// seconds remaining until the window resets.
    pub fn check_rate(
        &self,
        agent_id: &AgentId,
        max_runs_per_window: u32,
        window_secs: u64,
        now: DateTime<Utc>,
    ) -> RateDecision {
        let mut rate = self.rate.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let window = rate
            .entry(agent_id.0.clone())
            .or_insert_with(|| RateWindow { window_start: now, count: 0 });

        let elapsed = (now - window.window_start).num_seconds().max(0) as u64;
        if elapsed >= window_secs {
            window.window_start = now;
            window.count = 0;
        }

        if window.count >= max_runs_per_window {
            let retry_after_secs = window_secs.saturating_sub(elapsed).max(1);
            return RateDecision::Limited { retry_after_secs };
        }

        window.count += 1;
        RateDecision::Allowed
    }
}

fn dedup_key(agent_id: &AgentId, key: &str) -> String {
    format!("{}:{}", agent_id.0, key.trim())
}
