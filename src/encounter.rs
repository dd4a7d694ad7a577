//! Encounter tracking.
//!
//! Records that the session's user came within discovery range of someone.
//! Recording is best-effort telemetry: store failures are logged and reported
//! as [`EncounterOutcome::Failed`], never returned as errors.
//!
//! Two throttles bound write volume:
//! - a pair is recorded at most once per dedup window (default 5 minutes)
//! - passes over a result list are at least `min_pass_gap_ms` apart (default 10 s)
//!
//! Dedup entries expire lazily: an entry older than the window is treated as
//! absent and pruned on the next pass.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::EncounterConfig;
use crate::store::EncounterStore;
use crate::{Candidate, Result};

fn default_count() -> u32 {
    1
}

/// Persisted encounter between an observer and one candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncounterRecord {
    /// The encountered user.
    #[serde(default)]
    pub user_id: String,
    /// First encounter, epoch ms. Never changes once written.
    pub encountered_at: i64,
    /// Most recent encounter, epoch ms.
    pub last_seen_at: i64,
    /// Distance in km at the most recent encounter.
    #[serde(default)]
    pub distance: f64,
    #[serde(default)]
    pub lat: f64,
    #[serde(default)]
    pub lng: f64,
    #[serde(default = "default_count")]
    pub count: u32,
}

impl EncounterRecord {
    /// Record for a first encounter.
    pub fn first(candidate: &Candidate, now_ms: i64) -> Self {
        Self {
            user_id: candidate.id.clone(),
            encountered_at: now_ms,
            last_seen_at: now_ms,
            distance: candidate.distance_km,
            lat: candidate.location.latitude,
            lng: candidate.location.longitude,
            count: 1,
        }
    }

    /// The same record after another encounter. `encountered_at` is preserved.
    pub fn seen_again(&self, candidate: &Candidate, now_ms: i64) -> Self {
        Self {
            user_id: candidate.id.clone(),
            encountered_at: self.encountered_at,
            last_seen_at: now_ms,
            distance: candidate.distance_km,
            lat: candidate.location.latitude,
            lng: candidate.location.longitude,
            count: self.count.saturating_add(1),
        }
    }
}

/// What happened to one encounter request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncounterOutcome {
    /// Written; `count` is the stored encounter count.
    Recorded { count: u32 },
    /// Already recorded within the dedup window.
    Deduplicated,
    /// The whole pass came too soon after the previous one.
    Throttled,
    /// The store failed. Logged and swallowed.
    Failed,
}

#[derive(Debug, Default)]
struct DedupState {
    /// (observer, candidate) -> when it was last recorded
    tracked: HashMap<(String, String), i64>,
    last_pass_at: Option<i64>,
}

/// Deduplicating, throttled encounter recorder.
///
/// Shared between the push-driven and timer-driven filter passes of a session,
/// so state lives behind a mutex. The lock is never held across a store call.
pub struct EncounterTracker {
    store: Arc<dyn EncounterStore>,
    config: EncounterConfig,
    state: Mutex<DedupState>,
}

impl EncounterTracker {
    pub fn new(store: Arc<dyn EncounterStore>, config: EncounterConfig) -> Self {
        Self {
            store,
            config,
            state: Mutex::new(DedupState::default()),
        }
    }

    pub fn config(&self) -> &EncounterConfig {
        &self.config
    }

    /// Claim the (observer, candidate) slot if it is free at `now_ms`.
    fn claim(&self, observer_id: &str, candidate_id: &str, now_ms: i64) -> bool {
        let window = self.config.dedup_window_ms as i64;
        let mut state = self.state.lock();
        let key = (observer_id.to_string(), candidate_id.to_string());
        match state.tracked.get(&key) {
            Some(&at) if now_ms.saturating_sub(at) < window => false,
            _ => {
                state.tracked.insert(key, now_ms);
                true
            }
        }
    }

    fn release(&self, observer_id: &str, candidate_id: &str) {
        let mut state = self.state.lock();
        state
            .tracked
            .remove(&(observer_id.to_string(), candidate_id.to_string()));
    }

    /// Record one encounter unless it was already recorded within the window.
    pub async fn record_encounter(
        &self,
        observer_id: &str,
        candidate: &Candidate,
        now_ms: i64,
    ) -> EncounterOutcome {
        if candidate.id == observer_id {
            return EncounterOutcome::Deduplicated;
        }
        if !self.claim(observer_id, &candidate.id, now_ms) {
            return EncounterOutcome::Deduplicated;
        }

        match self.write(observer_id, candidate, now_ms).await {
            Ok(count) => {
                debug!("[EncounterTracker] Recorded {} (count {})", candidate.id, count);
                EncounterOutcome::Recorded { count }
            }
            Err(e) => {
                // Free the slot so the next pass can retry
                self.release(observer_id, &candidate.id);
                warn!("[EncounterTracker] Failed to record {}: {}", candidate.id, e);
                EncounterOutcome::Failed
            }
        }
    }

    async fn write(&self, observer_id: &str, candidate: &Candidate, now_ms: i64) -> Result<u32> {
        let record = match self.store.get(observer_id, &candidate.id).await? {
            Some(existing) => existing.seen_again(candidate, now_ms),
            None => EncounterRecord::first(candidate, now_ms),
        };
        self.store.set(observer_id, &candidate.id, &record).await?;
        Ok(record.count)
    }

    /// Record every candidate of a filter pass, subject to the pass gap.
    ///
    /// Returns one outcome per candidate, in input order.
    pub async fn record_pass(
        &self,
        observer_id: &str,
        candidates: &[Candidate],
        now_ms: i64,
    ) -> Vec<EncounterOutcome> {
        if candidates.is_empty() {
            return Vec::new();
        }

        {
            let window = self.config.dedup_window_ms as i64;
            let gap = self.config.min_pass_gap_ms as i64;
            let mut state = self.state.lock();
            if let Some(last) = state.last_pass_at {
                if now_ms.saturating_sub(last) < gap {
                    debug!("[EncounterTracker] Pass throttled ({}ms since last)", now_ms - last);
                    return vec![EncounterOutcome::Throttled; candidates.len()];
                }
            }
            state.last_pass_at = Some(now_ms);
            state
                .tracked
                .retain(|_, at| now_ms.saturating_sub(*at) < window);
        }

        let outcomes = join_all(
            candidates
                .iter()
                .map(|c| self.record_encounter(observer_id, c, now_ms)),
        )
        .await;

        let recorded = outcomes
            .iter()
            .filter(|o| matches!(o, EncounterOutcome::Recorded { .. }))
            .count();
        if recorded > 0 {
            debug!(
                "[EncounterTracker] Pass recorded {}/{} encounters",
                recorded,
                candidates.len()
            );
        }
        outcomes
    }

    /// Stored encounters of an observer, most recently seen first.
    pub async fn list_encounters(&self, observer_id: &str) -> Result<Vec<(String, EncounterRecord)>> {
        let mut records = self.store.list(observer_id).await?;
        records.sort_by(|a, b| b.1.last_seen_at.cmp(&a.1.last_seen_at).then_with(|| a.0.cmp(&b.0)));
        Ok(records)
    }

    /// Delete encounters not seen within the retention period.
    ///
    /// Deletes run concurrently. Returns how many were removed; failures are logged.
    pub async fn cleanup_old_encounters(&self, observer_id: &str, now_ms: i64) -> usize {
        let cutoff = now_ms.saturating_sub(self.config.retention_ms as i64);
        let records = match self.store.list(observer_id).await {
            Ok(records) => records,
            Err(e) => {
                warn!("[EncounterTracker] Cleanup could not list encounters: {}", e);
                return 0;
            }
        };

        let expired: Vec<String> = records
            .into_iter()
            .filter(|(_, r)| r.last_seen_at < cutoff)
            .map(|(id, _)| id)
            .collect();
        if expired.is_empty() {
            return 0;
        }

        let results = join_all(expired.iter().map(|id| self.store.remove(observer_id, id))).await;
        let mut removed = 0;
        for (id, result) in expired.iter().zip(results) {
            match result {
                Ok(()) => removed += 1,
                Err(e) => warn!("[EncounterTracker] Failed to remove {}: {}", id, e),
            }
        }

        info!("[EncounterTracker] Cleaned up {} old encounter(s)", removed);
        removed
    }
}
