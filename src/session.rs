//! A discovery session.
//!
//! Ties a [`UserLocationStore`] subscription, the cached [`UserSnapshot`], a
//! [`PeriodicReevaluator`] and optional encounter tracking together:
//!
//! - every upstream change replaces the cached snapshot and runs a filter pass
//! - every re-evaluation tick runs a pass against the cached snapshot
//! - each pass publishes its results on a watch channel and, when encounter
//!   tracking is enabled, records encounters for the survivors in the background
//!
//! Passes may run concurrently from the subscription task and the timer task.
//! The snapshot is replaced wholesale, never mutated, so each pass sees one
//! consistent value.
//!
//! Teardown is three independent, idempotent steps: [`stop_reevaluation`],
//! [`unsubscribe`] and [`stop_following`]. [`stop`] runs all of them and also
//! drops encounter writes that have not started yet.
//!
//! [`stop_reevaluation`]: ProximitySession::stop_reevaluation
//! [`unsubscribe`]: ProximitySession::unsubscribe
//! [`stop_following`]: ProximitySession::stop_following
//! [`stop`]: ProximitySession::stop

use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{MatchConfig, NearbyConfig};
use crate::encounter::EncounterTracker;
use crate::location::Position;
use crate::matching::{score_matches, MatchResult, Seeker};
use crate::nearby::{filter_nearby, NearbyQuery};
use crate::reevaluator::PeriodicReevaluator;
use crate::store::UserLocationStore;
use crate::{now_ms, Candidate, GpsPoint, Result, UserSnapshot};

/// Source of the current time in epoch ms.
pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

/// Results of the latest filter pass.
pub type NearbyResults = Arc<Vec<Candidate>>;

struct SessionState {
    snapshot: RwLock<Arc<UserSnapshot>>,
    query: RwLock<NearbyQuery>,
    results: watch::Sender<NearbyResults>,
    encounters: RwLock<Option<(String, Arc<EncounterTracker>)>>,
    clock: RwLock<Clock>,
    /// Cancelled on teardown; in-flight encounter writes observe it.
    passes: RwLock<CancellationToken>,
}

impl SessionState {
    fn snapshot(&self) -> Arc<UserSnapshot> {
        self.snapshot.read().clone()
    }

    fn query(&self) -> NearbyQuery {
        self.query.read().clone()
    }

    fn now(&self) -> i64 {
        let clock = self.clock.read().clone();
        clock()
    }

    fn replace_snapshot(&self, snapshot: UserSnapshot) {
        *self.snapshot.write() = Arc::new(snapshot);
    }

    fn run_pass(&self) -> NearbyResults {
        let snapshot = self.snapshot();
        let query = self.query();
        let now = self.now();

        let results = Arc::new(filter_nearby(&snapshot, &query, now));
        self.results.send_replace(results.clone());

        let encounters = self.encounters.read().clone();
        if let Some((observer, tracker)) = encounters {
            let token = self.passes.read().clone();
            if !results.is_empty() && !token.is_cancelled() {
                match tokio::runtime::Handle::try_current() {
                    Ok(runtime) => {
                        let candidates = results.clone();
                        runtime.spawn(async move {
                            tokio::select! {
                                biased;
                                _ = token.cancelled() => {
                                    debug!("[Session] Stopped, dropping encounter pass");
                                }
                                _ = tracker.record_pass(&observer, &candidates, now) => {}
                            }
                        });
                    }
                    Err(_) => debug!("[Session] No runtime, skipping encounter recording"),
                }
            }
        }
        results
    }
}

type Task = (CancellationToken, JoinHandle<()>);

/// Live nearby-people results for one caller.
pub struct ProximitySession {
    store: Arc<dyn UserLocationStore>,
    state: Arc<SessionState>,
    reevaluator: PeriodicReevaluator,
    subscription: Mutex<Option<Task>>,
    following: Mutex<Option<Task>>,
}

impl ProximitySession {
    pub fn new(store: Arc<dyn UserLocationStore>, query: NearbyQuery, config: &NearbyConfig) -> Self {
        let (results, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            store,
            state: Arc::new(SessionState {
                snapshot: RwLock::new(Arc::new(UserSnapshot::default())),
                query: RwLock::new(query),
                results,
                encounters: RwLock::new(None),
                clock: RwLock::new(Arc::new(now_ms)),
                passes: RwLock::new(CancellationToken::new()),
            }),
            reevaluator: PeriodicReevaluator::new(config.reevaluate_interval()),
            subscription: Mutex::new(None),
            following: Mutex::new(None),
        }
    }

    /// Record encounters with every survivor of every pass, as `observer_id`.
    ///
    /// Takes effect from the next pass, also on a running session.
    pub fn with_encounters(self, observer_id: impl Into<String>, tracker: Arc<EncounterTracker>) -> Self {
        *self.state.encounters.write() = Some((observer_id.into(), tracker));
        self
    }

    /// Replace the wall clock used by every pass.
    pub fn with_clock(self, clock: Clock) -> Self {
        *self.state.clock.write() = clock;
        self
    }

    /// Subscribe to the store, run a first pass and start the re-evaluation timer.
    ///
    /// Calling `start` on a running session restarts both.
    pub async fn start(&self) -> Result<()> {
        let mut subscription = self.store.subscribe().await?;
        {
            let mut passes = self.state.passes.write();
            if passes.is_cancelled() {
                *passes = CancellationToken::new();
            }
        }
        self.state
            .replace_snapshot(UserSnapshot::from_document(&subscription.current()));
        self.state.run_pass();

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let state = self.state.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    next = subscription.changed() => match next {
                        Some(users) => {
                            state.replace_snapshot(UserSnapshot::from_document(&users));
                            state.run_pass();
                        }
                        None => {
                            debug!("[Session] Upstream closed");
                            break;
                        }
                    },
                }
            }
            subscription.unsubscribe();
        });
        if let Some((previous, _)) = self.subscription.lock().replace((cancel, handle)) {
            previous.cancel();
        }

        let state = self.state.clone();
        self.reevaluator.start(move || {
            state.run_pass();
        });

        info!("[Session] Started");
        Ok(())
    }

    /// Receiver for every pass's results.
    pub fn results(&self) -> watch::Receiver<NearbyResults> {
        self.state.results.subscribe()
    }

    pub fn current_results(&self) -> NearbyResults {
        self.state.results.borrow().clone()
    }

    /// The cached snapshot used by the latest pass.
    pub fn snapshot(&self) -> Arc<UserSnapshot> {
        self.state.snapshot()
    }

    pub fn query(&self) -> NearbyQuery {
        self.state.query()
    }

    /// Run a pass now against the cached snapshot.
    pub fn evaluate_now(&self) -> NearbyResults {
        self.state.run_pass()
    }

    /// Replace the query and re-run.
    pub fn set_query(&self, query: NearbyQuery) -> NearbyResults {
        *self.state.query.write() = query;
        self.state.run_pass()
    }

    /// Move the caller and re-run.
    pub fn set_origin(&self, origin: GpsPoint) -> NearbyResults {
        self.state.query.write().origin = origin;
        self.state.run_pass()
    }

    /// Keep the origin in sync with a stream of positions, e.g. [`LocationTracker::last_known`].
    ///
    /// [`LocationTracker::last_known`]: crate::LocationTracker::last_known
    pub fn follow(&self, mut positions: watch::Receiver<Option<Position>>) {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let state = self.state.clone();
        let handle = tokio::spawn(async move {
            loop {
                let position = *positions.borrow_and_update();
                if let Some(position) = position {
                    state.query.write().origin = position.point;
                    state.run_pass();
                }
                tokio::select! {
                    _ = token.cancelled() => break,
                    changed = positions.changed() => if changed.is_err() { break },
                }
            }
        });
        if let Some((previous, _)) = self.following.lock().replace((cancel, handle)) {
            previous.cancel();
        }
    }

    /// Rank matches for `seeker` against the cached snapshot.
    ///
    /// The seeker's stored profile is fetched first and overrides the supplied
    /// values; when the fetch fails the supplied values are used as-is.
    pub async fn top_matches(&self, seeker: Seeker, config: &MatchConfig) -> Vec<MatchResult> {
        let seeker = match self.store.get(&seeker.user_id).await {
            Ok(Some(profile)) => seeker.with_profile(&profile),
            Ok(None) => seeker,
            Err(e) => {
                warn!("[Session] Could not load profile for {}: {}", seeker.user_id, e);
                seeker
            }
        };
        let snapshot = self.state.snapshot();
        score_matches(&seeker, &snapshot, config, self.state.now())
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.lock().is_some()
    }

    pub fn is_reevaluating(&self) -> bool {
        self.reevaluator.is_running()
    }

    pub fn stop_reevaluation(&self) {
        self.reevaluator.stop();
    }

    pub fn unsubscribe(&self) {
        let task = self.subscription.lock().take();
        if let Some((cancel, _)) = task {
            cancel.cancel();
            debug!("[Session] Unsubscribed");
        }
    }

    pub fn stop_following(&self) {
        let task = self.following.lock().take();
        if let Some((cancel, _)) = task {
            cancel.cancel();
        }
    }

    /// Full teardown. Safe to call repeatedly.
    pub fn stop(&self) {
        self.stop_reevaluation();
        self.unsubscribe();
        self.stop_following();
        self.state.passes.read().cancel();
    }
}

impl Drop for ProximitySession {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EncounterConfig;
    use crate::store::{MemoryEncounterStore, MemoryLocationStore};
    use serde_json::json;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::time::Duration;

    const T0: i64 = 1_700_000_000_000;

    fn clock(at: &Arc<AtomicI64>) -> Clock {
        let at = at.clone();
        Arc::new(move || at.load(Ordering::SeqCst))
    }

    fn session(store: Arc<MemoryLocationStore>, now: &Arc<AtomicI64>) -> ProximitySession {
        let query = NearbyQuery::new(GpsPoint::new(51.5074, -0.1278), 5.0).excluding("me");
        ProximitySession::new(store, query, &NearbyConfig::default()).with_clock(clock(now))
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_driven_pass() {
        let now = Arc::new(AtomicI64::new(T0));
        let store = Arc::new(MemoryLocationStore::new());
        let session = session(store.clone(), &now);
        session.start().await.unwrap();
        assert!(session.current_results().is_empty());

        let mut results = session.results();
        store
            .set("u1", json!({ "lat": 51.5080, "lng": -0.1290, "timestamp": T0 }))
            .await
            .unwrap();
        results.changed().await.unwrap();
        assert_eq!(results.borrow().len(), 1);
        session.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_applies_staleness() {
        let now = Arc::new(AtomicI64::new(T0));
        let store = Arc::new(MemoryLocationStore::new());
        store.put("u1", json!({ "lat": 51.5080, "lng": -0.1290, "timestamp": T0 }));
        let session = session(store, &now);
        session.start().await.unwrap();
        assert_eq!(session.current_results().len(), 1);

        now.store(T0 + 600_001, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(session.current_results().is_empty());
        session.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_steps_are_independent() {
        let now = Arc::new(AtomicI64::new(T0));
        let store = Arc::new(MemoryLocationStore::new());
        let session = session(store, &now);
        session.start().await.unwrap();

        session.stop_reevaluation();
        session.stop_reevaluation();
        assert!(!session.is_reevaluating());
        assert!(session.is_subscribed());

        session.unsubscribe();
        session.unsubscribe();
        assert!(!session.is_subscribed());

        session.stop();
        session.stop();
    }

    #[tokio::test]
    async fn test_set_origin_reruns() {
        let now = Arc::new(AtomicI64::new(T0));
        let store = Arc::new(MemoryLocationStore::new());
        store.put("paris", json!({ "lat": 48.8570, "lng": 2.3520, "timestamp": T0 }));
        let session = session(store, &now);
        session.start().await.unwrap();
        assert!(session.current_results().is_empty());

        let results = session.set_origin(GpsPoint::new(48.8566, 2.3522));
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "paris");
        session.stop();
    }

    fn tracker(store: &Arc<MemoryEncounterStore>) -> Arc<EncounterTracker> {
        Arc::new(EncounterTracker::new(store.clone(), EncounterConfig::default()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_builders_apply_to_running_session() {
        let now = Arc::new(AtomicI64::new(T0));
        let store = Arc::new(MemoryLocationStore::new());
        store.put("u1", json!({ "lat": 51.5080, "lng": -0.1290, "timestamp": T0 }));
        let session = session(store, &now);
        session.start().await.unwrap();
        assert_eq!(session.current_results().len(), 1);

        let encounters = Arc::new(MemoryEncounterStore::new());
        let later = Arc::new(AtomicI64::new(T0 + 60_000));
        let session = session
            .with_encounters("me", tracker(&encounters))
            .with_clock(clock(&later));
        session.evaluate_now();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(encounters.write_count(), 1);

        later.store(T0 + 600_001, Ordering::SeqCst);
        assert!(session.evaluate_now().is_empty());
        session.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_drops_pending_encounter_writes() {
        let now = Arc::new(AtomicI64::new(T0));
        let store = Arc::new(MemoryLocationStore::new());
        store.put("u1", json!({ "lat": 51.5080, "lng": -0.1290, "timestamp": T0 }));
        let encounters = Arc::new(MemoryEncounterStore::new());
        let session = session(store, &now).with_encounters("me", tracker(&encounters));

        // The first pass spawns its encounter writes; stop before they get to run
        session.start().await.unwrap();
        session.stop();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(encounters.write_count(), 0);

        session.evaluate_now();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(encounters.write_count(), 0, "no recording after teardown");

        session.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(encounters.write_count(), 1);
        session.stop();
    }
}
