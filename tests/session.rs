//! End-to-end session tests: store subscription, timer re-evaluation and encounters

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pace_match::session::Clock;
use pace_match::{
    EncounterConfig, EncounterStore, EncounterTracker, GpsPoint, MemoryEncounterStore,
    MemoryLocationStore, NearbyConfig, NearbyQuery, ProximitySession, UserLocationStore,
};
use serde_json::json;

const T0: i64 = 1_700_000_000_000;

fn clock(now: &Arc<AtomicI64>) -> Clock {
    let now = now.clone();
    Arc::new(move || now.load(Ordering::SeqCst))
}

fn query() -> NearbyQuery {
    NearbyQuery::new(GpsPoint::new(51.5074, -0.1278), 5.0).excluding("me")
}

#[tokio::test(start_paused = true)]
async fn test_staleness_applied_by_timer_without_new_snapshot() {
    let now = Arc::new(AtomicI64::new(T0));
    let store = Arc::new(MemoryLocationStore::new());
    store.put("u1", json!({ "lat": 51.5080, "lng": -0.1290, "timestamp": T0 }));

    let session = ProximitySession::new(store, query(), &NearbyConfig::default()).with_clock(clock(&now));
    session.start().await.unwrap();
    assert_eq!(session.current_results().len(), 1);

    // Still fresh at the first tick
    now.store(T0 + 300_000, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(session.current_results().len(), 1);

    // Past the active threshold at the next tick
    now.store(T0 + 600_001, Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert!(session.current_results().is_empty());

    session.stop();
}

#[tokio::test(start_paused = true)]
async fn test_encounters_recorded_once_per_window() {
    let now = Arc::new(AtomicI64::new(T0));
    let store = Arc::new(MemoryLocationStore::new());
    store.put("u1", json!({ "lat": 51.5080, "lng": -0.1290, "timestamp": T0 }));
    let encounters = Arc::new(MemoryEncounterStore::new());
    let tracker = Arc::new(EncounterTracker::new(encounters.clone(), EncounterConfig::default()));

    let session = ProximitySession::new(store.clone(), query(), &NearbyConfig::default())
        .with_clock(clock(&now))
        .with_encounters("me", tracker);
    session.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(encounters.write_count(), 1);

    // Timer passes inside the dedup window add nothing
    now.store(T0 + 60_000, Ordering::SeqCst);
    store.put("u1", json!({ "lat": 51.5080, "lng": -0.1290, "timestamp": T0 + 60_000 }));
    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(encounters.write_count(), 1);

    // After the window, the pair is recorded again
    now.store(T0 + 6 * 60_000, Ordering::SeqCst);
    store.put("u1", json!({ "lat": 51.5081, "lng": -0.1290, "timestamp": T0 + 6 * 60_000 }));
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(encounters.write_count(), 2);

    let record = EncounterStore::get(encounters.as_ref(), "me", "u1").await.unwrap().unwrap();
    assert_eq!(record.count, 2);
    assert_eq!(record.encountered_at, T0);
    assert_eq!(record.last_seen_at, T0 + 6 * 60_000);

    session.stop();
}

#[tokio::test(start_paused = true)]
async fn test_encounter_failures_do_not_break_discovery() {
    let now = Arc::new(AtomicI64::new(T0));
    let store = Arc::new(MemoryLocationStore::new());
    store.put("u1", json!({ "lat": 51.5080, "lng": -0.1290, "timestamp": T0 }));
    let encounters = Arc::new(MemoryEncounterStore::new());
    encounters.set_offline(true);
    let tracker = Arc::new(EncounterTracker::new(encounters.clone(), EncounterConfig::default()));

    let session = ProximitySession::new(store, query(), &NearbyConfig::default())
        .with_clock(clock(&now))
        .with_encounters("me", tracker);
    session.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(session.current_results().len(), 1);
    assert_eq!(encounters.write_count(), 0);
    session.stop();
}

#[tokio::test(start_paused = true)]
async fn test_unsubscribed_session_ignores_upstream() {
    let now = Arc::new(AtomicI64::new(T0));
    let store = Arc::new(MemoryLocationStore::new());
    let session = ProximitySession::new(store.clone(), query(), &NearbyConfig::default()).with_clock(clock(&now));
    session.start().await.unwrap();

    session.unsubscribe();
    tokio::time::sleep(Duration::from_millis(10)).await;
    store
        .set("u1", json!({ "lat": 51.5080, "lng": -0.1290, "timestamp": T0 }))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;

    // The timer still runs, but only over the old cached snapshot
    assert!(session.is_reevaluating());
    assert!(session.evaluate_now().is_empty());
    session.stop();
}

#[tokio::test]
async fn test_subscribe_failure_propagates() {
    let store = Arc::new(MemoryLocationStore::new());
    store.set_offline(true);
    let session = ProximitySession::new(store.clone(), query(), &NearbyConfig::default());
    assert!(session.start().await.is_err());
    assert!(!session.is_subscribed());
    assert!(UserLocationStore::get(store.as_ref(), "me").await.is_err());
}
