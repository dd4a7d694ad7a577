//! Device location tracking with throttled write-back.
//!
//! [`LocationTracker`] acquires an initial fix (high accuracy first, then a
//! relaxed fallback), writes it to the [`UserLocationStore`] immediately, then
//! follows the platform's position watch. Later positions update the in-memory
//! last known location on every fix but reach the store at most once per
//! throttle interval.
//!
//! Permission denial is terminal and never retried. Timeouts and transient
//! unavailability are retried during acquisition and ignored while watching.
//! Stopping cancels the watch task and clears the platform watch before
//! [`LocationTracker::stop`] returns.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::TrackerConfig;
use crate::store::UserLocationStore;
use crate::{now_ms, GpsPoint, PaceMatchError, PositionError, Result};

/// One fix from the device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub point: GpsPoint,
    /// Horizontal accuracy in meters, when reported.
    pub accuracy: Option<f64>,
}

impl Position {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            point: GpsPoint::new(latitude, longitude),
            accuracy: None,
        }
    }
}

/// Options passed to the geolocation provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionOptions {
    pub enable_high_accuracy: bool,
    pub timeout: Duration,
    pub maximum_age: Duration,
}

impl PositionOptions {
    pub fn high_accuracy(config: &TrackerConfig) -> Self {
        Self {
            enable_high_accuracy: true,
            timeout: Duration::from_millis(config.high_accuracy_timeout_ms),
            maximum_age: Duration::from_millis(config.high_accuracy_max_age_ms),
        }
    }

    /// Lower accuracy, longer timeout, older cached fixes accepted.
    pub fn relaxed(config: &TrackerConfig) -> Self {
        Self {
            enable_high_accuracy: false,
            timeout: Duration::from_millis(config.fallback_timeout_ms),
            maximum_age: Duration::from_millis(config.fallback_max_age_ms),
        }
    }
}

pub type WatchId = u64;

/// Stream of fixes and errors from a platform watch.
pub type PositionStream = mpsc::Receiver<std::result::Result<Position, PositionError>>;

/// Platform geolocation API.
#[async_trait]
pub trait GeolocationProvider: Send + Sync {
    async fn get_current_position(
        &self,
        options: &PositionOptions,
    ) -> std::result::Result<Position, PositionError>;

    /// Start a continuous watch. The stream ends when the watch is cleared.
    async fn watch_position(
        &self,
        options: &PositionOptions,
    ) -> std::result::Result<(WatchId, PositionStream), PositionError>;

    async fn clear_watch(&self, id: WatchId);
}

#[async_trait]
impl<P: GeolocationProvider + ?Sized> GeolocationProvider for Arc<P> {
    async fn get_current_position(
        &self,
        options: &PositionOptions,
    ) -> std::result::Result<Position, PositionError> {
        (**self).get_current_position(options).await
    }

    async fn watch_position(
        &self,
        options: &PositionOptions,
    ) -> std::result::Result<(WatchId, PositionStream), PositionError> {
        (**self).watch_position(options).await
    }

    async fn clear_watch(&self, id: WatchId) {
        (**self).clear_watch(id).await
    }
}

// =============================================================================
// Write-back
// =============================================================================

/// First write goes through immediately; later writes at most once per interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteThrottle {
    interval_ms: u64,
    last_write_ms: Option<u64>,
}

impl WriteThrottle {
    pub fn new(interval_ms: u64) -> Self {
        Self {
            interval_ms,
            last_write_ms: None,
        }
    }

    /// Whether a write may happen at `now_ms`. Records the write when it may.
    pub fn try_acquire(&mut self, now_ms: u64) -> bool {
        match self.last_write_ms {
            Some(last) if now_ms.saturating_sub(last) < self.interval_ms => false,
            _ => {
                self.last_write_ms = Some(now_ms);
                true
            }
        }
    }

    /// Forget the last write, so the next one is immediate again.
    pub fn reset(&mut self) {
        self.last_write_ms = None;
    }
}

fn document_of(existing: Option<Value>) -> Map<String, Value> {
    match existing {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    }
}

/// Write the user's position, preserving every other field of their document.
pub async fn update_user_location(
    store: &dyn UserLocationStore,
    user_id: &str,
    point: GpsPoint,
    visible: bool,
    timestamp_ms: i64,
) -> Result<()> {
    let mut doc = document_of(store.get(user_id).await?);
    doc.insert("lat".to_string(), Value::from(point.latitude));
    doc.insert("lng".to_string(), Value::from(point.longitude));
    doc.insert("visible".to_string(), Value::from(visible));
    doc.insert("timestamp".to_string(), Value::from(timestamp_ms));
    store.set(user_id, Value::Object(doc)).await
}

/// Change the user's workout visibility, preserving every other field.
pub async fn update_user_visibility(
    store: &dyn UserLocationStore,
    user_id: &str,
    visible: bool,
    timestamp_ms: i64,
) -> Result<()> {
    let mut doc = document_of(store.get(user_id).await?);
    doc.insert("visible".to_string(), Value::from(visible));
    doc.insert("timestamp".to_string(), Value::from(timestamp_ms));
    store.set(user_id, Value::Object(doc)).await
}

// =============================================================================
// Tracker
// =============================================================================

/// Lifecycle of a tracker, observable through [`LocationTracker::status`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerStatus {
    Idle,
    Acquiring { attempt: u32 },
    Tracking,
    /// The latest throttled write failed. Tracking continues.
    WriteFailed { message: String },
    /// Terminal until the user grants access and tracking is restarted.
    PermissionDenied,
    Unavailable { reason: String },
}

struct Running {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Continuous location tracking for one user.
pub struct LocationTracker {
    user_id: String,
    provider: Arc<dyn GeolocationProvider>,
    store: Arc<dyn UserLocationStore>,
    config: TrackerConfig,
    visible: Arc<AtomicBool>,
    status: Arc<watch::Sender<TrackerStatus>>,
    last_known: Arc<watch::Sender<Option<Position>>>,
    running: Mutex<Option<Running>>,
}

impl LocationTracker {
    pub fn new(
        user_id: impl Into<String>,
        provider: Arc<dyn GeolocationProvider>,
        store: Arc<dyn UserLocationStore>,
        config: TrackerConfig,
    ) -> Self {
        let (status, _) = watch::channel(TrackerStatus::Idle);
        let (last_known, _) = watch::channel(None);
        Self {
            user_id: user_id.into(),
            provider,
            store,
            config,
            visible: Arc::new(AtomicBool::new(true)),
            status: Arc::new(status),
            last_known: Arc::new(last_known),
            running: Mutex::new(None),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn status(&self) -> watch::Receiver<TrackerStatus> {
        self.status.subscribe()
    }

    /// Every fix, throttled or not.
    pub fn last_known(&self) -> watch::Receiver<Option<Position>> {
        self.last_known.subscribe()
    }

    /// True while the watch task is alive. A watch that ended on its own
    /// (stream closed, permission revoked) no longer counts.
    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|running| !running.handle.is_finished())
    }

    /// Visibility written with every location update.
    pub fn set_visible(&self, visible: bool) {
        self.visible.store(visible, Ordering::SeqCst);
    }

    /// Change visibility and write it through immediately.
    pub async fn update_visibility(&self, visible: bool) -> Result<()> {
        self.set_visible(visible);
        update_user_visibility(self.store.as_ref(), &self.user_id, visible, now_ms()).await
    }

    /// Write the last known position now, bypassing the throttle.
    pub async fn write_now(&self) -> Result<()> {
        let position = (*self.last_known.borrow()).ok_or(PaceMatchError::NoLocation)?;
        let visible = self.visible.load(Ordering::SeqCst);
        update_user_location(self.store.as_ref(), &self.user_id, position.point, visible, now_ms())
            .await
    }

    /// Acquire a first fix, write it, then start following the platform watch.
    ///
    /// Errors from acquisition and from the first write are returned; the
    /// tracker is not running in that case. Calling `start` while running
    /// returns the last known position.
    pub async fn start(&self) -> Result<Position> {
        let last = *self.last_known.borrow();
        if let (true, Some(position)) = (self.is_running(), last) {
            return Ok(position);
        }

        let position = self.acquire_initial().await?;
        self.last_known.send_replace(Some(position));

        let visible = self.visible.load(Ordering::SeqCst);
        update_user_location(self.store.as_ref(), &self.user_id, position.point, visible, now_ms())
            .await?;

        let mut throttle = WriteThrottle::new(self.config.write_throttle_ms);
        let origin = Instant::now();
        throttle.try_acquire(0);

        let (watch_id, stream) = self
            .provider
            .watch_position(&PositionOptions::high_accuracy(&self.config))
            .await
            .map_err(|e| {
                self.publish_failure(&e);
                e.into_error(1)
            })?;

        let cancel = CancellationToken::new();
        let task = WatchTask {
            user_id: self.user_id.clone(),
            provider: self.provider.clone(),
            store: self.store.clone(),
            visible: self.visible.clone(),
            status: self.status.clone(),
            last_known: self.last_known.clone(),
            throttle,
            origin,
        };
        let handle = tokio::spawn(task.run(watch_id, stream, cancel.clone()));

        let previous = self.running.lock().replace(Running { cancel, handle });
        if let Some(previous) = previous {
            previous.cancel.cancel();
        }

        self.status.send_replace(TrackerStatus::Tracking);
        info!("[LocationTracker] Tracking started for {}", self.user_id);
        Ok(position)
    }

    /// Stop tracking and clear the platform watch. Safe to call when stopped.
    pub async fn stop(&self) {
        let running = self.running.lock().take();
        let Some(running) = running else {
            return;
        };

        running.cancel.cancel();
        if let Err(e) = running.handle.await {
            warn!("[LocationTracker] Watch task ended abnormally: {}", e);
        }

        if !matches!(*self.status.borrow(), TrackerStatus::PermissionDenied) {
            self.status.send_replace(TrackerStatus::Idle);
        }
        info!("[LocationTracker] Tracking stopped for {}", self.user_id);
    }

    async fn acquire_initial(&self) -> Result<Position> {
        let attempts = self.config.acquisition_attempts.max(1);
        let mut last_error = PositionError::Unavailable("no attempt made".to_string());

        for attempt in 1..=attempts {
            self.status.send_replace(TrackerStatus::Acquiring { attempt });
            let options = if attempt == 1 {
                PositionOptions::high_accuracy(&self.config)
            } else {
                PositionOptions::relaxed(&self.config)
            };

            let result = tokio::time::timeout(options.timeout, self.provider.get_current_position(&options))
                .await
                .unwrap_or(Err(PositionError::Timeout));

            match result {
                Ok(position) if position.point.is_valid() => return Ok(position),
                Ok(position) => {
                    last_error = PositionError::Unavailable(format!("invalid fix {:?}", position.point));
                }
                Err(e) if e.is_terminal() => {
                    self.publish_failure(&e);
                    warn!("[LocationTracker] Location permission denied");
                    return Err(e.into_error(attempt));
                }
                Err(e) => last_error = e,
            }

            debug!("[LocationTracker] Attempt {}/{} failed: {}", attempt, attempts, last_error);
            if attempt < attempts {
                tokio::time::sleep(self.config.retry_backoff()).await;
            }
        }

        self.publish_failure(&last_error);
        warn!("[LocationTracker] Giving up after {} attempts: {}", attempts, last_error);
        Err(last_error.into_error(attempts))
    }

    fn publish_failure(&self, error: &PositionError) {
        let status = match error {
            PositionError::PermissionDenied => TrackerStatus::PermissionDenied,
            other => TrackerStatus::Unavailable {
                reason: other.to_string(),
            },
        };
        self.status.send_replace(status);
    }
}

impl Drop for LocationTracker {
    fn drop(&mut self) {
        // The task clears the platform watch on its way out
        if let Some(running) = self.running.get_mut().take() {
            running.cancel.cancel();
        }
    }
}

/// State owned by the spawned watch loop.
struct WatchTask {
    user_id: String,
    provider: Arc<dyn GeolocationProvider>,
    store: Arc<dyn UserLocationStore>,
    visible: Arc<AtomicBool>,
    status: Arc<watch::Sender<TrackerStatus>>,
    last_known: Arc<watch::Sender<Option<Position>>>,
    throttle: WriteThrottle,
    origin: Instant,
}

impl WatchTask {
    async fn run(mut self, watch_id: WatchId, mut stream: PositionStream, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                next = stream.recv() => match next {
                    Some(Ok(position)) => self.on_position(position).await,
                    Some(Err(PositionError::PermissionDenied)) => {
                        warn!("[LocationTracker] Permission revoked while watching");
                        self.status.send_replace(TrackerStatus::PermissionDenied);
                        break;
                    }
                    Some(Err(e)) => debug!("[LocationTracker] Transient watch error: {}", e),
                    None => {
                        warn!("[LocationTracker] Watch stream ended");
                        self.status.send_replace(TrackerStatus::Unavailable {
                            reason: "location watch ended".to_string(),
                        });
                        break;
                    }
                },
            }
        }
        self.provider.clear_watch(watch_id).await;
    }

    async fn on_position(&mut self, position: Position) {
        if !position.point.is_valid() {
            return;
        }
        self.last_known.send_replace(Some(position));

        let elapsed_ms = self.origin.elapsed().as_millis() as u64;
        if !self.throttle.try_acquire(elapsed_ms) {
            return;
        }

        let visible = self.visible.load(Ordering::SeqCst);
        match update_user_location(self.store.as_ref(), &self.user_id, position.point, visible, now_ms())
            .await
        {
            Ok(()) => {
                self.status.send_replace(TrackerStatus::Tracking);
            }
            Err(e) => {
                warn!("[LocationTracker] Location write failed: {}", e);
                self.status.send_replace(TrackerStatus::WriteFailed {
                    message: e.to_string(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryLocationStore;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;

    /// Provider that replays scripted one-shot results and exposes the watch sender.
    struct FakeProvider {
        one_shot: Mutex<VecDeque<std::result::Result<Position, PositionError>>>,
        watch_tx: Mutex<Option<mpsc::Sender<std::result::Result<Position, PositionError>>>>,
        cleared: AtomicUsize,
        calls: Mutex<Vec<PositionOptions>>,
    }

    impl FakeProvider {
        fn new(script: Vec<std::result::Result<Position, PositionError>>) -> Arc<Self> {
            Arc::new(Self {
                one_shot: Mutex::new(script.into()),
                watch_tx: Mutex::new(None),
                cleared: AtomicUsize::new(0),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn sender(&self) -> mpsc::Sender<std::result::Result<Position, PositionError>> {
            self.watch_tx.lock().clone().expect("watch not started")
        }

        /// Close the platform side of the watch.
        fn end_watch(&self) {
            self.watch_tx.lock().take();
        }
    }

    #[async_trait]
    impl GeolocationProvider for FakeProvider {
        async fn get_current_position(
            &self,
            options: &PositionOptions,
        ) -> std::result::Result<Position, PositionError> {
            self.calls.lock().push(*options);
            self.one_shot.lock().pop_front().unwrap_or(Err(PositionError::Timeout))
        }

        async fn watch_position(
            &self,
            _options: &PositionOptions,
        ) -> std::result::Result<(WatchId, PositionStream), PositionError> {
            let (tx, rx) = mpsc::channel(16);
            *self.watch_tx.lock() = Some(tx);
            Ok((7, rx))
        }

        async fn clear_watch(&self, _id: WatchId) {
            self.cleared.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn tracker(provider: Arc<FakeProvider>, store: Arc<MemoryLocationStore>) -> LocationTracker {
        LocationTracker::new("me", provider, store, TrackerConfig::default())
    }

    #[test]
    fn test_write_throttle() {
        let mut throttle = WriteThrottle::new(7_500);
        assert!(throttle.try_acquire(0));
        assert!(!throttle.try_acquire(1_000));
        assert!(!throttle.try_acquire(7_499));
        assert!(throttle.try_acquire(7_500));
        throttle.reset();
        assert!(throttle.try_acquire(7_501));
    }

    #[tokio::test]
    async fn test_update_preserves_other_fields() {
        let store = MemoryLocationStore::new();
        store.put("me", json!({ "name": "Sam", "fitnessLevel": "pro", "visible": false }));

        update_user_location(&store, "me", GpsPoint::new(51.5, -0.12), true, 42)
            .await
            .unwrap();
        let doc = store.get("me").await.unwrap().unwrap();
        assert_eq!(doc["name"], "Sam");
        assert_eq!(doc["fitnessLevel"], "pro");
        assert_eq!(doc["lat"], 51.5);
        assert_eq!(doc["visible"], true);
        assert_eq!(doc["timestamp"], 42);

        update_user_visibility(&store, "me", false, 43).await.unwrap();
        let doc = store.get("me").await.unwrap().unwrap();
        assert_eq!(doc["visible"], false);
        assert_eq!(doc["lat"], 51.5);
    }

    #[tokio::test]
    async fn test_update_propagates_store_errors() {
        let store = MemoryLocationStore::new();
        store.set_offline(true);
        let err = update_user_location(&store, "me", GpsPoint::new(1.0, 1.0), true, 0).await;
        assert!(matches!(err, Err(PaceMatchError::Store { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_fix_written_immediately_then_throttled() {
        let provider = FakeProvider::new(vec![Ok(Position::new(51.5, -0.12))]);
        let store = Arc::new(MemoryLocationStore::new());
        let tracker = tracker(provider.clone(), store.clone());

        tracker.start().await.unwrap();
        assert_eq!(store.write_count(), 1);
        assert_eq!(*tracker.status().borrow(), TrackerStatus::Tracking);

        let tx = provider.sender();
        tx.send(Ok(Position::new(51.501, -0.12))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(store.write_count(), 1, "within throttle interval");
        assert_eq!(
            tracker.last_known().borrow().map(|p| p.point.latitude),
            Some(51.501)
        );

        tokio::time::sleep(Duration::from_millis(7_500)).await;
        tx.send(Ok(Position::new(51.502, -0.12))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(store.write_count(), 2);

        tracker.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_falls_back_to_relaxed_accuracy() {
        let provider = FakeProvider::new(vec![
            Err(PositionError::Timeout),
            Ok(Position::new(51.5, -0.12)),
        ]);
        let store = Arc::new(MemoryLocationStore::new());
        let tracker = tracker(provider.clone(), store);

        tracker.start().await.unwrap();
        let calls = provider.calls.lock().clone();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].enable_high_accuracy);
        assert!(!calls[1].enable_high_accuracy);
        tracker.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_permission_denied_is_terminal() {
        let provider = FakeProvider::new(vec![Err(PositionError::PermissionDenied)]);
        let store = Arc::new(MemoryLocationStore::new());
        let tracker = tracker(provider.clone(), store.clone());

        let err = tracker.start().await.unwrap_err();
        assert!(matches!(err, PaceMatchError::PermissionDenied));
        assert_eq!(provider.calls.lock().len(), 1, "never retried");
        assert_eq!(*tracker.status().borrow(), TrackerStatus::PermissionDenied);
        assert!(!tracker.is_running());
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unavailable_after_retries() {
        let provider = FakeProvider::new(vec![]);
        let store = Arc::new(MemoryLocationStore::new());
        let tracker = tracker(provider.clone(), store);

        let err = tracker.start().await.unwrap_err();
        assert!(matches!(err, PaceMatchError::LocationUnavailable { attempts: 3, .. }));
        assert_eq!(provider.calls.lock().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_clears_watch_once() {
        let provider = FakeProvider::new(vec![Ok(Position::new(51.5, -0.12))]);
        let store = Arc::new(MemoryLocationStore::new());
        let tracker = tracker(provider.clone(), store.clone());

        tracker.start().await.unwrap();
        tracker.stop().await;
        tracker.stop().await;

        assert_eq!(provider.cleared.load(Ordering::SeqCst), 1);
        assert!(!tracker.is_running());
        assert_eq!(*tracker.status().borrow(), TrackerStatus::Idle);

        // No writes after teardown
        let _ = provider.sender().send(Ok(Position::new(51.6, -0.12))).await;
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_failure_reported_in_status() {
        let provider = FakeProvider::new(vec![Ok(Position::new(51.5, -0.12))]);
        let store = Arc::new(MemoryLocationStore::new());
        let tracker = tracker(provider.clone(), store.clone());
        tracker.start().await.unwrap();

        store.set_offline(true);
        tokio::time::sleep(Duration::from_millis(8_000)).await;
        provider.sender().send(Ok(Position::new(51.501, -0.12))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert!(matches!(*tracker.status().borrow(), TrackerStatus::WriteFailed { .. }));
        assert!(tracker.is_running());
        tracker.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_without_stop_clears_watch() {
        let provider = FakeProvider::new(vec![Ok(Position::new(51.5, -0.12))]);
        let store = Arc::new(MemoryLocationStore::new());
        let tracker = tracker(provider.clone(), store.clone());
        tracker.start().await.unwrap();
        let tx = provider.sender();

        drop(tracker);
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(provider.cleared.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_secs(10)).await;
        let _ = tx.send(Ok(Position::new(51.6, -0.12))).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ended_watch_can_restart() {
        let provider = FakeProvider::new(vec![
            Ok(Position::new(51.5, -0.12)),
            Ok(Position::new(51.51, -0.12)),
        ]);
        let store = Arc::new(MemoryLocationStore::new());
        let tracker = tracker(provider.clone(), store.clone());
        tracker.start().await.unwrap();

        provider.end_watch();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!tracker.is_running());
        assert!(matches!(*tracker.status().borrow(), TrackerStatus::Unavailable { .. }));
        assert_eq!(provider.cleared.load(Ordering::SeqCst), 1);

        let position = tracker.start().await.unwrap();
        assert_eq!(position.point.latitude, 51.51);
        assert!(tracker.is_running());
        assert_eq!(*tracker.status().borrow(), TrackerStatus::Tracking);
        assert_eq!(store.write_count(), 2);
        tracker.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_revoked_permission_stops_tracking() {
        let provider = FakeProvider::new(vec![Ok(Position::new(51.5, -0.12))]);
        let store = Arc::new(MemoryLocationStore::new());
        let tracker = tracker(provider.clone(), store);
        tracker.start().await.unwrap();

        provider.sender().send(Err(PositionError::PermissionDenied)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!tracker.is_running());
        assert_eq!(*tracker.status().borrow(), TrackerStatus::PermissionDenied);
    }

    #[tokio::test]
    async fn test_write_now_requires_fix() {
        let provider = FakeProvider::new(vec![]);
        let store = Arc::new(MemoryLocationStore::new());
        let tracker = tracker(provider, store);
        assert!(matches!(tracker.write_now().await, Err(PaceMatchError::NoLocation)));
    }
}
