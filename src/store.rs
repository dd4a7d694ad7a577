//! Store contracts for user locations and encounters.
//!
//! Both stores are external collaborators addressed by path:
//!
//! | Store | Path | Operations |
//! |-------|------|------------|
//! | [`UserLocationStore`] | `users/{userId}` | get, set (full overwrite), subscribe |
//! | [`EncounterStore`] | `encounteredUsers/{observerId}/{candidateId}` | get, set, remove, list |
//!
//! `set` overwrites the whole document, so writers read-modify-write. Subscriptions
//! deliver the whole `users` document as an immutable [`UsersDocument`]; a
//! [`Subscription`] has exactly one unsubscribe path, which also runs on drop.
//!
//! In-memory implementations are provided for tests and offline use.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::encounter::EncounterRecord;
use crate::{PaceMatchError, Result};

/// The full `users` document: user id to raw user document.
pub type UsersDocument = Arc<Map<String, Value>>;

/// Path of a user's location document.
pub fn user_path(user_id: &str) -> String {
    format!("users/{}", user_id)
}

/// Path of one encounter record.
pub fn encounter_path(observer_id: &str, candidate_id: &str) -> String {
    format!("encounteredUsers/{}/{}", observer_id, candidate_id)
}

// =============================================================================
// Subscription
// =============================================================================

/// Live view of the `users` document.
///
/// Dropping the subscription unsubscribes. [`unsubscribe`](Self::unsubscribe)
/// may be called any number of times.
#[derive(Debug)]
pub struct Subscription {
    rx: watch::Receiver<UsersDocument>,
    producer: Option<CancellationToken>,
    active: bool,
}

impl Subscription {
    pub fn new(rx: watch::Receiver<UsersDocument>) -> Self {
        Self {
            rx,
            producer: None,
            active: true,
        }
    }

    /// Subscription whose producer task stops when `producer` is cancelled.
    pub fn with_producer(rx: watch::Receiver<UsersDocument>, producer: CancellationToken) -> Self {
        Self {
            rx,
            producer: Some(producer),
            active: true,
        }
    }

    /// The latest document.
    pub fn current(&self) -> UsersDocument {
        self.rx.borrow().clone()
    }

    /// Wait for the next document. `None` once unsubscribed or the upstream is gone.
    pub async fn changed(&mut self) -> Option<UsersDocument> {
        if !self.active {
            return None;
        }
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn unsubscribe(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Some(producer) = self.producer.take() {
            producer.cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

// =============================================================================
// Traits
// =============================================================================

/// Subscribable key-value store of `userId -> user document`.
#[async_trait]
pub trait UserLocationStore: Send + Sync {
    /// Read `users/{user_id}`. `Ok(None)` when the document does not exist.
    async fn get(&self, user_id: &str) -> Result<Option<Value>>;

    /// Overwrite `users/{user_id}`.
    async fn set(&self, user_id: &str, document: Value) -> Result<()>;

    /// Subscribe to the whole `users` document.
    async fn subscribe(&self) -> Result<Subscription>;
}

#[async_trait]
impl<S: UserLocationStore + ?Sized> UserLocationStore for Arc<S> {
    async fn get(&self, user_id: &str) -> Result<Option<Value>> {
        (**self).get(user_id).await
    }

    async fn set(&self, user_id: &str, document: Value) -> Result<()> {
        (**self).set(user_id, document).await
    }

    async fn subscribe(&self) -> Result<Subscription> {
        (**self).subscribe().await
    }
}

#[async_trait]
impl<S: UserLocationStore + ?Sized> UserLocationStore for Box<S> {
    async fn get(&self, user_id: &str) -> Result<Option<Value>> {
        (**self).get(user_id).await
    }

    async fn set(&self, user_id: &str, document: Value) -> Result<()> {
        (**self).set(user_id, document).await
    }

    async fn subscribe(&self) -> Result<Subscription> {
        (**self).subscribe().await
    }
}

/// Persistent encounter records, one per (observer, candidate) pair.
#[async_trait]
pub trait EncounterStore: Send + Sync {
    async fn get(&self, observer_id: &str, candidate_id: &str) -> Result<Option<EncounterRecord>>;

    async fn set(&self, observer_id: &str, candidate_id: &str, record: &EncounterRecord) -> Result<()>;

    async fn remove(&self, observer_id: &str, candidate_id: &str) -> Result<()>;

    /// Every record of an observer, keyed by candidate id.
    async fn list(&self, observer_id: &str) -> Result<Vec<(String, EncounterRecord)>>;
}

#[async_trait]
impl<S: EncounterStore + ?Sized> EncounterStore for Arc<S> {
    async fn get(&self, observer_id: &str, candidate_id: &str) -> Result<Option<EncounterRecord>> {
        (**self).get(observer_id, candidate_id).await
    }

    async fn set(&self, observer_id: &str, candidate_id: &str, record: &EncounterRecord) -> Result<()> {
        (**self).set(observer_id, candidate_id, record).await
    }

    async fn remove(&self, observer_id: &str, candidate_id: &str) -> Result<()> {
        (**self).remove(observer_id, candidate_id).await
    }

    async fn list(&self, observer_id: &str) -> Result<Vec<(String, EncounterRecord)>> {
        (**self).list(observer_id).await
    }
}

#[async_trait]
impl<S: EncounterStore + ?Sized> EncounterStore for Box<S> {
    async fn get(&self, observer_id: &str, candidate_id: &str) -> Result<Option<EncounterRecord>> {
        (**self).get(observer_id, candidate_id).await
    }

    async fn set(&self, observer_id: &str, candidate_id: &str, record: &EncounterRecord) -> Result<()> {
        (**self).set(observer_id, candidate_id, record).await
    }

    async fn remove(&self, observer_id: &str, candidate_id: &str) -> Result<()> {
        (**self).remove(observer_id, candidate_id).await
    }

    async fn list(&self, observer_id: &str) -> Result<Vec<(String, EncounterRecord)>> {
        (**self).list(observer_id).await
    }
}

// =============================================================================
// In-memory implementations
// =============================================================================

/// In-memory user store. Every write is broadcast to subscribers.
#[derive(Debug)]
pub struct MemoryLocationStore {
    users: RwLock<Map<String, Value>>,
    tx: watch::Sender<UsersDocument>,
    writes: AtomicUsize,
    offline: AtomicBool,
}

impl Default for MemoryLocationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLocationStore {
    pub fn new() -> Self {
        Self::from_document(Map::new())
    }

    /// Seed with an existing `users` document.
    pub fn from_document(users: Map<String, Value>) -> Self {
        let (tx, _) = watch::channel(Arc::new(users.clone()));
        Self {
            users: RwLock::new(users),
            tx,
            writes: AtomicUsize::new(0),
            offline: AtomicBool::new(false),
        }
    }

    /// Write a document without going through the async API or the write counter.
    pub fn put(&self, user_id: &str, document: Value) {
        let mut users = self.users.write();
        users.insert(user_id.to_string(), document);
        self.tx.send_replace(Arc::new(users.clone()));
    }

    /// Delete a document and broadcast the change.
    pub fn delete(&self, user_id: &str) {
        let mut users = self.users.write();
        if users.remove(user_id).is_some() {
            self.tx.send_replace(Arc::new(users.clone()));
        }
    }

    /// Number of successful `set` calls.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Simulate the backend being unreachable: every operation fails while set.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self, path: &str) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(PaceMatchError::store(path, "backend unreachable"));
        }
        Ok(())
    }
}

#[async_trait]
impl UserLocationStore for MemoryLocationStore {
    async fn get(&self, user_id: &str) -> Result<Option<Value>> {
        self.check_online(&user_path(user_id))?;
        let users = self.users.read();
        Ok(users.get(user_id).cloned())
    }

    async fn set(&self, user_id: &str, document: Value) -> Result<()> {
        self.check_online(&user_path(user_id))?;
        self.put(user_id, document);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn subscribe(&self) -> Result<Subscription> {
        self.check_online("users")?;
        Ok(Subscription::new(self.tx.subscribe()))
    }
}

/// In-memory encounter store.
#[derive(Debug, Default)]
pub struct MemoryEncounterStore {
    records: RwLock<BTreeMap<String, BTreeMap<String, EncounterRecord>>>,
    writes: AtomicUsize,
    offline: AtomicBool,
}

impl MemoryEncounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `set` calls.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Simulate the backend being unreachable: every operation fails while set.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self, path: &str) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(PaceMatchError::store(path, "backend unreachable"));
        }
        Ok(())
    }
}

#[async_trait]
impl EncounterStore for MemoryEncounterStore {
    async fn get(&self, observer_id: &str, candidate_id: &str) -> Result<Option<EncounterRecord>> {
        self.check_online(&encounter_path(observer_id, candidate_id))?;
        let records = self.records.read();
        Ok(records
            .get(observer_id)
            .and_then(|by_candidate| by_candidate.get(candidate_id))
            .cloned())
    }

    async fn set(&self, observer_id: &str, candidate_id: &str, record: &EncounterRecord) -> Result<()> {
        self.check_online(&encounter_path(observer_id, candidate_id))?;
        let mut records = self.records.write();
        records
            .entry(observer_id.to_string())
            .or_default()
            .insert(candidate_id.to_string(), record.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn remove(&self, observer_id: &str, candidate_id: &str) -> Result<()> {
        self.check_online(&encounter_path(observer_id, candidate_id))?;
        let mut records = self.records.write();
        if let Some(by_candidate) = records.get_mut(observer_id) {
            by_candidate.remove(candidate_id);
            if by_candidate.is_empty() {
                records.remove(observer_id);
            }
        }
        Ok(())
    }

    async fn list(&self, observer_id: &str) -> Result<Vec<(String, EncounterRecord)>> {
        self.check_online(&format!("encounteredUsers/{}", observer_id))?;
        let records = self.records.read();
        Ok(records
            .get(observer_id)
            .map(|by_candidate| {
                by_candidate
                    .iter()
                    .map(|(id, r)| (id.clone(), r.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }
}
