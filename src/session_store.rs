//! # Session Store Module
//!
//! In-memory storage of conversation sessions keyed by user id.
//!
//! Each user id owns a slot guarded by an async mutex. The conversation
//! engine holds the slot lock for the whole of one inbound event, so two
//! events from the same user are handled one after the other while events
//! from different users proceed in parallel.
//!
//! Slots remember when they were last used. `evict_idle` drops conversations
//! abandoned partway through so the map stays bounded.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::debug;

use crate::dialogue::Session;

type Slot = Arc<AsyncMutex<Option<Session>>>;

struct SlotEntry {
    slot: Slot,
    last_seen: Instant,
}

impl SlotEntry {
    /// Someone holds or waits on the lock
    fn in_use(&self) -> bool {
        Arc::strong_count(&self.slot) > 1 || self.slot.try_lock().is_err()
    }
}

/// Keyed in-memory mapping from user id to session
#[derive(Default)]
pub struct SessionStore {
    slots: Mutex<HashMap<String, SlotEntry>>,
}

/// Exclusive access to one user's session for the duration of an event
pub struct SessionGuard {
    user_id: String,
    guard: OwnedMutexGuard<Option<Session>>,
}

impl SessionGuard {
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn get(&self) -> Option<&Session> {
        self.guard.as_ref()
    }

    pub fn get_mut(&mut self) -> Option<&mut Session> {
        self.guard.as_mut()
    }

    /// Create or replace the session
    pub fn put(&mut self, session: Session) {
        *self.guard = Some(session);
    }

    /// Remove the session and return what it held
    pub fn delete(&mut self) -> Option<Session> {
        self.guard.take()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, user_id: &str) -> Slot {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = slots
            .entry(user_id.to_string())
            .or_insert_with(|| SlotEntry {
                slot: Arc::new(AsyncMutex::new(None)),
                last_seen: Instant::now(),
            });
        entry.last_seen = Instant::now();
        Arc::clone(&entry.slot)
    }

    /// Wait for exclusive access to the user's session
    pub async fn lock(&self, user_id: &str) -> SessionGuard {
        let guard = self.slot(user_id).lock_owned().await;
        SessionGuard {
            user_id: user_id.to_string(),
            guard,
        }
    }

    /// Snapshot of the user's session, waiting for any in-flight event
    pub async fn get(&self, user_id: &str) -> Option<Session> {
        self.lock(user_id).await.get().cloned()
    }

    pub async fn put(&self, session: Session) {
        let mut guard = self.lock(&session.id).await;
        guard.put(session);
    }

    pub async fn delete(&self, user_id: &str) -> Option<Session> {
        self.lock(user_id).await.delete()
    }

    pub async fn contains(&self, user_id: &str) -> bool {
        self.lock(user_id).await.get().is_some()
    }

    /// Drop slots that hold no session and that nobody is waiting on
    pub fn prune(&self) -> usize {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let before = slots.len();
        slots.retain(|_, entry| {
            if Arc::strong_count(&entry.slot) > 1 {
                return true;
            }
            match entry.slot.try_lock() {
                Ok(session) => session.is_some(),
                Err(_) => true,
            }
        });
        before - slots.len()
    }

    /// Drop sessions untouched for longer than `max_idle`, whatever their step
    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        self.evict_idle_at(Instant::now(), max_idle)
    }

    fn evict_idle_at(&self, now: Instant, max_idle: Duration) -> usize {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        let before = slots.len();
        slots.retain(|user_id, entry| {
            let keep = entry.in_use() || now.saturating_duration_since(entry.last_seen) < max_idle;
            if !keep {
                debug!(user_id = %user_id, "Evicting idle session");
            }
            keep
        });
        before - slots.len()
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        let slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots
            .values()
            .filter(|entry| match entry.slot.try_lock() {
                Ok(session) => session.is_some(),
                Err(_) => true,
            })
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialogue::Step;

    #[tokio::test]
    async fn test_crud() {
        let store = SessionStore::new();
        assert!(store.get("u1").await.is_none());

        store.put(Session::new("u1", Step::AuthChoice)).await;
        assert_eq!(store.get("u1").await.unwrap().step, Step::AuthChoice);

        {
            let mut guard = store.lock("u1").await;
            guard.get_mut().unwrap().step = Step::AuthVendor;
        }
        assert_eq!(store.get("u1").await.unwrap().step, Step::AuthVendor);

        let removed = store.delete("u1").await;
        assert_eq!(removed.unwrap().step, Step::AuthVendor);
        assert!(!store.contains("u1").await);
    }

    #[tokio::test]
    async fn test_prune_keeps_live_sessions() {
        let store = SessionStore::new();
        store.put(Session::new("u1", Step::AuthChoice)).await;
        store.put(Session::new("u2", Step::AuthChoice)).await;
        store.delete("u2").await;

        assert_eq!(store.prune(), 1);
        assert_eq!(store.len(), 1);
        assert!(store.contains("u1").await);
    }

    #[tokio::test]
    async fn test_idle_sessions_are_evicted() {
        let store = SessionStore::new();
        store.put(Session::new("idle", Step::AuthId)).await;
        let later = Instant::now() + Duration::from_secs(120);
        store.put(Session::new("active", Step::AdminMenu)).await;

        assert_eq!(store.evict_idle_at(later, Duration::from_secs(600)), 0);
        assert_eq!(store.evict_idle_at(later, Duration::from_secs(60)), 2);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_eviction_skips_locked_slots() {
        let store = SessionStore::new();
        store.put(Session::new("u1", Step::AuthId)).await;
        store.put(Session::new("u2", Step::AuthId)).await;

        let guard = store.lock("u1").await;
        let later = Instant::now() + Duration::from_secs(3600);
        assert_eq!(store.evict_idle_at(later, Duration::from_secs(60)), 1);
        drop(guard);
        assert!(store.contains("u1").await);
        assert!(!store.contains("u2").await);
    }

    #[tokio::test]
    async fn test_recent_activity_keeps_session() {
        let store = SessionStore::new();
        store.put(Session::new("u1", Step::AuthVendor)).await;
        assert_eq!(store.evict_idle(Duration::from_secs(60)), 0);
        assert!(store.contains("u1").await);
    }

    #[tokio::test]
    async fn test_same_user_is_serialized() {
        let store = Arc::new(SessionStore::new());
        store.put(Session::new("u1", Step::AuthChoice)).await;

        let mut tasks = Vec::new();
        for _ in 0..10 {
            let store = Arc::clone(&store);
            tasks.push(tokio::spawn(async move {
                let mut guard = store.lock("u1").await;
                let session = guard.get_mut().unwrap();
                let current = session.amount.clone().unwrap_or_default();
                // Yield while holding the lock; an unserialized store would lose updates here
                tokio::time::sleep(Duration::from_millis(2)).await;
                session.amount = Some(format!("{current}x"));
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let session = store.get("u1").await.unwrap();
        assert_eq!(session.amount.unwrap().len(), 10);
    }
}
