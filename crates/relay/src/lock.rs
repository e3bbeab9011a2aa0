//! Per-entity mutual exclusion
//!
//! Mutexes are created lazily per key and removed from the registry when the last
//! holder releases them with nobody waiting, so the registry only grows with
//! contention.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Key constructors; the kind prefix keeps unrelated entities from contending
pub mod keys {
    use std::fmt::Display;

    pub fn thread(id: impl Display) -> String {
        format!("thread_{id}")
    }

    pub fn room(id: impl Display) -> String {
        format!("room_{id}")
    }

    pub fn ticket_creation(user: impl Display) -> String {
        format!("ticket_{user}")
    }
}

type Registry = Arc<Mutex<HashMap<String, Weak<AsyncMutex<()>>>>>;

fn registry(locks: &Registry) -> MutexGuard<'_, HashMap<String, Weak<AsyncMutex<()>>>> {
    locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Registry of async mutexes addressed by string keys
#[derive(Default)]
pub struct KeyedLock {
    locks: Registry,
}

/// Exclusive ownership of one key; released on drop
pub struct KeyedGuard {
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Registry,
}

impl KeyedGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for KeyedGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Waiters hold a strong reference, so a dead entry has nobody queued
        let mut locks = registry(&self.locks);
        if locks.get(&self.key).is_some_and(|m| m.strong_count() == 0) {
            locks.remove(&self.key);
        }
    }
}

impl KeyedLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until `key` is free and take it
    pub async fn lock(&self, key: impl Into<String>) -> KeyedGuard {
        let key = key.into();
        let mutex = self.mutex_for(&key);
        let guard = mutex.lock_owned().await;
        tracing::trace!(key = %key, "Acquired keyed lock");
        KeyedGuard {
            key,
            guard: Some(guard),
            locks: Arc::clone(&self.locks),
        }
    }

    /// Release a key explicitly; equivalent to dropping the guard
    pub fn unlock(&self, guard: KeyedGuard) {
        tracing::trace!(key = %guard.key, "Released keyed lock");
        drop(guard);
    }

    /// Number of keys currently held or waited on
    pub fn active_keys(&self) -> usize {
        registry(&self.locks)
            .values()
            .filter(|m| m.strong_count() > 0)
            .count()
    }

    fn mutex_for(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = registry(&self.locks);
        if let Some(mutex) = locks.get(key).and_then(Weak::upgrade) {
            return mutex;
        }
        // Absent, or left behind by a waiter that gave up
        let mutex = Arc::new(AsyncMutex::new(()));
        locks.insert(key.to_string(), Arc::downgrade(&mutex));
        mutex
    }
}
