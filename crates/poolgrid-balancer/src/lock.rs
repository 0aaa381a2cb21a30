//! Advisory locks over the shared store.
//!
//! A lock is a `{"locked": bool}` object in the `locks` collection. It is
//! never deleted; a missing record reads as unlocked. Each acquire attempt
//! checks and sets the flag inside one store write transaction, so two
//! acquirers can never both win the same attempt. Release is unconditional
//! and not tied to the acquirer.

use std::time::Duration;

use serde_json::json;
use tracing::{debug, error, warn};

use poolgrid_core::LockConfig;
use poolgrid_state::{Permission, StateResult, StateStore, StoredObject};

/// Collection holding lock records.
pub const LOCK_COLLECTION: &str = "locks";

/// The operation classes that are serialized against each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockKey {
    Join,
    Leave,
}

impl LockKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockKey::Join => "join_lock",
            LockKey::Leave => "leave_lock",
        }
    }
}

/// Acquires and releases lock records with bounded spin-and-backoff.
#[derive(Clone)]
pub struct LockManager {
    store: StateStore,
    retries: u32,
    backoff: Duration,
}

impl LockManager {
    pub fn new(store: StateStore, config: &LockConfig) -> Self {
        Self {
            store,
            retries: config.retries.max(1),
            backoff: config.backoff(),
        }
    }

    /// Try to take the lock, retrying up to the configured count.
    ///
    /// Returns `None` once the retry budget is spent or the store fails; the
    /// caller must then abandon its operation without side effects.
    pub async fn acquire(&self, key: LockKey) -> Option<LockGuard> {
        for attempt in 1..=self.retries {
            match self.try_acquire(key) {
                Ok(true) => {
                    debug!(lock = key.as_str(), attempt, "lock acquired");
                    return Some(LockGuard {
                        manager: self.clone(),
                        key,
                        released: false,
                    });
                }
                Ok(false) => {
                    debug!(lock = key.as_str(), attempt, "lock held, backing off");
                    if attempt < self.retries {
                        tokio::time::sleep(self.backoff).await;
                    }
                }
                Err(e) => {
                    error!(lock = key.as_str(), error = %e, "lock read failed");
                    return None;
                }
            }
        }
        warn!(lock = key.as_str(), retries = self.retries, "lock not acquired");
        None
    }

    /// A single acquire attempt. Returns true if this call set the flag.
    pub fn try_acquire(&self, key: LockKey) -> StateResult<bool> {
        let written = self.store.update_object(
            LOCK_COLLECTION,
            key.as_str(),
            Permission::Public,
            Permission::Public,
            |current| {
                if current.is_some_and(is_locked) {
                    None
                } else {
                    Some(json!({ "locked": true }))
                }
            },
        )?;
        Ok(written.is_some())
    }

    /// Clear the flag. Errors are logged, never returned.
    pub fn release(&self, key: LockKey) {
        let result = self.store.put_object(
            LOCK_COLLECTION,
            key.as_str(),
            json!({ "locked": false }),
            Permission::Public,
            Permission::Public,
        );
        match result {
            Ok(_) => debug!(lock = key.as_str(), "lock released"),
            Err(e) => error!(lock = key.as_str(), error = %e, "lock release failed"),
        }
    }

    /// Current flag value; a missing record is unlocked.
    pub fn is_locked(&self, key: LockKey) -> StateResult<bool> {
        Ok(self
            .store
            .get_object(LOCK_COLLECTION, key.as_str())?
            .is_some_and(|obj| is_locked(&obj)))
    }
}

fn is_locked(obj: &StoredObject) -> bool {
    obj.value
        .get("locked")
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(false)
}

/// Holds an acquired lock and releases it on drop.
pub struct LockGuard {
    manager: LockManager,
    key: LockKey,
    released: bool,
}

impl LockGuard {
    pub fn key(&self) -> LockKey {
        self.key
    }

    /// Release now instead of at end of scope.
    pub fn release(mut self) {
        self.manager.release(self.key);
        self.released = true;
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.released {
            self.manager.release(self.key);
        }
    }
}
