use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::LockError;
use crate::lock::{Lock, LockProvider};
use crate::process_lock::ProcessLockProvider;

/// One registry slot: the manufactured lock and its outstanding holders.
struct LockEntry {
    lock: Arc<dyn Lock>,
    holders: usize,
}

/// Keyed, reference-counted mutual exclusion.
///
/// A `LockGroup` hands out a distinct lock per logical resource key to any
/// number of threads. The underlying lock is manufactured by the group's
/// [`LockProvider`] on the first acquisition of a key and dropped when the
/// last holder releases it, so idle keys occupy no memory. Callers never see
/// the provider or the lock; the contract is `lock` / `try_lock` / `unlock`
/// plus the scoped and key-bound views built on top of them.
///
/// Every registry transition (create-or-increment, decrement-or-remove) runs
/// as a single critical section against the registry, which is what makes
/// the handover between "last holder releases" and "new thread acquires"
/// race-free. Blocking waits always happen outside that critical section, so
/// operations on independent keys never serialize through each other.
///
/// # Example
///
/// ```
/// use lock_group::LockGroup;
///
/// let group: LockGroup<String> = LockGroup::new();
/// let guard = group.guard("store/entry-7".to_string())?;
/// // exclusive access to the resource behind the key
/// drop(guard);
/// # Ok::<(), lock_group::LockError>(())
/// ```
pub struct LockGroup<K = String> {
    provider: Box<dyn LockProvider<K>>,
    registry: Mutex<HashMap<K, LockEntry>>,
}

impl<K: Eq + Hash + Clone> LockGroup<K> {
    /// Creates a group whose exclusion is process-local.
    pub fn new() -> Self {
        Self::with_provider(Box::new(ProcessLockProvider))
    }

    /// Creates a group over a custom [`LockProvider`].
    ///
    /// This is how exclusion is widened beyond the process: pass a provider
    /// whose locks span whatever scope is needed and every caller gets that
    /// scope without changing.
    pub fn with_provider(provider: Box<dyn LockProvider<K>>) -> Self {
        Self {
            provider,
            registry: Mutex::new(HashMap::new()),
        }
    }

    /// Blocks until the calling thread holds the lock for `key`.
    ///
    /// The first acquisition of a key asks the provider for a fresh lock;
    /// later acquisitions share it. Each successful call must be matched by
    /// one [`unlock`](Self::unlock). A provider or lock failure surfaces
    /// unchanged and leaves the registry as if the call never happened.
    pub fn lock(&self, key: &K) -> Result<(), LockError> {
        let lock = self.checkout(key)?;
        // Block outside the registry critical section so other keys, and
        // other holders of this key, keep moving.
        if let Err(e) = lock.acquire() {
            self.checkin(key);
            return Err(e);
        }
        Ok(())
    }

    /// Bounded variant of [`lock`](Self::lock).
    ///
    /// Returns `Ok(false)` when the lock could not be taken within
    /// `timeout`; a failed attempt leaves no trace in the registry. A zero
    /// timeout makes a single non-blocking attempt.
    pub fn try_lock(&self, key: &K, timeout: Duration) -> Result<bool, LockError> {
        let lock = self.checkout(key)?;
        match lock.try_acquire(timeout) {
            Ok(true) => Ok(true),
            Ok(false) => {
                self.checkin(key);
                Ok(false)
            }
            Err(e) => {
                self.checkin(key);
                Err(e)
            }
        }
    }

    /// Releases the lock for `key` held by the calling thread.
    ///
    /// Decrements the key's holder count and removes the registry entry when
    /// it reaches zero. Returns [`LockError::NotHeld`] when the key has no
    /// outstanding holders, or when the underlying lock rejects a release
    /// from a thread that does not own it; in both cases the registry is
    /// left untouched.
    pub fn unlock(&self, key: &K) -> Result<(), LockError> {
        let lock = {
            let registry = self.registry.lock();
            let entry = registry.get(key).ok_or(LockError::NotHeld)?;
            entry.lock.clone()
        };
        lock.release()?;
        self.checkin(key);
        Ok(())
    }

    /// Acquires `key` and returns a guard that releases it on drop.
    pub fn guard(&self, key: K) -> Result<KeyGuard<'_, K>, LockError> {
        self.lock(&key)?;
        Ok(KeyGuard {
            group: self,
            key: Some(key),
        })
    }

    /// Bounded variant of [`guard`](Self::guard); `Ok(None)` on timeout.
    pub fn try_guard(
        &self,
        key: K,
        timeout: Duration,
    ) -> Result<Option<KeyGuard<'_, K>>, LockError> {
        if self.try_lock(&key, timeout)? {
            Ok(Some(KeyGuard {
                group: self,
                key: Some(key),
            }))
        } else {
            Ok(None)
        }
    }

    /// Returns a key-bound view over this group.
    pub fn handle(&self, key: K) -> LockHandle<'_, K> {
        LockHandle { group: self, key }
    }

    /// Number of outstanding, unmatched acquisitions for `key`.
    ///
    /// Diagnostic only; the value may be stale by the time it is read.
    pub fn holder_count(&self, key: &K) -> usize {
        self.registry
            .lock()
            .get(key)
            .map_or(0, |entry| entry.holders)
    }

    /// Create-or-increment, as one critical section against the registry.
    ///
    /// The provider runs inside the critical section; if it fails, the
    /// vacant slot is never filled.
    fn checkout(&self, key: &K) -> Result<Arc<dyn Lock>, LockError> {
        let mut registry = self.registry.lock();
        match registry.entry(key.clone()) {
            Entry::Occupied(mut slot) => {
                let entry = slot.get_mut();
                entry.holders += 1;
                Ok(entry.lock.clone())
            }
            Entry::Vacant(slot) => {
                let lock = self.provider.create_lock(key)?;
                slot.insert(LockEntry {
                    lock: lock.clone(),
                    holders: 1,
                });
                Ok(lock)
            }
        }
    }

    /// Decrement-or-remove, as one critical section against the registry.
    fn checkin(&self, key: &K) {
        let mut registry = self.registry.lock();
        if let Some(entry) = registry.get_mut(key) {
            entry.holders -= 1;
            if entry.holders == 0 {
                registry.remove(key);
            }
        }
    }
}

impl<K: Eq + Hash + Clone> Default for LockGroup<K> {
    fn default() -> Self {
        Self::new()
    }
}

/// Holds a key's lock until dropped.
///
/// Returned by [`LockGroup::guard`] and [`LockGroup::try_guard`]. Dropping
/// the guard releases the key on every exit path; a release error on the
/// drop path is logged rather than surfaced, so callers that care use
/// [`release`](KeyGuard::release).
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct KeyGuard<'a, K: Eq + Hash + Clone> {
    group: &'a LockGroup<K>,
    key: Option<K>,
}

impl<K: Eq + Hash + Clone> KeyGuard<'_, K> {
    /// Releases explicitly, surfacing any error the drop path would only
    /// log.
    pub fn release(mut self) -> Result<(), LockError> {
        match self.key.take() {
            Some(key) => self.group.unlock(&key),
            None => Ok(()),
        }
    }
}

impl<K: Eq + Hash + Clone> Drop for KeyGuard<'_, K> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            if let Err(e) = self.group.unlock(&key) {
                tracing::warn!("failed to release lock on drop: {e}");
            }
        }
    }
}

/// A key-bound view over a [`LockGroup`].
///
/// Lets callers that deal with a single resource carry one value instead of
/// threading the key through every call site. Creating a handle performs no
/// registry work; a lock session still starts on the first acquisition.
#[derive(Clone)]
pub struct LockHandle<'a, K: Eq + Hash + Clone> {
    group: &'a LockGroup<K>,
    key: K,
}

impl<K: Eq + Hash + Clone> LockHandle<'_, K> {
    /// Blocks until the calling thread holds this handle's key.
    pub fn lock(&self) -> Result<(), LockError> {
        self.group.lock(&self.key)
    }

    /// Bounded acquire; `Ok(false)` on timeout.
    pub fn try_lock(&self, timeout: Duration) -> Result<bool, LockError> {
        self.group.try_lock(&self.key, timeout)
    }

    /// Releases this handle's key.
    pub fn unlock(&self) -> Result<(), LockError> {
        self.group.unlock(&self.key)
    }

    /// The key this handle is bound to.
    pub fn key(&self) -> &K {
        &self.key
    }
}
