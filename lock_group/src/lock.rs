use std::sync::Arc;
use std::time::Duration;

use crate::error::LockError;

/// A single mutual-exclusion primitive handed out by a [`LockProvider`].
///
/// Implementations decide the scope of exclusion: the default provider keeps
/// it process-local, the file-backed provider spans processes sharing a
/// directory. The trait is guardless so the owning
/// [`LockGroup`](crate::LockGroup) can keep the acquire and release sides on
/// different call stacks.
pub trait Lock: Send + Sync {
    /// Blocks the calling thread until it holds the lock.
    fn acquire(&self) -> Result<(), LockError>;

    /// Bounded acquire.
    ///
    /// Returns `Ok(false)` if the lock could not be taken within `timeout`.
    /// A zero timeout makes a single non-blocking attempt.
    fn try_acquire(&self, timeout: Duration) -> Result<bool, LockError>;

    /// Releases the lock.
    ///
    /// Fails with [`LockError::NotHeld`] when the implementation can tell
    /// the caller does not hold it.
    fn release(&self) -> Result<(), LockError>;
}

/// Factory for the lock behind a key.
///
/// This is the single extension point: pass a different provider to
/// [`LockGroup::with_provider`](crate::LockGroup::with_provider) to change
/// the scope of exclusion without touching any caller.
pub trait LockProvider<K>: Send + Sync {
    /// Manufactures a fresh lock for `key`.
    ///
    /// The group calls this exactly once per lock session, while holding
    /// exclusive rights to the registry slot for `key`, so implementations
    /// need not track keys or guard against concurrent creation of the same
    /// key. A failure here surfaces unchanged to the caller that opened the
    /// session.
    fn create_lock(&self, key: &K) -> Result<Arc<dyn Lock>, LockError>;
}
