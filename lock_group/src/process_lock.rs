use std::sync::Arc;
use std::time::Duration;

use parking_lot::lock_api::RawReentrantMutex;
use parking_lot::{RawMutex, RawThreadId};

use crate::error::LockError;
use crate::lock::{Lock, LockProvider};

/// The default provider: a fresh process-local mutex per lock session.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessLockProvider;

impl<K> LockProvider<K> for ProcessLockProvider {
    fn create_lock(&self, _key: &K) -> Result<Arc<dyn Lock>, LockError> {
        Ok(Arc::new(ProcessLock::new()))
    }
}

/// In-process lock over a raw reentrant mutex.
///
/// Reentrant so a thread that already holds a key may take it again without
/// deadlocking; each nested acquisition needs a matching release. The owning
/// thread is tracked, and a release from any other thread is rejected.
pub struct ProcessLock {
    raw: RawReentrantMutex<RawMutex, RawThreadId>,
}

impl ProcessLock {
    fn new() -> Self {
        Self {
            raw: RawReentrantMutex::INIT,
        }
    }
}

impl Lock for ProcessLock {
    fn acquire(&self) -> Result<(), LockError> {
        self.raw.lock();
        Ok(())
    }

    fn try_acquire(&self, timeout: Duration) -> Result<bool, LockError> {
        if timeout.is_zero() {
            return Ok(self.raw.try_lock());
        }
        Ok(self.raw.try_lock_for(timeout))
    }

    fn release(&self) -> Result<(), LockError> {
        if !self.raw.is_owned_by_current_thread() {
            return Err(LockError::NotHeld);
        }
        // Safety: the current thread owns the mutex, checked above.
        unsafe { self.raw.unlock() };
        Ok(())
    }
}
