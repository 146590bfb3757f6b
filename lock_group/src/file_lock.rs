//! Cross-process lock provider backed by advisory file locks.
//!
//! Each key maps to a lock file under a root directory. Every acquisition
//! opens its own handle to that file and takes an exclusive lock on it, so
//! exclusion holds both between threads of one process and between processes
//! sharing the directory.

use std::fs::{create_dir_all, File, OpenOptions};
use std::io;
use std::mem;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use fd_lock::{RwLock, RwLockWriteGuard};
use parking_lot::Mutex;

use crate::error::LockError;
use crate::lock::{Lock, LockProvider};

/// How often a bounded acquisition re-attempts the file lock.
const RETRY_INTERVAL: Duration = Duration::from_millis(5);

/// Manufactures file-backed locks under a root directory.
///
/// Keys are hex-encoded into file names, so any byte string is a valid key.
/// Two providers pointed at the same directory, in the same process or not,
/// hand out locks that exclude each other.
pub struct FileLockProvider {
    root: PathBuf,
}

impl FileLockProvider {
    /// Creates a provider storing its lock files under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn lock_file_path(&self, key: &[u8]) -> PathBuf {
        self.root.join(hex::encode(key))
    }
}

impl<K: AsRef<[u8]>> LockProvider<K> for FileLockProvider {
    fn create_lock(&self, key: &K) -> Result<Arc<dyn Lock>, LockError> {
        // create_dir_all is idempotent and safe for concurrent calls
        create_dir_all(&self.root)?;
        let path = self.lock_file_path(key.as_ref());

        // Open once up front so an unreachable root fails the session here
        // instead of inside acquire.
        open_lock_file(&path)?;
        tracing::debug!(path = %path.display(), "created file-backed lock");

        Ok(Arc::new(FileBackedLock {
            path,
            held: Mutex::new(None),
        }))
    }
}

fn open_lock_file(path: &Path) -> io::Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(path)
}

/// A lock over an exclusive advisory file lock.
///
/// Advisory locks carry no owning-thread identity, so a release issued by a
/// thread other than the holder cannot be detected; callers must pair each
/// acquisition with exactly one release.
pub struct FileBackedLock {
    path: PathBuf,
    held: Mutex<Option<HeldFile>>,
}

impl Lock for FileBackedLock {
    fn acquire(&self) -> Result<(), LockError> {
        let file = open_lock_file(&self.path)?;
        let held = HeldFile::lock(file)?;
        *self.held.lock() = Some(held);
        Ok(())
    }

    fn try_acquire(&self, timeout: Duration) -> Result<bool, LockError> {
        let deadline = Instant::now() + timeout;
        loop {
            let file = open_lock_file(&self.path)?;
            match HeldFile::try_lock(file)? {
                Some(held) => {
                    *self.held.lock() = Some(held);
                    return Ok(true);
                }
                None => {
                    if Instant::now() >= deadline {
                        return Ok(false);
                    }
                    thread::sleep(RETRY_INTERVAL);
                }
            }
        }
    }

    fn release(&self) -> Result<(), LockError> {
        match self.held.lock().take() {
            Some(held) => {
                drop(held);
                Ok(())
            }
            None => Err(LockError::NotHeld),
        }
    }
}

/// The open handle plus the guard holding its exclusive lock.
///
/// `fd_lock` guards borrow the lock they came from, so the pair is stored as
/// raw pointers with the lifetime erased. Drop order matters: the guard goes
/// first (releasing the OS lock), then the lock itself (closing the file).
struct HeldFile {
    guard: *mut RwLockWriteGuard<'static, File>,
    lock: *mut RwLock<File>,
}

// Safety: both pointers are owned exclusively by this value and only
// dereferenced in Drop; the OS lock itself may be released from any thread.
unsafe impl Send for HeldFile {}
unsafe impl Sync for HeldFile {}

impl HeldFile {
    /// Blocks until the file's exclusive lock is held.
    fn lock(file: File) -> Result<Self, LockError> {
        // Box the lock so it has a stable address
        let lock = Box::into_raw(Box::new(RwLock::new(file)));
        unsafe {
            match (*lock).write() {
                Ok(guard) => Ok(Self::from_parts(lock, guard)),
                Err(e) => {
                    drop(Box::from_raw(lock));
                    Err(e.into())
                }
            }
        }
    }

    /// Single non-blocking attempt; `Ok(None)` when another handle holds the
    /// lock.
    fn try_lock(file: File) -> Result<Option<Self>, LockError> {
        let lock = Box::into_raw(Box::new(RwLock::new(file)));
        unsafe {
            match (*lock).try_write() {
                Ok(guard) => Ok(Some(Self::from_parts(lock, guard))),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    drop(Box::from_raw(lock));
                    Ok(None)
                }
                Err(e) => {
                    drop(Box::from_raw(lock));
                    Err(e.into())
                }
            }
        }
    }

    /// # Safety
    ///
    /// `lock` must be the boxed lock `guard` was taken from, and ownership of
    /// both transfers to the returned value.
    unsafe fn from_parts(lock: *mut RwLock<File>, guard: RwLockWriteGuard<'_, File>) -> Self {
        // The guard's borrow is tied to the boxed lock; Drop keeps the order
        // between the two.
        let guard: RwLockWriteGuard<'static, File> = mem::transmute(guard);
        Self {
            guard: Box::into_raw(Box::new(guard)),
            lock,
        }
    }
}

impl Drop for HeldFile {
    fn drop(&mut self) {
        unsafe {
            // Drop the guard first (releases the OS lock)
            drop(Box::from_raw(self.guard));
            // Then the lock (closes the file)
            drop(Box::from_raw(self.lock));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::mpsc;

    /// Generate a unique temporary directory for each test.
    /// OS handles cleanup of temp directories.
    fn test_lock_dir() -> PathBuf {
        use std::sync::atomic::{AtomicUsize, Ordering};
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        let id = COUNTER.fetch_add(1, Ordering::SeqCst);
        std::env::temp_dir().join(format!(
            "lock_group_test_{}_{}_{}",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos(),
            id
        ))
    }

    #[test]
    fn locks_from_separate_providers_exclude_each_other() {
        let dir = test_lock_dir();
        let provider_a = FileLockProvider::new(&dir);
        let provider_b = FileLockProvider::new(&dir);

        let lock_a = provider_a.create_lock(&"entry").unwrap();
        let lock_b = provider_b.create_lock(&"entry").unwrap();

        lock_a.acquire().unwrap();
        assert!(!lock_b.try_acquire(Duration::ZERO).unwrap());

        lock_a.release().unwrap();
        assert!(lock_b.try_acquire(Duration::ZERO).unwrap());
        lock_b.release().unwrap();
    }

    #[test]
    fn distinct_keys_are_independent() {
        let dir = test_lock_dir();
        let provider = FileLockProvider::new(&dir);

        let lock_a = provider.create_lock(&"a").unwrap();
        let lock_b = provider.create_lock(&"b").unwrap();

        lock_a.acquire().unwrap();
        assert!(lock_b.try_acquire(Duration::ZERO).unwrap());

        lock_a.release().unwrap();
        lock_b.release().unwrap();
    }

    #[test]
    fn lock_file_is_created_on_disk() {
        let dir = test_lock_dir();
        let provider = FileLockProvider::new(&dir);

        provider.create_lock(&[0xde, 0xad, 0xbe, 0xef]).unwrap();
        assert!(dir.join("deadbeef").exists());
    }

    #[test]
    fn release_without_holder_is_rejected() {
        let dir = test_lock_dir();
        let provider = FileLockProvider::new(&dir);

        let lock = provider.create_lock(&"entry").unwrap();
        assert!(matches!(lock.release(), Err(LockError::NotHeld)));
    }

    #[test]
    fn bounded_acquire_waits_out_the_timeout() {
        let dir = test_lock_dir();
        let provider = FileLockProvider::new(&dir);

        let holder = provider.create_lock(&"entry").unwrap();
        holder.acquire().unwrap();

        let contender = provider.create_lock(&"entry").unwrap();
        let start = Instant::now();
        assert!(!contender.try_acquire(Duration::from_millis(150)).unwrap());
        assert!(start.elapsed() >= Duration::from_millis(100));

        holder.release().unwrap();
    }

    #[test]
    fn blocking_acquire_waits_for_the_holder() {
        let dir = test_lock_dir();
        let provider = FileLockProvider::new(&dir);

        let holder = provider.create_lock(&"entry").unwrap();
        holder.acquire().unwrap();

        let contender = provider.create_lock(&"entry").unwrap();
        let (started_tx, started_rx) = mpsc::channel();
        let waiter = thread::spawn(move || {
            started_tx.send(()).unwrap();
            contender.acquire().unwrap();
            contender.release().unwrap();
        });

        started_rx.recv().unwrap();
        // Give the waiter time to block on the file lock before releasing.
        thread::sleep(Duration::from_millis(50));
        holder.release().unwrap();
        waiter.join().unwrap();
    }
}
