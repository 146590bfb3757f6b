//! Keyed, reference-counted mutual exclusion.
//!
//! A [`LockGroup`] hands out a distinct lock per logical resource key to any
//! number of concurrently-running threads, creating the underlying lock on a
//! key's first acquisition and dropping it when the last holder releases.
//! The lock implementation is pluggable through [`LockProvider`]: the
//! default keeps exclusion process-local, while [`FileLockProvider`] spans
//! processes sharing a directory. Swapping providers is invisible to
//! callers.
//!
//! ```
//! use lock_group::LockGroup;
//!
//! let group: LockGroup<String> = LockGroup::new();
//!
//! let guard = group.guard("store/entry-7".to_string())?;
//! // exclusive access to the resource behind the key
//! drop(guard);
//! # Ok::<(), lock_group::LockError>(())
//! ```

mod error;
#[cfg(not(target_arch = "wasm32"))]
mod file_lock;
mod group;
mod lock;
mod process_lock;

pub use error::LockError;
#[cfg(not(target_arch = "wasm32"))]
pub use file_lock::{FileBackedLock, FileLockProvider};
pub use group::{KeyGuard, LockGroup, LockHandle};
pub use lock::{Lock, LockProvider};
pub use process_lock::{ProcessLock, ProcessLockProvider};
