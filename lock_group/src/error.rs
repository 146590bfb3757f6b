use thiserror::Error;

/// Errors surfaced by lock providers and the lock group.
///
/// A timed-out bounded acquisition is not an error; `try_lock` reports it by
/// returning `Ok(false)`.
#[derive(Debug, Error)]
pub enum LockError {
    /// The provider could not manufacture a lock for a key.
    #[error("failed to create lock: {0}")]
    Creation(String),

    /// The file backing a lock could not be opened or locked.
    #[error("lock file io: {0}")]
    Io(#[from] std::io::Error),

    /// A release was attempted without a matching successful acquisition.
    #[error("lock is not held by this caller")]
    NotHeld,
}
