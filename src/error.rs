//! Error types for the weakgc runtime.

use thiserror::Error;

/// Errors that can occur while running the managed heap.
///
/// Weak handle operations never produce these: a reclaimed target is reported
/// as `None`/`false`, not as an error.
///
/// # Examples
///
/// ```
/// use weakgc::error::{GcError, GcResult};
///
/// let lost = GcError::FinalizerThreadLost;
/// assert_eq!(lost.to_string(), "Finalizer thread is no longer running");
///
/// let failure: GcResult<u32> = Err(GcError::ReentrantCollection);
/// assert!(failure.is_err());
/// ```
#[derive(Error, Debug)]
pub enum GcError {
    /// The OS refused to start the finalizer thread
    #[error("Failed to spawn finalizer thread: {0}")]
    FinalizerSpawn(#[from] std::io::Error),
    /// The finalizer thread exited or its channel closed mid-cycle
    #[error("Finalizer thread is no longer running")]
    FinalizerThreadLost,
    /// `collect` was called from inside a finalizer or a `Drop` run by the
    /// sweep
    #[error("Collection requested from inside a running cycle")]
    ReentrantCollection,
}

/// Result type for heap operations
pub type GcResult<T> = Result<T, GcError>;
