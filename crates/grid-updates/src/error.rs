use crate::types::BatchId;
use grid_core::Error as CoreError;
use std::result::Result as StdResult;
use thiserror::Error;

/// Result alias for update operations.
pub type Result<T> = StdResult<T, UpdateError>;

/// Errors that reject an update before any per-item work starts.
///
/// Per-item outcomes (conflicts, rejected writes, timeouts) are recorded as
/// [`ItemState`](crate::ItemState) values instead.
#[derive(Debug, Error)]
pub enum UpdateError {
    /// Configuration or other core failure.
    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    /// No mutation handler matches the operation type.
    #[error("No mutation registered for operation type \"{0}\"")]
    UnknownOperation(String),

    /// The batch named no images.
    #[error("Cannot start an update without any images")]
    EmptyBatch,

    /// A handler for this operation type is already registered.
    #[error("Operation type \"{0}\" is already registered")]
    DuplicateOperation(String),

    /// Called outside a tokio runtime.
    #[error("Updates must be started from within a tokio runtime")]
    NoRuntime,

    /// No retained batch has this id.
    #[error("Unknown batch {0}")]
    UnknownBatch(BatchId),
}

impl UpdateError {
    /// Programmer errors that indicate a misconfigured caller rather than a backend problem.
    #[must_use]
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            Self::UnknownOperation(_) | Self::EmptyBatch | Self::DuplicateOperation(_)
        )
    }
}
