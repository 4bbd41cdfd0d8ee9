//! Optimistic batch update engine for Grid images.
//!
//! A caller starts a batch for one operation type over a set of images. Each
//! image gets a worker that issues the write, polls until the change is
//! observable, refreshes the image cache and releases its conflict claim.
//! Batch state lives in an [`UpdateStore`] and is read through the selector
//! functions.

/// Batch coordination and worker supervision.
pub mod coordinator;
/// Error types and result definitions.
pub mod error;
/// Progress events for observers.
pub mod events;
/// Per-image, per-field in-flight claims.
pub mod guard;
/// Built-in handlers for the media API.
pub mod handlers;
mod poller;
/// Operation type to handler lookup.
pub mod registry;
/// Read-only queries over the batch store.
pub mod selectors;
/// Batch records and the image cache seam.
pub mod store;
/// Batch, item state and progress types.
pub mod types;
mod worker;

pub use coordinator::BatchCoordinator;
pub use error::{Result, UpdateError};
pub use events::{UpdateChannel, UpdateEvent};
pub use guard::{Claim, ConflictGuard};
pub use handlers::register_builtin_handlers;
pub use registry::{Cascade, MutationHandler, MutationRegistry};
pub use selectors::{
    select_batch_errors, select_batch_progress, select_field_error,
    select_is_field_updating_for_any, select_latest_batch,
};
pub use store::{ImageCache, InMemoryImageCache, UpdateStore};
pub use types::{Batch, BatchId, BatchProgress, FailureReason, ItemState, MutationAck};
