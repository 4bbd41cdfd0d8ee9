//! Read-only views over the batch store.
//!
//! Field-scoped selectors look at every retained batch whose field matches.
//! None of these functions mutate anything.

use grid_core::ImageId;
use std::collections::BTreeMap;

use crate::store::UpdateStore;
use crate::types::{Batch, BatchId, BatchProgress, FailureReason, ItemState};

/// Counts per state for one batch, or `None` if the batch is unknown.
pub fn select_batch_progress(store: &UpdateStore, batch_id: &BatchId) -> Option<BatchProgress> {
    store.read().get(batch_id).map(Batch::progress)
}

/// Failure reason for the first of `image_ids` whose latest update on `field` failed.
///
/// Only the most recent batch touching an image on that field counts, so a
/// failure is no longer reported once a newer update for it has started.
pub fn select_field_error(
    store: &UpdateStore,
    image_ids: &[ImageId],
    field: Option<&str>,
) -> Option<FailureReason> {
    let table = store.read();
    image_ids.iter().find_map(|image_id| {
        let latest = table
            .iter()
            .rev()
            .filter(|batch| batch.field.as_deref() == field)
            .find_map(|batch| batch.per_item.get(image_id));
        match latest {
            Some(ItemState::Failed { reason }) => Some(reason.clone()),
            _ => None,
        }
    })
}

/// Whether any of `image_ids` has a non-terminal update on `field`.
pub fn select_is_field_updating_for_any(
    store: &UpdateStore,
    image_ids: &[ImageId],
    field: Option<&str>,
) -> bool {
    let table = store.read();
    table
        .iter()
        .filter(|batch| batch.field.as_deref() == field)
        .any(|batch| {
            image_ids.iter().any(|image_id| {
                batch
                    .per_item
                    .get(image_id)
                    .is_some_and(|state| !state.is_terminal())
            })
        })
}

/// Human-readable message per image that failed or timed out in a batch.
///
/// Empty when the batch is unknown or nothing went wrong.
pub fn select_batch_errors(store: &UpdateStore, batch_id: &BatchId) -> BTreeMap<ImageId, String> {
    let table = store.read();
    let Some(batch) = table.get(batch_id) else {
        return BTreeMap::new();
    };
    batch
        .per_item
        .iter()
        .filter_map(|(image_id, state)| {
            state
                .error_message()
                .map(|message| (image_id.clone(), message))
        })
        .collect()
}

/// Most recently started batch that is still retained.
pub fn select_latest_batch(store: &UpdateStore) -> Option<BatchId> {
    store.read().latest()
}
