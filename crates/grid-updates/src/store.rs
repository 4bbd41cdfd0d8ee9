//! Shared update state: the batch records and the canonical image cache.

use chrono::Utc;
use grid_core::{ImageData, ImageId, RetentionConfig};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::Notify;
use tokio::sync::futures::Notified;

use crate::types::{Batch, BatchId, BatchProgress, ItemState};

/// Latest server-confirmed representation per image.
///
/// Written by the engine only after a change has been confirmed.
pub trait ImageCache: Send + Sync {
    /// Replace the cached representation of an image.
    fn update(&self, image_id: &ImageId, data: ImageData);
}

/// [`ImageCache`] kept in process memory.
#[derive(Debug, Default)]
pub struct InMemoryImageCache {
    images: RwLock<HashMap<ImageId, ImageData>>,
}

impl InMemoryImageCache {
    /// Empty cache.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Seed or overwrite an entry, e.g. from a search result.
    pub fn insert(&self, data: ImageData) {
        let mut images = self.images.write().unwrap_or_else(PoisonError::into_inner);
        images.insert(data.id.clone(), data);
    }

    /// Cached copy of an image.
    pub fn get(&self, image_id: &ImageId) -> Option<ImageData> {
        let images = self.images.read().unwrap_or_else(PoisonError::into_inner);
        images.get(image_id).cloned()
    }

    /// Number of cached images.
    pub fn len(&self) -> usize {
        self.images.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// No images cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ImageCache for InMemoryImageCache {
    fn update(&self, image_id: &ImageId, data: ImageData) {
        let mut images = self.images.write().unwrap_or_else(PoisonError::into_inner);
        images.insert(image_id.clone(), data);
    }
}

/// Batch records in start order.
#[derive(Debug, Default)]
pub(crate) struct BatchTable {
    batches: HashMap<BatchId, Batch>,
    order: VecDeque<BatchId>,
}

impl BatchTable {
    pub(crate) fn get(&self, batch_id: &BatchId) -> Option<&Batch> {
        self.batches.get(batch_id)
    }

    /// Batches from oldest to newest.
    pub(crate) fn iter(&self) -> impl DoubleEndedIterator<Item = &Batch> {
        self.order.iter().filter_map(|batch_id| self.batches.get(batch_id))
    }

    pub(crate) fn latest(&self) -> Option<BatchId> {
        self.order.back().copied()
    }

    /// Evict the oldest settled batches until at most `keep` settled ones remain.
    fn evict_settled(&mut self, keep: usize) -> Vec<BatchId> {
        let settled = self.iter().filter(|batch| batch.is_settled()).count();
        let mut excess = settled.saturating_sub(keep);
        let mut evicted = Vec::new();
        if excess == 0 {
            return evicted;
        }

        let batches = &self.batches;
        self.order.retain(|batch_id| {
            if excess > 0 && batches.get(batch_id).is_some_and(Batch::is_settled) {
                excess -= 1;
                evicted.push(*batch_id);
                false
            } else {
                true
            }
        });
        for batch_id in &evicted {
            self.batches.remove(batch_id);
        }
        evicted
    }
}

/// Shared batch state, mutated by the coordinator and workers and read by selectors.
#[derive(Debug)]
pub struct UpdateStore {
    table: RwLock<BatchTable>,
    changed: Notify,
    retention: RetentionConfig,
}

impl UpdateStore {
    /// Empty store with the given retention.
    #[must_use]
    pub fn new(retention: RetentionConfig) -> Arc<Self> {
        Arc::new(Self {
            table: RwLock::new(BatchTable::default()),
            changed: Notify::new(),
            retention,
        })
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, BatchTable> {
        self.table.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BatchTable> {
        self.table.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a new batch, then apply the retention policy to settled batches.
    pub(crate) fn insert(&self, mut batch: Batch) {
        if batch.is_settled() {
            batch.completed_at = Some(Utc::now());
        }
        let evicted = {
            let mut table = self.write();
            table.order.push_back(batch.batch_id);
            table.batches.insert(batch.batch_id, batch);
            table.evict_settled(self.retention.max_settled_batches)
        };
        for batch_id in evicted {
            tracing::debug!("Evicted settled batch {batch_id}");
        }
        self.changed.notify_waiters();
    }

    /// Record a state transition for one item.
    ///
    /// Returns `false` and leaves the record untouched when the transition would
    /// move backwards or the batch/item is unknown.
    pub(crate) fn transition(&self, batch_id: &BatchId, image_id: &ImageId, next: ItemState) -> bool {
        let applied = {
            let mut table = self.write();
            let Some(batch) = table.batches.get_mut(batch_id) else {
                return false;
            };
            match batch.per_item.get_mut(image_id) {
                Some(current) if current.can_transition_to(&next) => {
                    *current = next;
                    if batch.completed_at.is_none() && batch.is_settled() {
                        batch.completed_at = Some(Utc::now());
                    }
                    true
                }
                Some(current) => {
                    tracing::warn!(
                        "Ignored transition {current:?} -> {next:?} for {image_id} in {batch_id}"
                    );
                    false
                }
                None => false,
            }
        };
        if applied {
            self.changed.notify_waiters();
        }
        applied
    }

    /// Snapshot of a batch record.
    pub fn batch(&self, batch_id: &BatchId) -> Option<Batch> {
        self.read().get(batch_id).cloned()
    }

    /// Number of retained batches.
    pub fn len(&self) -> usize {
        self.read().batches.len()
    }

    /// No batches retained.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn progress(&self, batch_id: &BatchId) -> Option<BatchProgress> {
        self.read().get(batch_id).map(Batch::progress)
    }

    /// Future that resolves on the next change to any batch.
    pub(crate) fn changed(&self) -> Notified<'_> {
        self.changed.notified()
    }
}
