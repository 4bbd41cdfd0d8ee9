use grid_core::ImageId;
use tokio::sync::mpsc;

use crate::types::{BatchId, BatchProgress, ItemState};

/// Notifications emitted while batches run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateEvent {
    /// A batch was recorded and its items dispatched.
    BatchStarted {
        /// Batch that started.
        batch_id: BatchId,
        /// Operation the batch runs.
        operation_type: String,
        /// Field the operation writes, if any.
        field: Option<String>,
        /// Number of images in the batch.
        total: usize,
    },
    /// One item moved to a new state.
    ItemStateChanged {
        /// Batch the item belongs to.
        batch_id: BatchId,
        /// Image whose state changed.
        image_id: ImageId,
        /// The new state.
        state: ItemState,
    },
    /// Every item in the batch is terminal.
    BatchSettled {
        /// Batch that settled.
        batch_id: BatchId,
        /// Final counts.
        progress: BatchProgress,
    },
}

/// Channel for update events
#[derive(Clone, Debug)]
pub struct UpdateChannel {
    sender: mpsc::UnboundedSender<UpdateEvent>,
}

impl UpdateChannel {
    /// Creates a sender handle and its receiver.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<UpdateEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// Send an event; a closed receiver is ignored.
    pub fn send(&self, event: UpdateEvent) {
        drop(self.sender.send(event));
    }
}

impl Default for UpdateChannel {
    fn default() -> Self {
        Self::new().0
    }
}
