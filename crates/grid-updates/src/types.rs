use chrono::{DateTime, Utc};
use core::fmt;
use grid_core::ImageId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// Unique identifier for a batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BatchId(Uuid);

impl BatchId {
    /// Fresh random id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "batch_{}", self.0.simple())
    }
}

/// Why an item ended in [`ItemState::Failed`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message", rename_all = "camelCase")]
pub enum FailureReason {
    /// Another update for the same image and field was still in flight.
    Conflict,
    /// The backend rejected the write.
    Mutate(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Conflict => {
                formatter.write_str("Another update is already in progress for this field")
            }
            Self::Mutate(message) => formatter.write_str(message),
        }
    }
}

/// Per-image state within one batch.
///
/// Transitions only move forward: `Pending -> Polling -> terminal`, or
/// `Pending -> terminal`. Terminal states never change again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum ItemState {
    /// Dispatched, write not yet acknowledged.
    Pending,
    /// Write accepted, waiting for the read side to reflect it.
    Polling,
    /// The read side shows the new value.
    Confirmed,
    /// The write was rejected or never attempted.
    Failed {
        /// Why the item failed.
        reason: FailureReason,
    },
    /// The attempt budget ran out. The write may still land server-side.
    TimedOut,
}

impl ItemState {
    /// Shorthand for [`ItemState::Failed`].
    #[must_use]
    pub fn failed(reason: FailureReason) -> Self {
        Self::Failed { reason }
    }

    /// Confirmed, failed, or timed out.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Confirmed | Self::Failed { .. } | Self::TimedOut
        )
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Polling => 1,
            Self::Confirmed | Self::Failed { .. } | Self::TimedOut => 2,
        }
    }

    /// Whether moving from `self` to `next` respects forward-only ordering.
    #[must_use]
    pub fn can_transition_to(&self, next: &Self) -> bool {
        next.rank() > self.rank()
    }

    /// Message for callers to render, if the item did not confirm.
    #[must_use]
    pub fn error_message(&self) -> Option<String> {
        match self {
            Self::Failed { reason } => Some(reason.to_string()),
            Self::TimedOut => {
                Some("Still processing: the outcome of this update is unknown".to_owned())
            }
            Self::Pending | Self::Polling | Self::Confirmed => None,
        }
    }
}

/// What the backend said when it accepted a write.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MutationAck {
    /// Handler-specific detail, e.g. the id of a created resource.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<Value>,
}

impl MutationAck {
    /// Ack with no detail.
    #[must_use]
    pub fn accepted() -> Self {
        Self::default()
    }

    /// Ack carrying handler-specific detail.
    #[must_use]
    pub fn with_detail(detail: Value) -> Self {
        Self {
            detail: Some(detail),
        }
    }
}

/// Execution record for one mutation across its image set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Batch {
    /// Unique id of this batch.
    pub batch_id: BatchId,
    /// Registered operation this batch runs.
    pub operation_type: String,
    /// Field the operation writes, used for conflict scoping.
    pub field: Option<String>,
    /// Target images in request order.
    pub image_ids: Vec<ImageId>,
    /// Payload handed to the mutation.
    pub value: Value,
    /// When the batch was recorded.
    pub started_at: DateTime<Utc>,
    /// Set once every item is terminal.
    pub completed_at: Option<DateTime<Utc>>,
    /// Current state of each image.
    pub per_item: HashMap<ImageId, ItemState>,
}

impl Batch {
    /// Every item has reached a terminal state.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.per_item.values().all(ItemState::is_terminal)
    }

    /// Single pass over the per-item states.
    #[must_use]
    pub fn progress(&self) -> BatchProgress {
        let mut progress = BatchProgress {
            total: self.image_ids.len(),
            ..BatchProgress::default()
        };
        for state in self.per_item.values() {
            match state {
                ItemState::Pending | ItemState::Polling => progress.pending += 1,
                ItemState::Confirmed => progress.confirmed += 1,
                ItemState::Failed { .. } => progress.failed += 1,
                ItemState::TimedOut => {
                    progress.failed += 1;
                    progress.timed_out += 1;
                }
            }
        }
        progress
    }

    /// Images that confirmed, in batch order.
    #[must_use]
    pub fn confirmed_images(&self) -> Vec<ImageId> {
        self.image_ids
            .iter()
            .filter(|image_id| matches!(self.per_item.get(*image_id), Some(ItemState::Confirmed)))
            .cloned()
            .collect()
    }
}

/// Counts of items per state. `timed_out` is included in `failed`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchProgress {
    /// Images in the batch.
    pub total: usize,
    /// Items confirmed.
    pub confirmed: usize,
    /// Items failed, timeouts included.
    pub failed: usize,
    /// Items whose attempt budget ran out.
    pub timed_out: usize,
    /// Items not yet terminal.
    pub pending: usize,
}

impl BatchProgress {
    /// No item is still pending.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.pending == 0
    }
}
