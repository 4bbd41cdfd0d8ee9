//! Per-image reconciliation pipeline.

use futures::FutureExt as _;
use grid_core::{ImageId, ImageSource, PollingConfig};
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use crate::events::{UpdateChannel, UpdateEvent};
use crate::guard::Claim;
use crate::poller::{PollOutcome, poll_until_confirmed};
use crate::registry::MutationHandler;
use crate::store::{ImageCache, UpdateStore};
use crate::types::{BatchId, FailureReason, ItemState};

/// Shared collaborators every worker of a batch needs.
#[derive(Clone)]
pub(crate) struct WorkerContext {
    pub batch_id: BatchId,
    pub operation_type: Arc<str>,
    pub value: Arc<Value>,
    pub handler: Arc<dyn MutationHandler>,
    pub polling: PollingConfig,
    pub store: Arc<UpdateStore>,
    pub cache: Arc<dyn ImageCache>,
    pub source: Arc<dyn ImageSource>,
    pub events: Option<UpdateChannel>,
}

/// Issues the write for one image, polls until it is observable, and refreshes the cache.
///
/// Owns the image's claim. [`run`](Self::run) records the terminal state and
/// releases the claim as one step, so an observer of the terminal state can
/// immediately claim the same field again.
pub(crate) struct ReconciliationWorker {
    context: WorkerContext,
    image_id: ImageId,
    claim: Claim,
}

impl ReconciliationWorker {
    pub(crate) fn new(context: WorkerContext, claim: Claim) -> Self {
        Self {
            context,
            image_id: claim.image_id().clone(),
            claim,
        }
    }

    /// Drive the pipeline to a terminal state and return it.
    pub(crate) async fn run(self) -> ItemState {
        let terminal = match AssertUnwindSafe(self.reconcile()).catch_unwind().await {
            Ok(state) => state,
            Err(_) => {
                tracing::error!("Mutation handler panicked for {}", self.image_id);
                ItemState::failed(FailureReason::Mutate("handler panicked".to_owned()))
            }
        };

        let Self {
            context,
            image_id,
            claim,
        } = self;
        let applied = claim.release_after(|| {
            context
                .store
                .transition(&context.batch_id, &image_id, terminal.clone())
        });
        if applied {
            context.emit(&image_id, terminal.clone());
        }
        terminal
    }

    async fn reconcile(&self) -> ItemState {
        let context = &self.context;
        let image_id = &self.image_id;
        let value = context.value.as_ref();

        let ack = match context.handler.mutate(image_id, value).await {
            Ok(ack) => ack,
            Err(error) => {
                tracing::warn!("Write rejected for {image_id}: {error}");
                return ItemState::failed(FailureReason::Mutate(error.to_string()));
            }
        };

        self.record(ItemState::Polling);

        let handler = &context.handler;
        let ack = &ack;
        let outcome = poll_until_confirmed(&context.polling, move |_attempt| {
            handler.poll(image_id, value, ack)
        })
        .await;

        match outcome {
            PollOutcome::Confirmed { attempts } => {
                tracing::debug!("Confirmed {image_id} after {attempts} poll(s)");
                match context.source.fetch_image(image_id).await {
                    Ok(data) => context.cache.update(image_id, data),
                    Err(error) => tracing::warn!(
                        "Confirmed {image_id} but could not refresh it: {error}"
                    ),
                }
                ItemState::Confirmed
            }
            PollOutcome::Exhausted { attempts } => {
                tracing::warn!(
                    "Polling timed out for {image_id} after {attempts} attempts, \
                     but changes may still be processing"
                );
                ItemState::TimedOut
            }
        }
    }

    fn record(&self, state: ItemState) {
        let context = &self.context;
        if context
            .store
            .transition(&context.batch_id, &self.image_id, state.clone())
        {
            context.emit(&self.image_id, state);
        }
    }
}

impl WorkerContext {
    fn emit(&self, image_id: &ImageId, state: ItemState) {
        if let Some(events) = &self.events {
            events.send(UpdateEvent::ItemStateChanged {
                batch_id: self.batch_id,
                image_id: image_id.clone(),
                state,
            });
        }
    }
}
