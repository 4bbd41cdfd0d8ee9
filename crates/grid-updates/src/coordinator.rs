//! Turns one update intent into a batch record plus one worker per image.

use chrono::Utc;
use grid_core::{ImageId, ImageSource, PollingConfig, UpdatesConfig};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::task::JoinSet;
use tracing::Instrument as _;

use crate::events::{UpdateChannel, UpdateEvent};
use crate::guard::ConflictGuard;
use crate::registry::{MutationHandler, MutationRegistry};
use crate::store::{ImageCache, UpdateStore};
use crate::types::{Batch, BatchId, BatchProgress, FailureReason, ItemState};
use crate::worker::{ReconciliationWorker, WorkerContext};
use crate::{Result, UpdateError};

/// Starts batches and supervises their workers.
#[derive(Clone)]
pub struct BatchCoordinator {
    registry: Arc<MutationRegistry>,
    guard: Arc<ConflictGuard>,
    store: Arc<UpdateStore>,
    cache: Arc<dyn ImageCache>,
    source: Arc<dyn ImageSource>,
    polling: PollingConfig,
    events: Option<UpdateChannel>,
}

impl BatchCoordinator {
    /// Creates a coordinator with its own conflict guard and batch store.
    pub fn new(
        registry: Arc<MutationRegistry>,
        source: Arc<dyn ImageSource>,
        cache: Arc<dyn ImageCache>,
        config: &UpdatesConfig,
    ) -> Self {
        Self {
            registry,
            guard: ConflictGuard::new(),
            store: UpdateStore::new(config.retention.clone()),
            cache,
            source,
            polling: config.polling.clone(),
            events: None,
        }
    }

    /// Forward update events to a channel.
    #[must_use]
    pub fn with_events(mut self, events: UpdateChannel) -> Self {
        self.events = Some(events);
        self
    }

    /// Batch store shared with workers and selectors.
    pub fn store(&self) -> &Arc<UpdateStore> {
        &self.store
    }

    /// Conflict guard holding in-flight claims.
    pub fn guard(&self) -> &Arc<ConflictGuard> {
        &self.guard
    }

    /// Start a batch and return its id without waiting for any image.
    ///
    /// Images whose `(image, field)` pair already has an update in flight are
    /// recorded as `Failed { Conflict }` and get no worker. Duplicate ids are
    /// collapsed, keeping the first occurrence.
    ///
    /// # Errors
    /// Returns an error if `image_ids` is empty, the operation type is not
    /// registered, its polling configuration is invalid, or no tokio runtime
    /// is available. No batch is created then.
    pub fn start(
        &self,
        operation_type: &str,
        field: Option<&str>,
        image_ids: &[ImageId],
        value: Value,
    ) -> Result<BatchId> {
        if image_ids.is_empty() {
            return Err(UpdateError::EmptyBatch);
        }
        let handler = self.registry.lookup(operation_type)?;
        let polling = handler.polling().unwrap_or_else(|| self.polling.clone());
        polling.validate()?;
        let runtime = Handle::try_current().map_err(|_| UpdateError::NoRuntime)?;

        let batch_id = BatchId::new();
        let mut seen = HashSet::new();
        let image_ids: Vec<ImageId> = image_ids
            .iter()
            .filter(|image_id| seen.insert(*image_id))
            .cloned()
            .collect();

        let mut per_item = HashMap::with_capacity(image_ids.len());
        let mut claims = Vec::with_capacity(image_ids.len());
        let mut conflicts = Vec::new();
        for image_id in &image_ids {
            if let Some(claim) = self.guard.try_claim(image_id, field) {
                per_item.insert(image_id.clone(), ItemState::Pending);
                claims.push(claim);
            } else {
                tracing::warn!(
                    "Update {operation_type} on {image_id} conflicts with one in flight"
                );
                per_item.insert(image_id.clone(), ItemState::failed(FailureReason::Conflict));
                conflicts.push(image_id.clone());
            }
        }

        tracing::info!(
            "Starting {batch_id}: {operation_type} field={} on {} image(s), {} conflict(s)",
            field.unwrap_or("-"),
            image_ids.len(),
            conflicts.len()
        );

        let total = image_ids.len();
        let value = Arc::new(value);
        self.store.insert(Batch {
            batch_id,
            operation_type: operation_type.to_owned(),
            field: field.map(str::to_owned),
            image_ids,
            value: Value::clone(&value),
            started_at: Utc::now(),
            completed_at: None,
            per_item,
        });
        self.emit_started(batch_id, operation_type, field, total, conflicts);

        let context = WorkerContext {
            batch_id,
            operation_type: Arc::from(operation_type),
            value,
            polling,
            handler: Arc::clone(&handler),
            store: Arc::clone(&self.store),
            cache: Arc::clone(&self.cache),
            source: Arc::clone(&self.source),
            events: self.events.clone(),
        };

        let mut workers = JoinSet::new();
        for claim in claims {
            let span = tracing::info_span!(
                "update_item",
                batch = %batch_id,
                image = %claim.image_id(),
                operation = %context.operation_type
            );
            let worker = ReconciliationWorker::new(context.clone(), claim);
            workers.spawn_on(worker.run().instrument(span), &runtime);
        }

        let supervisor = self.clone();
        runtime.spawn(async move {
            supervisor.supervise(batch_id, handler, context.value, workers).await;
        });

        Ok(batch_id)
    }

    /// Fire-and-forget [`start`](Self::start). The batch id is discoverable
    /// afterwards through [`select_latest_batch`](crate::select_latest_batch).
    pub fn execute(
        &self,
        operation_type: &str,
        field: Option<&str>,
        image_ids: &[ImageId],
        value: Value,
    ) {
        if let Err(error) = self.start(operation_type, field, image_ids, value) {
            tracing::error!("Update {operation_type} rejected: {error}");
        }
    }

    /// Wait until every image of a batch is terminal and return the final counts.
    ///
    /// # Errors
    /// Returns an error if the batch is unknown (never started, or already evicted).
    pub async fn wait_for_settled(&self, batch_id: BatchId) -> Result<BatchProgress> {
        loop {
            let changed = self.store.changed();
            tokio::pin!(changed);
            changed.as_mut().enable();

            match self.store.progress(&batch_id) {
                None => return Err(UpdateError::UnknownBatch(batch_id)),
                Some(progress) if progress.is_settled() => return Ok(progress),
                Some(_) => changed.await,
            }
        }
    }

    fn emit_started(
        &self,
        batch_id: BatchId,
        operation_type: &str,
        field: Option<&str>,
        total: usize,
        conflicts: Vec<ImageId>,
    ) {
        let Some(events) = &self.events else {
            return;
        };
        events.send(UpdateEvent::BatchStarted {
            batch_id,
            operation_type: operation_type.to_owned(),
            field: field.map(str::to_owned),
            total,
        });
        for image_id in conflicts {
            events.send(UpdateEvent::ItemStateChanged {
                batch_id,
                image_id,
                state: ItemState::failed(FailureReason::Conflict),
            });
        }
    }

    /// Join every worker of a batch, then report and run cascades.
    async fn supervise(
        &self,
        batch_id: BatchId,
        handler: Arc<dyn MutationHandler>,
        value: Arc<Value>,
        mut workers: JoinSet<ItemState>,
    ) {
        while let Some(joined) = workers.join_next().await {
            if let Err(error) = joined {
                tracing::error!("Worker for {batch_id} did not finish: {error}");
            }
        }

        let Some(batch) = self.store.batch(&batch_id) else {
            return;
        };
        let progress = batch.progress();
        tracing::info!(
            "Settled {batch_id}: {} confirmed, {} failed ({} timed out) of {}",
            progress.confirmed,
            progress.failed,
            progress.timed_out,
            progress.total
        );
        if let Some(events) = &self.events {
            events.send(UpdateEvent::BatchSettled { batch_id, progress });
        }

        let confirmed = batch.confirmed_images();
        if confirmed.is_empty() {
            return;
        }
        for cascade in handler.cascades() {
            tracing::info!(
                "Cascading {} from {batch_id} to {} image(s)",
                cascade.operation_type,
                confirmed.len()
            );
            if let Err(error) = self.start(
                &cascade.operation_type,
                cascade.field.as_deref(),
                &confirmed,
                cascade.resolve(&value),
            ) {
                tracing::error!("Cascade {} from {batch_id} rejected: {error}", cascade.operation_type);
            }
        }
    }
}
