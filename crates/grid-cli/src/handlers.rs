use anyhow::{Result, bail};
use grid_core::{ImageId, ImageSource, MediaApi, NewLease, UpdatesConfig};
use grid_media::MediaApiClient;
use grid_updates::handlers::{
    ARCHIVE_SET, LEASE_CREATE, LEASE_DELETE, lease_delete_field, metadata_operation,
};
use grid_updates::{
    BatchCoordinator, BatchId, InMemoryImageCache, ItemState, MutationRegistry, UpdateChannel,
    UpdateEvent, register_builtin_handlers, select_batch_errors,
};
use serde_json::{Value, json};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;

/// One update request as the engine sees it.
#[derive(Debug, PartialEq)]
pub struct UpdateRequest {
    pub operation_type: String,
    pub field: Option<String>,
    pub value: Value,
}

impl UpdateRequest {
    pub fn set_field(field: &str, value: String) -> Self {
        Self {
            operation_type: metadata_operation(field),
            field: Some(field.to_owned()),
            value: Value::String(value),
        }
    }

    pub fn archive(archived: bool) -> Self {
        Self {
            operation_type: ARCHIVE_SET.to_owned(),
            field: None,
            value: Value::Bool(archived),
        }
    }

    /// # Errors
    /// Returns an error if the lease cannot be serialized.
    pub fn create_lease(lease: &NewLease) -> Result<Self> {
        Ok(Self {
            operation_type: LEASE_CREATE.to_owned(),
            field: Some("leases".to_owned()),
            value: serde_json::to_value(lease)?,
        })
    }

    pub fn delete_lease(lease_id: &str) -> Self {
        Self {
            operation_type: LEASE_DELETE.to_owned(),
            field: Some(lease_delete_field(lease_id)),
            value: json!({ "leaseId": lease_id }),
        }
    }
}

/// Load the config from an explicit path or from `~/.grid/config.toml`.
///
/// # Errors
/// Returns an error if the file cannot be read, parsed or created.
pub fn load_config(path: Option<&Path>) -> Result<UpdatesConfig> {
    let config = match path {
        Some(path) => UpdatesConfig::load_from_file(path)?,
        None => UpdatesConfig::load_or_create()?,
    };
    Ok(config)
}

/// Run one batch against the media API and report per-image results.
///
/// # Errors
/// Returns an error if the batch cannot start or any image did not confirm.
pub async fn handle_update(
    config: &UpdatesConfig,
    request: UpdateRequest,
    images: Vec<String>,
) -> Result<()> {
    let client = Arc::new(MediaApiClient::new(&config.media)?);
    let mut registry = MutationRegistry::new();
    register_builtin_handlers(&mut registry, &(Arc::clone(&client) as Arc<dyn MediaApi>))?;

    let (channel, events) = UpdateChannel::new();
    let coordinator = BatchCoordinator::new(
        Arc::new(registry),
        client as Arc<dyn ImageSource>,
        InMemoryImageCache::new(),
        config,
    )
    .with_events(channel);

    let image_ids: Vec<ImageId> = images.into_iter().map(ImageId::new).collect();
    let batch_id = coordinator.start(
        &request.operation_type,
        request.field.as_deref(),
        &image_ids,
        request.value,
    )?;

    report_progress(batch_id, events).await;

    let progress = coordinator.wait_for_settled(batch_id).await?;
    for (image_id, message) in select_batch_errors(coordinator.store(), &batch_id) {
        tracing::warn!("{image_id}: {message}");
    }
    tracing::info!(
        "{confirmed}/{total} confirmed, {failed} failed ({timed_out} still processing)",
        confirmed = progress.confirmed,
        total = progress.total,
        failed = progress.failed - progress.timed_out,
        timed_out = progress.timed_out
    );

    if progress.confirmed < progress.total {
        bail!(
            "{} of {} image(s) did not confirm",
            progress.total - progress.confirmed,
            progress.total
        );
    }
    Ok(())
}

/// Log events for one batch until it settles.
async fn report_progress(batch_id: BatchId, mut events: UnboundedReceiver<UpdateEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            UpdateEvent::BatchStarted {
                batch_id: started,
                operation_type,
                total,
                ..
            } if started == batch_id => {
                tracing::info!("Started {operation_type} on {total} image(s)");
            }
            UpdateEvent::ItemStateChanged {
                batch_id: changed,
                image_id,
                state,
            } if changed == batch_id => match state {
                ItemState::Polling => tracing::info!("{image_id}: written, waiting for it to land"),
                ItemState::Confirmed => tracing::info!("{image_id}: confirmed"),
                ItemState::Pending | ItemState::Failed { .. } | ItemState::TimedOut => {}
            },
            UpdateEvent::BatchSettled {
                batch_id: settled, ..
            } if settled == batch_id => return,
            UpdateEvent::BatchStarted { .. }
            | UpdateEvent::ItemStateChanged { .. }
            | UpdateEvent::BatchSettled { .. } => {}
        }
    }
}

/// Output current configuration. If `full` is true, prints full TOML.
///
/// # Errors
/// Returns an error if the configuration cannot be serialized.
pub fn handle_config(config: &UpdatesConfig, full: bool) -> Result<()> {
    if full {
        let toml = toml::to_string_pretty(config)?;
        tracing::info!("{toml}");
    } else {
        tracing::info!("Configuration:");
        tracing::info!("  Media API: {url}", url = config.media.api_base_url);
        tracing::info!("  Leases API: {url}", url = config.media.leases_url());
        tracing::info!(
            "  API Key: {status}",
            status = if config.media.api_key().is_some() { "Set" } else { "Not set" }
        );
        tracing::info!(
            "  Polling: {strategy:?} every {interval}ms, {attempts} attempts",
            strategy = config.polling.strategy,
            interval = config.polling.interval_ms,
            attempts = config.polling.max_attempts
        );
        tracing::info!(
            "  Retained settled batches: {max}",
            max = config.retention.max_settled_batches
        );
    }

    Ok(())
}
