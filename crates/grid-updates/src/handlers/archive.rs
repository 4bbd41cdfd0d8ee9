use async_trait::async_trait;
use grid_core::{Error, ImageId, MediaApi, Result};
use serde_json::Value;
use std::sync::Arc;

use crate::registry::MutationHandler;
use crate::types::MutationAck;

/// Sets the archived flag; the value is a JSON boolean.
pub struct ArchiveHandler {
    api: Arc<dyn MediaApi>,
}

impl ArchiveHandler {
    /// Handler writing through `api`.
    #[must_use]
    pub fn new(api: Arc<dyn MediaApi>) -> Self {
        Self { api }
    }
}

fn archived_flag(value: &Value) -> Result<bool> {
    value
        .as_bool()
        .ok_or_else(|| Error::InvalidValue(format!("archive.set expects a boolean, got {value}")))
}

#[async_trait]
impl MutationHandler for ArchiveHandler {
    async fn mutate(&self, image_id: &ImageId, value: &Value) -> Result<MutationAck> {
        self.api.set_archived(image_id, archived_flag(value)?).await?;
        Ok(MutationAck::accepted())
    }

    async fn poll(&self, image_id: &ImageId, value: &Value, _ack: &MutationAck) -> Result<bool> {
        let expected = archived_flag(value)?;
        let image = self.api.fetch_image(image_id).await?;
        Ok(image.archived == expected)
    }
}
