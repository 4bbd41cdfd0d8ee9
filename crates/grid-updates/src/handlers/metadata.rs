use async_trait::async_trait;
use grid_core::{Error, ImageId, MediaApi, Result};
use serde_json::Value;
use std::sync::Arc;

use crate::registry::MutationHandler;
use crate::types::MutationAck;

/// Writes one string metadata field and waits for it to read back.
pub struct MetadataFieldHandler {
    api: Arc<dyn MediaApi>,
    field: &'static str,
}

impl MetadataFieldHandler {
    /// Handler for metadata `field`, writing through `api`.
    #[must_use]
    pub fn new(api: Arc<dyn MediaApi>, field: &'static str) -> Self {
        Self { api, field }
    }

    fn expected(&self, value: &Value) -> Result<String> {
        value.as_str().map(str::to_owned).ok_or_else(|| {
            Error::InvalidValue(format!("metadata.{} expects a string, got {value}", self.field))
        })
    }
}

#[async_trait]
impl MutationHandler for MetadataFieldHandler {
    async fn mutate(&self, image_id: &ImageId, value: &Value) -> Result<MutationAck> {
        let expected = self.expected(value)?;
        self.api
            .put_metadata_field(image_id, self.field, &expected)
            .await?;
        Ok(MutationAck::accepted())
    }

    async fn poll(&self, image_id: &ImageId, value: &Value, _ack: &MutationAck) -> Result<bool> {
        let expected = self.expected(value)?;
        let image = self.api.fetch_image(image_id).await?;
        Ok(image.metadata.field(self.field) == Some(expected.as_str()))
    }
}
