use async_trait::async_trait;
use grid_core::{Error, ImageId, LeaseId, MediaApi, NewLease, Result};
use serde::Deserialize;
use serde_json::{Value, from_value, json};
use std::sync::Arc;

use crate::registry::MutationHandler;
use crate::types::MutationAck;

/// Payload shared by `lease.delete` values and `lease.create` acknowledgements.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LeaseRef {
    lease_id: LeaseId,
}

fn lease_ref(value: &Value) -> Result<LeaseId> {
    LeaseRef::deserialize(value)
        .map(|reference| reference.lease_id)
        .map_err(|error| Error::InvalidValue(format!("expected {{\"leaseId\": ...}}: {error}")))
}

/// Attaches a lease; confirmed once the image lists the lease id the API returned.
pub struct CreateLeaseHandler {
    api: Arc<dyn MediaApi>,
}

impl CreateLeaseHandler {
    /// Handler writing through `api`.
    #[must_use]
    pub fn new(api: Arc<dyn MediaApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl MutationHandler for CreateLeaseHandler {
    async fn mutate(&self, image_id: &ImageId, value: &Value) -> Result<MutationAck> {
        let lease: NewLease = from_value(value.clone())
            .map_err(|error| Error::InvalidValue(format!("invalid lease: {error}")))?;
        let lease_id = self.api.create_lease(image_id, &lease).await?;
        Ok(MutationAck::with_detail(json!({ "leaseId": lease_id })))
    }

    async fn poll(&self, image_id: &ImageId, _value: &Value, ack: &MutationAck) -> Result<bool> {
        let detail = ack
            .detail
            .as_ref()
            .ok_or_else(|| Error::InvalidValue("lease.create acknowledged without an id".to_owned()))?;
        let lease_id = lease_ref(detail)?;
        let image = self.api.fetch_image(image_id).await?;
        Ok(image.has_lease(&lease_id))
    }
}

/// Removes a lease; the value is `{ "leaseId": ... }`.
pub struct DeleteLeaseHandler {
    api: Arc<dyn MediaApi>,
}

impl DeleteLeaseHandler {
    /// Handler writing through `api`.
    #[must_use]
    pub fn new(api: Arc<dyn MediaApi>) -> Self {
        Self { api }
    }
}

#[async_trait]
impl MutationHandler for DeleteLeaseHandler {
    async fn mutate(&self, _image_id: &ImageId, value: &Value) -> Result<MutationAck> {
        self.api.delete_lease(&lease_ref(value)?).await?;
        Ok(MutationAck::accepted())
    }

    async fn poll(&self, image_id: &ImageId, value: &Value, _ack: &MutationAck) -> Result<bool> {
        let lease_id = lease_ref(value)?;
        let image = self.api.fetch_image(image_id).await?;
        Ok(!image.has_lease(&lease_id))
    }
}
