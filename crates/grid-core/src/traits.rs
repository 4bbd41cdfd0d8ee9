use async_trait::async_trait;

use crate::{ImageData, ImageId, LeaseId, NewLease, Result};

/// Read access to the canonical representation of an image.
#[async_trait]
pub trait ImageSource: Send + Sync {
    /// Fetches the full current representation of an image.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the image does not exist.
    async fn fetch_image(&self, image_id: &ImageId) -> Result<ImageData>;
}

/// Write operations offered by the media and leases APIs.
///
/// Every write resolves once the backend has accepted it. The change becomes
/// observable through [`ImageSource::fetch_image`] some time later.
#[async_trait]
pub trait MediaApi: ImageSource {
    /// Replaces a single descriptive metadata field.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejects the write.
    async fn put_metadata_field(&self, image_id: &ImageId, field: &str, value: &str) -> Result<()>;

    /// Sets or clears the archived flag.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejects the write.
    async fn set_archived(&self, image_id: &ImageId, archived: bool) -> Result<()>;

    /// Attaches a lease and returns the id the leases API assigned to it.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejects the write.
    async fn create_lease(&self, image_id: &ImageId, lease: &NewLease) -> Result<LeaseId>;

    /// Removes a lease.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejects the write.
    async fn delete_lease(&self, lease_id: &LeaseId) -> Result<()>;
}
