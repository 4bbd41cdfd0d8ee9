//! Built-in handlers for the media API operations.

/// `archive.set`
pub mod archive;
/// `lease.create` and `lease.delete`
pub mod lease;
/// `metadata.<field>`
pub mod metadata;

use grid_core::{EDITABLE_METADATA_FIELDS, MediaApi};
use std::sync::Arc;

use crate::{MutationRegistry, Result};

pub use archive::ArchiveHandler;
pub use lease::{CreateLeaseHandler, DeleteLeaseHandler};
pub use metadata::MetadataFieldHandler;

/// Operation type for [`ArchiveHandler`].
pub const ARCHIVE_SET: &str = "archive.set";
/// Operation type for [`CreateLeaseHandler`].
pub const LEASE_CREATE: &str = "lease.create";
/// Operation type for [`DeleteLeaseHandler`].
pub const LEASE_DELETE: &str = "lease.delete";

/// Operation type for editing a metadata field, e.g. `metadata.title`.
#[must_use]
pub fn metadata_operation(field: &str) -> String {
    format!("metadata.{field}")
}

/// Field key used for conflict tracking when deleting a specific lease.
#[must_use]
pub fn lease_delete_field(lease_id: &str) -> String {
    format!("{LEASE_DELETE}.{lease_id}")
}

/// Register every built-in operation against one media API.
///
/// # Errors
/// Returns an error if any of the operation types is already registered.
pub fn register_builtin_handlers(
    registry: &mut MutationRegistry,
    api: &Arc<dyn MediaApi>,
) -> Result<()> {
    for field in EDITABLE_METADATA_FIELDS {
        registry.register(
            metadata_operation(field),
            Arc::new(MetadataFieldHandler::new(Arc::clone(api), field)),
        )?;
    }
    registry.register(LEASE_CREATE, Arc::new(CreateLeaseHandler::new(Arc::clone(api))))?;
    registry.register(LEASE_DELETE, Arc::new(DeleteLeaseHandler::new(Arc::clone(api))))?;
    registry.register(ARCHIVE_SET, Arc::new(ArchiveHandler::new(Arc::clone(api))))?;
    Ok(())
}
