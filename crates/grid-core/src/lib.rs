//! Core types and traits shared by the Grid update engine.
//!
//! This crate provides identifiers, the image model, error handling, the
//! media API abstraction, and configuration used across the workspace.

/// Configuration for polling, retention, and the media API.
pub mod config;
/// Error types and result definitions.
pub mod error;
/// String identifiers for images and leases.
pub mod ids;
/// Image representation returned by the media API.
pub mod image;
/// Trait definitions for reading and writing images.
pub mod traits;

pub use config::{MediaConfig, PollStrategy, PollingConfig, RetentionConfig, UpdatesConfig};
pub use error::{Error, Result};
pub use ids::{ImageId, LeaseId};
pub use image::{EDITABLE_METADATA_FIELDS, ImageData, ImageMetadata, Lease, LeaseAccess, NewLease};
pub use traits::{ImageSource, MediaApi};
