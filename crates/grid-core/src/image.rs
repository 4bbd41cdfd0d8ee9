use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ImageId, LeaseId};

/// Metadata fields that can be edited through `metadata.<field>` operations.
pub const EDITABLE_METADATA_FIELDS: [&str; 6] = [
    "title",
    "description",
    "credit",
    "byline",
    "copyright",
    "specialInstructions",
];

/// Server-confirmed representation of an image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageData {
    /// Media API id.
    pub id: ImageId,
    /// Descriptive metadata.
    #[serde(default)]
    pub metadata: ImageMetadata,
    /// Leases attached to the image.
    #[serde(default)]
    pub leases: Vec<Lease>,
    /// Whether the image is archived.
    #[serde(default)]
    pub archived: bool,
}

impl ImageData {
    /// Image with empty metadata, no leases, not archived.
    #[must_use]
    pub fn new(id: ImageId) -> Self {
        Self {
            id,
            metadata: ImageMetadata::default(),
            leases: Vec::new(),
            archived: false,
        }
    }

    /// Whether a lease with the given id is attached.
    #[must_use]
    pub fn has_lease(&self, lease_id: &LeaseId) -> bool {
        self.leases
            .iter()
            .any(|lease| lease.id.as_ref() == Some(lease_id))
    }
}

/// Editable descriptive metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageMetadata {
    /// Headline title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Caption text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Credit line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credit: Option<String>,
    /// Photographer or creator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub byline: Option<String>,
    /// Copyright notice.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copyright: Option<String>,
    /// Free-text usage instructions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub special_instructions: Option<String>,
}

impl ImageMetadata {
    /// Look up a field by its wire name (e.g. `specialInstructions`).
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&str> {
        let value = match name {
            "title" => &self.title,
            "description" => &self.description,
            "credit" => &self.credit,
            "byline" => &self.byline,
            "copyright" => &self.copyright,
            "specialInstructions" => &self.special_instructions,
            _ => return None,
        };
        value.as_deref()
    }

    /// Set a field by its wire name. Returns `false` for unknown fields.
    pub fn set_field(&mut self, name: &str, value: String) -> bool {
        let slot = match name {
            "title" => &mut self.title,
            "description" => &mut self.description,
            "credit" => &mut self.credit,
            "byline" => &mut self.byline,
            "copyright" => &mut self.copyright,
            "specialInstructions" => &mut self.special_instructions,
            _ => return false,
        };
        *slot = Some(value);
        true
    }
}

/// Usage restriction attached to an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LeaseAccess {
    /// Use is permitted.
    AllowUse,
    /// Use is forbidden.
    DenyUse,
    /// Syndication is permitted.
    AllowSyndication,
    /// Syndication is forbidden.
    DenySyndication,
}

/// A lease as stored by the leases API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lease {
    /// Assigned by the leases API on creation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<LeaseId>,
    /// Image the lease applies to.
    pub media_id: ImageId,
    /// Restriction kind.
    pub access: LeaseAccess,
    /// Start of the lease window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime<Utc>>,
    /// End of the lease window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
    /// Free-text notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    /// User who created the lease.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leased_by: Option<String>,
    /// Creation time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// Parameters for attaching a new lease; the image is supplied separately.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewLease {
    /// Restriction kind.
    pub access: LeaseAccess,
    /// Start of the lease window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<DateTime<Utc>>,
    /// End of the lease window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<DateTime<Utc>>,
    /// Free-text notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl NewLease {
    /// Build the full lease record sent to the leases API.
    #[must_use]
    pub fn for_image(&self, image_id: &ImageId, created_at: DateTime<Utc>) -> Lease {
        Lease {
            id: None,
            media_id: image_id.clone(),
            access: self.access,
            start_date: self.start_date,
            end_date: self.end_date,
            notes: self.notes.clone(),
            leased_by: None,
            created_at: Some(created_at),
        }
    }
}
