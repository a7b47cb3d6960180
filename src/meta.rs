//! Metadata Records
//!
//! The sidecar record stored next to every content file. The serialized
//! form is the on-disk and on-remote format, so field names here are
//! part of the storage format and must stay stable.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::RetentionPolicy;
use crate::ident;

/// Suffix appended to a record's name to form its sidecar filename
pub const METADATA_SUFFIX: &str = ".metadata";

/// A stored record's metadata sidecar.
///
/// One record owns exactly one content file and one sidecar; the sidecar
/// is the sole source of truth about the record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataRecord {
    /// Identifier of the folder holding this record
    pub id: String,
    /// Original filename supplied at upload
    pub name: String,
    /// Mime type inferred from the filename at save time
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    /// Size in bytes as declared by the uploader
    pub size: u64,
    /// Secret token authorizing deletion of this record
    pub delete: String,
    /// Whether the record is excluded from public listings
    #[serde(default)]
    pub hidden: bool,
    /// Creation time, seconds since the unix epoch
    #[serde(default)]
    pub created_at: u64,
    /// Seconds after creation at which the record expires, if a
    /// retention policy was active at save time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_after: Option<u64>,
}

/// Caller-facing projection of a record. Never includes the delete token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublicMetadata {
    pub id: String,
    pub name: String,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    pub size: u64,
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub created_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_after: Option<u64>,
}

impl MetadataRecord {
    /// Build the record for a new upload, with a freshly drawn delete
    /// token and the retention horizon currently in force.
    ///
    /// # Arguments
    /// * `id` - pre-allocated record identifier
    /// * `name` - original filename
    /// * `size` - size in bytes as declared by the uploader
    pub fn create(
        id: String,
        name: &str,
        size: u64,
        token_length: usize,
        retention: &RetentionPolicy,
    ) -> Self {
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        MetadataRecord {
            id,
            name: name.to_string(),
            mime_type: guess_mime(name),
            size,
            delete: ident::random_alphanumeric(token_length),
            hidden: false,
            created_at,
            delete_after: retention.delete_after(),
        }
    }

    /// Filename of this record's sidecar
    pub fn sidecar_name(&self) -> String {
        format!("{}{}", self.name, METADATA_SUFFIX)
    }

    /// Projection safe to hand to untrusted callers
    pub fn public(&self) -> PublicMetadata {
        PublicMetadata {
            id: self.id.clone(),
            name: self.name.clone(),
            mime_type: self.mime_type.clone(),
            size: self.size,
            hidden: self.hidden,
            created_at: self.created_at,
            delete_after: self.delete_after,
        }
    }

    /// Whether the record's stamped retention horizon has elapsed.
    /// Records without a horizon never expire.
    pub fn is_expired(&self, now_secs: u64) -> bool {
        match self.delete_after {
            Some(after) => now_secs >= self.created_at.saturating_add(after),
            None => false,
        }
    }
}

/// Infer a mime type from a filename, defaulting to octet-stream
pub fn guess_mime(name: &str) -> String {
    mime_guess::from_path(name)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}
