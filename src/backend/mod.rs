//! Storage Backends
//!
//! The engine's operation surface and the shared rules every backend
//! obeys: identifier/name shape validation, the reserved quarantine
//! directory, and the factory that builds a backend from configuration.

mod local;

pub use local::LocalBackend;

use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::AsyncRead;

use crate::cache::CachedBackend;
use crate::config::{BackendConfig, StorageConfig};
use crate::error::{Result, StorageError};
use crate::meta::{MetadataRecord, METADATA_SUFFIX};
use crate::remote::{DriveClient, RemoteBackend};

/// Directory name records are moved into on soft delete. Reserved: the
/// identifier allocator never hands it out.
pub const QUARANTINE_DIR: &str = "delete";

/// Streaming content handle used for uploads and downloads
pub type ByteSource = Box<dyn AsyncRead + Unpin + Send>;

/// The storage engine's operation surface.
///
/// A record is addressed by its `(id, name)` pair. Lookups for a missing
/// folder, a missing sidecar, or a mismatched name all answer the same
/// `NotFound`; callers learn nothing about which part was absent.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Whether an identifier is already taken (live record or reserved
    /// residue of a soft-deleted one)
    async fn id_exists(&self, id: &str) -> Result<bool>;

    /// Store a new record from a content stream.
    ///
    /// Allocates a fresh identifier, writes the content in fixed-size
    /// chunks, then writes the metadata sidecar last, and returns the
    /// complete record. `declared_size` is recorded as supplied, not
    /// verified against the stream.
    async fn save(
        &self,
        stream: ByteSource,
        declared_size: u64,
        filename: &str,
    ) -> Result<MetadataRecord>;

    /// Load the metadata record addressed by `(id, name)`
    async fn load_metadata(&self, id: &str, name: &str) -> Result<MetadataRecord>;

    /// Open the content of the record addressed by `(id, name)`
    async fn download(&self, id: &str, name: &str) -> Result<ByteSource>;

    /// Soft-delete a record: move its files into the quarantine
    /// directory under collision-avoided names.
    ///
    /// Requires the record's delete token unless `force` is set.
    /// Returns `false` without touching anything when the record does
    /// not exist or the token is wrong and `force` is not set.
    async fn remove(&self, id: &str, name: &str, token: Option<&str>, force: bool) -> Result<bool>;

    /// Destroy a record outright, bypassing quarantine. Answers `false`
    /// for a record that does not exist.
    async fn remove_permanent(&self, id: &str, name: &str) -> Result<bool>;

    /// Identifiers of all current records, quarantine excluded
    async fn list_ids(&self) -> Result<Vec<String>>;
}

/// Validate an externally-supplied record identifier.
///
/// Generated ids are alphanumeric; anything else in an id position is a
/// malformed request, rejected before any storage access.
pub fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(StorageError::InvalidRequest("empty id".to_string()));
    }
    if !id.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(StorageError::InvalidRequest(format!(
            "malformed id: {:?}",
            id
        )));
    }
    Ok(())
}

/// Validate an externally-supplied record name.
///
/// Names become filenames inside the record folder, so path separators,
/// NUL, leading dots, and the sidecar suffix are all rejected.
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(StorageError::InvalidRequest("empty name".to_string()));
    }
    if name.contains('/') || name.contains('\\') || name.contains('\0') {
        return Err(StorageError::InvalidRequest(format!(
            "malformed name: {:?}",
            name
        )));
    }
    if name.starts_with('.') {
        return Err(StorageError::InvalidRequest(format!(
            "hidden name not allowed: {:?}",
            name
        )));
    }
    if name.ends_with(METADATA_SUFFIX) {
        return Err(StorageError::InvalidRequest(format!(
            "name collides with sidecar naming: {:?}",
            name
        )));
    }
    Ok(())
}

/// Build the backend selected by the configuration.
///
/// Runs any startup work the variant needs (staging recovery for the
/// cached remote) before returning.
pub async fn from_config(config: &StorageConfig) -> Result<Arc<dyn Backend>> {
    match &config.backend {
        BackendConfig::Local { root } => {
            let backend = LocalBackend::open(root.clone(), config).await?;
            Ok(Arc::new(backend))
        }
        BackendConfig::Remote {
            root,
            cache,
            stage_root,
            credentials,
        } => {
            let client = DriveClient::new(credentials.clone())?;
            let remote = RemoteBackend::new(client, root.clone(), config);
            if !*cache {
                return Ok(Arc::new(remote));
            }
            let stage_root = stage_root.clone().ok_or_else(|| {
                StorageError::InvalidRequest(
                    "cache enabled but no stage_root configured".to_string(),
                )
            })?;
            let cached = CachedBackend::start(stage_root, Arc::new(remote), config).await?;
            Ok(Arc::new(cached))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_id_accepts_generated_shapes() {
        for id in ["aB3kZ9", "000000", "zzzzzz", "A1", "delete"] {
            assert!(validate_id(id).is_ok(), "id {:?} should pass", id);
        }
    }

    #[test]
    fn test_validate_id_rejects_malformed() {
        for id in ["", "ab/cd", "../etc", "a b", "id\0", "naïve"] {
            let err = validate_id(id).unwrap_err();
            assert!(
                matches!(err, StorageError::InvalidRequest(_)),
                "id {:?} should be rejected",
                id
            );
        }
    }

    #[test]
    fn test_validate_name_accepts_ordinary_files() {
        for name in ["photo.png", "report v2.pdf", "архив.zip", "a", "x.tar.gz"] {
            assert!(validate_name(name).is_ok(), "name {:?} should pass", name);
        }
    }

    #[test]
    fn test_validate_name_rejects_path_tricks() {
        for name in [
            "",
            "a/b.txt",
            "..\\up.txt",
            "nul\0byte",
            ".hidden",
            "..",
            "photo.png.metadata",
        ] {
            let err = validate_name(name).unwrap_err();
            assert!(
                matches!(err, StorageError::InvalidRequest(_)),
                "name {:?} should be rejected",
                name
            );
        }
    }
}
