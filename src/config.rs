//! Engine Configuration
//!
//! Settings the embedding service hands to the storage engine. Loading
//! and parsing the service's configuration file is the caller's job;
//! this module only defines the shape the engine consumes.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Default length of generated record identifiers
const DEFAULT_FOLDER_ID_LENGTH: usize = 6;

/// Default length of generated delete tokens
const DEFAULT_DELETE_TOKEN_LENGTH: usize = 8;

/// Default copy-buffer size for content streaming: 1 MB
const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Default TTL for cached metadata records
const DEFAULT_METADATA_CACHE_TTL_SECS: u64 = 60;

fn default_folder_id_length() -> usize {
    DEFAULT_FOLDER_ID_LENGTH
}

fn default_delete_token_length() -> usize {
    DEFAULT_DELETE_TOKEN_LENGTH
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_metadata_cache_ttl_secs() -> u64 {
    DEFAULT_METADATA_CACHE_TTL_SECS
}

/// Top-level storage engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    /// Length of generated record identifiers
    #[serde(default = "default_folder_id_length")]
    pub folder_id_length: usize,
    /// Length of generated delete tokens
    #[serde(default = "default_delete_token_length")]
    pub delete_token_length: usize,
    /// Copy-buffer size for content streaming, in bytes
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Retention stamping policy applied to new records
    #[serde(default)]
    pub retention: RetentionPolicy,
    /// TTL for the metadata cache, in seconds
    #[serde(default = "default_metadata_cache_ttl_secs")]
    pub metadata_cache_ttl_secs: u64,
    /// Which backend to run, and its settings
    pub backend: BackendConfig,
}

/// Retention policy stamped onto records at save time.
///
/// The engine records the horizon on each new record and can report
/// whether a record has passed it; the actual sweep is driven by an
/// external scheduler.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionPolicy {
    /// Whether new records get a deletion horizon at all
    #[serde(default)]
    pub enabled: bool,
    /// Seconds after creation at which a record expires
    #[serde(default)]
    pub after_seconds: u64,
    /// Whether the sweeper should destroy expired records outright
    /// instead of quarantining them
    #[serde(default)]
    pub permanently: bool,
}

/// Backend selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum BackendConfig {
    /// Store records on the local filesystem
    #[serde(rename_all = "camelCase")]
    Local {
        /// Directory all records live under
        root: PathBuf,
    },

    /// Store records in the remote drive, optionally through the
    /// write-through disk cache
    #[serde(rename_all = "camelCase")]
    Remote {
        /// Remote folder id all records live under
        root: String,
        /// Stage saves on local disk and upload in the background
        #[serde(default)]
        cache: bool,
        /// Staging directory for cached saves (required when `cache`)
        #[serde(default)]
        stage_root: Option<PathBuf>,
        /// OAuth credentials for the drive API
        credentials: RemoteCredentials,
    },
}

/// OAuth2 credentials for the remote drive API
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteCredentials {
    pub client_id: String,
    pub client_secret: String,
    /// Long-lived refresh token; access tokens are minted from it on demand
    pub refresh_token: String,
}

impl RetentionPolicy {
    /// Deletion horizon for a record created now, if the policy is active
    pub fn delete_after(&self) -> Option<u64> {
        if self.enabled {
            Some(self.after_seconds)
        } else {
            None
        }
    }
}
