//! Remote Drive Storage
//!
//! The durable store behind the engine when it runs in remote mode:
//! a drive-style object API where each record occupies one folder under
//! a configured root.

mod backend;
mod client;
mod types;

pub use backend::RemoteBackend;
pub use client::{DriveClient, FOLDER_MIME};
pub use types::{DriveFile, FileListResponse, TokenResponse};

use async_trait::async_trait;

use crate::backend::Backend;
use crate::error::Result;
use crate::meta::MetadataRecord;

/// The remote surface the write-through cache flushes into.
///
/// Everything a remote already answers as a [`Backend`] stays available
/// for read fall-through; the extra operations are what the upload
/// worker needs to land a staged record folder-first.
#[async_trait]
pub trait RemoteStore: Backend {
    /// Drive id of the folder holding a record id, if one exists
    async fn find_folder(&self, id: &str) -> Result<Option<String>>;

    /// Create the folder for a record id, returning its drive id
    async fn create_folder(&self, id: &str) -> Result<String>;

    /// Upload a staged record into its folder: content first, then the
    /// metadata sidecar
    async fn upload_record(
        &self,
        folder_gid: &str,
        record: &MetadataRecord,
        content: Vec<u8>,
    ) -> Result<()>;
}
