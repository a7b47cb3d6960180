//! Remote Drive Backend
//!
//! Stores each record as a folder named after its id directly under the
//! configured drive root, holding the content file and its sidecar.
//! Soft deletes move both files into a `delete` folder under the root;
//! when the record folder held nothing else it is removed with them, as
//! the drive keeps no cheap way to reserve an empty folder name.

use async_trait::async_trait;
use std::collections::HashSet;
use std::io::Cursor;
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

use super::client::DriveClient;
use super::types::DriveFile;
use super::RemoteStore;
use crate::backend::{validate_id, validate_name, Backend, ByteSource, QUARANTINE_DIR};
use crate::config::{RetentionPolicy, StorageConfig};
use crate::error::{Result, StorageError};
use crate::ident;
use crate::meta::{MetadataRecord, METADATA_SUFFIX};

/// Drive-backed storage backend
pub struct RemoteBackend {
    client: DriveClient,
    /// Drive id of the root folder all records live under
    root: String,
    folder_id_length: usize,
    delete_token_length: usize,
    retention: RetentionPolicy,
}

impl RemoteBackend {
    pub fn new(client: DriveClient, root: String, config: &StorageConfig) -> Self {
        RemoteBackend {
            client,
            root,
            folder_id_length: config.folder_id_length,
            delete_token_length: config.delete_token_length,
            retention: config.retention.clone(),
        }
    }

    /// Resolve a record id to its drive folder, or NotFound
    async fn record_folder(&self, id: &str) -> Result<DriveFile> {
        self.client
            .find_folder(&self.root, id)
            .await?
            .ok_or(StorageError::NotFound)
    }

    /// Create the folder for a fresh id, re-checking that the id is
    /// still free first. The drive happily stores duplicate names, so
    /// the collision has to be caught here rather than by the create.
    async fn create_record_folder(&self, id: &str) -> Result<String> {
        if self.client.find_folder(&self.root, id).await?.is_some() {
            return Err(StorageError::Conflict(format!("id {} already taken", id)));
        }
        let folder = self.client.create_folder(&self.root, id).await?;
        Ok(folder.id)
    }

    /// Fetch and verify the sidecar for `(folder, name)`
    async fn read_sidecar(&self, folder_gid: &str, name: &str) -> Result<MetadataRecord> {
        let sidecar_name = format!("{}{}", name, METADATA_SUFFIX);
        let matches = self
            .client
            .list_children(folder_gid, Some(&sidecar_name), false)
            .await?;
        let sidecar = matches.first().ok_or(StorageError::NotFound)?;

        let bytes = self.client.download(&sidecar.id).await?;
        let record: MetadataRecord = serde_json::from_slice(&bytes)?;
        if record.name != name {
            return Err(StorageError::NotFound);
        }
        Ok(record)
    }

    /// Drive id of the quarantine folder, creating it on first use
    async fn ensure_quarantine(&self) -> Result<String> {
        if let Some(folder) = self.client.find_folder(&self.root, QUARANTINE_DIR).await? {
            return Ok(folder.id);
        }
        let folder = self.client.create_folder(&self.root, QUARANTINE_DIR).await?;
        Ok(folder.id)
    }

    /// Pick a quarantine filename no existing quarantined file uses
    async fn free_quarantine_name(&self, quarantine_gid: &str, name: &str) -> Result<String> {
        let taken: HashSet<String> = self
            .client
            .list_children(quarantine_gid, None, false)
            .await?
            .into_iter()
            .map(|f| f.name)
            .collect();
        Ok(loop {
            let candidate = ident::quarantine_name(name);
            if !taken.contains(&candidate) {
                break candidate;
            }
        })
    }
}

#[async_trait]
impl Backend for RemoteBackend {
    async fn id_exists(&self, id: &str) -> Result<bool> {
        validate_id(id)?;
        Ok(self.client.find_folder(&self.root, id).await?.is_some())
    }

    async fn save(
        &self,
        mut stream: ByteSource,
        declared_size: u64,
        filename: &str,
    ) -> Result<MetadataRecord> {
        validate_name(filename)?;

        let id = ident::allocate_id(self, self.folder_id_length).await?;
        let record = MetadataRecord::create(
            id,
            filename,
            declared_size,
            self.delete_token_length,
            &self.retention,
        );

        let mut content = Vec::new();
        stream.read_to_end(&mut content).await?;

        let folder_gid = self.create_record_folder(&record.id).await?;
        self.upload_record(&folder_gid, &record, content).await?;

        info!(id = %record.id, name = %record.name, size = record.size, "record saved to drive");
        Ok(record)
    }

    async fn load_metadata(&self, id: &str, name: &str) -> Result<MetadataRecord> {
        validate_id(id)?;
        validate_name(name)?;

        let folder = self.record_folder(id).await?;
        self.read_sidecar(&folder.id, name).await
    }

    async fn download(&self, id: &str, name: &str) -> Result<ByteSource> {
        validate_id(id)?;
        validate_name(name)?;

        let folder = self.record_folder(id).await?;
        let record = self.read_sidecar(&folder.id, name).await?;

        let matches = self
            .client
            .list_children(&folder.id, Some(&record.name), false)
            .await?;
        let content = matches.first().ok_or(StorageError::NotFound)?;
        let bytes = self.client.download(&content.id).await?;

        debug!(id = %id, name = %name, "serving content from drive");
        Ok(Box::new(Cursor::new(bytes)))
    }

    async fn remove(&self, id: &str, name: &str, token: Option<&str>, force: bool) -> Result<bool> {
        validate_id(id)?;
        validate_name(name)?;

        let folder = match self.client.find_folder(&self.root, id).await? {
            Some(folder) => folder,
            None => return Ok(false),
        };
        let children = self.client.list_children(&folder.id, None, false).await?;

        let sidecar_name = format!("{}{}", name, METADATA_SUFFIX);
        let sidecar = match children.iter().find(|f| f.name == sidecar_name) {
            Some(sidecar) => sidecar,
            None => return Ok(false),
        };

        let bytes = self.client.download(&sidecar.id).await?;
        let record: MetadataRecord = serde_json::from_slice(&bytes)?;
        if record.name != name {
            return Ok(false);
        }
        if !force && token != Some(record.delete.as_str()) {
            debug!(id = %id, "delete token mismatch");
            return Ok(false);
        }

        let content = match children.iter().find(|f| f.name == name) {
            Some(content) => content,
            None => return Ok(false),
        };

        let quarantine_gid = self.ensure_quarantine().await?;
        let quarantined_name = self.free_quarantine_name(&quarantine_gid, name).await?;

        self.client
            .rename_move(&content.id, &quarantined_name, &quarantine_gid, &folder.id)
            .await?;
        self.client
            .rename_move(
                &sidecar.id,
                &format!("{}{}", quarantined_name, METADATA_SUFFIX),
                &quarantine_gid,
                &folder.id,
            )
            .await?;

        // The folder held only this record's pair, so nothing is left
        // worth keeping
        if children.len() == 2 {
            self.client.delete(&folder.id).await?;
        }

        info!(id = %id, name = %name, quarantined = %quarantined_name, "record quarantined on drive");
        Ok(true)
    }

    async fn remove_permanent(&self, id: &str, name: &str) -> Result<bool> {
        validate_id(id)?;
        validate_name(name)?;

        let folder = match self.client.find_folder(&self.root, id).await? {
            Some(folder) => folder,
            None => return Ok(false),
        };
        let children = self.client.list_children(&folder.id, None, false).await?;

        let sidecar_name = format!("{}{}", name, METADATA_SUFFIX);
        let sidecar = match children.iter().find(|f| f.name == sidecar_name) {
            Some(sidecar) => sidecar,
            None => return Ok(false),
        };
        let bytes = self.client.download(&sidecar.id).await?;
        let record: MetadataRecord = serde_json::from_slice(&bytes)?;
        if record.name != name {
            return Ok(false);
        }

        if children.len() == 2 {
            // Folder delete takes its children with it
            self.client.delete(&folder.id).await?;
        } else {
            if let Some(content) = children.iter().find(|f| f.name == name) {
                self.client.delete(&content.id).await?;
            }
            self.client.delete(&sidecar.id).await?;
        }

        info!(id = %id, name = %name, "record permanently removed from drive");
        Ok(true)
    }

    async fn list_ids(&self) -> Result<Vec<String>> {
        let folders = self.client.list_children(&self.root, None, true).await?;
        Ok(folders
            .into_iter()
            .map(|f| f.name)
            .filter(|name| name != QUARANTINE_DIR)
            .collect())
    }
}

#[async_trait]
impl RemoteStore for RemoteBackend {
    async fn find_folder(&self, id: &str) -> Result<Option<String>> {
        Ok(self
            .client
            .find_folder(&self.root, id)
            .await?
            .map(|folder| folder.id))
    }

    async fn create_folder(&self, id: &str) -> Result<String> {
        let folder = self.client.create_folder(&self.root, id).await?;
        Ok(folder.id)
    }

    async fn upload_record(
        &self,
        folder_gid: &str,
        record: &MetadataRecord,
        content: Vec<u8>,
    ) -> Result<()> {
        self.client
            .upload(folder_gid, &record.name, &record.mime_type, content)
            .await?;
        let sidecar = serde_json::to_vec(record)?;
        self.client
            .upload(
                folder_gid,
                &record.sidecar_name(),
                "application/json",
                sidecar,
            )
            .await?;
        Ok(())
    }
}
