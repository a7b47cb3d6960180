//! Local Filesystem Backend
//!
//! Records live under `<root>/<id>/` as a content file plus a
//! `.metadata` sidecar. The sidecar is written last, so a folder with a
//! sidecar always describes complete content. Soft deletes move both
//! files into `<root>/delete/`; the emptied id folder stays behind so
//! the identifier is never handed out again.
//!
//! The same type also serves as the staging area of the write-through
//! cache, which is what the path resolvers and the recovery scan exist
//! for.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::backend::{validate_id, validate_name, Backend, ByteSource, QUARANTINE_DIR};
use crate::config::{RetentionPolicy, StorageConfig};
use crate::error::{Result, StorageError};
use crate::ident;
use crate::meta::{MetadataRecord, METADATA_SUFFIX};

use async_trait::async_trait;

/// Filesystem-rooted storage backend
pub struct LocalBackend {
    /// Directory all record folders live under
    root: PathBuf,
    folder_id_length: usize,
    delete_token_length: usize,
    chunk_size: usize,
    retention: RetentionPolicy,
}

/// Map an I/O error on a record path to the engine's NotFound
fn io_to_storage(err: std::io::Error) -> StorageError {
    if err.kind() == ErrorKind::NotFound {
        StorageError::NotFound
    } else {
        StorageError::Io(err)
    }
}

impl LocalBackend {
    /// Open a backend rooted at `root`, creating the directory if needed
    pub async fn open(root: PathBuf, config: &StorageConfig) -> Result<Self> {
        fs::create_dir_all(&root).await?;
        info!(root = %root.display(), "local backend ready");
        Ok(LocalBackend {
            root,
            folder_id_length: config.folder_id_length,
            delete_token_length: config.delete_token_length,
            chunk_size: config.chunk_size,
            retention: config.retention.clone(),
        })
    }

    fn record_dir(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    fn quarantine_dir(&self) -> PathBuf {
        self.root.join(QUARANTINE_DIR)
    }

    /// Path of the record's content file, if it exists
    pub async fn resolve_content_path(&self, id: &str, name: &str) -> Result<Option<PathBuf>> {
        resolve_file(self.record_dir(id).join(name)).await
    }

    /// Path of the record's metadata sidecar, if it exists
    pub async fn resolve_metadata_path(&self, id: &str, name: &str) -> Result<Option<PathBuf>> {
        resolve_file(self.record_dir(id).join(format!("{}{}", name, METADATA_SUFFIX))).await
    }

    /// Write a fully-formed record under its pre-allocated id.
    ///
    /// Creates the id folder exclusively (a taken id is a conflict, never
    /// an overwrite), streams the content in chunks, then writes the
    /// sidecar last so a visible sidecar always means complete content.
    pub async fn write_record(&self, record: &MetadataRecord, mut stream: ByteSource) -> Result<()> {
        let dir = self.record_dir(&record.id);
        match fs::create_dir(&dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(StorageError::Conflict(format!(
                    "id {} already taken",
                    record.id
                )));
            }
            Err(e) => return Err(e.into()),
        }

        let content_path = dir.join(&record.name);
        let mut file = fs::File::create(&content_path).await?;
        let mut buf = vec![0u8; self.chunk_size.max(1)];
        let mut written: u64 = 0;
        loop {
            let n = stream.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            file.write_all(&buf[..n]).await?;
            written += n as u64;
        }
        file.flush().await?;
        drop(file);

        self.write_sidecar(&dir, record).await?;
        debug!(id = %record.id, name = %record.name, bytes = written, "record written");
        Ok(())
    }

    /// Serialize the sidecar through a temp file and rename it into
    /// place, so a crash never leaves a half-written sidecar that the
    /// recovery scan would trust
    async fn write_sidecar(&self, dir: &Path, record: &MetadataRecord) -> Result<()> {
        let final_path = dir.join(record.sidecar_name());
        let tmp_path = dir.join(format!("{}.tmp", record.sidecar_name()));
        let bytes = serde_json::to_vec(record)?;
        fs::write(&tmp_path, &bytes).await?;
        fs::rename(&tmp_path, &final_path).await?;
        Ok(())
    }

    /// Move a record's files into quarantine under a collision-avoided
    /// name and leave the emptied id folder behind
    async fn quarantine(&self, record: &MetadataRecord) -> Result<()> {
        let quarantine = self.quarantine_dir();
        fs::create_dir_all(&quarantine).await?;

        let dir = self.record_dir(&record.id);
        let quarantined_name = loop {
            let candidate = ident::quarantine_name(&record.name);
            match fs::metadata(quarantine.join(&candidate)).await {
                Err(e) if e.kind() == ErrorKind::NotFound => break candidate,
                Ok(_) => continue,
                Err(e) => return Err(e.into()),
            }
        };

        fs::rename(dir.join(&record.name), quarantine.join(&quarantined_name))
            .await
            .map_err(io_to_storage)?;
        fs::rename(
            dir.join(record.sidecar_name()),
            quarantine.join(format!("{}{}", quarantined_name, METADATA_SUFFIX)),
        )
        .await
        .map_err(io_to_storage)?;

        info!(id = %record.id, name = %record.name, quarantined = %quarantined_name, "record quarantined");
        Ok(())
    }

    /// Re-scan the root after a restart, in the staging role.
    ///
    /// Returns the records whose folders hold a parseable sidecar and
    /// the matching content file; anything else under the root (partial
    /// writes, stray temp files, emptied folders) is unreachable garbage
    /// and is deleted.
    pub async fn recover_staged(&self) -> Result<Vec<MetadataRecord>> {
        let mut recovered = Vec::new();
        let mut repaired = 0usize;

        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            let dir_name = entry.file_name().to_string_lossy().to_string();
            if !file_type.is_dir() || dir_name == QUARANTINE_DIR {
                continue;
            }

            match self.read_staged_record(&entry.path()).await? {
                Some(record) if record.id == dir_name => recovered.push(record),
                Some(record) => {
                    warn!(
                        dir = %dir_name,
                        sidecar_id = %record.id,
                        "sidecar does not match its folder, repairing"
                    );
                    fs::remove_dir_all(entry.path()).await?;
                    repaired += 1;
                }
                None => {
                    warn!(dir = %dir_name, "unusable staged folder, repairing");
                    fs::remove_dir_all(entry.path()).await?;
                    repaired += 1;
                }
            }
        }

        if !recovered.is_empty() || repaired > 0 {
            info!(
                recovered = recovered.len(),
                repaired, "staging recovery scan complete"
            );
        }
        Ok(recovered)
    }

    /// Parse the record a staged folder holds, if it holds a usable one
    async fn read_staged_record(&self, dir: &Path) -> Result<Option<MetadataRecord>> {
        let mut entries = fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name().to_string_lossy().to_string();
            if !file_name.ends_with(METADATA_SUFFIX) {
                continue;
            }
            let bytes = match fs::read(entry.path()).await {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            let record: MetadataRecord = match serde_json::from_slice(&bytes) {
                Ok(record) => record,
                Err(_) => continue,
            };
            match fs::metadata(dir.join(&record.name)).await {
                Ok(m) if m.is_file() => return Ok(Some(record)),
                _ => continue,
            }
        }
        Ok(None)
    }
}

/// Probe a path, answering `Some` only for an existing regular file
async fn resolve_file(path: PathBuf) -> Result<Option<PathBuf>> {
    match fs::metadata(&path).await {
        Ok(m) if m.is_file() => Ok(Some(path)),
        Ok(_) => Ok(None),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl Backend for LocalBackend {
    async fn id_exists(&self, id: &str) -> Result<bool> {
        validate_id(id)?;
        match fs::metadata(self.record_dir(id)).await {
            Ok(_) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn save(
        &self,
        stream: ByteSource,
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
        self.write_record(&record, stream).await?;
        info!(id = %record.id, name = %record.name, size = record.size, "record saved");
        Ok(record)
    }

    async fn load_metadata(&self, id: &str, name: &str) -> Result<MetadataRecord> {
        validate_id(id)?;
        validate_name(name)?;

        let sidecar = self
            .record_dir(id)
            .join(format!("{}{}", name, METADATA_SUFFIX));
        let bytes = fs::read(&sidecar).await.map_err(io_to_storage)?;
        let record: MetadataRecord = serde_json::from_slice(&bytes)?;
        if record.name != name {
            return Err(StorageError::NotFound);
        }
        Ok(record)
    }

    async fn download(&self, id: &str, name: &str) -> Result<ByteSource> {
        let record = self.load_metadata(id, name).await?;
        let path = self.record_dir(id).join(&record.name);
        let file = fs::File::open(&path).await.map_err(io_to_storage)?;
        debug!(id = %id, name = %name, "serving content from disk");
        Ok(Box::new(file))
    }

    async fn remove(&self, id: &str, name: &str, token: Option<&str>, force: bool) -> Result<bool> {
        let record = match self.load_metadata(id, name).await {
            Ok(record) => record,
            Err(StorageError::NotFound) => return Ok(false),
            Err(e) => return Err(e),
        };
        if !force && token != Some(record.delete.as_str()) {
            debug!(id = %id, "delete token mismatch");
            return Ok(false);
        }
        self.quarantine(&record).await?;
        Ok(true)
    }

    async fn remove_permanent(&self, id: &str, name: &str) -> Result<bool> {
        let record = match self.load_metadata(id, name).await {
            Ok(record) => record,
            Err(StorageError::NotFound) => return Ok(false),
            Err(e) => return Err(e),
        };
        let dir = self.record_dir(&record.id);
        fs::remove_dir_all(&dir).await.map_err(io_to_storage)?;
        info!(id = %id, name = %name, "record permanently removed");
        Ok(true)
    }

    async fn list_ids(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let dir_name = entry.file_name().to_string_lossy().to_string();
            if dir_name == QUARANTINE_DIR {
                continue;
            }
            // An emptied folder is soft-delete residue, not a record
            let mut contents = fs::read_dir(entry.path()).await?;
            if contents.next_entry().await?.is_some() {
                ids.push(dir_name);
            }
        }
        Ok(ids)
    }
}
