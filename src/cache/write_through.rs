//! Write-Through Disk Cache
//!
//! Decorates a remote store with a local staging area. Saves commit to
//! the stage synchronously and return; a background worker uploads each
//! staged record to the remote in arrival order and then clears the
//! staged copy, so exactly one representation is authoritative at any
//! point. Reads route by the pending set: a record still waiting is
//! served from the stage, everything else from the remote.
//!
//! On startup the staging root is re-scanned: complete staged records
//! are re-queued for upload, wreckage from interrupted saves is
//! deleted.

use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedSender};
use tracing::{debug, info, warn};

use super::worker::{FolderPlan, PendingSet, UploadJob, UploadWorker};
use crate::backend::{validate_id, validate_name, Backend, ByteSource, LocalBackend};
use crate::config::{RetentionPolicy, StorageConfig};
use crate::error::{Result, StorageError};
use crate::ident;
use crate::meta::MetadataRecord;
use crate::remote::RemoteStore;

/// Remote backend decorated with the write-through staging cache
pub struct CachedBackend<R: RemoteStore> {
    stage: Arc<LocalBackend>,
    remote: Arc<R>,
    pending: Arc<PendingSet>,
    queue: UnboundedSender<UploadJob>,
    folder_id_length: usize,
    delete_token_length: usize,
    retention: RetentionPolicy,
}

impl<R: RemoteStore + 'static> CachedBackend<R> {
    /// Open the staging area, recover whatever a previous run left in
    /// it, and start the upload worker.
    pub async fn start(stage_root: PathBuf, remote: Arc<R>, config: &StorageConfig) -> Result<Self> {
        let stage = Arc::new(LocalBackend::open(stage_root, config).await?);
        let pending = Arc::new(PendingSet::new());
        let (queue, rx) = unbounded_channel();

        // Re-queue survivors before the worker starts and before any
        // new save can enqueue, so recovered records flush first.
        let staged = stage.recover_staged().await?;
        for record in staged {
            let plan = match remote.find_folder(&record.id).await {
                Ok(Some(gid)) => FolderPlan::Existing(gid),
                Ok(None) => FolderPlan::Create,
                Err(e) => {
                    // Startup must not depend on the remote being up;
                    // the worker re-resolves when it gets there.
                    warn!(id = %record.id, error = %e, "remote unreachable during recovery, deferring folder lookup");
                    FolderPlan::Create
                }
            };
            info!(id = %record.id, name = %record.name, "re-queueing staged record");
            pending.insert(&record.id);
            let _ = queue.send(UploadJob { record, plan });
        }

        // The worker task holds the receiving end; it drains the queue
        // and exits once this backend (the sender) is dropped.
        let _ = UploadWorker::new(stage.clone(), remote.clone(), pending.clone()).spawn(rx);

        Ok(CachedBackend {
            stage,
            remote,
            pending,
            queue,
            folder_id_length: config.folder_id_length,
            delete_token_length: config.delete_token_length,
            retention: config.retention.clone(),
        })
    }

    /// Whether a record's authoritative copy is still in the stage
    pub fn is_pending(&self, id: &str) -> bool {
        self.pending.contains(id)
    }

    /// Number of records not yet flushed to the remote
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

#[async_trait]
impl<R: RemoteStore + 'static> Backend for CachedBackend<R> {
    async fn id_exists(&self, id: &str) -> Result<bool> {
        validate_id(id)?;
        if self.pending.contains(id) {
            return Ok(true);
        }
        if self.stage.id_exists(id).await? {
            return Ok(true);
        }
        match self.remote.id_exists(id).await {
            Ok(exists) => Ok(exists),
            Err(e) if e.is_retryable() => {
                // Saves must keep working while the remote is down; the
                // id space is wide enough that skipping the remote
                // probe is an acceptable collision risk.
                warn!(id = id, error = %e, "remote unreachable for id probe, answering from stage");
                Ok(false)
            }
            Err(e) => Err(e),
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

        self.stage.write_record(&record, stream).await?;
        self.pending.insert(&record.id);

        let job = UploadJob {
            record: record.clone(),
            plan: FolderPlan::Create,
        };
        if self.queue.send(job).is_err() {
            // Worker gone; the staged copy stays on disk for the next
            // startup's recovery scan, but this save cannot promise an
            // eventual upload.
            self.pending.remove(&record.id);
            return Err(StorageError::Unavailable {
                status: None,
                message: "upload queue closed".to_string(),
            });
        }

        info!(id = %record.id, name = %record.name, size = record.size, "record staged for upload");
        Ok(record)
    }

    async fn load_metadata(&self, id: &str, name: &str) -> Result<MetadataRecord> {
        if self.pending.contains(id) {
            match self.stage.load_metadata(id, name).await {
                Ok(record) => return Ok(record),
                // Flushed between the pending check and the read; the
                // remote copy is complete by the time the stage empties
                Err(StorageError::NotFound) => {
                    debug!(id = id, "pending record already flushed, falling through")
                }
                Err(e) => return Err(e),
            }
        }
        self.remote.load_metadata(id, name).await
    }

    async fn download(&self, id: &str, name: &str) -> Result<ByteSource> {
        if self.pending.contains(id) {
            match self.stage.download(id, name).await {
                Ok(stream) => return Ok(stream),
                Err(StorageError::NotFound) => {
                    debug!(id = id, "pending record already flushed, falling through")
                }
                Err(e) => return Err(e),
            }
        }
        self.remote.download(id, name).await
    }

    async fn remove(&self, id: &str, name: &str, token: Option<&str>, force: bool) -> Result<bool> {
        if self.pending.contains(id) {
            match self.stage.load_metadata(id, name).await {
                Ok(_) => return self.stage.remove(id, name, token, force).await,
                Err(StorageError::NotFound) => {
                    debug!(id = id, "pending record already flushed, falling through")
                }
                Err(e) => return Err(e),
            }
        }
        self.remote.remove(id, name, token, force).await
    }

    async fn remove_permanent(&self, id: &str, name: &str) -> Result<bool> {
        if self.pending.contains(id) {
            match self.stage.load_metadata(id, name).await {
                Ok(_) => return self.stage.remove_permanent(id, name).await,
                Err(StorageError::NotFound) => {
                    debug!(id = id, "pending record already flushed, falling through")
                }
                Err(e) => return Err(e),
            }
        }
        self.remote.remove_permanent(id, name).await
    }

    async fn list_ids(&self) -> Result<Vec<String>> {
        let mut ids = self.remote.list_ids().await?;
        for id in self.pending.snapshot() {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::QUARANTINE_DIR;
    use crate::config::{BackendConfig, RemoteCredentials};
    use std::collections::HashMap;
    use std::io::Cursor;
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    /// In-memory stand-in for the drive, with switchable failure modes
    #[derive(Default)]
    struct InMemoryRemote {
        /// record id → remote folder gid
        folders: Mutex<HashMap<String, String>>,
        /// record id → stored record and content
        files: Mutex<HashMap<String, (MetadataRecord, Vec<u8>)>>,
        /// record ids in completed-upload order
        upload_log: Mutex<Vec<String>>,
        created_folders: AtomicU64,
        next_gid: AtomicU64,
        /// Fail every call
        fail_all: AtomicBool,
        /// Fail only the flush-side calls, keep reads working
        fail_uploads: AtomicBool,
        /// Park uploads mid-flight until released
        hold_uploads: AtomicBool,
        /// Uploads that have entered `upload_record`
        uploads_started: AtomicU64,
    }

    impl InMemoryRemote {
        fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        fn set_fail_all(&self, fail: bool) {
            self.fail_all.store(fail, Ordering::SeqCst);
        }

        fn set_fail_uploads(&self, fail: bool) {
            self.fail_uploads.store(fail, Ordering::SeqCst);
        }

        fn set_hold_uploads(&self, hold: bool) {
            self.hold_uploads.store(hold, Ordering::SeqCst);
        }

        fn check(&self) -> Result<()> {
            if self.fail_all.load(Ordering::SeqCst) {
                return Err(StorageError::Unavailable {
                    status: None,
                    message: "remote offline".to_string(),
                });
            }
            Ok(())
        }

        fn check_upload(&self) -> Result<()> {
            self.check()?;
            if self.fail_uploads.load(Ordering::SeqCst) {
                return Err(StorageError::Unavailable {
                    status: Some(503),
                    message: "uploads rejected".to_string(),
                });
            }
            Ok(())
        }

        fn uploads(&self) -> Vec<String> {
            self.upload_log.lock().unwrap().clone()
        }

        fn stored_record(&self, id: &str) -> Option<MetadataRecord> {
            self.files.lock().unwrap().get(id).map(|(r, _)| r.clone())
        }
    }

    #[async_trait]
    impl Backend for InMemoryRemote {
        async fn id_exists(&self, id: &str) -> Result<bool> {
            self.check()?;
            Ok(self.folders.lock().unwrap().contains_key(id))
        }

        async fn save(&self, _: ByteSource, _: u64, _: &str) -> Result<MetadataRecord> {
            unimplemented!("the cache never saves through the remote directly")
        }

        async fn load_metadata(&self, id: &str, name: &str) -> Result<MetadataRecord> {
            self.check()?;
            match self.files.lock().unwrap().get(id) {
                Some((record, _)) if record.name == name => Ok(record.clone()),
                _ => Err(StorageError::NotFound),
            }
        }

        async fn download(&self, id: &str, name: &str) -> Result<ByteSource> {
            self.check()?;
            match self.files.lock().unwrap().get(id) {
                Some((record, content)) if record.name == name => {
                    Ok(Box::new(Cursor::new(content.clone())))
                }
                _ => Err(StorageError::NotFound),
            }
        }

        async fn remove(
            &self,
            id: &str,
            name: &str,
            token: Option<&str>,
            force: bool,
        ) -> Result<bool> {
            self.check()?;
            let mut files = self.files.lock().unwrap();
            let record = match files.get(id) {
                Some((record, _)) if record.name == name => record.clone(),
                _ => return Ok(false),
            };
            if !force && token != Some(record.delete.as_str()) {
                return Ok(false);
            }
            files.remove(id);
            self.folders.lock().unwrap().remove(id);
            Ok(true)
        }

        async fn remove_permanent(&self, id: &str, name: &str) -> Result<bool> {
            self.check()?;
            let mut files = self.files.lock().unwrap();
            match files.get(id) {
                Some((record, _)) if record.name == name => {
                    files.remove(id);
                    self.folders.lock().unwrap().remove(id);
                    Ok(true)
                }
                _ => Ok(false),
            }
        }

        async fn list_ids(&self) -> Result<Vec<String>> {
            self.check()?;
            Ok(self
                .folders
                .lock()
                .unwrap()
                .keys()
                .filter(|id| id.as_str() != QUARANTINE_DIR)
                .cloned()
                .collect())
        }
    }

    #[async_trait]
    impl RemoteStore for InMemoryRemote {
        async fn find_folder(&self, id: &str) -> Result<Option<String>> {
            self.check_upload()?;
            Ok(self.folders.lock().unwrap().get(id).cloned())
        }

        async fn create_folder(&self, id: &str) -> Result<String> {
            self.check_upload()?;
            let gid = format!("gid{}", self.next_gid.fetch_add(1, Ordering::SeqCst));
            self.folders
                .lock()
                .unwrap()
                .insert(id.to_string(), gid.clone());
            self.created_folders.fetch_add(1, Ordering::SeqCst);
            Ok(gid)
        }

        async fn upload_record(
            &self,
            folder_gid: &str,
            record: &MetadataRecord,
            content: Vec<u8>,
        ) -> Result<()> {
            self.uploads_started.fetch_add(1, Ordering::SeqCst);
            while self.hold_uploads.load(Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            self.check_upload()?;
            assert!(
                self.folders
                    .lock()
                    .unwrap()
                    .values()
                    .any(|gid| gid == folder_gid),
                "upload into unknown folder {}",
                folder_gid
            );
            self.files
                .lock()
                .unwrap()
                .insert(record.id.clone(), (record.clone(), content));
            self.upload_log.lock().unwrap().push(record.id.clone());
            Ok(())
        }
    }

    fn cached_config(stage_root: &Path) -> StorageConfig {
        StorageConfig {
            folder_id_length: 6,
            delete_token_length: 8,
            chunk_size: 1024,
            retention: RetentionPolicy::default(),
            metadata_cache_ttl_secs: 60,
            backend: BackendConfig::Remote {
                root: "remote-root".to_string(),
                cache: true,
                stage_root: Some(stage_root.to_path_buf()),
                credentials: RemoteCredentials {
                    client_id: "id".to_string(),
                    client_secret: "secret".to_string(),
                    refresh_token: "refresh".to_string(),
                },
            },
        }
    }

    fn source(bytes: &[u8]) -> ByteSource {
        Box::new(Cursor::new(bytes.to_vec()))
    }

    async fn read_all(mut stream: ByteSource) -> Vec<u8> {
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await.unwrap();
        buf
    }

    async fn wait_drained(cache: &CachedBackend<InMemoryRemote>) {
        for _ in 0..600 {
            if cache.pending_count() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("upload queue never drained");
    }

    #[tokio::test]
    async fn test_save_and_read_while_remote_down() {
        let dir = TempDir::new().unwrap();
        let remote = InMemoryRemote::new();
        remote.set_fail_all(true);

        let config = cached_config(dir.path());
        let cache = CachedBackend::start(dir.path().to_path_buf(), remote.clone(), &config)
            .await
            .unwrap();

        let content = b"written while offline".to_vec();
        let record = cache
            .save(source(&content), content.len() as u64, "offline.txt")
            .await
            .unwrap();
        assert!(cache.is_pending(&record.id));

        // Served entirely from the stage
        let loaded = cache.load_metadata(&record.id, "offline.txt").await.unwrap();
        assert_eq!(loaded, record);
        let bytes = read_all(cache.download(&record.id, "offline.txt").await.unwrap()).await;
        assert_eq!(bytes, content);

        // Nothing reached the remote yet
        assert!(remote.uploads().is_empty());

        // Remote comes back; the worker finishes the job
        remote.set_fail_all(false);
        wait_drained(&cache).await;

        assert_eq!(remote.uploads(), vec![record.id.clone()]);
        assert_eq!(remote.stored_record(&record.id), Some(record.clone()));

        // Reads now come from the remote and still match
        let bytes = read_all(cache.download(&record.id, "offline.txt").await.unwrap()).await;
        assert_eq!(bytes, content);
    }

    #[tokio::test]
    async fn test_flush_clears_staged_copy() {
        let dir = TempDir::new().unwrap();
        let remote = InMemoryRemote::new();

        let config = cached_config(dir.path());
        let cache = CachedBackend::start(dir.path().to_path_buf(), remote.clone(), &config)
            .await
            .unwrap();

        let record = cache.save(source(b"cargo"), 5, "load.txt").await.unwrap();
        wait_drained(&cache).await;

        // Authority moved: staged folder gone, remote holds the record
        assert!(tokio::fs::metadata(dir.path().join(&record.id)).await.is_err());
        assert_eq!(remote.stored_record(&record.id), Some(record.clone()));
        assert!(!cache.is_pending(&record.id));

        let loaded = cache.load_metadata(&record.id, "load.txt").await.unwrap();
        assert_eq!(loaded, record);
    }

    #[tokio::test]
    async fn test_flush_preserves_arrival_order() {
        let dir = TempDir::new().unwrap();
        let remote = InMemoryRemote::new();
        remote.set_fail_uploads(true);

        let config = cached_config(dir.path());
        let cache = CachedBackend::start(dir.path().to_path_buf(), remote.clone(), &config)
            .await
            .unwrap();

        let mut expected = Vec::new();
        for i in 0..3 {
            let name = format!("file{}.txt", i);
            let record = cache.save(source(b"abc"), 3, &name).await.unwrap();
            expected.push(record.id);
        }
        assert_eq!(cache.pending_count(), 3);

        remote.set_fail_uploads(false);
        wait_drained(&cache).await;

        assert_eq!(remote.uploads(), expected);
    }

    #[tokio::test]
    async fn test_deleted_while_pending_never_uploads() {
        let dir = TempDir::new().unwrap();
        let remote = InMemoryRemote::new();
        remote.set_fail_uploads(true);

        let config = cached_config(dir.path());
        let cache = CachedBackend::start(dir.path().to_path_buf(), remote.clone(), &config)
            .await
            .unwrap();

        let record = cache.save(source(b"brief"), 5, "brief.txt").await.unwrap();
        let removed = cache
            .remove(&record.id, "brief.txt", Some(&record.delete), false)
            .await
            .unwrap();
        assert!(removed);

        remote.set_fail_uploads(false);
        wait_drained(&cache).await;

        // The worker found the staged files gone and skipped the job
        assert!(remote.uploads().is_empty());
        assert!(remote.stored_record(&record.id).is_none());

        // And the record is gone from the engine's point of view
        let err = cache.load_metadata(&record.id, "brief.txt").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound));

        // The bytes survived in the stage's quarantine
        let quarantine = dir.path().join(QUARANTINE_DIR);
        assert!(tokio::fs::metadata(&quarantine).await.is_ok());
    }

    #[tokio::test]
    async fn test_remove_during_upload_stays_removed() {
        let dir = TempDir::new().unwrap();
        let remote = InMemoryRemote::new();
        remote.set_hold_uploads(true);

        let config = cached_config(dir.path());
        let cache = CachedBackend::start(dir.path().to_path_buf(), remote.clone(), &config)
            .await
            .unwrap();

        let record = cache.save(source(b"racy"), 4, "racy.txt").await.unwrap();

        // Wait until the worker is inside the upload, past the staged read
        for _ in 0..600 {
            if remote.uploads_started.load(Ordering::SeqCst) > 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(remote.uploads_started.load(Ordering::SeqCst) > 0);

        let removed = cache
            .remove(&record.id, "racy.txt", Some(&record.delete), false)
            .await
            .unwrap();
        assert!(removed);

        remote.set_hold_uploads(false);
        wait_drained(&cache).await;

        // The upload completed anyway, and the worker took the copy
        // back down because the delete got there first
        assert_eq!(remote.uploads(), vec![record.id.clone()]);
        assert!(remote.stored_record(&record.id).is_none());
        assert!(matches!(
            cache.load_metadata(&record.id, "racy.txt").await,
            Err(StorageError::NotFound)
        ));
        assert!(matches!(
            cache.download(&record.id, "racy.txt").await,
            Err(StorageError::NotFound)
        ));
    }

    #[tokio::test]
    async fn test_restart_recovers_staged_records() {
        let dir = TempDir::new().unwrap();
        let config = cached_config(dir.path());

        // A previous run that staged a record and died before flushing:
        // the stage is just a local backend, so build that state directly.
        let record = {
            let stage = LocalBackend::open(dir.path().to_path_buf(), &config)
                .await
                .unwrap();
            stage.save(source(b"survivor"), 8, "notes.txt").await.unwrap()
        };

        let remote = InMemoryRemote::new();
        let cache = CachedBackend::start(dir.path().to_path_buf(), remote.clone(), &config)
            .await
            .unwrap();

        // The recovered record flushes without any new save
        wait_drained(&cache).await;
        assert_eq!(remote.uploads(), vec![record.id.clone()]);
        assert_eq!(remote.stored_record(&record.id), Some(record.clone()));
        assert!(tokio::fs::metadata(dir.path().join(&record.id)).await.is_err());
    }

    #[tokio::test]
    async fn test_restart_reuses_existing_remote_folder() {
        let dir = TempDir::new().unwrap();
        let config = cached_config(dir.path());

        let record = {
            let stage = LocalBackend::open(dir.path().to_path_buf(), &config)
                .await
                .unwrap();
            stage.save(source(b"half done"), 9, "half.txt").await.unwrap()
        };

        // The crash happened after the folder was created remotely
        let remote = InMemoryRemote::new();
        remote
            .folders
            .lock()
            .unwrap()
            .insert(record.id.clone(), "gid-preexisting".to_string());

        let cache = CachedBackend::start(dir.path().to_path_buf(), remote.clone(), &config)
            .await
            .unwrap();
        wait_drained(&cache).await;

        // Flushed into the old folder instead of creating a second one
        assert_eq!(remote.created_folders.load(Ordering::SeqCst), 0);
        assert_eq!(
            remote.folders.lock().unwrap().get(&record.id),
            Some(&"gid-preexisting".to_string())
        );
        assert_eq!(remote.uploads(), vec![record.id]);
    }

    #[tokio::test]
    async fn test_restart_repairs_orphans() {
        let dir = TempDir::new().unwrap();
        let config = cached_config(dir.path());

        // Content without a sidecar, as an interrupted save leaves it
        let orphan_dir = dir.path().join("oRpHaN");
        tokio::fs::create_dir(&orphan_dir).await.unwrap();
        tokio::fs::write(orphan_dir.join("torso.bin"), b"half").await.unwrap();

        let remote = InMemoryRemote::new();
        let cache = CachedBackend::start(dir.path().to_path_buf(), remote.clone(), &config)
            .await
            .unwrap();

        assert_eq!(cache.pending_count(), 0);
        assert!(tokio::fs::metadata(&orphan_dir).await.is_err());
        assert!(remote.uploads().is_empty());
    }

    #[tokio::test]
    async fn test_remove_after_flush_hits_remote() {
        let dir = TempDir::new().unwrap();
        let remote = InMemoryRemote::new();

        let config = cached_config(dir.path());
        let cache = CachedBackend::start(dir.path().to_path_buf(), remote.clone(), &config)
            .await
            .unwrap();

        let record = cache.save(source(b"later"), 5, "later.txt").await.unwrap();
        wait_drained(&cache).await;

        // Wrong token bounces off the remote copy too
        let removed = cache
            .remove(&record.id, "later.txt", Some("wrong"), false)
            .await
            .unwrap();
        assert!(!removed);

        let removed = cache
            .remove(&record.id, "later.txt", Some(&record.delete), false)
            .await
            .unwrap();
        assert!(removed);
        assert!(remote.stored_record(&record.id).is_none());

        let err = cache.load_metadata(&record.id, "later.txt").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound));
    }

    #[tokio::test]
    async fn test_id_probe_spans_stage_and_remote() {
        let dir = TempDir::new().unwrap();
        let remote = InMemoryRemote::new();
        remote.set_fail_uploads(true);

        let config = cached_config(dir.path());
        let cache = CachedBackend::start(dir.path().to_path_buf(), remote.clone(), &config)
            .await
            .unwrap();

        let staged = cache.save(source(b"a"), 1, "a.txt").await.unwrap();
        assert!(cache.id_exists(&staged.id).await.unwrap());

        remote.set_fail_uploads(false);
        wait_drained(&cache).await;
        assert!(cache.id_exists(&staged.id).await.unwrap());

        assert!(!cache.id_exists("zzZZzz").await.unwrap());
    }

    #[tokio::test]
    async fn test_id_probe_rejects_malformed_id() {
        let dir = TempDir::new().unwrap();
        let remote = InMemoryRemote::new();

        let config = cached_config(dir.path());
        let cache = CachedBackend::start(dir.path().to_path_buf(), remote.clone(), &config)
            .await
            .unwrap();

        // Refused outright, not answered by the stage or the remote
        remote.set_fail_all(true);
        assert!(matches!(
            cache.id_exists("../secrets").await,
            Err(StorageError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_list_ids_unions_remote_and_pending() {
        let dir = TempDir::new().unwrap();
        let remote = InMemoryRemote::new();

        let config = cached_config(dir.path());
        let cache = CachedBackend::start(dir.path().to_path_buf(), remote.clone(), &config)
            .await
            .unwrap();

        let flushed = cache.save(source(b"one"), 3, "one.txt").await.unwrap();
        wait_drained(&cache).await;

        remote.set_fail_uploads(true);
        let stuck = cache.save(source(b"two"), 3, "two.txt").await.unwrap();

        let mut ids = cache.list_ids().await.unwrap();
        ids.sort();
        let mut expected = vec![flushed.id.clone(), stuck.id.clone()];
        expected.sort();
        assert_eq!(ids, expected);

        remote.set_fail_uploads(false);
        wait_drained(&cache).await;
    }
}
