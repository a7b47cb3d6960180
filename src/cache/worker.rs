//! Background Upload Worker
//!
//! Drains the write-through cache's upload queue in arrival order. One
//! worker per cached backend; it parks on the channel when the queue is
//! empty and exits when the producer side is dropped, after finishing
//! whatever is still queued.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::backend::{Backend, LocalBackend};
use crate::error::Result;
use crate::meta::MetadataRecord;
use crate::remote::RemoteStore;

/// Backoff schedule for failed flushes; the last step repeats
const FLUSH_BACKOFF_MS: [u64; 5] = [500, 1000, 2000, 5000, 10000];

/// Ceiling for the repeated backoff step
const MAX_FLUSH_BACKOFF_MS: u64 = 30_000;

/// Ids whose authoritative copy still sits in the staging area.
///
/// Shared between the save path (insert), the read path (route to the
/// stage), and the worker (clear after flush).
#[derive(Default)]
pub struct PendingSet {
    ids: Mutex<HashSet<String>>,
}

impl PendingSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, id: &str) {
        self.ids.lock().unwrap().insert(id.to_string());
    }

    pub fn remove(&self, id: &str) {
        self.ids.lock().unwrap().remove(id);
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.lock().unwrap().contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.lock().unwrap().is_empty()
    }

    /// Copy of the current pending ids
    pub fn snapshot(&self) -> Vec<String> {
        self.ids.lock().unwrap().iter().cloned().collect()
    }
}

/// How the worker lands a record's remote folder
#[derive(Debug, Clone)]
pub enum FolderPlan {
    /// A folder for this id already exists remotely; reuse it
    Existing(String),
    /// No folder known yet; look again at flush time and create if
    /// still absent
    Create,
}

/// One staged record waiting to reach the remote
#[derive(Debug)]
pub struct UploadJob {
    pub record: MetadataRecord,
    pub plan: FolderPlan,
}

/// Single consumer of the upload queue
pub struct UploadWorker<R: RemoteStore> {
    stage: Arc<LocalBackend>,
    remote: Arc<R>,
    pending: Arc<PendingSet>,
}

impl<R: RemoteStore + 'static> UploadWorker<R> {
    pub fn new(stage: Arc<LocalBackend>, remote: Arc<R>, pending: Arc<PendingSet>) -> Self {
        UploadWorker {
            stage,
            remote,
            pending,
        }
    }

    /// Start the worker task. It runs until the sending side of the
    /// queue is dropped and the queue is drained.
    pub fn spawn(self, rx: UnboundedReceiver<UploadJob>) -> JoinHandle<()> {
        tokio::spawn(self.run(rx))
    }

    async fn run(self, mut rx: UnboundedReceiver<UploadJob>) {
        info!("upload worker started");
        while let Some(job) = rx.recv().await {
            self.flush_until_done(job).await;
        }
        info!("upload worker stopped");
    }

    /// Flush one job, retrying forever with capped backoff.
    ///
    /// Jobs are never reordered or dropped: until this record is safely
    /// remote, the ones behind it wait.
    async fn flush_until_done(&self, job: UploadJob) {
        let id = job.record.id.clone();
        let mut attempt: u32 = 0;
        loop {
            match self.flush_job(&job).await {
                Ok(true) => {
                    self.pending.remove(&id);
                    info!(id = %id, name = %job.record.name, "staged record flushed to remote");
                    return;
                }
                Ok(false) => {
                    self.pending.remove(&id);
                    debug!(id = %id, "record deleted while pending, flush dropped");
                    return;
                }
                Err(e) => {
                    let delay = FLUSH_BACKOFF_MS
                        .get(attempt as usize)
                        .copied()
                        .unwrap_or(MAX_FLUSH_BACKOFF_MS);
                    attempt = attempt.saturating_add(1);
                    warn!(
                        id = %id,
                        attempt = attempt,
                        delay_ms = delay,
                        error = %e,
                        "flush failed, will retry"
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
            }
        }
    }

    /// One flush attempt. `Ok(false)` means the record was deleted
    /// while it waited, before or during the upload, and the remote
    /// ends up holding no copy.
    async fn flush_job(&self, job: &UploadJob) -> Result<bool> {
        let id = &job.record.id;
        let name = &job.record.name;

        let content_path = match self.stage.resolve_content_path(id, name).await? {
            Some(path) => path,
            None => return Ok(false),
        };
        if self.stage.resolve_metadata_path(id, name).await?.is_none() {
            return Ok(false);
        }
        let content = tokio::fs::read(&content_path).await?;

        let folder_gid = match &job.plan {
            FolderPlan::Existing(gid) => gid.clone(),
            FolderPlan::Create => match self.remote.find_folder(id).await? {
                Some(gid) => gid,
                None => self.remote.create_folder(id).await?,
            },
        };

        self.remote
            .upload_record(&folder_gid, &job.record, content)
            .await?;

        // The remote copy is complete; the staged one stops being
        // authoritative the moment it is gone. A delete that landed
        // mid-upload answers false here and wins, so the copy we just
        // uploaded comes straight back down.
        if !self.stage.remove_permanent(id, name).await? {
            self.remote.remove_permanent(id, name).await?;
            return Ok(false);
        }
        Ok(true)
    }
}
