//! Caching layer
//!
//! The write-through staging cache that fronts the remote backend, the
//! background upload worker behind it, and a Moka-based metadata cache
//! for read-heavy callers.

pub mod metadata;
pub mod worker;
pub mod write_through;

pub use metadata::MetadataCache;
pub use worker::{FolderPlan, PendingSet, UploadJob, UploadWorker};
pub use write_through::CachedBackend;
