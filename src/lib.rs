//! Skiff Storage - record storage engine for file hosting
//!
//! Each upload becomes a record: a folder named by a short generated
//! identifier, holding the content file and a JSON metadata sidecar.
//! Records live on a local directory tree or on a remote drive, and the
//! remote can be fronted by a write-through disk cache that stages
//! saves locally and uploads them in the background.

pub mod backend;
pub mod cache;
pub mod config;
pub mod error;
pub mod ident;
pub mod meta;
pub mod remote;

pub use backend::{from_config, Backend, ByteSource, LocalBackend, QUARANTINE_DIR};
pub use cache::{CachedBackend, MetadataCache};
pub use config::{BackendConfig, RemoteCredentials, RetentionPolicy, StorageConfig};
pub use error::{Result, StorageError};
pub use meta::{MetadataRecord, PublicMetadata, METADATA_SUFFIX};
pub use remote::{DriveClient, RemoteBackend, RemoteStore};
