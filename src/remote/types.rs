//! Drive API Types
//!
//! Serde models for the slice of the remote drive API the engine uses.

use serde::Deserialize;

/// A file or folder resource as returned by the drive API
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    /// Opaque drive-side object id
    pub id: String,
    /// Object name (a record id for folders, a filename inside them)
    pub name: String,
    /// Drive mime type; folders carry the folder marker type
    #[serde(default)]
    pub mime_type: Option<String>,
}

/// Response from the files list endpoint
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileListResponse {
    /// Matching objects in this page
    #[serde(default)]
    pub files: Vec<DriveFile>,
    /// Cursor for the next page (None on the last page)
    #[serde(default)]
    pub next_page_token: Option<String>,
}

/// Response from the OAuth token endpoint
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    /// Lifetime of the access token in seconds
    #[serde(default)]
    pub expires_in: u64,
}
