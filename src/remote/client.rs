//! Drive API Client
//!
//! Authenticated access to the remote drive used as the durable store.
//! Access tokens are minted from the configured refresh token and
//! refreshed in place when the API starts answering 401.

use reqwest::Client;
use serde_json::Value;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::types::{DriveFile, FileListResponse, TokenResponse};
use crate::config::RemoteCredentials;
use crate::error::{Result, StorageError};
use crate::ident;

/// Drive API base URL for metadata operations
const DRIVE_API_BASE: &str = "https://www.googleapis.com/drive/v3";

/// Drive API base URL for content uploads
const DRIVE_UPLOAD_BASE: &str = "https://www.googleapis.com/upload/drive/v3";

/// OAuth2 token endpoint
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Mime type marking a drive object as a folder
pub const FOLDER_MIME: &str = "application/vnd.google-apps.folder";

/// Fields requested for single-file responses
const FILE_FIELDS: &str = "id, name, mimeType";

/// Fields requested for list responses
const LIST_FIELDS: &str = "nextPageToken, files(id, name, mimeType)";

/// HTTP client timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum number of retries for retryable errors
const MAX_RETRIES: u32 = 3;

/// Backoff schedule between retries
const RETRY_BACKOFF_MS: [u64; 3] = [500, 1000, 2000];

/// Auth state that can be refreshed (interior mutability)
struct AuthState {
    access_token: String,
}

/// Drive API client for making authenticated requests
#[derive(Clone)]
pub struct DriveClient {
    /// HTTP client for making requests
    http_client: Client,
    /// Stored credentials for minting access tokens
    credentials: RemoteCredentials,
    /// Mutable auth state (refreshable on 401)
    auth_state: Arc<RwLock<AuthState>>,
}

impl DriveClient {
    /// Create a client from OAuth credentials.
    ///
    /// No network traffic happens here; the first request mints the
    /// initial access token.
    pub fn new(credentials: RemoteCredentials) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(StorageError::network)?;

        Ok(DriveClient {
            http_client,
            credentials,
            auth_state: Arc::new(RwLock::new(AuthState {
                access_token: String::new(),
            })),
        })
    }

    /// Current access token, minting one first if none is held yet
    async fn bearer(&self) -> Result<String> {
        {
            let state = self.auth_state.read().unwrap();
            if !state.access_token.is_empty() {
                return Ok(state.access_token.clone());
            }
        }
        self.refresh_auth().await?;
        Ok(self.auth_state.read().unwrap().access_token.clone())
    }

    /// Mint a fresh access token from the refresh token
    pub async fn refresh_auth(&self) -> Result<()> {
        debug!("refreshing drive access token");

        let params = [
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
            ("refresh_token", self.credentials.refresh_token.as_str()),
            ("grant_type", "refresh_token"),
        ];

        let response = self
            .http_client
            .post(TOKEN_URL)
            .form(&params)
            .send()
            .await
            .map_err(StorageError::network)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::Unavailable {
                status: Some(status.as_u16()),
                message: format!("token refresh failed: {}", body),
            });
        }

        let token: TokenResponse = response.json().await.map_err(StorageError::network)?;
        self.auth_state.write().unwrap().access_token = token.access_token;

        info!("drive access token refreshed");
        Ok(())
    }

    /// Execute an operation with retry logic and exponential backoff
    async fn with_retry<F, Fut, T>(&self, operation: &str, f: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        for attempt in 0..=MAX_RETRIES {
            match f().await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if !e.is_retryable() || attempt == MAX_RETRIES {
                        return Err(e);
                    }

                    // A rejected token is recovered by minting a new one
                    if matches!(
                        e,
                        StorageError::Unavailable {
                            status: Some(401),
                            ..
                        }
                    ) {
                        warn!(operation = operation, "access token rejected, refreshing");
                        if let Err(refresh_err) = self.refresh_auth().await {
                            error!(error = %refresh_err, "token refresh failed");
                        }
                    }

                    let delay = RETRY_BACKOFF_MS
                        .get(attempt as usize)
                        .copied()
                        .unwrap_or(2000);
                    warn!(
                        operation = operation,
                        attempt = attempt + 1,
                        max = MAX_RETRIES,
                        delay_ms = delay,
                        error = %e,
                        "retrying drive request"
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
            }
        }

        unreachable!()
    }

    /// List children of a folder, paging through the full result.
    ///
    /// # Arguments
    /// * `parent` - drive id of the folder to list
    /// * `name` - restrict to children with this exact name
    /// * `folders_only` - restrict to subfolder entries
    pub async fn list_children(
        &self,
        parent: &str,
        name: Option<&str>,
        folders_only: bool,
    ) -> Result<Vec<DriveFile>> {
        let query = child_query(parent, name, folders_only);
        let mut all_files = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page = self
                .with_retry("files.list", || {
                    self.try_list_page(&query, page_token.as_deref())
                })
                .await?;
            all_files.extend(page.files);

            match page.next_page_token {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }

        debug!(parent = parent, count = all_files.len(), "listed drive children");
        Ok(all_files)
    }

    async fn try_list_page(
        &self,
        query: &str,
        page_token: Option<&str>,
    ) -> Result<FileListResponse> {
        let token = self.bearer().await?;
        let mut request = self
            .http_client
            .get(format!("{}/files", DRIVE_API_BASE))
            .bearer_auth(&token)
            .query(&[
                ("q", query),
                ("fields", LIST_FIELDS),
                ("pageSize", "1000"),
            ]);
        if let Some(page) = page_token {
            request = request.query(&[("pageToken", page)]);
        }

        let response = request.send().await.map_err(StorageError::network)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::from_status(status.as_u16(), &body));
        }

        response.json().await.map_err(StorageError::network)
    }

    /// Find a child folder by exact name
    pub async fn find_folder(&self, parent: &str, name: &str) -> Result<Option<DriveFile>> {
        let mut matches = self.list_children(parent, Some(name), true).await?;
        Ok(if matches.is_empty() {
            None
        } else {
            Some(matches.swap_remove(0))
        })
    }

    /// Create a subfolder
    pub async fn create_folder(&self, parent: &str, name: &str) -> Result<DriveFile> {
        let body = serde_json::json!({
            "name": name,
            "mimeType": FOLDER_MIME,
            "parents": [parent]
        });

        let created = self
            .with_retry("files.create", || self.try_create_folder(&body))
            .await?;
        debug!(parent = parent, name = name, id = %created.id, "created drive folder");
        Ok(created)
    }

    async fn try_create_folder(&self, body: &Value) -> Result<DriveFile> {
        let token = self.bearer().await?;
        let response = self
            .http_client
            .post(format!("{}/files", DRIVE_API_BASE))
            .bearer_auth(&token)
            .query(&[("fields", FILE_FIELDS)])
            .json(body)
            .send()
            .await
            .map_err(StorageError::network)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::from_status(status.as_u16(), &body));
        }

        response.json().await.map_err(StorageError::network)
    }

    /// Upload a file into a folder
    ///
    /// # Arguments
    /// * `parent` - drive id of the destination folder
    /// * `name` - filename to create
    /// * `content_type` - mime type stored with the file
    /// * `data` - file content
    pub async fn upload(
        &self,
        parent: &str,
        name: &str,
        content_type: &str,
        data: Vec<u8>,
    ) -> Result<DriveFile> {
        let metadata = serde_json::json!({ "name": name, "parents": [parent] });
        let boundary = format!("skiff{}", ident::random_alphanumeric(16));
        let body = multipart_body(&boundary, &metadata, content_type, &data)?;

        info!(
            name = name,
            parent = parent,
            size = data.len(),
            content_type = content_type,
            "uploading file to drive"
        );

        let uploaded = self
            .with_retry("files.upload", || self.try_upload(&boundary, &body))
            .await?;
        debug!(name = name, id = %uploaded.id, "file uploaded to drive");
        Ok(uploaded)
    }

    async fn try_upload(&self, boundary: &str, body: &[u8]) -> Result<DriveFile> {
        let token = self.bearer().await?;
        let response = self
            .http_client
            .post(format!("{}/files", DRIVE_UPLOAD_BASE))
            .bearer_auth(&token)
            .query(&[("uploadType", "multipart"), ("fields", FILE_FIELDS)])
            .header(
                "Content-Type",
                format!("multipart/related; boundary={}", boundary),
            )
            .body(body.to_vec())
            .send()
            .await
            .map_err(StorageError::network)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::from_status(status.as_u16(), &body));
        }

        response.json().await.map_err(StorageError::network)
    }

    /// Download file content
    pub async fn download(&self, file_id: &str) -> Result<Vec<u8>> {
        let bytes = self
            .with_retry("files.get", || self.try_download(file_id))
            .await?;
        debug!(file_id = file_id, size = bytes.len(), "downloaded drive file");
        Ok(bytes)
    }

    async fn try_download(&self, file_id: &str) -> Result<Vec<u8>> {
        let token = self.bearer().await?;
        let response = self
            .http_client
            .get(format!("{}/files/{}", DRIVE_API_BASE, file_id))
            .bearer_auth(&token)
            .query(&[("alt", "media")])
            .send()
            .await
            .map_err(StorageError::network)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::from_status(status.as_u16(), &body));
        }

        let bytes = response.bytes().await.map_err(StorageError::network)?;
        Ok(bytes.to_vec())
    }

    /// Rename a file and move it to another folder in one call
    pub async fn rename_move(
        &self,
        file_id: &str,
        new_name: &str,
        add_parent: &str,
        remove_parent: &str,
    ) -> Result<()> {
        let body = serde_json::json!({ "name": new_name });
        self.with_retry("files.update", || {
            self.try_rename_move(file_id, &body, add_parent, remove_parent)
        })
        .await?;
        debug!(file_id = file_id, new_name = new_name, "moved drive file");
        Ok(())
    }

    async fn try_rename_move(
        &self,
        file_id: &str,
        body: &Value,
        add_parent: &str,
        remove_parent: &str,
    ) -> Result<()> {
        let token = self.bearer().await?;
        let response = self
            .http_client
            .patch(format!("{}/files/{}", DRIVE_API_BASE, file_id))
            .bearer_auth(&token)
            .query(&[
                ("addParents", add_parent),
                ("removeParents", remove_parent),
                ("fields", "id"),
            ])
            .json(body)
            .send()
            .await
            .map_err(StorageError::network)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::from_status(status.as_u16(), &body));
        }
        Ok(())
    }

    /// Permanently delete a file or folder
    pub async fn delete(&self, file_id: &str) -> Result<()> {
        self.with_retry("files.delete", || self.try_delete(file_id))
            .await?;
        debug!(file_id = file_id, "deleted drive file");
        Ok(())
    }

    async fn try_delete(&self, file_id: &str) -> Result<()> {
        let token = self.bearer().await?;
        let response = self
            .http_client
            .delete(format!("{}/files/{}", DRIVE_API_BASE, file_id))
            .bearer_auth(&token)
            .send()
            .await
            .map_err(StorageError::network)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StorageError::from_status(status.as_u16(), &body));
        }
        Ok(())
    }
}

/// Build the drive search query for children of a folder
fn child_query(parent: &str, name: Option<&str>, folders_only: bool) -> String {
    let mut query = format!("'{}' in parents and trashed = false", escape_query(parent));
    if let Some(name) = name {
        query.push_str(&format!(" and name = '{}'", escape_query(name)));
    }
    if folders_only {
        query.push_str(&format!(" and mimeType = '{}'", FOLDER_MIME));
    }
    query
}

/// Escape a value for interpolation into a drive search query
fn escape_query(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Assemble a multipart/related upload body: a JSON metadata part
/// followed by the content part
fn multipart_body(
    boundary: &str,
    metadata: &Value,
    content_type: &str,
    data: &[u8],
) -> Result<Vec<u8>> {
    let metadata_json = serde_json::to_string(metadata)?;
    let mut body = Vec::with_capacity(data.len() + metadata_json.len() + 256);
    body.extend_from_slice(
        format!(
            "--{}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{}\r\n",
            boundary, metadata_json
        )
        .as_bytes(),
    );
    body.extend_from_slice(
        format!("--{}\r\nContent-Type: {}\r\n\r\n", boundary, content_type).as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
    Ok(body)
}
