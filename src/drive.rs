//! Google Drive REST client: service-account auth, file CRUD, and the
//! paged listing used for usage reconciliation.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Utc;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::{DRIVE_PAGE_SIZE, FOLDER_MIME_TYPE};

const DRIVE_FILES_URL: &str = "https://www.googleapis.com/drive/v3/files";
const DRIVE_UPLOAD_URL: &str = "https://www.googleapis.com/upload/drive/v3/files";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const TOKEN_SCOPE: &str =
    "https://www.googleapis.com/auth/drive https://www.googleapis.com/auth/drive.file";
const TOKEN_TTL_SECS: u64 = 3600;
const TOKEN_EARLY_REFRESH_SECS: u64 = 60;
const LIST_FIELDS: &str =
    "nextPageToken, files(id, name, mimeType, size, modifiedTime, webViewLink, webContentLink)";
const FILE_FIELDS: &str = "id, name, mimeType, size";

#[derive(Debug, Error)]
pub enum DriveError {
    #[error("drive request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("drive api returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("drive credentials are not configured")]
    MissingCredentials,
    #[error("failed to sign service account assertion: {0}")]
    Assertion(#[from] jsonwebtoken::errors::Error),
}

#[derive(Debug, Clone)]
pub struct ServiceAccount {
    pub client_email: String,
    pub private_key: String,
}

struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: u64,
}

/// One Drive entry as returned by the files API. `size` arrives as a decimal
/// string and is absent for folders and native Google docs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DriveFile {
    pub id: String,
    pub name: String,
    pub mime_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub web_view_link: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub web_content_link: Option<String>,
}

impl DriveFile {
    pub fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME_TYPE
    }

    pub fn size_bytes(&self) -> u64 {
        self.size
            .as_deref()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0)
    }
}

#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FileList {
    pub files: Vec<DriveFile>,
    pub next_page_token: Option<String>,
}

/// Byte total contributed by a single listing page; folders and entries
/// without a size count as zero.
pub fn page_usage_bytes(page: &FileList) -> u64 {
    page.files
        .iter()
        .filter(|file| !file.is_folder())
        .map(DriveFile::size_bytes)
        .sum()
}

pub struct DriveClient {
    http: reqwest::Client,
    credentials: Option<ServiceAccount>,
    root_folder: String,
    token: Mutex<Option<CachedToken>>,
}

impl DriveClient {
    pub fn new(credentials: Option<ServiceAccount>, root_folder: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            credentials,
            root_folder,
            token: Mutex::new(None),
        }
    }

    pub fn root_folder(&self) -> &str {
        &self.root_folder
    }

    /// Resolves a request-supplied folder id, falling back to the configured
    /// root folder.
    pub fn folder_or_root<'a>(&'a self, folder_id: Option<&'a str>) -> &'a str {
        match folder_id {
            Some(id) if !id.is_empty() && id != "root" => id,
            _ => &self.root_folder,
        }
    }

    /// Returns a cached access token, exchanging a fresh service-account
    /// assertion when the cache is empty or close to expiry.
    async fn access_token(&self) -> Result<String, DriveError> {
        let credentials = self
            .credentials
            .as_ref()
            .ok_or(DriveError::MissingCredentials)?;

        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref()
            && token.expires_at > Instant::now() + Duration::from_secs(TOKEN_EARLY_REFRESH_SECS)
        {
            return Ok(token.access_token.clone());
        }

        let now = Utc::now().timestamp();
        let claims = AssertionClaims {
            iss: &credentials.client_email,
            scope: TOKEN_SCOPE,
            aud: TOKEN_URL,
            iat: now,
            exp: now + TOKEN_TTL_SECS as i64,
        };
        // Keys passed through env vars commonly carry literal \n escapes.
        let pem = credentials.private_key.replace("\\n", "\n");
        let key = EncodingKey::from_rsa_pem(pem.as_bytes())?;
        let assertion = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &key)?;

        let response = self
            .http
            .post(TOKEN_URL)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(api_error(response).await);
        }
        let token: TokenResponse = response.json().await?;
        let ttl = if token.expires_in > 0 {
            token.expires_in
        } else {
            TOKEN_TTL_SECS
        };
        debug!(ttl, "drive access token refreshed");
        *cached = Some(CachedToken {
            access_token: token.access_token.clone(),
            expires_at: Instant::now() + Duration::from_secs(ttl),
        });
        Ok(token.access_token)
    }

    async fn list_page(
        &self,
        folder_id: &str,
        search: Option<&str>,
        page_token: Option<&str>,
    ) -> Result<FileList, DriveError> {
        let token = self.access_token().await?;
        let mut query = format!("'{folder_id}' in parents and trashed = false");
        if let Some(search) = search.filter(|s| !s.is_empty()) {
            let escaped = search.replace('\\', "\\\\").replace('\'', "\\'");
            query.push_str(&format!(" and name contains '{escaped}'"));
        }

        let mut params = vec![
            ("q", query),
            ("fields", LIST_FIELDS.to_string()),
            ("pageSize", DRIVE_PAGE_SIZE.to_string()),
        ];
        if let Some(page_token) = page_token {
            params.push(("pageToken", page_token.to_string()));
        }

        let response = self
            .http
            .get(DRIVE_FILES_URL)
            .query(&params)
            .bearer_auth(token)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(api_error(response).await);
        }
        Ok(response.json().await?)
    }

    /// Full listing of a folder, draining every page.
    pub async fn list_files(
        &self,
        folder_id: &str,
        search: Option<&str>,
    ) -> Result<Vec<DriveFile>, DriveError> {
        let mut files = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let page = self
                .list_page(folder_id, search, page_token.as_deref())
                .await?;
            files.extend(page.files);
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        Ok(files)
    }

    /// Sums file sizes over the whole folder listing, for reconciliation.
    /// Folders contribute nothing regardless of how pages are cut.
    pub async fn total_usage_bytes(&self, folder_id: &str) -> Result<u64, DriveError> {
        let mut total: u64 = 0;
        let mut page_token: Option<String> = None;
        loop {
            let page = self
                .list_page(folder_id, None, page_token.as_deref())
                .await?;
            total += page_usage_bytes(&page);
            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }
        Ok(total)
    }

    pub async fn file_metadata(&self, file_id: &str) -> Result<DriveFile, DriveError> {
        let token = self.access_token().await?;
        let response = self
            .http
            .get(format!("{DRIVE_FILES_URL}/{file_id}"))
            .query(&[("fields", FILE_FIELDS)])
            .bearer_auth(token)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(api_error(response).await);
        }
        Ok(response.json().await?)
    }

    pub async fn delete_file(&self, file_id: &str) -> Result<(), DriveError> {
        let token = self.access_token().await?;
        let response = self
            .http
            .delete(format!("{DRIVE_FILES_URL}/{file_id}"))
            .bearer_auth(token)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(api_error(response).await);
        }
        Ok(())
    }

    pub async fn rename_file(&self, file_id: &str, name: &str) -> Result<DriveFile, DriveError> {
        let token = self.access_token().await?;
        let response = self
            .http
            .patch(format!("{DRIVE_FILES_URL}/{file_id}"))
            .query(&[("fields", FILE_FIELDS)])
            .bearer_auth(token)
            .json(&serde_json::json!({ "name": name }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(api_error(response).await);
        }
        Ok(response.json().await?)
    }

    pub async fn create_folder(
        &self,
        name: &str,
        parent_id: Option<&str>,
    ) -> Result<DriveFile, DriveError> {
        let token = self.access_token().await?;
        let parent = self.folder_or_root(parent_id);
        let response = self
            .http
            .post(DRIVE_FILES_URL)
            .query(&[("fields", FILE_FIELDS)])
            .bearer_auth(token)
            .json(&serde_json::json!({
                "name": name,
                "mimeType": FOLDER_MIME_TYPE,
                "parents": [parent],
            }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(api_error(response).await);
        }
        Ok(response.json().await?)
    }

    /// Uploads file content as a multipart/related request: a JSON metadata
    /// part followed by the base64-encoded media part.
    pub async fn upload_file(
        &self,
        name: &str,
        mime_type: &str,
        data: &[u8],
        parent_id: Option<&str>,
    ) -> Result<DriveFile, DriveError> {
        let token = self.access_token().await?;
        let parent = self.folder_or_root(parent_id);
        let metadata = serde_json::json!({
            "name": name,
            "mimeType": mime_type,
            "parents": [parent],
        });

        let boundary = format!("cloudsync_{}", uuid::Uuid::new_v4().simple());
        let mut body = String::new();
        body.push_str(&format!("\r\n--{boundary}\r\n"));
        body.push_str("Content-Type: application/json; charset=UTF-8\r\n\r\n");
        body.push_str(&metadata.to_string());
        body.push_str(&format!("\r\n--{boundary}\r\n"));
        body.push_str(&format!("Content-Type: {mime_type}\r\n"));
        body.push_str("Content-Transfer-Encoding: base64\r\n\r\n");
        body.push_str(&BASE64.encode(data));
        body.push_str(&format!("\r\n--{boundary}--"));

        let response = self
            .http
            .post(DRIVE_UPLOAD_URL)
            .query(&[
                ("uploadType", "multipart"),
                ("fields", "id, name, mimeType, size, webViewLink, webContentLink"),
            ])
            .bearer_auth(token)
            .header(
                reqwest::header::CONTENT_TYPE,
                format!("multipart/related; boundary={boundary}"),
            )
            .body(body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(api_error(response).await);
        }
        Ok(response.json().await?)
    }
}

/// Extracts the upstream error message from a non-success Drive reply.
async fn api_error(response: reqwest::Response) -> DriveError {
    let status = response.status().as_u16();
    let message = response
        .json::<serde_json::Value>()
        .await
        .ok()
        .and_then(|value| {
            value
                .pointer("/error/message")
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| "drive api error".to_string());
    DriveError::Api { status, message }
}
