//! File handlers: thin proxies to the Drive API wrapped with session
//! resolution and the quota ledger.

use axum::extract::{Extension, Json, Multipart, Path, Query};
use axum::response::Json as JsonResponse;
use axum_extra::extract::CookieJar;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::drive::{DriveClient, DriveFile};
use crate::error::ApiError;
use crate::session;
use crate::store::RecordStore;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ListFilesQuery {
    folder_id: Option<String>,
    search: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FileListResponse {
    files: Vec<DriveFile>,
}

pub async fn list_files(
    jar: CookieJar,
    Query(query): Query<ListFilesQuery>,
    Extension(store): Extension<Arc<RecordStore>>,
    Extension(drive): Extension<Arc<DriveClient>>,
) -> Result<JsonResponse<FileListResponse>, ApiError> {
    session::current_user(&store, &jar).await?;
    let folder = drive.folder_or_root(query.folder_id.as_deref());
    let files = drive.list_files(folder, query.search.as_deref()).await?;
    info!(folder, count = files.len(), "list files");
    Ok(JsonResponse(FileListResponse { files }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UploadResponse {
    success: bool,
    file: DriveFile,
}

/// Accepts one multipart `file` field (plus optional `folderId`), checks the
/// quota, uploads to Drive, and charges the ledger with the stored size.
pub async fn upload_file(
    jar: CookieJar,
    Extension(store): Extension<Arc<RecordStore>>,
    Extension(drive): Extension<Arc<DriveClient>>,
    mut multipart: Multipart,
) -> Result<JsonResponse<UploadResponse>, ApiError> {
    let user = session::current_user(&store, &jar).await?;

    let mut file: Option<(String, String, Vec<u8>)> = None;
    let mut folder_id: Option<String> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| ApiError::BadRequest(err.to_string()))?
    {
        match field.name() {
            Some("file") => {
                let name = field
                    .file_name()
                    .map(str::to_string)
                    .filter(|n| !n.is_empty())
                    .ok_or_else(|| ApiError::BadRequest("file name is required".into()))?;
                let mime = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|err| ApiError::BadRequest(err.to_string()))?;
                file = Some((name, mime, data.to_vec()));
            }
            Some("folderId") => {
                folder_id = field.text().await.ok().filter(|id| !id.is_empty());
            }
            _ => {}
        }
    }
    let Some((name, mime, data)) = file else {
        return Err(ApiError::BadRequest("no file provided".into()));
    };

    store.check_quota(&user.id, data.len() as u64).await?;

    let uploaded = drive
        .upload_file(&name, &mime, &data, folder_id.as_deref())
        .await?;
    // Drive reports the stored size; fall back to what we sent.
    let size = match uploaded.size_bytes() {
        0 => data.len() as u64,
        reported => reported,
    };
    store.adjust_usage(&user.id, size as i64).await?;
    info!(user = user.email, name, size, "file uploaded");

    Ok(JsonResponse(UploadResponse {
        success: true,
        file: uploaded,
    }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DeleteFileResponse {
    success: bool,
}

/// Deletes a Drive entry. The size is read before the delete so the ledger
/// knows what to subtract; two racing deletes of the same file can
/// double-subtract, which the zero clamp absorbs.
pub async fn delete_file(
    jar: CookieJar,
    Path(id): Path<String>,
    Extension(store): Extension<Arc<RecordStore>>,
    Extension(drive): Extension<Arc<DriveClient>>,
) -> Result<JsonResponse<DeleteFileResponse>, ApiError> {
    let user = session::current_user(&store, &jar).await?;

    let metadata = drive.file_metadata(&id).await?;
    drive.delete_file(&id).await?;
    if !metadata.is_folder() {
        store
            .adjust_usage(&user.id, -(metadata.size_bytes() as i64))
            .await?;
    }
    info!(user = user.email, id, "file deleted");

    Ok(JsonResponse(DeleteFileResponse { success: true }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RenameRequest {
    name: String,
}

pub async fn rename_file(
    jar: CookieJar,
    Path(id): Path<String>,
    Extension(store): Extension<Arc<RecordStore>>,
    Extension(drive): Extension<Arc<DriveClient>>,
    Json(payload): Json<RenameRequest>,
) -> Result<JsonResponse<DriveFile>, ApiError> {
    session::current_user(&store, &jar).await?;
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(ApiError::BadRequest("name is required".into()));
    }
    let renamed = drive.rename_file(&id, name).await?;
    info!(id, name, "file renamed");
    Ok(JsonResponse(renamed))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateFolderRequest {
    name: String,
    parent_id: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CreateFolderResponse {
    success: bool,
    folder: DriveFile,
}

pub async fn create_folder(
    jar: CookieJar,
    Extension(store): Extension<Arc<RecordStore>>,
    Extension(drive): Extension<Arc<DriveClient>>,
    Json(payload): Json<CreateFolderRequest>,
) -> Result<JsonResponse<CreateFolderResponse>, ApiError> {
    session::current_user(&store, &jar).await?;
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(ApiError::BadRequest("folder name is required".into()));
    }
    let folder = drive
        .create_folder(name, payload.parent_id.as_deref())
        .await?;
    info!(name, "folder created");
    Ok(JsonResponse(CreateFolderResponse {
        success: true,
        folder,
    }))
}
