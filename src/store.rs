//! Persistent record store: one JSON document holding users and OTP records.
//!
//! The document is loaded once, cached in memory behind a mutex, and written
//! back in full after every mutation. There is no cross-process coordination;
//! a single writer process is assumed.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

use crate::otp::OtpRecord;
use crate::users::UserRecord;

/// On-disk layout of the record store.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreDoc {
    pub users: Vec<UserRecord>,
    pub otp_records: Vec<OtpRecord>,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record store write failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("record store serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub struct RecordStore {
    path: PathBuf,
    doc: Mutex<StoreDoc>,
}

impl RecordStore {
    /// Opens the store, reading the backing file if it exists. A missing or
    /// unreadable file yields an empty document rather than an error.
    pub async fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let doc = load_doc(&path).await;
        Self {
            path,
            doc: Mutex::new(doc),
        }
    }

    /// Runs a read-only closure against the cached document.
    pub async fn read<R>(&self, f: impl FnOnce(&StoreDoc) -> R) -> R {
        let doc = self.doc.lock().await;
        f(&doc)
    }

    /// Runs a mutating closure and persists the full document before
    /// returning. A failed write surfaces as `StoreError`; the in-memory
    /// state keeps the mutation.
    pub async fn write<R>(&self, f: impl FnOnce(&mut StoreDoc) -> R) -> Result<R, StoreError> {
        let mut doc = self.doc.lock().await;
        let value = f(&mut doc);
        save_doc(&self.path, &doc).await?;
        Ok(value)
    }
}

async fn load_doc(path: &Path) -> StoreDoc {
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return StoreDoc::default(),
        Err(err) => {
            warn!(path = %path.display(), error = %err, "record store unreadable, starting empty");
            return StoreDoc::default();
        }
    };
    match serde_json::from_slice(&bytes) {
        Ok(doc) => doc,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "record store corrupt, starting empty");
            StoreDoc::default()
        }
    }
}

/// Serializes the document to a temp file and atomically replaces the target.
async fn save_doc(path: &Path, doc: &StoreDoc) -> Result<(), StoreError> {
    let parent = path.parent().filter(|p| !p.as_os_str().is_empty());
    if let Some(parent) = parent {
        fs::create_dir_all(parent).await?;
    }

    let base = path
        .file_name()
        .map(|name| name.to_string_lossy())
        .unwrap_or_else(|| "records.json".into());
    let temp_path = match parent {
        Some(parent) => parent.join(format!(".{base}.tmp.{}", Uuid::new_v4())),
        None => PathBuf::from(format!(".{base}.tmp.{}", Uuid::new_v4())),
    };

    let bytes = serde_json::to_vec_pretty(doc)?;
    let result = async {
        let mut file = File::create(&temp_path).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&temp_path, path).await?;
        Ok::<(), std::io::Error>(())
    }
    .await;

    if let Err(err) = result {
        let _ = fs::remove_file(&temp_path).await;
        return Err(err.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn open_missing_file_starts_empty() {
        let temp = tempdir().expect("tempdir");
        let store = RecordStore::open(temp.path().join("records.json")).await;
        let (users, otps) = store
            .read(|doc| (doc.users.len(), doc.otp_records.len()))
            .await;
        assert_eq!(users, 0);
        assert_eq!(otps, 0);
    }

    #[tokio::test]
    async fn open_corrupt_file_starts_empty() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("records.json");
        std::fs::write(&path, b"{not json").expect("write corrupt file");

        let store = RecordStore::open(&path).await;
        assert_eq!(store.read(|doc| doc.users.len()).await, 0);
    }

    #[tokio::test]
    async fn write_persists_and_reloads() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("nested/dir/records.json");

        let store = RecordStore::open(&path).await;
        store
            .write(|doc| {
                doc.otp_records.push(OtpRecord {
                    email: "a@b.com".into(),
                    code: "123456".into(),
                    expires_at: chrono::Utc::now(),
                    attempts: 1,
                });
            })
            .await
            .expect("write");

        let reopened = RecordStore::open(&path).await;
        let record = reopened
            .read(|doc| doc.otp_records.first().cloned())
            .await
            .expect("record present");
        assert_eq!(record.email, "a@b.com");
        assert_eq!(record.attempts, 1);
    }

    #[tokio::test]
    async fn save_of_unmodified_doc_is_idempotent() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("records.json");

        let store = RecordStore::open(&path).await;
        store
            .write(|doc| {
                doc.otp_records.push(OtpRecord {
                    email: "a@b.com".into(),
                    code: "654321".into(),
                    expires_at: chrono::Utc::now(),
                    attempts: 0,
                });
            })
            .await
            .expect("write");
        let first = std::fs::read(&path).expect("read first");

        // Write back without touching anything.
        store.write(|_doc| {}).await.expect("noop write");
        let second = std::fs::read(&path).expect("read second");
        assert_eq!(first, second);
    }
}
