//! User records and the storage-quota ledger.
//!
//! Usage bytes are only ever touched by `adjust_usage` / `set_usage`; the
//! quota check is advisory and runs before an upload is attempted, so two
//! concurrent uploads can both pass it. Acceptable at the intended scale.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config::DEFAULT_QUOTA_GB;
use crate::store::{RecordStore, StoreError};

pub const GIB: u64 = 1 << 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub storage_quota_gb: f64,
    pub storage_used_bytes: u64,
    pub created_at: DateTime<Utc>,
}

impl UserRecord {
    pub fn quota_bytes(&self) -> u64 {
        (self.storage_quota_gb * GIB as f64) as u64
    }

    pub fn used_gb(&self) -> f64 {
        self.storage_used_bytes as f64 / GIB as f64
    }

    /// Admission check for an incoming upload. Exactly filling the quota is
    /// still allowed.
    pub fn check_quota(&self, incoming_bytes: u64) -> Result<(), QuotaError> {
        if self.storage_used_bytes.saturating_add(incoming_bytes) > self.quota_bytes() {
            return Err(QuotaError::Exceeded {
                used_gb: self.used_gb(),
                quota_gb: self.storage_quota_gb,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum QuotaError {
    #[error("user not found")]
    UnknownUser,
    #[error("not enough storage: {used_gb:.2} GB of {quota_gb:.2} GB already in use")]
    Exceeded { used_gb: f64, quota_gb: f64 },
}

/// Partial update applied by `update_user`; `None` fields are left untouched.
#[derive(Debug, Default)]
pub struct UserPatch {
    pub name: Option<String>,
    pub role: Option<Role>,
    pub storage_quota_gb: Option<f64>,
}

impl RecordStore {
    pub async fn find_user_by_email(&self, email: &str) -> Option<UserRecord> {
        let needle = email.to_lowercase();
        self.read(|doc| {
            doc.users
                .iter()
                .find(|u| u.email.to_lowercase() == needle)
                .cloned()
        })
        .await
    }

    pub async fn find_user_by_id(&self, id: &str) -> Option<UserRecord> {
        self.read(|doc| doc.users.iter().find(|u| u.id == id).cloned())
            .await
    }

    /// All users in insertion order.
    pub async fn list_users(&self) -> Vec<UserRecord> {
        self.read(|doc| doc.users.clone()).await
    }

    /// Creates a user. The very first user in an empty store becomes admin;
    /// everyone after that defaults to a regular user.
    pub async fn create_user(
        &self,
        name: &str,
        email: &str,
        role: Option<Role>,
    ) -> Result<UserRecord, StoreError> {
        let name = name.to_string();
        let email = email.to_lowercase();
        self.write(move |doc| {
            let role = role.unwrap_or(if doc.users.is_empty() {
                Role::Admin
            } else {
                Role::User
            });
            let user = UserRecord {
                id: format!("user_{}", Uuid::new_v4().simple()),
                name,
                email,
                role,
                storage_quota_gb: DEFAULT_QUOTA_GB,
                storage_used_bytes: 0,
                created_at: Utc::now(),
            };
            doc.users.push(user.clone());
            user
        })
        .await
    }

    /// Applies a partial patch. Returns `None` when the user does not exist.
    pub async fn update_user(
        &self,
        id: &str,
        patch: UserPatch,
    ) -> Result<Option<UserRecord>, StoreError> {
        self.write(|doc| {
            let user = doc.users.iter_mut().find(|u| u.id == id)?;
            if let Some(name) = patch.name {
                user.name = name;
            }
            if let Some(role) = patch.role {
                user.role = role;
            }
            if let Some(quota) = patch.storage_quota_gb {
                user.storage_quota_gb = quota;
            }
            Some(user.clone())
        })
        .await
    }

    /// Removes the record. Files already uploaded to Drive under this user
    /// are not reclaimed.
    pub async fn delete_user(&self, id: &str) -> Result<bool, StoreError> {
        self.write(|doc| {
            let before = doc.users.len();
            doc.users.retain(|u| u.id != id);
            doc.users.len() != before
        })
        .await
    }

    /// Adds `delta_bytes` to the usage counter, clamping at zero. Returns the
    /// new usage, or `None` when the user does not exist.
    pub async fn adjust_usage(
        &self,
        id: &str,
        delta_bytes: i64,
    ) -> Result<Option<u64>, StoreError> {
        self.write(|doc| {
            let user = doc.users.iter_mut().find(|u| u.id == id)?;
            let next = (user.storage_used_bytes as i64).saturating_add(delta_bytes);
            user.storage_used_bytes = next.max(0) as u64;
            Some(user.storage_used_bytes)
        })
        .await
    }

    /// Absolute overwrite of the usage counter, used by reconciliation.
    pub async fn set_usage(&self, id: &str, bytes: u64) -> Result<Option<u64>, StoreError> {
        self.write(|doc| {
            let user = doc.users.iter_mut().find(|u| u.id == id)?;
            user.storage_used_bytes = bytes;
            Some(user.storage_used_bytes)
        })
        .await
    }

    pub async fn check_quota(&self, id: &str, incoming_bytes: u64) -> Result<(), QuotaError> {
        self.read(|doc| {
            let user = doc
                .users
                .iter()
                .find(|u| u.id == id)
                .ok_or(QuotaError::UnknownUser)?;
            user.check_quota(incoming_bytes)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn make_store() -> (tempfile::TempDir, RecordStore) {
        let temp = tempdir().expect("tempdir");
        let store = RecordStore::open(temp.path().join("records.json")).await;
        (temp, store)
    }

    #[tokio::test]
    async fn first_user_becomes_admin_second_does_not() {
        let (_temp, store) = make_store().await;
        let first = store
            .create_user("Alice", "Alice@Example.com", None)
            .await
            .expect("create first");
        let second = store
            .create_user("Bob", "bob@example.com", None)
            .await
            .expect("create second");

        assert_eq!(first.role, Role::Admin);
        assert_eq!(second.role, Role::User);
        assert_eq!(first.email, "alice@example.com");
        assert_eq!(first.storage_quota_gb, DEFAULT_QUOTA_GB);
        assert_eq!(first.storage_used_bytes, 0);
    }

    #[tokio::test]
    async fn email_lookup_is_case_insensitive() {
        let (_temp, store) = make_store().await;
        store
            .create_user("Alice", "alice@example.com", None)
            .await
            .expect("create");

        assert!(store.find_user_by_email("ALICE@EXAMPLE.COM").await.is_some());
        assert!(store.find_user_by_email("nobody@example.com").await.is_none());
    }

    #[tokio::test]
    async fn adjust_usage_clamps_at_zero() {
        let (_temp, store) = make_store().await;
        let user = store
            .create_user("Alice", "alice@example.com", None)
            .await
            .expect("create");

        store
            .adjust_usage(&user.id, 1_000)
            .await
            .expect("adjust up");
        let used = store
            .adjust_usage(&user.id, -5_000)
            .await
            .expect("adjust down")
            .expect("user exists");
        assert_eq!(used, 0);
    }

    #[tokio::test]
    async fn quota_boundary_is_allowed() {
        let (_temp, store) = make_store().await;
        let user = store
            .create_user("Alice", "alice@example.com", None)
            .await
            .expect("create");
        store
            .update_user(
                &user.id,
                UserPatch {
                    storage_quota_gb: Some(1.0),
                    ..Default::default()
                },
            )
            .await
            .expect("update");
        store
            .set_usage(&user.id, 900_000_000)
            .await
            .expect("set usage");

        // 900_000_000 + 200_000_000 > 1 GiB: denied.
        assert!(matches!(
            store.check_quota(&user.id, 200_000_000).await,
            Err(QuotaError::Exceeded { .. })
        ));
        // 900_000_000 + 100_000_000 = 1_000_000_000 <= 1_073_741_824: allowed.
        assert!(store.check_quota(&user.id, 100_000_000).await.is_ok());
        // Exactly at the limit is still allowed.
        assert!(store.check_quota(&user.id, 173_741_824).await.is_ok());
        assert!(matches!(
            store.check_quota(&user.id, 173_741_825).await,
            Err(QuotaError::Exceeded { .. })
        ));
    }

    #[tokio::test]
    async fn update_patch_leaves_omitted_fields_untouched() {
        let (_temp, store) = make_store().await;
        let user = store
            .create_user("Alice", "alice@example.com", None)
            .await
            .expect("create");

        let updated = store
            .update_user(
                &user.id,
                UserPatch {
                    name: Some("Alicia".into()),
                    ..Default::default()
                },
            )
            .await
            .expect("update")
            .expect("user exists");

        assert_eq!(updated.name, "Alicia");
        assert_eq!(updated.role, Role::Admin);
        assert_eq!(updated.storage_quota_gb, DEFAULT_QUOTA_GB);
    }

    #[tokio::test]
    async fn delete_user_removes_record() {
        let (_temp, store) = make_store().await;
        let user = store
            .create_user("Alice", "alice@example.com", None)
            .await
            .expect("create");

        assert!(store.delete_user(&user.id).await.expect("delete"));
        assert!(!store.delete_user(&user.id).await.expect("second delete"));
        assert!(store.find_user_by_id(&user.id).await.is_none());
    }
}
