//! Storage summary and Drive-usage reconciliation handlers.

use axum::extract::Extension;
use axum::response::Json as JsonResponse;
use axum_extra::extract::CookieJar;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use crate::drive::DriveClient;
use crate::error::ApiError;
use crate::session;
use crate::store::RecordStore;
use crate::users::{GIB, Role, UserRecord};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageQuotaView {
    pub limit: u64,
    pub limit_gb: f64,
    pub usage: u64,
    pub usage_gb: String,
    pub percentage: String,
}

impl StorageQuotaView {
    pub fn new(user: &UserRecord, used_bytes: u64) -> Self {
        let limit = user.quota_bytes();
        let percentage = if limit > 0 {
            (used_bytes as f64 / limit as f64 * 100.0).min(100.0)
        } else {
            0.0
        };
        Self {
            limit,
            limit_gb: user.storage_quota_gb,
            usage: used_bytes,
            usage_gb: format!("{:.2}", used_bytes as f64 / GIB as f64),
            percentage: format!("{percentage:.1}"),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StorageUserView {
    name: String,
    email: String,
    role: Role,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StorageInfoResponse {
    storage_quota: StorageQuotaView,
    user: StorageUserView,
}

/// Current user's quota/usage summary, straight from the ledger.
pub async fn storage_info(
    jar: CookieJar,
    Extension(store): Extension<Arc<RecordStore>>,
) -> Result<JsonResponse<StorageInfoResponse>, ApiError> {
    let user = session::current_user(&store, &jar).await?;
    Ok(JsonResponse(StorageInfoResponse {
        storage_quota: StorageQuotaView::new(&user, user.storage_used_bytes),
        user: StorageUserView {
            name: user.name.clone(),
            email: user.email.clone(),
            role: user.role,
        },
    }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SyncResponse {
    success: bool,
    message: String,
    storage_quota: StorageQuotaView,
}

/// Recomputes actual usage from the full Drive listing and overwrites the
/// ledger figure. This is the correction path for drift caused by changes
/// made directly in Drive.
pub async fn sync_storage(
    jar: CookieJar,
    Extension(store): Extension<Arc<RecordStore>>,
    Extension(drive): Extension<Arc<DriveClient>>,
) -> Result<JsonResponse<SyncResponse>, ApiError> {
    let user = session::current_user(&store, &jar).await?;

    let total = drive.total_usage_bytes(drive.root_folder()).await?;
    store
        .set_usage(&user.id, total)
        .await?
        .ok_or_else(|| ApiError::NotFound("user not found".into()))?;
    info!(user = user.email, total, "storage usage reconciled");

    Ok(JsonResponse(SyncResponse {
        success: true,
        message: "storage usage synced".into(),
        storage_quota: StorageQuotaView::new(&user, total),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn make_user(quota_gb: f64, used: u64) -> UserRecord {
        UserRecord {
            id: "user_1".into(),
            name: "Alice".into(),
            email: "alice@example.com".into(),
            role: Role::User,
            storage_quota_gb: quota_gb,
            storage_used_bytes: used,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn quota_view_formats_gb_and_percentage() {
        let user = make_user(1.0, 536_870_912);
        let view = StorageQuotaView::new(&user, user.storage_used_bytes);
        assert_eq!(view.limit, 1_073_741_824);
        assert_eq!(view.usage_gb, "0.50");
        assert_eq!(view.percentage, "50.0");
    }

    #[test]
    fn quota_view_caps_percentage_and_handles_zero_quota() {
        let over = make_user(1.0, 2 * GIB);
        assert_eq!(StorageQuotaView::new(&over, over.storage_used_bytes).percentage, "100.0");

        let zero = make_user(0.0, 123);
        assert_eq!(StorageQuotaView::new(&zero, 123).percentage, "0.0");
    }
}
