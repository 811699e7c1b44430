//! Admin-only user management handlers.

use axum::extract::{Extension, Json, Path};
use axum::response::Json as JsonResponse;
use axum_extra::extract::CookieJar;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::error::ApiError;
use crate::session;
use crate::store::RecordStore;
use crate::users::{Role, UserPatch, UserRecord};

/// User record plus the derived usage figures the admin screen shows.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminUserView {
    #[serde(flatten)]
    pub user: UserRecord,
    pub storage_used_gb: String,
    pub storage_percentage: String,
}

impl From<UserRecord> for AdminUserView {
    fn from(user: UserRecord) -> Self {
        let percentage = if user.storage_quota_gb > 0.0 {
            (user.used_gb() / user.storage_quota_gb * 100.0).min(100.0)
        } else {
            0.0
        };
        Self {
            storage_used_gb: format!("{:.2}", user.used_gb()),
            storage_percentage: format!("{percentage:.1}"),
            user,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UserListResponse {
    users: Vec<AdminUserView>,
}

pub async fn list_users(
    jar: CookieJar,
    Extension(store): Extension<Arc<RecordStore>>,
) -> Result<JsonResponse<UserListResponse>, ApiError> {
    session::require_admin(&store, &jar).await?;
    let users = store
        .list_users()
        .await
        .into_iter()
        .map(AdminUserView::from)
        .collect();
    Ok(JsonResponse(UserListResponse { users }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SingleUserResponse {
    user: AdminUserView,
}

pub async fn get_user(
    jar: CookieJar,
    Path(id): Path<String>,
    Extension(store): Extension<Arc<RecordStore>>,
) -> Result<JsonResponse<SingleUserResponse>, ApiError> {
    session::require_admin(&store, &jar).await?;
    let user = store
        .find_user_by_id(&id)
        .await
        .ok_or_else(|| ApiError::NotFound("user not found".into()))?;
    Ok(JsonResponse(SingleUserResponse {
        user: AdminUserView::from(user),
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UpdateUserRequest {
    name: Option<String>,
    // Kept as a raw string so unknown role values are ignored rather than
    // rejected at deserialization time.
    role: Option<String>,
    storage_quota_gb: Option<f64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UpdateUserResponse {
    success: bool,
    message: String,
    user: AdminUserView,
}

pub async fn update_user(
    jar: CookieJar,
    Path(id): Path<String>,
    Extension(store): Extension<Arc<RecordStore>>,
    Json(payload): Json<UpdateUserRequest>,
) -> Result<JsonResponse<UpdateUserResponse>, ApiError> {
    session::require_admin(&store, &jar).await?;

    if let Some(quota) = payload.storage_quota_gb
        && (!quota.is_finite() || quota < 0.0)
    {
        return Err(ApiError::BadRequest("invalid storage quota".into()));
    }
    let role = match payload.role.as_deref() {
        Some("admin") => Some(Role::Admin),
        Some("user") => Some(Role::User),
        _ => None,
    };

    let patch = UserPatch {
        name: payload.name,
        role,
        storage_quota_gb: payload.storage_quota_gb,
    };
    let user = store
        .update_user(&id, patch)
        .await?
        .ok_or_else(|| ApiError::NotFound("user not found".into()))?;
    info!(id, "user updated");

    Ok(JsonResponse(UpdateUserResponse {
        success: true,
        message: "user updated".into(),
        user: AdminUserView::from(user),
    }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct DeleteUserResponse {
    success: bool,
    message: String,
}

pub async fn delete_user(
    jar: CookieJar,
    Path(id): Path<String>,
    Extension(store): Extension<Arc<RecordStore>>,
) -> Result<JsonResponse<DeleteUserResponse>, ApiError> {
    let admin = session::require_admin(&store, &jar).await?;
    if admin.id == id {
        return Err(ApiError::BadRequest("cannot delete your own account".into()));
    }

    let user = store
        .find_user_by_id(&id)
        .await
        .ok_or_else(|| ApiError::NotFound("user not found".into()))?;
    store.delete_user(&id).await?;
    // Drop any passcode still pending for the deleted account. Files already
    // uploaded to Drive are left alone.
    store.clear_otp(&user.email).await?;
    info!(id, "user deleted");

    Ok(JsonResponse(DeleteUserResponse {
        success: true,
        message: "user deleted".into(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{SessionClaims, session_cookie};
    use tempfile::tempdir;

    async fn make_store_with_admin() -> (tempfile::TempDir, Arc<RecordStore>, CookieJar) {
        let temp = tempdir().expect("tempdir");
        let store = Arc::new(RecordStore::open(temp.path().join("records.json")).await);
        let admin = store
            .create_user("Admin", "admin@example.com", None)
            .await
            .expect("create admin");
        let jar = CookieJar::new().add(session_cookie(&SessionClaims::for_user(&admin), false));
        (temp, store, jar)
    }

    #[tokio::test]
    async fn non_admin_cannot_list_users() {
        let (_temp, store, _jar) = make_store_with_admin().await;
        let user = store
            .create_user("Bob", "bob@example.com", None)
            .await
            .expect("create user");
        let jar = CookieJar::new().add(session_cookie(&SessionClaims::for_user(&user), false));

        let result = list_users(jar, Extension(store)).await;
        assert!(matches!(result, Err(ApiError::Forbidden(_))));
    }

    #[tokio::test]
    async fn update_ignores_unknown_role_and_rejects_negative_quota() {
        let (_temp, store, jar) = make_store_with_admin().await;
        let user = store
            .create_user("Bob", "bob@example.com", None)
            .await
            .expect("create user");

        let JsonResponse(updated) = update_user(
            jar.clone(),
            Path(user.id.clone()),
            Extension(store.clone()),
            Json(UpdateUserRequest {
                name: None,
                role: Some("superuser".into()),
                storage_quota_gb: Some(10.0),
            }),
        )
        .await
        .expect("update");
        assert_eq!(updated.user.user.role, Role::User);
        assert_eq!(updated.user.user.storage_quota_gb, 10.0);

        let result = update_user(
            jar,
            Path(user.id),
            Extension(store),
            Json(UpdateUserRequest {
                name: None,
                role: None,
                storage_quota_gb: Some(-1.0),
            }),
        )
        .await;
        assert!(matches!(result, Err(ApiError::BadRequest(_))));
    }

    #[tokio::test]
    async fn admin_cannot_delete_own_account() {
        let (_temp, store, jar) = make_store_with_admin().await;
        let admin = store
            .find_user_by_email("admin@example.com")
            .await
            .expect("admin exists");

        let result = delete_user(jar, Path(admin.id), Extension(store)).await;
        assert!(matches!(result, Err(ApiError::BadRequest(_))));
    }

    #[tokio::test]
    async fn delete_removes_other_user() {
        let (_temp, store, jar) = make_store_with_admin().await;
        let user = store
            .create_user("Bob", "bob@example.com", None)
            .await
            .expect("create user");

        let JsonResponse(response) =
            delete_user(jar, Path(user.id.clone()), Extension(store.clone()))
                .await
                .expect("delete");
        assert!(response.success);
        assert!(store.find_user_by_id(&user.id).await.is_none());
    }
}
