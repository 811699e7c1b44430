//! Session cookie decoding and identity resolution.
//!
//! The cookie value is base64-encoded JSON. This module only translates
//! credential material into a ledger identity; it never creates or mutates
//! user records.

use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use cookie::time::Duration as CookieDuration;
use serde::{Deserialize, Serialize};

use crate::config::{SESSION_COOKIE_NAME, SESSION_MAX_AGE_SECS};
use crate::error::ApiError;
use crate::store::RecordStore;
use crate::users::{Role, UserRecord};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionClaims {
    pub user_id: String,
    pub email: String,
    pub name: String,
    pub login_at: DateTime<Utc>,
}

impl SessionClaims {
    pub fn for_user(user: &UserRecord) -> Self {
        Self {
            user_id: user.id.clone(),
            email: user.email.clone(),
            name: user.name.clone(),
            login_at: Utc::now(),
        }
    }
}

pub fn encode_session(claims: &SessionClaims) -> String {
    // Serializing a plain struct cannot fail.
    let json = serde_json::to_vec(claims).unwrap_or_default();
    BASE64.encode(json)
}

/// Any decode failure means "unauthenticated", never an error.
pub fn decode_session(value: &str) -> Option<SessionClaims> {
    let bytes = BASE64.decode(value).ok()?;
    serde_json::from_slice(&bytes).ok()
}

pub fn session_cookie(claims: &SessionClaims, secure: bool) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE_NAME, encode_session(claims)))
        .path("/")
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .max_age(CookieDuration::seconds(SESSION_MAX_AGE_SECS as i64))
        .build()
}

pub fn removal_cookie() -> Cookie<'static> {
    Cookie::build(SESSION_COOKIE_NAME).path("/").build()
}

/// Resolves the calling user from the session cookie, by id first and email
/// as a fallback.
pub async fn current_user(store: &RecordStore, jar: &CookieJar) -> Result<UserRecord, ApiError> {
    let claims = jar
        .get(SESSION_COOKIE_NAME)
        .and_then(|cookie| decode_session(cookie.value()))
        .ok_or_else(|| ApiError::Unauthenticated("please sign in".into()))?;

    match store.find_user_by_id(&claims.user_id).await {
        Some(user) => Ok(user),
        // The account behind the session is gone; treat it as signed out.
        None => store
            .find_user_by_email(&claims.email)
            .await
            .ok_or_else(|| ApiError::Unauthenticated("please sign in".into())),
    }
}

/// Like `current_user`, but the resolved identity must be an admin.
pub async fn require_admin(store: &RecordStore, jar: &CookieJar) -> Result<UserRecord, ApiError> {
    let user = current_user(store, jar).await?;
    if user.role != Role::Admin {
        return Err(ApiError::Forbidden("admin access required".into()));
    }
    Ok(user)
}
