//! Authentication handlers: OTP request, signup, verification, session.

use axum::extract::{Extension, Json};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Json as JsonResponse;
use axum_extra::extract::CookieJar;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::ApiError;
use crate::http::is_https_request;
use crate::mailer::Mailer;
use crate::otp::{self, OtpError};
use crate::session::{self, SessionClaims};
use crate::store::RecordStore;
use crate::users::{Role, UserRecord};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSummary {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
}

impl From<&UserRecord> for UserSummary {
    fn from(user: &UserRecord) -> Self {
        Self {
            id: user.id.clone(),
            name: user.name.clone(),
            email: user.email.clone(),
            role: user.role,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SendOtpRequest {
    email: String,
    #[serde(default)]
    is_sign_in: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SendOtpResponse {
    success: bool,
    message: String,
}

/// Issues a passcode and mails it. For the sign-in flow the account must
/// already exist.
pub async fn send_otp(
    Extension(store): Extension<Arc<RecordStore>>,
    Extension(mailer): Extension<Arc<Mailer>>,
    Json(payload): Json<SendOtpRequest>,
) -> Result<JsonResponse<SendOtpResponse>, ApiError> {
    let email = payload.email.trim().to_string();
    if !is_valid_email(&email) {
        return Err(ApiError::BadRequest("invalid email address".into()));
    }

    let user_name = if payload.is_sign_in {
        let user = store.find_user_by_email(&email).await.ok_or_else(|| {
            ApiError::NotFound("no account for this email, please sign up first".into())
        })?;
        Some(user.name)
    } else {
        None
    };

    let code = otp::generate_code();
    store.issue_otp(&email, &code).await?;
    info!(email, "otp issued");

    if let Err(err) = mailer.send_otp(&email, &code, user_name.as_deref()).await {
        warn!(email, error = %err, "otp mail delivery failed");
        return Err(ApiError::Upstream(
            502,
            "could not send the passcode email, try again".into(),
        ));
    }

    Ok(JsonResponse(SendOtpResponse {
        success: true,
        message: "passcode sent, check your email".into(),
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SignupRequest {
    name: String,
    email: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SignupResponse {
    success: bool,
    message: String,
    user_id: String,
}

/// Creates an account and issues a first passcode. Mail failure here is
/// logged but does not fail the request; in demo mode the code is in the
/// server log anyway.
pub async fn signup(
    Extension(store): Extension<Arc<RecordStore>>,
    Extension(mailer): Extension<Arc<Mailer>>,
    Json(payload): Json<SignupRequest>,
) -> Result<JsonResponse<SignupResponse>, ApiError> {
    let name = payload.name.trim().to_string();
    let email = payload.email.trim().to_string();
    if name.is_empty() {
        return Err(ApiError::BadRequest("name is required".into()));
    }
    if !is_valid_email(&email) {
        return Err(ApiError::BadRequest("invalid email address".into()));
    }
    if store.find_user_by_email(&email).await.is_some() {
        return Err(ApiError::Conflict(
            "this email is already registered, please sign in".into(),
        ));
    }

    let user = store.create_user(&name, &email, None).await?;
    info!(email = user.email, role = ?user.role, "user created");

    let code = otp::generate_code();
    store.issue_otp(&user.email, &code).await?;
    if let Err(err) = mailer.send_otp(&user.email, &code, Some(&user.name)).await {
        warn!(email = user.email, error = %err, "signup otp mail failed, continuing");
    }

    Ok(JsonResponse(SignupResponse {
        success: true,
        message: "account created, check your email for the passcode".into(),
        user_id: user.id,
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct VerifyOtpRequest {
    email: String,
    code: String,
    name: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct VerifyOtpResponse {
    success: bool,
    message: String,
    user: UserSummary,
}

/// Runs the OTP state machine and establishes the session cookie on success.
pub async fn verify_otp(
    headers: HeaderMap,
    jar: CookieJar,
    Extension(store): Extension<Arc<RecordStore>>,
    Json(payload): Json<VerifyOtpRequest>,
) -> Result<(CookieJar, JsonResponse<VerifyOtpResponse>), ApiError> {
    let email = payload.email.trim().to_string();
    if email.is_empty() || payload.code.trim().is_empty() {
        return Err(ApiError::BadRequest("email and passcode are required".into()));
    }

    match store.verify_otp(&email, payload.code.trim()).await {
        Ok(()) => {}
        Err(OtpError::Store(err)) => return Err(err.into()),
        Err(err) => return Err(ApiError::BadRequest(err.to_string())),
    }

    let user = match store.find_user_by_email(&email).await {
        Some(user) => user,
        // Signup flow: the account is created only after the code checks out.
        None => match payload.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
            Some(name) => store.create_user(name, &email, None).await?,
            None => return Err(ApiError::NotFound("user not found".into())),
        },
    };

    let claims = SessionClaims::for_user(&user);
    let secure = is_https_request(&headers);
    let jar = jar.add(session::session_cookie(&claims, secure));
    info!(email = user.email, "signed in");

    Ok((
        jar,
        JsonResponse(VerifyOtpResponse {
            success: true,
            message: "signed in".into(),
            user: UserSummary::from(&user),
        }),
    ))
}

/// Clears the session cookie.
pub async fn logout(jar: CookieJar) -> (CookieJar, StatusCode) {
    (jar.remove(session::removal_cookie()), StatusCode::NO_CONTENT)
}

/// Returns the calling user, or 401 when the cookie does not resolve.
pub async fn session_info(
    jar: CookieJar,
    Extension(store): Extension<Arc<RecordStore>>,
) -> Result<JsonResponse<UserSummary>, ApiError> {
    let user = session::current_user(&store, &jar).await?;
    Ok(JsonResponse(UserSummary::from(&user)))
}

fn is_valid_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !email.contains(char::is_whitespace)
        && !domain.contains('@')
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn make_mailer() -> Arc<Mailer> {
        Arc::new(Mailer::new(None, None, "CloudSync <no-reply@test>".into()))
    }

    async fn make_store() -> (tempfile::TempDir, Arc<RecordStore>) {
        let temp = tempdir().expect("tempdir");
        let store = RecordStore::open(temp.path().join("records.json")).await;
        (temp, Arc::new(store))
    }

    #[test]
    fn email_validation() {
        assert!(is_valid_email("a@b.com"));
        assert!(is_valid_email("first.last@mail.example.org"));
        assert!(!is_valid_email("no-at-sign"));
        assert!(!is_valid_email("@missing-local.com"));
        assert!(!is_valid_email("spaced name@b.com"));
        assert!(!is_valid_email("a@nodot"));
    }

    #[tokio::test]
    async fn sign_in_otp_requires_existing_account() {
        let (_temp, store) = make_store().await;
        let result = send_otp(
            Extension(store),
            Extension(make_mailer()),
            Json(SendOtpRequest {
                email: "nobody@example.com".into(),
                is_sign_in: true,
            }),
        )
        .await;

        assert!(matches!(result, Err(ApiError::NotFound(_))));
    }

    #[tokio::test]
    async fn signup_rejects_duplicate_email() {
        let (_temp, store) = make_store().await;
        store
            .create_user("Alice", "alice@example.com", None)
            .await
            .expect("create");

        let result = signup(
            Extension(store),
            Extension(make_mailer()),
            Json(SignupRequest {
                name: "Other Alice".into(),
                email: "Alice@Example.com".into(),
            }),
        )
        .await;

        assert!(matches!(result, Err(ApiError::Conflict(_))));
    }

    #[tokio::test]
    async fn verify_otp_creates_user_and_sets_cookie_on_signup_flow() {
        let (_temp, store) = make_store().await;
        store
            .issue_otp("alice@example.com", "123456")
            .await
            .expect("issue");

        let (jar, JsonResponse(response)) = verify_otp(
            HeaderMap::new(),
            CookieJar::new(),
            Extension(store.clone()),
            Json(VerifyOtpRequest {
                email: "alice@example.com".into(),
                code: "123456".into(),
                name: Some("Alice".into()),
            }),
        )
        .await
        .expect("verify");

        assert!(response.success);
        assert_eq!(response.user.role, Role::Admin);
        let cookie = jar
            .get(crate::config::SESSION_COOKIE_NAME)
            .expect("cookie set");
        let claims = session::decode_session(cookie.value()).expect("decode");
        assert_eq!(claims.email, "alice@example.com");
        assert!(store.find_user_by_email("alice@example.com").await.is_some());
    }

    #[tokio::test]
    async fn verify_otp_with_wrong_code_reports_remaining_attempts() {
        let (_temp, store) = make_store().await;
        store
            .issue_otp("alice@example.com", "123456")
            .await
            .expect("issue");

        let result = verify_otp(
            HeaderMap::new(),
            CookieJar::new(),
            Extension(store),
            Json(VerifyOtpRequest {
                email: "alice@example.com".into(),
                code: "000000".into(),
                name: None,
            }),
        )
        .await;

        match result {
            Err(ApiError::BadRequest(msg)) => assert!(msg.contains("2 attempts left")),
            _ => panic!("expected bad request with remaining attempts"),
        }
    }
}
