//! One-time passcode issuance and verification.
//!
//! One live record per email: a new issuance replaces any prior record and
//! resets the attempt counter. Records are deleted on success, on the third
//! failed attempt, and when read after expiry; until then expired records
//! simply sit in the store.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{OTP_MAX_ATTEMPTS, OTP_TTL_SECS};
use crate::store::{RecordStore, StoreError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OtpRecord {
    pub email: String,
    pub code: String,
    pub expires_at: DateTime<Utc>,
    pub attempts: u32,
}

#[derive(Debug, Error)]
pub enum OtpError {
    #[error("no passcode on file for this email, request a new one")]
    NotFound,
    #[error("too many incorrect attempts, request a new passcode")]
    AttemptsExhausted,
    #[error("the passcode has expired, request a new one")]
    Expired,
    #[error("incorrect passcode ({remaining} attempts left)")]
    Mismatch { remaining: u32 },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Uniform random 6-digit code; the range excludes anything below 100000 so
/// leading zeroes never appear.
pub fn generate_code() -> String {
    rand::rng().random_range(100_000..=999_999).to_string()
}

impl RecordStore {
    /// Stores a fresh passcode for the email, replacing any existing record.
    pub async fn issue_otp(&self, email: &str, code: &str) -> Result<(), StoreError> {
        let record = OtpRecord {
            email: email.to_lowercase(),
            code: code.to_string(),
            expires_at: Utc::now() + Duration::seconds(OTP_TTL_SECS as i64),
            attempts: 0,
        };
        self.write(move |doc| {
            doc.otp_records.retain(|r| r.email != record.email);
            doc.otp_records.push(record);
        })
        .await
    }

    /// Checks a submitted code against the stored record. Every outcome that
    /// touches the record (attempt increment, deletion) is persisted before
    /// this returns.
    pub async fn verify_otp(&self, email: &str, submitted: &str) -> Result<(), OtpError> {
        let needle = email.to_lowercase();
        let submitted = submitted.to_string();
        let outcome: Result<(), OtpError> = self
            .write(move |doc| {
                let Some(idx) = doc.otp_records.iter().position(|r| r.email == needle) else {
                    return Err(OtpError::NotFound);
                };
                let record = &mut doc.otp_records[idx];

                if record.attempts >= OTP_MAX_ATTEMPTS {
                    doc.otp_records.remove(idx);
                    return Err(OtpError::AttemptsExhausted);
                }
                if Utc::now() > record.expires_at {
                    doc.otp_records.remove(idx);
                    return Err(OtpError::Expired);
                }
                if record.code != submitted {
                    record.attempts += 1;
                    if record.attempts >= OTP_MAX_ATTEMPTS {
                        doc.otp_records.remove(idx);
                        return Err(OtpError::AttemptsExhausted);
                    }
                    let remaining = OTP_MAX_ATTEMPTS - record.attempts;
                    return Err(OtpError::Mismatch { remaining });
                }

                doc.otp_records.remove(idx);
                Ok(())
            })
            .await?;
        outcome
    }

    /// Unconditional deletion, used by cleanup paths.
    pub async fn clear_otp(&self, email: &str) -> Result<(), StoreError> {
        let needle = email.to_lowercase();
        self.write(move |doc| doc.otp_records.retain(|r| r.email != needle))
            .await
    }

    /// Removes every record past its expiry. Returns how many were dropped.
    pub async fn sweep_expired_otps(&self) -> Result<usize, StoreError> {
        let now = Utc::now();
        self.write(move |doc| {
            let before = doc.otp_records.len();
            doc.otp_records.retain(|r| r.expires_at >= now);
            before - doc.otp_records.len()
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

    #[test]
    fn generated_codes_are_six_digits() {
        for _ in 0..256 {
            let code = generate_code();
            assert_eq!(code.len(), 6);
            let value: u32 = code.parse().expect("numeric");
            assert!((100_000..=999_999).contains(&value));
        }
    }

    #[tokio::test]
    async fn verify_without_issuance_is_not_found() {
        let (_temp, store) = make_store().await;
        assert!(matches!(
            store.verify_otp("a@b.com", "123456").await,
            Err(OtpError::NotFound)
        ));
    }

    #[tokio::test]
    async fn correct_code_verifies_and_consumes_record() {
        let (_temp, store) = make_store().await;
        store.issue_otp("a@b.com", "123456").await.expect("issue");

        store.verify_otp("A@B.com", "123456").await.expect("verify");
        // Consumed on success.
        assert!(matches!(
            store.verify_otp("a@b.com", "123456").await,
            Err(OtpError::NotFound)
        ));
    }

    #[tokio::test]
    async fn two_wrong_attempts_then_correct_code_succeeds() {
        let (_temp, store) = make_store().await;
        store.issue_otp("a@b.com", "123456").await.expect("issue");

        assert!(matches!(
            store.verify_otp("a@b.com", "000000").await,
            Err(OtpError::Mismatch { remaining: 2 })
        ));
        assert!(matches!(
            store.verify_otp("a@b.com", "111111").await,
            Err(OtpError::Mismatch { remaining: 1 })
        ));
        store.verify_otp("a@b.com", "123456").await.expect("verify");
    }

    #[tokio::test]
    async fn third_wrong_attempt_exhausts_and_deletes() {
        let (_temp, store) = make_store().await;
        store.issue_otp("a@b.com", "123456").await.expect("issue");

        let _ = store.verify_otp("a@b.com", "000000").await;
        let _ = store.verify_otp("a@b.com", "000000").await;
        assert!(matches!(
            store.verify_otp("a@b.com", "000000").await,
            Err(OtpError::AttemptsExhausted)
        ));
        // Record is gone, even the correct code cannot recover it.
        assert!(matches!(
            store.verify_otp("a@b.com", "123456").await,
            Err(OtpError::NotFound)
        ));
    }

    #[tokio::test]
    async fn expired_record_is_rejected_and_deleted() {
        let (_temp, store) = make_store().await;
        store.issue_otp("a@b.com", "123456").await.expect("issue");
        store
            .write(|doc| {
                doc.otp_records[0].expires_at = Utc::now() - Duration::seconds(1);
            })
            .await
            .expect("backdate");

        assert!(matches!(
            store.verify_otp("a@b.com", "123456").await,
            Err(OtpError::Expired)
        ));
        assert!(matches!(
            store.verify_otp("a@b.com", "123456").await,
            Err(OtpError::NotFound)
        ));
    }

    #[tokio::test]
    async fn reissue_replaces_prior_code_and_resets_attempts() {
        let (_temp, store) = make_store().await;
        store.issue_otp("a@b.com", "111111").await.expect("issue");
        let _ = store.verify_otp("a@b.com", "000000").await;
        store.issue_otp("a@b.com", "222222").await.expect("reissue");

        assert_eq!(store.read(|doc| doc.otp_records.len()).await, 1);
        // The first code now fails as a plain mismatch against the new record.
        assert!(matches!(
            store.verify_otp("a@b.com", "111111").await,
            Err(OtpError::Mismatch { remaining: 2 })
        ));
        store.verify_otp("a@b.com", "222222").await.expect("verify");
    }

    #[tokio::test]
    async fn clear_removes_pending_record() {
        let (_temp, store) = make_store().await;
        store.issue_otp("a@b.com", "123456").await.expect("issue");
        store.clear_otp("A@B.COM").await.expect("clear");

        assert!(matches!(
            store.verify_otp("a@b.com", "123456").await,
            Err(OtpError::NotFound)
        ));
    }

    #[tokio::test]
    async fn sweep_drops_only_expired_records() {
        let (_temp, store) = make_store().await;
        store.issue_otp("a@b.com", "111111").await.expect("issue a");
        store.issue_otp("b@c.com", "222222").await.expect("issue b");
        store
            .write(|doc| {
                doc.otp_records[0].expires_at = Utc::now() - Duration::seconds(1);
            })
            .await
            .expect("backdate");

        let dropped = store.sweep_expired_otps().await.expect("sweep");
        assert_eq!(dropped, 1);
        assert_eq!(store.read(|doc| doc.otp_records.len()).await, 1);
    }
}
