//! Periodic cleanup of expired OTP records.
//!
//! Expiry is still enforced lazily at verification time; the sweep only
//! keeps the store from accumulating dead records.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::OTP_SWEEP_INTERVAL_SECS;
use crate::store::RecordStore;

pub fn spawn_background_tasks(store: Arc<RecordStore>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(OTP_SWEEP_INTERVAL_SECS));
        loop {
            interval.tick().await;
            match store.sweep_expired_otps().await {
                Ok(0) => {}
                Ok(count) => debug!(count, "expired otp records swept"),
                Err(err) => warn!(error = %err, "otp sweep failed"),
            }
        }
    });
}
