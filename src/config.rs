//! CLI arguments and server configuration defaults.

use clap::Parser;
use shadow_rs::formatcp;

use crate::build;

const VERSION_INFO: &str = formatcp!(
    r#"{}\ncommit_hash: {}\nbuild_time: {}\nbuild_env: {},{}"#,
    build::PKG_VERSION,
    build::SHORT_COMMIT,
    build::BUILD_TIME,
    build::RUST_VERSION,
    build::RUST_CHANNEL
);

pub const SESSION_COOKIE_NAME: &str = "auth-session";
pub const SESSION_MAX_AGE_SECS: u64 = 7 * 24 * 60 * 60;
pub const DEFAULT_QUOTA_GB: f64 = 5.0;
pub const OTP_TTL_SECS: u64 = 5 * 60;
pub const OTP_MAX_ATTEMPTS: u32 = 3;
pub const OTP_SWEEP_INTERVAL_SECS: u64 = 300;
pub const DRIVE_PAGE_SIZE: u32 = 1000;
pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";
pub const DEFAULT_UPLOAD_MAX_BYTES: usize = 100 * 1024 * 1024;

/// CLI arguments and environment configuration for the server.
#[derive(Parser, Debug)]
#[command(name = "cloudsync", version = VERSION_INFO, about = "CloudSync server")]
pub struct Args {
    #[arg(
        short = 'b',
        long,
        env = "CLOUDSYNC_BIND",
        default_value = "0.0.0.0",
        help = "Bind address for HTTP"
    )]
    pub host: String,
    #[arg(
        short = 'p',
        long,
        env = "CLOUDSYNC_HTTP_PORT",
        default_value_t = 4080,
        help = "HTTP port"
    )]
    pub http_port: u16,
    #[arg(
        short = 's',
        long,
        env = "CLOUDSYNC_STORE_PATH",
        default_value = ".cloudsync/records.json",
        help = "Path of the JSON record store"
    )]
    pub store_path: String,
    #[arg(
        long,
        env = "GOOGLE_DRIVE_FOLDER_ID",
        default_value = "root",
        help = "Drive folder that holds all managed files"
    )]
    pub drive_folder_id: String,
    #[arg(
        long,
        env = "GOOGLE_SERVICE_ACCOUNT_EMAIL",
        help = "Service account email for Drive access"
    )]
    pub service_account_email: Option<String>,
    #[arg(
        long,
        env = "GOOGLE_SERVICE_ACCOUNT_PRIVATE_KEY",
        help = "Service account private key (PEM, \\n escapes allowed)"
    )]
    pub service_account_key: Option<String>,
    #[arg(
        long,
        env = "CLOUDSYNC_MAIL_ENDPOINT",
        help = "HTTP mail API endpoint for OTP delivery (unset = log codes)"
    )]
    pub mail_endpoint: Option<String>,
    #[arg(
        long,
        env = "CLOUDSYNC_MAIL_API_KEY",
        help = "Bearer token for the mail API"
    )]
    pub mail_api_key: Option<String>,
    #[arg(
        long,
        env = "CLOUDSYNC_MAIL_FROM",
        default_value = "CloudSync <no-reply@cloudsync.local>",
        help = "From address for OTP mails"
    )]
    pub mail_from: String,
    #[arg(
        long,
        env = "CLOUDSYNC_CORS_ORIGINS",
        help = "Comma separated CORS origins"
    )]
    pub cors_origins: Option<String>,
    #[arg(
        long,
        env = "CLOUDSYNC_UPLOAD_MAX_BYTES",
        default_value_t = DEFAULT_UPLOAD_MAX_BYTES,
        help = "Max accepted upload body size in bytes"
    )]
    pub upload_max_bytes: usize,
}
