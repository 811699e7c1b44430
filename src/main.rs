//! CloudSync server binary.
//!
//! A cloud-storage front-end that keeps durable file storage in Google
//! Drive and wraps it with its own OTP authentication, per-user quota
//! ledger, and a JSON record store. The main entry point builds the Axum
//! router and starts the HTTP listener.

mod admin;
mod auth;
mod background;
mod config;
mod drive;
mod error;
mod files;
mod http;
mod logging;
mod mailer;
mod otp;
mod session;
mod store;
mod usage;
mod users;
mod version;

use axum::extract::{DefaultBodyLimit, Extension, connect_info::ConnectInfo};
use axum::http::Request;
use axum::routing::{delete, get, post};
use axum::{Router, middleware};
use axum_server::Handle;
use clap::Parser;
use shadow_rs::shadow;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, info, info_span, warn};

use crate::background::spawn_background_tasks;
use crate::config::Args;
use crate::drive::{DriveClient, ServiceAccount};
use crate::mailer::Mailer;
use crate::store::RecordStore;

shadow!(build);

/// Starts the CloudSync server and blocks until shutdown.
#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    logging::init_logging();

    let args = Args::parse();
    let store = Arc::new(RecordStore::open(args.store_path.clone()).await);

    let credentials = match (&args.service_account_email, &args.service_account_key) {
        (Some(email), Some(key)) => Some(ServiceAccount {
            client_email: email.clone(),
            private_key: key.clone(),
        }),
        _ => {
            warn!("drive credentials not configured, drive operations will fail");
            None
        }
    };
    let drive = Arc::new(DriveClient::new(credentials, args.drive_folder_id.clone()));
    let mailer = Arc::new(Mailer::new(
        args.mail_endpoint.clone(),
        args.mail_api_key.clone(),
        args.mail_from.clone(),
    ));
    if !mailer.is_configured() {
        warn!("mail endpoint not configured, otp codes will only appear in the log");
    }

    let mut app = Router::new()
        .route("/api/auth/send-otp", post(auth::send_otp))
        .route("/api/auth/signup", post(auth::signup))
        .route("/api/auth/verify-otp", post(auth::verify_otp))
        .route("/api/auth/logout", post(auth::logout))
        .route("/api/auth/me", get(auth::session_info))
        .route("/api/admin/users", get(admin::list_users))
        .route(
            "/api/admin/users/{id}",
            get(admin::get_user)
                .put(admin::update_user)
                .delete(admin::delete_user),
        )
        .route("/api/files", get(files::list_files))
        .route(
            "/api/files/upload",
            post(files::upload_file).layer(DefaultBodyLimit::max(args.upload_max_bytes)),
        )
        .route(
            "/api/files/{id}",
            delete(files::delete_file).patch(files::rename_file),
        )
        .route("/api/folders", post(files::create_folder))
        .route("/api/storage", get(usage::storage_info))
        .route("/api/storage/sync", post(usage::sync_storage))
        .route("/api/version", get(version::get_version_info))
        .layer(middleware::from_fn(http::add_security_headers))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request<_>| {
                    let forwarded_ip = request
                        .headers()
                        .get("x-forwarded-for")
                        .and_then(|v| v.to_str().ok())
                        .map(|s| s.split(',').next().unwrap_or("").trim().to_string());
                    let connect_ip = request
                        .extensions()
                        .get::<ConnectInfo<SocketAddr>>()
                        .map(|ConnectInfo(addr)| addr.to_string());
                    let client_ip = forwarded_ip
                        .or(connect_ip)
                        .unwrap_or_else(|| "unknown".to_string());

                    info_span!(
                        env!("CARGO_CRATE_NAME"),
                        client_ip,
                        method = ?request.method(),
                        path = ?request.uri().path(),
                    )
                })
                .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
        )
        .layer(Extension(store.clone()))
        .layer(Extension(drive))
        .layer(Extension(mailer));

    if let Some(cors_layer) = http::build_cors_layer(args.cors_origins.as_deref()) {
        app = app.layer(cors_layer);
    }

    let host = args
        .host
        .parse::<IpAddr>()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err.to_string()))?;
    let addr = SocketAddr::new(host, args.http_port);
    let handle = Handle::new();

    info!("starting HTTP server at {}", addr);

    let server = axum_server::bind(addr)
        .handle(handle.clone())
        .serve(app.into_make_service_with_connect_info::<SocketAddr>());

    spawn_background_tasks(store);
    tokio::select! {
        result = server => result?,
        _ = shutdown_signal(handle) => {}
    }

    Ok(())
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("received termination signal, shutting down");
    handle.graceful_shutdown(Some(Duration::from_secs(10)));
}
