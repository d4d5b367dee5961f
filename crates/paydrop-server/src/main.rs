mod error;
mod links;
mod pricing;
mod reaper;
mod routes;
mod storage;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::{header::CONTENT_TYPE, HeaderName, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use paydrop_db::Database;
use paydrop_x402::{usdc_for_network, Gate};

use crate::routes::AppState;
use crate::storage::Storage;

/// Placeholder receiver addresses that MUST NOT be used.
const PLACEHOLDER_RECEIVERS: &[&str] = &[
    "0x0000000000000000000000000000000000000000",
    "change-me",
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "paydrop_server=debug,paydrop_db=info,paydrop_x402=info,tower_http=debug".into()
            }),
        )
        .init();

    // Config
    let receiver = std::env::var("PAYDROP_RECEIVER_ADDRESS").unwrap_or_default();
    if receiver.is_empty() || PLACEHOLDER_RECEIVERS.contains(&receiver.as_str()) {
        eprintln!("FATAL: PAYDROP_RECEIVER_ADDRESS is unset or still a placeholder.");
        eprintln!("       Payments would be unverifiable without a real receiver wallet.");
        eprintln!("       Set it in your .env file and restart.");
        std::process::exit(1);
    }

    let host = std::env::var("PAYDROP_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("PAYDROP_PORT")
        .unwrap_or_else(|_| "5000".into())
        .parse()?;
    let storage_dir: PathBuf = std::env::var("PAYDROP_STORAGE_DIR")
        .unwrap_or_else(|_| "./file-storage".into())
        .into();
    let db_path: PathBuf = std::env::var("PAYDROP_DB_PATH")
        .unwrap_or_else(|_| "paydrop.db".into())
        .into();
    let facilitator_url = std::env::var("PAYDROP_FACILITATOR_URL")
        .unwrap_or_else(|_| "https://x402.org/facilitator".into());
    let network = std::env::var("PAYDROP_NETWORK").unwrap_or_else(|_| "base-sepolia".into());
    let cleanup_interval_secs: u64 = std::env::var("PAYDROP_CLEANUP_INTERVAL_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3600); // hourly
    let pending_grace_hours: i64 = std::env::var("PAYDROP_PENDING_GRACE_HOURS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(24);
    let max_file_size: usize = std::env::var("PAYDROP_MAX_FILE_SIZE")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(100 * 1024 * 1024); // 100 MB

    // Fail fast on a network the asset table does not know.
    let asset = usdc_for_network(&network).map_err(|e| anyhow::anyhow!(e))?;

    // Init DB, storage, and the payment gate
    let db = Arc::new(Database::open(&db_path)?);
    let storage = Arc::new(Storage::new(storage_dir).await?);
    let gate = Arc::new(Gate::new(&facilitator_url, &receiver, &network));

    // Background reaper (runs every cleanup_interval_secs)
    let pending_grace = chrono::Duration::hours(pending_grace_hours);
    tokio::spawn(reaper::run_reaper_loop(
        db.clone(),
        storage.clone(),
        cleanup_interval_secs,
        pending_grace,
    ));

    let state = AppState {
        db,
        storage,
        gate,
        max_file_size,
        pending_grace,
    };

    // CORS — permissive; the challenge headers must be visible to browsers.
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::any())
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            CONTENT_TYPE,
            HeaderName::from_static("x-payment"),
            HeaderName::from_static("x-payment-proof"),
        ])
        .expose_headers([
            HeaderName::from_static("www-authenticate"),
            HeaderName::from_static("x-payment-required"),
            HeaderName::from_static("x-payment-amount"),
            HeaderName::from_static("x-payment-currency"),
            HeaderName::from_static("x-payment-receiver"),
            HeaderName::from_static("x-payment-network"),
            HeaderName::from_static("x-payment-chain-id"),
            HeaderName::from_static("x-payment-description"),
            HeaderName::from_static("x-payment-metadata"),
            HeaderName::from_static("x-payment-nonce"),
            HeaderName::from_static("x-payment-response"),
        ])
        .allow_credentials(false);

    let app = Router::new()
        .route("/api/health", get(routes::health))
        .route("/api/files/upload", post(routes::upload_file))
        .route("/api/files/info/{share_link}", get(routes::get_file_info))
        .route("/api/files/all", get(routes::get_all_files))
        .route(
            "/api/files/{file_id}/transactions",
            get(routes::get_file_transactions),
        )
        .route("/api/payments/initiate", post(routes::initiate_payment))
        .route("/api/payments/complete", post(routes::complete_payment))
        .route(
            "/api/payments/status/{file_id}",
            get(routes::get_payment_status),
        )
        .route("/api/download/{share_link}", get(routes::download_file))
        .route("/api/admin/cleanup", post(routes::admin_cleanup))
        .layer(DefaultBodyLimit::max(max_file_size + 1024 * 1024))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Paydrop server listening on {}", addr);
    info!("Payment network: {} (chain {})", network, asset.chain_id);
    info!("Facilitator: {}", facilitator_url);
    info!("Receiver wallet: {}", receiver);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
