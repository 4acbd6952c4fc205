//! Paydrop HTTP entrypoint.
//!
//! Endpoints:
//! - `GET /health` – Liveness probe
//! - `POST /api/upload` – Store a file with a price and return its share link
//! - `GET /api/file/{id}/info` – Quote for a listing
//! - `POST /api/file/{id}/unlock` – Confirm a payment and download the file
//!
//! Environment:
//! - `.env` values loaded at startup
//! - `CONFIG` points at the JSON configuration file
//! - `HOST`, `PORT` control binding address
//! - `OTEL_*` variables enable tracing export when built with the `telemetry` feature

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::http::Method;
use dotenvy::dotenv;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors;

use paydrop::chain::Eip155ChainProvider;
use paydrop::config::Config;
use paydrop::gate::UnlockGate;
use paydrop::handlers::{self, AppState};
use paydrop::ledger::{LEDGER_FILE_NAME, SettlementLedger};
use paydrop::networks;
use paydrop::poller::ConfirmationPoller;
use paydrop::store::FsAssetStore;
use paydrop::util::{SigDown, Telemetry};
use paydrop::verifier::PaymentVerifier;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    let telemetry = Telemetry::new()
        .with_name(env!("CARGO_PKG_NAME"))
        .with_version(env!("CARGO_PKG_VERSION"))
        .register();

    rustls::crypto::CryptoProvider::install_default(rustls::crypto::ring::default_provider())
        .expect("Failed to initialize rustls crypto provider");

    let config = Config::load()?;

    let store = FsAssetStore::open(config.storage_dir()).await?;
    let ledger = SettlementLedger::open(config.storage_dir().join(LEDGER_FILE_NAME)).await?;
    tracing::info!(
        storage = %store.root().display(),
        settlements = ledger.len(),
        "Storage ready"
    );

    let chain = Eip155ChainProvider::from_config(config.chain()).await?;
    tracing::info!(
        network = %networks::display_name(config.chain().id),
        receiver = %config.receiver(),
        "Chain connected"
    );

    let sig_down = SigDown::try_new()?;

    let gate = UnlockGate::new(
        Arc::new(store),
        Arc::new(chain),
        ConfirmationPoller::from(config.confirmation()),
        PaymentVerifier::new(config.receiver(), config.verify_sender()),
        Arc::new(ledger),
    )
    .with_shutdown(sig_down.cancellation_token());

    let axum_state = Arc::new(AppState {
        gate: Arc::new(gate),
        public_url: config.public_url(),
    });

    let http_endpoints = Router::new()
        .merge(handlers::routes().with_state(axum_state))
        .layer(DefaultBodyLimit::max(config.max_upload_bytes()))
        .layer(telemetry.http_tracing())
        .layer(
            cors::CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([Method::GET, Method::POST])
                .allow_headers(cors::Any),
        );

    let addr = SocketAddr::new(config.host(), config.port());
    tracing::info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .unwrap_or_else(|e| {
            tracing::error!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        });

    let axum_cancellation_token = sig_down.cancellation_token();
    let axum_graceful_shutdown = async move { axum_cancellation_token.cancelled().await };
    axum::serve(listener, http_endpoints)
        .with_graceful_shutdown(axum_graceful_shutdown)
        .await?;
    sig_down.recv().await;

    Ok(())
}
