//! Buys a file from a paydrop server with a local private key.
//!
//! Usage: `paydrop-buyer <share-link-or-id>`
//!
//! Environment:
//! - `BUYER_PRIVATE_KEY` – key of the paying account
//! - `BASE_SEPOLIA_RPC` – JSON-RPC endpoint used to pay and to watch the transfer

use clap::Parser;
use dotenvy::dotenv;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

use paydrop::buyer::{Buyer, PaydropClient};
use paydrop::chain::ChainReader;
use paydrop::config::{LiteralOrEnv, RpcConfig, config_defaults};
use paydrop::listing::{ListingId, sanitize_filename};
use paydrop::networks;
use paydrop::poller::ConfirmationPoller;
use paydrop::util::{SigDown, Telemetry};
use paydrop::wallet::{LocalWallet, WalletConnector};

#[derive(Parser, Debug)]
#[command(name = "paydrop-buyer")]
#[command(about = "Pay for and download a file from a paydrop server")]
struct Args {
    /// Share link (`http://host/?id=<id>`) or bare listing id
    target: String,
    /// Server to use when `target` is a bare id
    #[arg(long, env = "PAYDROP_SERVER", default_value = "http://localhost:5000/")]
    server: Url,
    /// JSON-RPC endpoint of the paying chain
    #[arg(long, env = "BASE_SEPOLIA_RPC", default_value = "https://sepolia.base.org")]
    rpc: Url,
    /// Private key of the paying account
    #[arg(long, env = "BUYER_PRIVATE_KEY", hide_env_values = true)]
    private_key: String,
    /// Directory the download is written to
    #[arg(long, default_value = ".")]
    out_dir: PathBuf,
    #[arg(
        long,
        default_value_t = config_defaults::DEFAULT_POLL_INTERVAL_SECS,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    poll_interval_secs: u64,
    #[arg(
        long,
        default_value_t = config_defaults::DEFAULT_MAX_ATTEMPTS,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    max_attempts: u32,
}

fn resolve_target(
    target: &str,
    server: Url,
) -> Result<(PaydropClient, ListingId), Box<dyn std::error::Error>> {
    if target.starts_with("http://") || target.starts_with("https://") {
        Ok(PaydropClient::from_share_link(target)?)
    } else {
        Ok((PaydropClient::new(server), target.parse()?))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    let _telemetry = Telemetry::new()
        .with_name("paydrop-buyer")
        .with_version(env!("CARGO_PKG_VERSION"))
        .register();

    rustls::crypto::CryptoProvider::install_default(rustls::crypto::ring::default_provider())
        .expect("Failed to initialize rustls crypto provider");

    let args = Args::parse();
    let (client, id) = resolve_target(&args.target, args.server)?;

    let rpc = [RpcConfig {
        http: LiteralOrEnv::from_literal(args.rpc),
        rate_limit: None,
    }];
    let wallet = LocalWallet::connect(&args.private_key, &rpc).await?;
    tracing::info!(
        account = %wallet.active_account().await?,
        network = %networks::display_name(wallet.chain()),
        server = %client.base_url(),
        "Buyer ready"
    );

    let sig_down = SigDown::try_new()?;
    let poller = ConfirmationPoller::new(
        Duration::from_secs(args.poll_interval_secs),
        args.max_attempts,
    );
    let buyer =
        Buyer::new(client, wallet, poller).with_cancellation(sig_down.cancellation_token());

    let purchase = buyer.purchase(&id).await?;
    let filename = sanitize_filename(&purchase.filename).unwrap_or_else(|_| id.to_string());
    let path = args.out_dir.join(format!("agent_download_{filename}"));
    tokio::fs::write(&path, &purchase.download.bytes).await?;

    match purchase.transaction_hash {
        Some(hash) => tracing::info!(tx = %hash, path = %path.display(), "Purchased"),
        None => tracing::info!(path = %path.display(), "Downloaded free file"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn polls_like_the_server_by_default() {
        let args = Args::try_parse_from([
            "paydrop-buyer",
            "0123456789abcdef0123456789abcdef",
            "--private-key",
            "0x01",
        ])
        .unwrap();
        assert_eq!(args.poll_interval_secs, config_defaults::DEFAULT_POLL_INTERVAL_SECS);
        assert_eq!(args.max_attempts, config_defaults::DEFAULT_MAX_ATTEMPTS);
    }

    #[test]
    fn rejects_zero_poll_interval() {
        let result = Args::try_parse_from([
            "paydrop-buyer",
            "0123456789abcdef0123456789abcdef",
            "--private-key",
            "0x01",
            "--poll-interval-secs",
            "0",
        ]);
        assert!(result.is_err());
    }
}
