//! JSON-RPC access to an EIP-155 chain.
//!
//! [`Eip155ChainProvider`] answers "has this transaction been mined, and what did it do?"
//! using a rate-limited fallback transport over every configured RPC endpoint.

use alloy_consensus::Transaction as _;
use alloy_primitives::TxHash;
use alloy_provider::{Provider, RootProvider};
use alloy_rpc_client::RpcClient;
use alloy_transport::layers::{FallbackLayer, ThrottleLayer};
use alloy_transport_http::Http;
use async_trait::async_trait;
use std::num::NonZeroUsize;
use tower::ServiceBuilder;
use tracing::Instrument;

use crate::chain::{
    ChainError, ChainReader, Eip155ChainReference, TransactionRecord, TransactionStatus,
};
use crate::config::{ChainConfig, RpcConfig};
use crate::networks;

#[derive(Debug, thiserror::Error)]
pub enum ProviderBuildError {
    #[error("No HTTP(S) RPC endpoint configured")]
    NoTransports,
}

/// Builds an [`RpcClient`] that spreads requests over all HTTP(S) endpoints,
/// each throttled to its configured requests-per-second.
pub fn connect_rpc(rpc: &[RpcConfig]) -> Result<RpcClient, ProviderBuildError> {
    let transports = rpc
        .iter()
        .filter_map(|provider_config| {
            let scheme = provider_config.http.scheme();
            let is_http = scheme == "http" || scheme == "https";
            if !is_http {
                tracing::warn!(rpc_url=%provider_config.http.inner(), "Skipping non-HTTP transport");
                return None;
            }
            let rpc_url = provider_config.http.inner().clone();
            tracing::info!(rpc_url=%rpc_url, rate_limit=?provider_config.rate_limit, "Using HTTP transport");
            let rate_limit = provider_config.rate_limit.unwrap_or(u32::MAX);
            let service = ServiceBuilder::new()
                .layer(ThrottleLayer::new(rate_limit))
                .service(Http::new(rpc_url));
            Some(service)
        })
        .collect::<Vec<_>>();
    let active = NonZeroUsize::new(transports.len()).ok_or(ProviderBuildError::NoTransports)?;
    let fallback = ServiceBuilder::new()
        .layer(FallbackLayer::default().with_active_transport_count(active))
        .service(transports);
    Ok(RpcClient::new(fallback, false))
}

/// Reads transaction outcomes from an EIP-155 chain over JSON-RPC.
#[derive(Debug, Clone)]
pub struct Eip155ChainProvider {
    chain: Eip155ChainReference,
    inner: RootProvider,
}

impl Eip155ChainProvider {
    pub fn new(chain: Eip155ChainReference, inner: RootProvider) -> Self {
        Self { chain, inner }
    }

    /// Connects to the configured RPC endpoints.
    ///
    /// A node that reports a different chain id than configured is logged but
    /// not fatal: the node may simply be unreachable at startup.
    pub async fn from_config(config: &ChainConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let client = connect_rpc(&config.rpc)?;
        let inner = RootProvider::new(client);
        match inner.get_chain_id().await {
            Ok(reported) if reported != config.id.inner() => {
                tracing::warn!(configured=%config.id, reported, "RPC endpoint reports a different chain id");
            }
            Ok(_) => {}
            Err(error) => {
                tracing::warn!(chain=%config.id, error=%error, "Could not query chain id at startup");
            }
        }
        tracing::info!(chain=%config.id.as_chain_id(), network=%networks::display_name(config.id), "Initialized EVM provider");
        Ok(Self::new(config.id, inner))
    }

    pub fn inner(&self) -> &RootProvider {
        &self.inner
    }
}

#[async_trait]
impl ChainReader for Eip155ChainProvider {
    fn chain(&self) -> Eip155ChainReference {
        self.chain
    }

    async fn transaction_status(&self, hash: TxHash) -> Result<TransactionStatus, ChainError> {
        fetch_transaction_status(&self.inner, hash)
            .instrument(tracing::debug_span!("transaction_status", chain=%self.chain, tx=%hash))
            .await
    }
}

/// Fetches the receipt for `hash` and, once mined, the transaction body for its value.
pub async fn fetch_transaction_status<P: Provider>(
    provider: &P,
    hash: TxHash,
) -> Result<TransactionStatus, ChainError> {
    let Some(receipt) = provider.get_transaction_receipt(hash).await? else {
        return Ok(TransactionStatus::Pending);
    };
    let transaction = provider
        .get_transaction_by_hash(hash)
        .await?
        .ok_or(ChainError::MissingTransaction(hash))?;
    Ok(TransactionStatus::Mined(TransactionRecord {
        hash,
        success: receipt.status(),
        from: receipt.from,
        to: receipt.to,
        value: transaction.value(),
        block_number: receipt.block_number,
    }))
}
