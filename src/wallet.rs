//! Wallet connector: the buyer's handle on an account that can pay.
//!
//! [`LocalWallet`] signs with a private key held in process and talks to the chain
//! over the same fallback RPC transport the server uses.

use alloy_network::{EthereumWallet, TransactionBuilder};
use alloy_primitives::{Address, TxHash, U256};
use alloy_provider::{DynProvider, Provider, ProviderBuilder};
use alloy_rpc_types_eth::TransactionRequest;
use alloy_signer_local::PrivateKeySigner;
use async_trait::async_trait;
use std::str::FromStr;
use tracing::Instrument;

use crate::chain::{
    ChainError, ChainReader, Eip155ChainReference, ProviderBuildError, TransactionStatus,
    connect_rpc, fetch_transaction_status,
};
use crate::config::RpcConfig;
use crate::networks;

#[derive(Debug, thiserror::Error)]
pub enum WalletError {
    #[error("No active account")]
    NoAccount,
    #[error("Wallet is on {}, listing settles on {}", networks::display_name(*.actual), networks::display_name(*.expected))]
    WrongNetwork {
        expected: Eip155ChainReference,
        actual: Eip155ChainReference,
    },
    #[error("Transfer rejected: {0}")]
    Rejected(String),
    #[error("Invalid private key: {0}")]
    InvalidKey(String),
    #[error(transparent)]
    Transport(#[from] alloy_transport::TransportError),
    #[error(transparent)]
    Connect(#[from] ProviderBuildError),
}

/// What the buyer flow needs from a wallet. Status queries come from [`ChainReader`].
#[async_trait]
pub trait WalletConnector: ChainReader {
    async fn active_account(&self) -> Result<Address, WalletError>;

    /// Makes `chain` the active network, or fails with [`WalletError::WrongNetwork`].
    async fn switch_network(&self, chain: Eip155ChainReference) -> Result<(), WalletError>;

    /// Submits a native-currency transfer. Returns as soon as the node accepts it.
    async fn submit_transfer(&self, to: Address, value: U256) -> Result<TxHash, WalletError>;
}

pub struct LocalWallet {
    address: Address,
    chain: Eip155ChainReference,
    provider: DynProvider,
}

impl LocalWallet {
    /// Connects a hex private key (with or without `0x`) to the given RPC endpoints.
    pub async fn connect(private_key: &str, rpc: &[RpcConfig]) -> Result<Self, WalletError> {
        let signer = PrivateKeySigner::from_str(private_key.trim())
            .map_err(|e| WalletError::InvalidKey(e.to_string()))?;
        let address = signer.address();
        let client = connect_rpc(rpc)?;
        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(signer))
            .connect_client(client);
        let chain = Eip155ChainReference::new(provider.get_chain_id().await?);
        tracing::info!(account = %address, network = %networks::display_name(chain), "Wallet connected");
        Ok(Self {
            address,
            chain,
            provider: DynProvider::new(provider),
        })
    }
}

#[async_trait]
impl ChainReader for LocalWallet {
    fn chain(&self) -> Eip155ChainReference {
        self.chain
    }

    async fn transaction_status(&self, hash: TxHash) -> Result<TransactionStatus, ChainError> {
        fetch_transaction_status(&self.provider, hash).await
    }
}

#[async_trait]
impl WalletConnector for LocalWallet {
    async fn active_account(&self) -> Result<Address, WalletError> {
        Ok(self.address)
    }

    /// A raw key is bound to the RPC it was connected with, so switching only
    /// succeeds when that RPC already serves `chain`.
    async fn switch_network(&self, chain: Eip155ChainReference) -> Result<(), WalletError> {
        if chain == self.chain {
            Ok(())
        } else {
            Err(WalletError::WrongNetwork {
                expected: chain,
                actual: self.chain,
            })
        }
    }

    async fn submit_transfer(&self, to: Address, value: U256) -> Result<TxHash, WalletError> {
        let request = TransactionRequest::default()
            .with_from(self.address)
            .with_to(to)
            .with_value(value);
        let pending = self
            .provider
            .send_transaction(request)
            .instrument(tracing::info_span!("submit_transfer", to = %to, value = %value))
            .await
            .map_err(|e| WalletError::Rejected(e.to_string()))?;
        let hash = *pending.tx_hash();
        tracing::info!(tx = %hash, "Transfer submitted");
        Ok(hash)
    }
}
