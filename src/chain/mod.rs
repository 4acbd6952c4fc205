//! Read access to the settlement chain.
//!
//! The unlock flow only ever needs one capability from a chain: "what is the
//! status of this transaction hash?". [`ChainReader`] is that seam. The
//! production implementation is [`Eip155ChainProvider`], backed by alloy over
//! JSON-RPC; tests substitute scripted readers.

pub mod chain_id;
pub mod eip155;

use alloy_primitives::{Address, TxHash, U256};
use async_trait::async_trait;
use std::sync::Arc;

pub use chain_id::*;
pub use eip155::*;

/// What the chain says about a transaction hash right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionStatus {
    /// No receipt yet: unknown to the node, or still in the mempool.
    Pending,
    /// A receipt exists. Its `success` flag may still say the call reverted.
    Mined(TransactionRecord),
}

/// The effects of a mined transaction, as far as payment verification cares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRecord {
    pub hash: TxHash,
    pub success: bool,
    pub from: Address,
    /// `None` for contract creation.
    pub to: Option<Address>,
    /// Native-currency value transferred, in wei.
    pub value: U256,
    pub block_number: Option<u64>,
}

#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error(transparent)]
    Transport(#[from] alloy_transport::TransportError),
    #[error("Receipt for {0} exists but the transaction body is missing")]
    MissingTransaction(TxHash),
    #[error("Chain unavailable: {0}")]
    Unavailable(String),
}

/// Read-only access to transaction outcomes on a single EIP-155 chain.
#[async_trait]
pub trait ChainReader: Send + Sync {
    /// The chain this reader is connected to.
    fn chain(&self) -> Eip155ChainReference;

    async fn transaction_status(&self, hash: TxHash) -> Result<TransactionStatus, ChainError>;
}

#[async_trait]
impl<T: ChainReader + ?Sized> ChainReader for Arc<T> {
    fn chain(&self) -> Eip155ChainReference {
        (**self).chain()
    }

    async fn transaction_status(&self, hash: TxHash) -> Result<TransactionStatus, ChainError> {
        (**self).transaction_status(hash).await
    }
}
