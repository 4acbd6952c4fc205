//! JSON bodies exchanged between the server and buyers.

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};

use crate::chain::ChainId;
use crate::gate::UnlockFailure;
use crate::listing::{FileListing, ListingId};
use crate::util::{MoneyAmount, UnixTimestamp};

/// `GET /api/file/{id}/info`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    pub filename: String,
    /// Exact decimal price in the native currency.
    pub price: MoneyAmount,
    pub price_eth: f64,
    /// Price in wei, as a decimal string.
    pub price_wei: String,
    pub mime_type: String,
    pub size_bytes: u64,
    pub created_at: UnixTimestamp,
    pub receiver_wallet: Address,
    pub chain_id: ChainId,
}

impl FileInfo {
    pub fn new(listing: &FileListing, receiver_wallet: Address, chain_id: ChainId) -> Self {
        Self {
            filename: listing.filename.clone(),
            price: listing.price,
            price_eth: listing.price.as_f64(),
            price_wei: listing
                .price
                .to_wei()
                .map(|wei| wei.to_string())
                .unwrap_or_default(),
            mime_type: listing.mime_type.clone(),
            size_bytes: listing.size_bytes,
            created_at: listing.created_at,
            receiver_wallet,
            chain_id,
        }
    }
}

/// `POST /api/file/{id}/unlock`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnlockRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_tx: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payer: Option<String>,
}

/// `POST /api/upload`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResponse {
    pub status: String,
    pub file_id: ListingId,
    pub link: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    /// Machine-readable failure code, see [`reason_code`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ErrorResponse {
    pub fn message(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            reason: None,
            detail: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

pub fn reason_code(failure: &UnlockFailure) -> &'static str {
    match failure {
        UnlockFailure::NotFound => "not_found",
        UnlockFailure::WrongNetwork(_) => "wrong_network",
        UnlockFailure::SubmissionRejected(_) => "submission_rejected",
        UnlockFailure::TransactionFailed(_) => "transaction_failed",
        UnlockFailure::TransactionTimeout { .. } => "transaction_timeout",
        UnlockFailure::PaymentMismatch(_) => "payment_mismatch",
        UnlockFailure::NetworkError(_) => "network_error",
        UnlockFailure::InvalidPayment(_) => "invalid_payment",
        UnlockFailure::StorageError(_) => "storage_error",
        UnlockFailure::Internal(_) => "internal",
        UnlockFailure::Cancelled => "cancelled",
    }
}
