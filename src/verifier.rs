//! Checks a mined transaction against the quote it is supposed to pay for.

use alloy_primitives::{Address, U256};

use crate::chain::TransactionRecord;
use crate::listing::ListingId;

/// Why a mined transaction does not pay for the listing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MismatchReason {
    #[error("payment sent to {actual:?}, expected {expected}")]
    WrongRecipient {
        expected: Address,
        actual: Option<Address>,
    },
    #[error("paid {paid} wei, expected at least {expected} wei")]
    InsufficientValue { expected: U256, paid: U256 },
    #[error("transaction sent by {actual}, claimed payer is {claimed}")]
    WrongSender { claimed: Address, actual: Address },
    #[error("transaction already unlocked listing {0}")]
    SettledForOtherListing(ListingId),
    #[error("transaction already unlocked for another payer")]
    SettledForOtherPayer,
    /// A mismatch as reported by the server, seen from the buyer side.
    #[error("{0}")]
    Reported(String),
}

#[derive(Debug, Clone, Copy)]
pub struct PaymentVerifier {
    receiver: Address,
    verify_sender: bool,
}

impl PaymentVerifier {
    pub fn new(receiver: Address, verify_sender: bool) -> Self {
        Self {
            receiver,
            verify_sender,
        }
    }

    pub fn receiver(&self) -> Address {
        self.receiver
    }

    /// Recipient first, then value, then sender; the first failing check wins.
    ///
    /// Success of the transaction itself is the poller's concern.
    pub fn verify(
        &self,
        expected_wei: U256,
        record: &TransactionRecord,
        claimed_payer: Address,
    ) -> Result<(), MismatchReason> {
        if record.to != Some(self.receiver) {
            return Err(MismatchReason::WrongRecipient {
                expected: self.receiver,
                actual: record.to,
            });
        }
        if record.value < expected_wei {
            return Err(MismatchReason::InsufficientValue {
                expected: expected_wei,
                paid: record.value,
            });
        }
        if self.verify_sender && record.from != claimed_payer {
            return Err(MismatchReason::WrongSender {
                claimed: claimed_payer,
                actual: record.from,
            });
        }
        Ok(())
    }
}
