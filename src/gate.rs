//! The unlock gate: the only place that decides whether a payer may receive a listing.
//!
//! For a paid listing the gate takes the claimed transaction hash as the submission
//! event, waits for it to be mined, verifies the transfer against the quote, records
//! the hash as spent and only then grants a single release of the bytes.

use alloy_primitives::{Address, TxHash};
use bytes::Bytes;
use dashmap::DashMap;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::chain::{ChainReader, Eip155ChainReference};
use crate::ledger::{Settlement, SettlementLedger};
use crate::listing::{FileListing, ListingId};
use crate::poller::{ConfirmationPoller, PollError};
use crate::session::{Payer, SessionId, SessionRegistry, SessionState, UnlockSession};
use crate::store::{AssetStore, StoreError};
use crate::util::UnixTimestamp;
use crate::verifier::{MismatchReason, PaymentVerifier};

/// Closed set of reasons an unlock can fail.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UnlockFailure {
    #[error("File not found")]
    NotFound,
    #[error("Wallet is on the wrong network: {0}")]
    WrongNetwork(String),
    #[error("Transaction submission rejected: {0}")]
    SubmissionRejected(String),
    #[error("Transaction {0} failed on-chain")]
    TransactionFailed(TxHash),
    #[error("Transaction {hash} not confirmed after {attempts} attempts")]
    TransactionTimeout { hash: TxHash, attempts: u32 },
    #[error("Payment mismatch: {0}")]
    PaymentMismatch(MismatchReason),
    #[error("Network error: {0}")]
    NetworkError(String),
    #[error("Invalid payment info: {0}")]
    InvalidPayment(String),
    /// The listing's bytes are missing or unreadable.
    #[error("Storage error: {0}")]
    StorageError(String),
    /// Server-side fault unrelated to the payment or the file, e.g. the settlement
    /// ledger could not be written.
    #[error("Internal error: {0}")]
    Internal(String),
    #[error("Unlock cancelled")]
    Cancelled,
}

impl From<StoreError> for UnlockFailure {
    fn from(error: StoreError) -> Self {
        UnlockFailure::StorageError(error.to_string())
    }
}

/// Proof of payment as presented by a buyer: raw, not yet parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentClaim {
    pub payment_tx: String,
    pub payer: String,
}

impl PaymentClaim {
    fn parse(&self) -> Result<(TxHash, Address), UnlockFailure> {
        let hash = TxHash::from_str(self.payment_tx.trim()).map_err(|_| {
            UnlockFailure::InvalidPayment(format!("malformed transaction hash {:?}", self.payment_tx))
        })?;
        let payer = Address::from_str(self.payer.trim()).map_err(|_| {
            UnlockFailure::InvalidPayment(format!("malformed payer address {:?}", self.payer))
        })?;
        Ok((hash, payer))
    }
}

/// Permission to release a listing's bytes once. Consumed by [`UnlockGate::release`].
#[derive(Debug)]
pub struct UnlockGrant {
    session: SessionId,
    listing: FileListing,
    payer: Payer,
    transaction_hash: Option<TxHash>,
    already_settled: bool,
}

impl UnlockGrant {
    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn listing(&self) -> &FileListing {
        &self.listing
    }

    pub fn payer(&self) -> Payer {
        self.payer
    }

    pub fn transaction_hash(&self) -> Option<TxHash> {
        self.transaction_hash
    }

    /// True when the hash had already unlocked this listing for this payer.
    pub fn already_settled(&self) -> bool {
        self.already_settled
    }
}

/// The bytes handed out for a grant.
#[derive(Debug, Clone)]
pub struct Release {
    pub listing: FileListing,
    pub bytes: Bytes,
}

/// Serializes verification of the same transaction hash.
#[derive(Debug, Default)]
struct InFlight {
    locks: Arc<DashMap<TxHash, Arc<Mutex<()>>>>,
}

struct InFlightTicket {
    locks: Arc<DashMap<TxHash, Arc<Mutex<()>>>>,
    hash: TxHash,
    guard: Option<OwnedMutexGuard<()>>,
}

impl InFlight {
    async fn acquire(&self, hash: TxHash) -> InFlightTicket {
        let lock = self.locks.entry(hash).or_default().clone();
        let guard = lock.lock_owned().await;
        InFlightTicket {
            locks: self.locks.clone(),
            hash,
            guard: Some(guard),
        }
    }
}

impl Drop for InFlightTicket {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Only the map still holds the lock: nobody is waiting on this hash.
        self.locks
            .remove_if(&self.hash, |_, lock| Arc::strong_count(lock) == 1);
    }
}

pub struct UnlockGate {
    store: Arc<dyn AssetStore>,
    chain: Arc<dyn ChainReader>,
    poller: ConfirmationPoller,
    verifier: PaymentVerifier,
    ledger: Arc<SettlementLedger>,
    sessions: SessionRegistry,
    in_flight: InFlight,
    shutdown: CancellationToken,
}

impl UnlockGate {
    pub fn new(
        store: Arc<dyn AssetStore>,
        chain: Arc<dyn ChainReader>,
        poller: ConfirmationPoller,
        verifier: PaymentVerifier,
        ledger: Arc<SettlementLedger>,
    ) -> Self {
        Self {
            store,
            chain,
            poller,
            verifier,
            ledger,
            sessions: SessionRegistry::new(),
            in_flight: InFlight::default(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Cancels in-flight confirmation polling when `token` fires.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    pub fn chain(&self) -> Eip155ChainReference {
        self.chain.chain()
    }

    pub fn receiver(&self) -> Address {
        self.verifier.receiver()
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn store(&self) -> &Arc<dyn AssetStore> {
        &self.store
    }

    /// Looks up a listing. Unparsable ids are simply unknown.
    pub async fn quote(&self, id: &str) -> Result<FileListing, UnlockFailure> {
        let id = ListingId::from_str(id).map_err(|_| UnlockFailure::NotFound)?;
        self.store
            .listing(&id)
            .await?
            .ok_or(UnlockFailure::NotFound)
    }

    /// Runs one unlock session to a terminal state.
    ///
    /// Free listings unlock for `anonymous` and ignore any claim. Paid listings require
    /// a claim, and are granted only after the transaction is mined successfully and
    /// pays the quote. A hash that already unlocked this listing for this payer is
    /// granted again from the ledger without touching the chain.
    #[tracing::instrument(skip_all, fields(listing = %id))]
    pub async fn unlock(
        &self,
        id: &str,
        claim: Option<PaymentClaim>,
    ) -> Result<UnlockGrant, UnlockFailure> {
        let listing = self.quote(id).await?;

        if listing.is_free() {
            let mut session = UnlockSession::open(&self.sessions, listing.quote(), Payer::Anonymous);
            advance(&mut session, SessionState::Unlocked)?;
            tracing::info!(session = %session.id(), "Free listing unlocked");
            return Ok(UnlockGrant {
                session: session.id(),
                listing,
                payer: Payer::Anonymous,
                transaction_hash: None,
                already_settled: false,
            });
        }

        let claim = claim.ok_or_else(|| {
            UnlockFailure::InvalidPayment("Payment info required (tx hash, payer)".into())
        })?;
        let (hash, payer_address) = claim.parse()?;
        let payer = Payer::Address(payer_address);

        let mut session = UnlockSession::open(&self.sessions, listing.quote(), payer);
        advance(&mut session, SessionState::AwaitingSubmission)?;
        let deadline = Instant::now() + self.poller.deadline();
        if let Err(error) = session.submitted(hash, deadline) {
            return Err(session.fail(internal(error)));
        }
        tracing::info!(session = %session.id(), tx = %hash, payer = %payer, "Awaiting confirmation");

        let _ticket = self.in_flight.acquire(hash).await;

        if let Some(settled) = self.ledger.get(&hash) {
            return self.replay(session, listing, settled);
        }

        let confirmation = match self.poller.wait(&*self.chain, hash, &self.shutdown).await {
            Ok(confirmation) => confirmation,
            Err(error) => {
                let failure = match error {
                    PollError::Reverted { attempts, .. } => {
                        session.record_attempts(attempts);
                        UnlockFailure::TransactionFailed(hash)
                    }
                    PollError::Timeout { attempts } => {
                        session.record_attempts(attempts);
                        UnlockFailure::TransactionTimeout { hash, attempts }
                    }
                    PollError::Unreachable {
                        attempts,
                        last_error,
                    } => {
                        session.record_attempts(attempts);
                        UnlockFailure::NetworkError(last_error)
                    }
                    PollError::Cancelled { attempts } => {
                        session.record_attempts(attempts);
                        UnlockFailure::Cancelled
                    }
                };
                tracing::warn!(session = %session.id(), tx = %hash, reason = %failure, "Unlock failed");
                return Err(session.fail(failure));
            }
        };
        session.record_attempts(confirmation.attempts);
        advance(&mut session, SessionState::Verifying)?;

        let expected = match session.quote().amount_wei() {
            Ok(expected) => expected,
            Err(error) => {
                return Err(session.fail(UnlockFailure::Internal(error.to_string())));
            }
        };
        if let Err(mismatch) = self
            .verifier
            .verify(expected, &confirmation.record, payer_address)
        {
            tracing::warn!(session = %session.id(), tx = %hash, reason = %mismatch, "Payment mismatch");
            return Err(session.fail(UnlockFailure::PaymentMismatch(mismatch)));
        }

        let settlement = Settlement {
            tx_hash: hash,
            listing_id: listing.id.clone(),
            payer,
            value: confirmation.record.value,
            settled_at: UnixTimestamp::now(),
        };
        if let Err(error) = self.ledger.record(settlement).await {
            tracing::error!(session = %session.id(), tx = %hash, error = %error, "Could not record settlement");
            return Err(session.fail(UnlockFailure::Internal(error.to_string())));
        }

        advance(&mut session, SessionState::Unlocked)?;
        tracing::info!(session = %session.id(), tx = %hash, payer = %payer, "Paid listing unlocked");
        Ok(UnlockGrant {
            session: session.id(),
            listing,
            payer,
            transaction_hash: Some(hash),
            already_settled: false,
        })
    }

    /// Hands out the bytes for a grant. The grant is consumed.
    pub async fn release(&self, grant: UnlockGrant) -> Result<Release, UnlockFailure> {
        let bytes = self.store.read(&grant.listing).await.map_err(|error| {
            tracing::error!(listing = %grant.listing.id, error = %error, "Unlocked listing is unreadable");
            UnlockFailure::from(error)
        })?;
        Ok(Release {
            listing: grant.listing,
            bytes,
        })
    }

    fn replay(
        &self,
        mut session: UnlockSession,
        listing: FileListing,
        settled: Settlement,
    ) -> Result<UnlockGrant, UnlockFailure> {
        if settled.listing_id != listing.id {
            let reason = MismatchReason::SettledForOtherListing(settled.listing_id);
            tracing::warn!(session = %session.id(), tx = %settled.tx_hash, reason = %reason, "Replayed hash rejected");
            return Err(session.fail(UnlockFailure::PaymentMismatch(reason)));
        }
        if settled.payer != session.payer() {
            let reason = MismatchReason::SettledForOtherPayer;
            tracing::warn!(session = %session.id(), tx = %settled.tx_hash, reason = %reason, "Replayed hash rejected");
            return Err(session.fail(UnlockFailure::PaymentMismatch(reason)));
        }
        advance(&mut session, SessionState::Verifying)?;
        advance(&mut session, SessionState::Unlocked)?;
        tracing::info!(session = %session.id(), tx = %settled.tx_hash, "Already settled");
        Ok(UnlockGrant {
            session: session.id(),
            listing,
            payer: settled.payer,
            transaction_hash: Some(settled.tx_hash),
            already_settled: true,
        })
    }
}

fn advance(session: &mut UnlockSession, next: SessionState) -> Result<(), UnlockFailure> {
    session
        .advance(next)
        .map_err(|error| session.fail(internal(error)))
}

fn internal(error: impl std::fmt::Display) -> UnlockFailure {
    UnlockFailure::Internal(error.to_string())
}
