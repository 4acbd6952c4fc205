//! Unlock sessions: one per in-flight download attempt.
//!
//! ```text
//! Quoted ──free──────────────────────────────────────────────┐
//!   │                                                        ▼
//!   └─► AwaitingSubmission ─► AwaitingConfirmation ─► Verifying ─► Unlocked
//!
//! any non-terminal state ─► Failed(reason)
//! ```
//!
//! A session lives in its [`SessionRegistry`] from [`UnlockSession::open`] until it
//! reaches a terminal state or its handle is dropped, whichever comes first.

use alloy_primitives::{Address, TxHash};
use dashmap::DashMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::time::Instant;

use crate::gate::UnlockFailure;
use crate::listing::{ListingId, Quote};

/// Who receives the file: a paying address, or nobody in particular for free listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Payer {
    Anonymous,
    Address(Address),
}

impl Payer {
    pub const ANONYMOUS: &'static str = "anonymous";

    pub fn address(&self) -> Option<Address> {
        match self {
            Payer::Anonymous => None,
            Payer::Address(address) => Some(*address),
        }
    }
}

impl Display for Payer {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Payer::Anonymous => f.write_str(Self::ANONYMOUS),
            Payer::Address(address) => write!(f, "{address}"),
        }
    }
}

impl FromStr for Payer {
    type Err = alloy_primitives::hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == Self::ANONYMOUS {
            Ok(Payer::Anonymous)
        } else {
            Ok(Payer::Address(s.trim().parse()?))
        }
    }
}

impl Serialize for Payer {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Payer {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Payer::from_str(&s).map_err(de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Quoted,
    AwaitingSubmission,
    AwaitingConfirmation,
    Verifying,
    Unlocked,
    Failed(UnlockFailure),
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Unlocked | SessionState::Failed(_))
    }

    /// Forward edges only. `Failed` is reachable from every non-terminal state.
    pub fn can_advance_to(&self, next: &SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Unlocked | Failed(_), _) => false,
            (_, Failed(_)) => true,
            (Quoted, AwaitingSubmission | Unlocked) => true,
            (AwaitingSubmission, AwaitingConfirmation) => true,
            (AwaitingConfirmation, Verifying) => true,
            (Verifying, Unlocked) => true,
            _ => false,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Quoted => "quoted",
            SessionState::AwaitingSubmission => "awaiting_submission",
            SessionState::AwaitingConfirmation => "awaiting_confirmation",
            SessionState::Verifying => "verifying",
            SessionState::Unlocked => "unlocked",
            SessionState::Failed(_) => "failed",
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Illegal session transition {from} -> {to}")]
pub struct TransitionError {
    pub from: &'static str,
    pub to: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl Display for SessionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Point-in-time view of a session, as stored in the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub listing_id: ListingId,
    pub payer: Payer,
    pub state: SessionState,
    pub transaction_hash: Option<TxHash>,
    pub deadline: Option<Instant>,
    pub attempts_made: u32,
}

/// All live sessions, keyed by session id.
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<SessionId, SessionSnapshot>>,
    next_id: Arc<AtomicU64>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn get(&self, id: SessionId) -> Option<SessionSnapshot> {
        self.sessions.get(&id).map(|entry| entry.value().clone())
    }

    pub fn snapshot(&self) -> Vec<SessionSnapshot> {
        let mut sessions: Vec<_> = self.sessions.iter().map(|e| e.value().clone()).collect();
        sessions.sort_by_key(|s| s.id);
        sessions
    }

    fn next_id(&self) -> SessionId {
        SessionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

/// The driving handle of one unlock attempt.
///
/// The quote is captured at [`open`](Self::open) and never re-fetched. Dropping the
/// handle removes the session from the registry, so abandoned requests leave nothing
/// behind.
#[derive(Debug)]
pub struct UnlockSession {
    registry: SessionRegistry,
    quote: Quote,
    snapshot: SessionSnapshot,
}

impl UnlockSession {
    pub fn open(registry: &SessionRegistry, quote: Quote, payer: Payer) -> Self {
        let snapshot = SessionSnapshot {
            id: registry.next_id(),
            listing_id: quote.listing_id.clone(),
            payer,
            state: SessionState::Quoted,
            transaction_hash: None,
            deadline: None,
            attempts_made: 0,
        };
        registry.sessions.insert(snapshot.id, snapshot.clone());
        tracing::debug!(session = %snapshot.id, listing = %snapshot.listing_id, payer = %payer, "Session opened");
        Self {
            registry: registry.clone(),
            quote,
            snapshot,
        }
    }

    pub fn id(&self) -> SessionId {
        self.snapshot.id
    }

    pub fn quote(&self) -> &Quote {
        &self.quote
    }

    pub fn payer(&self) -> Payer {
        self.snapshot.payer
    }

    pub fn state(&self) -> &SessionState {
        &self.snapshot.state
    }

    pub fn transaction_hash(&self) -> Option<TxHash> {
        self.snapshot.transaction_hash
    }

    pub fn attempts_made(&self) -> u32 {
        self.snapshot.attempts_made
    }

    pub fn snapshot(&self) -> &SessionSnapshot {
        &self.snapshot
    }

    pub fn advance(&mut self, next: SessionState) -> Result<(), TransitionError> {
        if !self.snapshot.state.can_advance_to(&next) {
            return Err(TransitionError {
                from: self.snapshot.state.name(),
                to: next.name(),
            });
        }
        tracing::debug!(session = %self.snapshot.id, from = self.snapshot.state.name(), to = next.name(), "Session advanced");
        self.snapshot.state = next;
        self.publish();
        Ok(())
    }

    /// AwaitingSubmission -> AwaitingConfirmation, recording the hash and polling deadline.
    pub fn submitted(&mut self, hash: TxHash, deadline: Instant) -> Result<(), TransitionError> {
        self.snapshot.transaction_hash = Some(hash);
        self.snapshot.deadline = Some(deadline);
        self.advance(SessionState::AwaitingConfirmation)
    }

    pub fn record_attempts(&mut self, attempts: u32) {
        self.snapshot.attempts_made = attempts;
        self.publish();
    }

    /// Moves to `Failed(reason)` and hands the reason back for propagation.
    ///
    /// A session that is already terminal keeps its state.
    pub fn fail(&mut self, reason: UnlockFailure) -> UnlockFailure {
        if let Err(error) = self.advance(SessionState::Failed(reason.clone())) {
            tracing::warn!(session = %self.snapshot.id, error = %error, "Failure after terminal state ignored");
        }
        reason
    }

    fn publish(&self) {
        if self.snapshot.state.is_terminal() {
            self.registry.sessions.remove(&self.snapshot.id);
        } else {
            self.registry
                .sessions
                .insert(self.snapshot.id, self.snapshot.clone());
        }
    }
}

impl Drop for UnlockSession {
    fn drop(&mut self) {
        if self.registry.sessions.remove(&self.snapshot.id).is_some() {
            tracing::debug!(session = %self.snapshot.id, state = self.snapshot.state.name(), "Session abandoned");
        }
    }
}
