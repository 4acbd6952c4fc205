//! Pay-to-unlock file drop.
//!
//! A seller uploads a file with a price in the chain's native currency and gets a
//! share link back. A buyer opens the link, sees the quote, pays the configured
//! receiver on chain, and submits the transaction hash. The server watches the
//! chain until the transaction is mined, checks that it pays for the listing, and
//! only then hands out the bytes.
//!
//! # Modules
//!
//! - [`store`] - Filesystem asset store; the source of quotes.
//! - [`chain`] - Chain identifiers and the read side of an EIP-155 node.
//! - [`poller`] - Bounded confirmation polling.
//! - [`verifier`] - Checks a mined transaction against a quote.
//! - [`session`] - The unlock state machine and its registry.
//! - [`gate`] - Drives sessions on the server; releases files exactly once per grant.
//! - [`ledger`] - Durable record of transactions that already unlocked something.
//! - [`handlers`] - HTTP endpoints.
//! - [`buyer`] - HTTP client and the buyer-side purchase flow.
//! - [`wallet`] - Wallet connector used by the buyer.
//! - [`config`] - Server configuration.

pub mod buyer;
pub mod chain;
pub mod config;
pub mod gate;
pub mod handlers;
pub mod ledger;
pub mod listing;
pub mod networks;
pub mod poller;
pub mod proto;
pub mod session;
pub mod store;
pub mod util;
pub mod verifier;
pub mod wallet;

#[cfg(test)]
mod testing;
