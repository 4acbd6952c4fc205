//! Waits for a submitted transaction to be mined.

use alloy_primitives::TxHash;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::chain::{ChainReader, TransactionRecord, TransactionStatus};
use crate::config::ConfirmationConfig;

/// A successfully mined transaction and how many queries it took to see it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    pub record: TransactionRecord,
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PollError {
    #[error("Transaction {} reverted", .record.hash)]
    Reverted {
        record: TransactionRecord,
        attempts: u32,
    },
    #[error("No receipt after {attempts} attempts")]
    Timeout { attempts: u32 },
    /// Every query failed; the chain was never reachable.
    #[error("Chain unreachable after {attempts} attempts: {last_error}")]
    Unreachable { attempts: u32, last_error: String },
    #[error("Polling cancelled after {attempts} attempts")]
    Cancelled { attempts: u32 },
}

/// Queries the chain at a fixed interval, at most `max_attempts` times.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmationPoller {
    interval: Duration,
    max_attempts: u32,
}

impl ConfirmationPoller {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Upper bound on how long [`wait`](Self::wait) can take, slow queries included.
    pub fn deadline(&self) -> Duration {
        self.interval * self.max_attempts
    }

    /// Polls until the transaction is mined, reverts, or the attempt budget runs out.
    ///
    /// A failed query counts as a pending attempt. A query still outstanding when
    /// [`deadline`](Self::deadline) runs out ends polling with a timeout. Cancellation
    /// is observed both while querying and while sleeping, and returns immediately.
    pub async fn wait<R>(
        &self,
        reader: &R,
        hash: TxHash,
        cancel: &CancellationToken,
    ) -> Result<Confirmation, PollError>
    where
        R: ChainReader + ?Sized,
    {
        let deadline = Instant::now() + self.deadline();
        let mut last_error: Option<String> = None;
        let mut reached_chain = false;
        for attempt in 1..=self.max_attempts {
            let status = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PollError::Cancelled { attempts: attempt - 1 }),
                status = tokio::time::timeout_at(deadline, reader.transaction_status(hash)) => status,
            };
            let Ok(status) = status else {
                tracing::warn!(tx = %hash, attempt, "Receipt query outlived the confirmation deadline");
                return Err(PollError::Timeout { attempts: attempt });
            };
            match status {
                Ok(TransactionStatus::Mined(record)) if record.success => {
                    tracing::info!(tx = %hash, attempts = attempt, block = ?record.block_number, "Transaction confirmed");
                    return Ok(Confirmation {
                        record,
                        attempts: attempt,
                    });
                }
                Ok(TransactionStatus::Mined(record)) => {
                    tracing::info!(tx = %hash, attempts = attempt, "Transaction reverted");
                    return Err(PollError::Reverted {
                        record,
                        attempts: attempt,
                    });
                }
                Ok(TransactionStatus::Pending) => {
                    reached_chain = true;
                    tracing::trace!(tx = %hash, attempt, "Transaction pending");
                }
                Err(error) => {
                    tracing::warn!(tx = %hash, attempt, error = %error, "Receipt query failed");
                    last_error = Some(error.to_string());
                }
            }
            if attempt < self.max_attempts {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return Err(PollError::Cancelled { attempts: attempt }),
                    _ = tokio::time::sleep(self.interval) => {}
                }
            }
        }
        let attempts = self.max_attempts;
        match last_error {
            Some(last_error) if !reached_chain => Err(PollError::Unreachable {
                attempts,
                last_error,
            }),
            _ => Err(PollError::Timeout { attempts }),
        }
    }
}

impl From<ConfirmationConfig> for ConfirmationPoller {
    fn from(config: ConfirmationConfig) -> Self {
        Self::new(config.poll_interval(), config.max_attempts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{ChainError, Eip155ChainReference};
    use crate::testing::{ScriptedChain, TEST_CHAIN};
    use async_trait::async_trait;

    /// A node that accepts the query and never answers.
    struct SilentChain;

    #[async_trait]
    impl ChainReader for SilentChain {
        fn chain(&self) -> Eip155ChainReference {
            TEST_CHAIN
        }

        async fn transaction_status(&self, _hash: TxHash) -> Result<TransactionStatus, ChainError> {
            std::future::pending().await
        }
    }

    fn hash() -> TxHash {
        TxHash::repeat_byte(0x42)
    }

    #[tokio::test(start_paused = true)]
    async fn never_mined_times_out_after_budget() {
        let chain = ScriptedChain::new();
        let poller = ConfirmationPoller::from(ConfirmationConfig::default());
        let started = Instant::now();

        let result = poller.wait(&chain, hash(), &CancellationToken::new()).await;

        assert_eq!(result, Err(PollError::Timeout { attempts: 60 }));
        assert_eq!(chain.calls(), 60);
        // No sleep after the final attempt.
        assert_eq!(started.elapsed(), Duration::from_secs(59));
        assert!(started.elapsed() <= poller.deadline());
    }

    #[tokio::test(start_paused = true)]
    async fn returns_as_soon_as_mined() {
        let chain = ScriptedChain::new();
        let record = ScriptedChain::record(hash(), true);
        chain.mined_after(hash(), 2, record.clone());
        let poller = ConfirmationPoller::new(Duration::from_secs(1), 60);

        let confirmation = poller
            .wait(&chain, hash(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(confirmation, Confirmation { record, attempts: 3 });
        assert_eq!(chain.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn revert_fails_immediately() {
        let chain = ScriptedChain::new();
        chain.mined_after(hash(), 0, ScriptedChain::record(hash(), false));
        let poller = ConfirmationPoller::new(Duration::from_secs(1), 60);

        let result = poller.wait(&chain, hash(), &CancellationToken::new()).await;

        assert!(matches!(result, Err(PollError::Reverted { attempts: 1, .. })));
        assert_eq!(chain.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_errors_count_as_pending() {
        let chain = ScriptedChain::new();
        chain.errors_then_mined(hash(), 3, ScriptedChain::record(hash(), true));
        let poller = ConfirmationPoller::new(Duration::from_secs(1), 5);

        let confirmation = poller
            .wait(&chain, hash(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(confirmation.attempts, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_chain_is_distinguished_from_timeout() {
        let chain = ScriptedChain::new();
        chain.unreachable(hash());
        let poller = ConfirmationPoller::new(Duration::from_secs(1), 3);

        let result = poller.wait(&chain, hash(), &CancellationToken::new()).await;

        assert!(matches!(result, Err(PollError::Unreachable { attempts: 3, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_polling() {
        let chain = ScriptedChain::new();
        let poller = ConfirmationPoller::new(Duration::from_secs(1), 60);
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(2500)).await;
            trigger.cancel();
        });
        let result = poller.wait(&chain, hash(), &cancel).await;

        assert_eq!(result, Err(PollError::Cancelled { attempts: 3 }));
        assert_eq!(chain.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_query_times_out_at_deadline() {
        let poller = ConfirmationPoller::from(ConfirmationConfig::default());
        let started = Instant::now();

        let result = tokio::time::timeout(
            Duration::from_secs(3600),
            poller.wait(&SilentChain, hash(), &CancellationToken::new()),
        )
        .await
        .expect("poller must give up on its own");

        assert_eq!(result, Err(PollError::Timeout { attempts: 1 }));
        assert_eq!(started.elapsed(), poller.deadline());
    }

    #[test]
    fn zero_attempts_is_clamped() {
        let poller = ConfirmationPoller::new(Duration::from_secs(1), 0);
        assert_eq!(poller.max_attempts(), 1);
        assert_eq!(poller.deadline(), Duration::from_secs(1));
    }
}
