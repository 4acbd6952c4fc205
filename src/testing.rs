//! Scripted chain and wallet doubles shared by unit tests.

use alloy_primitives::{Address, TxHash, U256, address};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::chain::{
    ChainError, ChainReader, Eip155ChainReference, TransactionRecord, TransactionStatus,
};
use crate::wallet::{WalletConnector, WalletError};

pub const RECEIVER: Address = address!("aFcaDB5F93B80C32560b395570a65Eb13225aB87");
pub const PAYER: Address = address!("1111111111111111111111111111111111111111");
pub const TEST_CHAIN: Eip155ChainReference = Eip155ChainReference::new(84532);

#[derive(Debug, Clone)]
enum Step {
    Pending,
    Error,
    Mined(TransactionRecord),
}

/// Answers receipt queries from per-hash scripts. The last step of a script repeats;
/// hashes without a script stay pending forever.
#[derive(Debug, Default)]
pub struct ScriptedChain {
    scripts: Mutex<HashMap<TxHash, VecDeque<Step>>>,
    calls: AtomicUsize,
}

impl ScriptedChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// A record paying 0.01 ETH from [`PAYER`] to [`RECEIVER`].
    pub fn record(hash: TxHash, success: bool) -> TransactionRecord {
        TransactionRecord {
            hash,
            success,
            from: PAYER,
            to: Some(RECEIVER),
            value: U256::from(10_000_000_000_000_000u64),
            block_number: Some(1),
        }
    }

    pub fn mined_after(&self, hash: TxHash, pending_polls: usize, record: TransactionRecord) {
        let mut steps: VecDeque<Step> = std::iter::repeat_n(Step::Pending, pending_polls).collect();
        steps.push_back(Step::Mined(record));
        self.script(hash, steps);
    }

    pub fn errors_then_mined(&self, hash: TxHash, errors: usize, record: TransactionRecord) {
        let mut steps: VecDeque<Step> = std::iter::repeat_n(Step::Error, errors).collect();
        steps.push_back(Step::Mined(record));
        self.script(hash, steps);
    }

    pub fn unreachable(&self, hash: TxHash) {
        self.script(hash, VecDeque::from([Step::Error]));
    }

    /// Total number of receipt queries answered.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn script(&self, hash: TxHash, steps: VecDeque<Step>) {
        self.scripts.lock().unwrap().insert(hash, steps);
    }
}

#[async_trait]
impl ChainReader for ScriptedChain {
    fn chain(&self) -> Eip155ChainReference {
        TEST_CHAIN
    }

    async fn transaction_status(&self, hash: TxHash) -> Result<TransactionStatus, ChainError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = {
            let mut scripts = self.scripts.lock().unwrap();
            match scripts.get_mut(&hash) {
                Some(steps) if steps.len() > 1 => steps.pop_front(),
                Some(steps) => steps.front().cloned(),
                None => None,
            }
        };
        match step.unwrap_or(Step::Pending) {
            Step::Pending => Ok(TransactionStatus::Pending),
            Step::Error => Err(ChainError::Unavailable("scripted outage".into())),
            Step::Mined(record) => Ok(TransactionStatus::Mined(record)),
        }
    }
}

/// A wallet that pays from [`PAYER`] on a fixed chain. Every accepted transfer is
/// mined successfully on the next-but-one status query.
#[derive(Debug)]
pub struct ScriptedWallet {
    chain: Eip155ChainReference,
    ledger: ScriptedChain,
    transfers: Mutex<Vec<(Address, U256)>>,
    reject: std::sync::atomic::AtomicBool,
}

impl ScriptedWallet {
    pub fn new(chain: Eip155ChainReference) -> Self {
        Self {
            chain,
            ledger: ScriptedChain::new(),
            transfers: Mutex::new(Vec::new()),
            reject: std::sync::atomic::AtomicBool::new(false),
        }
    }

    /// The hash the next accepted transfer will get.
    pub fn next_hash(&self) -> TxHash {
        let next = self.transfers.lock().unwrap().len() as u8 + 1;
        TxHash::repeat_byte(next)
    }

    pub fn reject_transfers(&self) {
        self.reject.store(true, Ordering::SeqCst);
    }

    pub fn transfers(&self) -> Vec<(Address, U256)> {
        self.transfers.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChainReader for ScriptedWallet {
    fn chain(&self) -> Eip155ChainReference {
        self.chain
    }

    async fn transaction_status(&self, hash: TxHash) -> Result<TransactionStatus, ChainError> {
        self.ledger.transaction_status(hash).await
    }
}

#[async_trait]
impl WalletConnector for ScriptedWallet {
    async fn active_account(&self) -> Result<Address, WalletError> {
        Ok(PAYER)
    }

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
        if self.reject.load(Ordering::SeqCst) {
            return Err(WalletError::Rejected("user denied transaction".into()));
        }
        let hash = self.next_hash();
        self.transfers.lock().unwrap().push((to, value));
        let record = TransactionRecord {
            hash,
            success: true,
            from: PAYER,
            to: Some(to),
            value,
            block_number: Some(2),
        };
        self.ledger.mined_after(hash, 1, record);
        Ok(hash)
    }
}
