//! Index of transaction hashes that already unlocked a listing.
//!
//! Backed by an append-only JSON lines file so a restart cannot turn a spent hash
//! back into fresh payment proof.

use alloy_primitives::{TxHash, U256};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::listing::ListingId;
use crate::session::Payer;
use crate::util::UnixTimestamp;

pub const LEDGER_FILE_NAME: &str = "settlements.jsonl";

/// A completed paid unlock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    pub tx_hash: TxHash,
    pub listing_id: ListingId,
    pub payer: Payer,
    /// Value of the transfer in wei.
    pub value: U256,
    pub settled_at: UnixTimestamp,
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("Failed to access ledger at {0}: {1}")]
    Io(PathBuf, io::Error),
    #[error(transparent)]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug)]
struct LedgerFile {
    path: PathBuf,
    file: Mutex<File>,
}

#[derive(Debug, Default)]
pub struct SettlementLedger {
    index: DashMap<TxHash, Settlement>,
    file: Option<LedgerFile>,
}

impl SettlementLedger {
    /// A ledger that forgets everything on restart.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Opens (or creates) the ledger file and replays it into memory.
    ///
    /// Unparsable lines are skipped with a warning: a torn final write must not
    /// keep the server from starting.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let path = path.as_ref().to_path_buf();
        let index = DashMap::new();
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                for (line_no, line) in content.lines().enumerate() {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<Settlement>(line) {
                        Ok(settlement) => {
                            index.insert(settlement.tx_hash, settlement);
                        }
                        Err(error) => {
                            tracing::warn!(path = %path.display(), line = line_no + 1, error = %error, "Skipping corrupt ledger entry");
                        }
                    }
                }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(LedgerError::Io(path, e)),
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| LedgerError::Io(path.clone(), e))?;
        tracing::info!(path = %path.display(), settlements = index.len(), "Loaded settlement ledger");
        Ok(Self {
            index,
            file: Some(LedgerFile {
                path,
                file: Mutex::new(file),
            }),
        })
    }

    pub fn get(&self, hash: &TxHash) -> Option<Settlement> {
        self.index.get(hash).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Persists `settlement` before making it visible to [`get`](Self::get).
    pub async fn record(&self, settlement: Settlement) -> Result<(), LedgerError> {
        if let Some(ledger) = &self.file {
            let mut line = serde_json::to_vec(&settlement)?;
            line.push(b'\n');
            let mut file = ledger.file.lock().await;
            let io_err = |e| LedgerError::Io(ledger.path.clone(), e);
            file.write_all(&line).await.map_err(io_err)?;
            file.flush().await.map_err(io_err)?;
            file.sync_data().await.map_err(io_err)?;
        }
        self.index.insert(settlement.tx_hash, settlement);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::Address;

    fn settlement(byte: u8) -> Settlement {
        Settlement {
            tx_hash: TxHash::repeat_byte(byte),
            listing_id: ListingId::random(),
            payer: Payer::Address(Address::repeat_byte(byte)),
            value: U256::from(10_000_000_000_000_000u64),
            settled_at: UnixTimestamp::from_secs(1_700_000_000),
        }
    }

    #[tokio::test]
    async fn in_memory_ledger_indexes_by_hash() {
        let ledger = SettlementLedger::in_memory();
        let entry = settlement(1);
        assert!(ledger.get(&entry.tx_hash).is_none());
        ledger.record(entry.clone()).await.unwrap();
        assert_eq!(ledger.get(&entry.tx_hash), Some(entry));
        assert_eq!(ledger.len(), 1);
    }

    #[tokio::test]
    async fn settlements_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LEDGER_FILE_NAME);
        let first = settlement(1);
        let second = settlement(2);
        {
            let ledger = SettlementLedger::open(&path).await.unwrap();
            assert!(ledger.is_empty());
            ledger.record(first.clone()).await.unwrap();
            ledger.record(second.clone()).await.unwrap();
        }
        let reopened = SettlementLedger::open(&path).await.unwrap();
        assert_eq!(reopened.len(), 2);
        assert_eq!(reopened.get(&first.tx_hash), Some(first));
        assert_eq!(reopened.get(&second.tx_hash), Some(second));
    }

    #[tokio::test]
    async fn corrupt_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LEDGER_FILE_NAME);
        let good = settlement(7);
        let mut content = serde_json::to_string(&good).unwrap();
        content.push_str("\n{\"tx_hash\": \"0xdead\n");
        std::fs::write(&path, content).unwrap();

        let ledger = SettlementLedger::open(&path).await.unwrap();
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.get(&good.tx_hash), Some(good));
    }
}
