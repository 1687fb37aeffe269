//! Ledger module - Prediction pool contract access
//!
//! Read path: typed, range-checked reads of pools and predictions.
//! Write path: simulate, submit, await the receipt with a bounded wait.

mod client;
mod decode;
mod hash;

pub use client::LedgerClient;
pub use decode::{decode_pool, decode_prediction, RawPoolSeeds, RawPoolStatus, RawPrediction};
pub use hash::seeds_hash;

use async_trait::async_trait;
use ethers::types::H256;
use thiserror::Error;

use crate::types::{Pool, PoolSeeds, Prediction};

/// Typed rejection reasons of the pool contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LedgerRejection {
    InvalidPoolId,
    NotYetSnapshotTime,
    NoPredictionsInPool,
    InvalidWinnersCount,
    ZeroAmountSpecified,
    AlreadyCompleted,
}

impl LedgerRejection {
    pub const ALL: [LedgerRejection; 6] = [
        LedgerRejection::InvalidPoolId,
        LedgerRejection::NotYetSnapshotTime,
        LedgerRejection::NoPredictionsInPool,
        LedgerRejection::InvalidWinnersCount,
        LedgerRejection::ZeroAmountSpecified,
        LedgerRejection::AlreadyCompleted,
    ];

    /// Solidity custom error name
    pub fn name(&self) -> &'static str {
        match self {
            LedgerRejection::InvalidPoolId => "InvalidPoolId",
            LedgerRejection::NotYetSnapshotTime => "NotYetSnapshotTime",
            LedgerRejection::NoPredictionsInPool => "NoPredictionsInPool",
            LedgerRejection::InvalidWinnersCount => "InvalidWinnersCount",
            LedgerRejection::ZeroAmountSpecified => "ZeroAmountSpecified",
            LedgerRejection::AlreadyCompleted => "AlreadyCompleted",
        }
    }

    /// 4-byte selector of the parameterless custom error
    pub fn selector(&self) -> [u8; 4] {
        ethers::utils::id(format!("{}()", self.name()))
    }

    /// Match revert data against the known custom-error selectors.
    pub fn from_revert_data(data: &[u8]) -> Option<Self> {
        if data.len() < 4 {
            return None;
        }
        Self::ALL.into_iter().find(|r| r.selector() == data[..4])
    }

    /// Match a node's error message ("execution reverted: AlreadyCompleted", ...).
    pub fn from_message(message: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|r| message.contains(r.name()))
    }
}

impl std::fmt::Display for LedgerRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger rejected the call: {0}")]
    Rejected(LedgerRejection),
    #[error("ledger RPC failed: {0}")]
    Rpc(String),
    #[error("ledger returned malformed {field}: {reason}")]
    Decode { field: &'static str, reason: String },
    #[error("signer error: {0}")]
    Signer(String),
    #[error("invalid address '{0}'")]
    InvalidAddress(String),
    #[error("transaction {0:#x} dropped before confirmation")]
    ReceiptDropped(H256),
    #[error("transaction {0:#x} reverted on chain")]
    Reverted(H256),
}

/// Result of a write that was submitted to the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitStatus {
    Confirmed { tx_hash: H256, block: Option<u64> },
    /// The receipt wait timed out; the transaction may still land.
    Unconfirmed { tx_hash: H256 },
}

impl CommitStatus {
    pub fn tx_hash(&self) -> H256 {
        match self {
            CommitStatus::Confirmed { tx_hash, .. } | CommitStatus::Unconfirmed { tx_hash } => {
                *tx_hash
            }
        }
    }
}

/// Arguments of `completePool`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionParams {
    pub pool_id: u64,
    pub snapshot_price: u128,
    pub no_of_winners: u64,
    pub win_amount: u128,
    pub winner_prediction_ids: Vec<u64>,
}

/// Access to one chain's pool contract.
///
/// Implementations serialize writes: at most one in-flight transaction per admin account.
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Chain name used for archive paths and jobs
    fn chain(&self) -> &str;

    async fn pools_count(&self) -> Result<u64, LedgerError>;

    /// Pool id registered for a seeds hash, `None` when absent
    async fn pool_id_for_hash(&self, seeds_hash: H256) -> Result<Option<u64>, LedgerError>;

    async fn pool(&self, pool_id: u64) -> Result<Pool, LedgerError>;

    /// One page of prediction ids of a pool, in submission order
    async fn prediction_ids(
        &self,
        pool_id: u64,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<u64>, LedgerError>;

    async fn prediction(&self, prediction_id: u64) -> Result<Prediction, LedgerError>;

    /// Protocol fee in whole percent
    async fn fee_percentage(&self) -> Result<u64, LedgerError>;

    async fn create_pool(&self, seeds: &PoolSeeds) -> Result<CommitStatus, LedgerError>;

    async fn commit_completion(&self, params: &CompletionParams)
        -> Result<CommitStatus, LedgerError>;
}

/// Read every prediction of a pool through paginated reads.
pub async fn read_all_predictions(
    ledger: &dyn Ledger,
    pool_id: u64,
    page_size: u64,
) -> Result<Vec<Prediction>, LedgerError> {
    let page_size = page_size.max(1);
    let mut predictions = Vec::new();
    let mut offset = 0u64;

    loop {
        let ids = ledger.prediction_ids(pool_id, offset, page_size).await?;
        let fetched = ids.len() as u64;
        for id in ids {
            predictions.push(ledger.prediction(id).await?);
        }
        if fetched < page_size {
            break;
        }
        offset += fetched;
    }

    tracing::debug!(
        chain = %ledger.chain(),
        pool_id = pool_id,
        count = predictions.len(),
        "Read pool predictions from ledger"
    );
    Ok(predictions)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_round_trips_through_selector() {
        for rejection in LedgerRejection::ALL {
            let mut data = rejection.selector().to_vec();
            data.extend_from_slice(&[0u8; 32]);
            assert_eq!(LedgerRejection::from_revert_data(&data), Some(rejection));
        }
        assert_eq!(LedgerRejection::from_revert_data(&[1, 2]), None);
        assert_eq!(LedgerRejection::from_revert_data(&[0, 0, 0, 0]), None);
    }

    #[test]
    fn rejection_matches_revert_strings() {
        assert_eq!(
            LedgerRejection::from_message("(code: 3, message: execution reverted: AlreadyCompleted)"),
            Some(LedgerRejection::AlreadyCompleted)
        );
        assert_eq!(LedgerRejection::from_message("connection refused"), None);
    }
}
