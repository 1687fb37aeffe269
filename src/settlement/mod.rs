//! Settlement module - Pool state machine, winner split and sweep driver
//!
//! A pool moves `Unresolved -> Open -> AwaitingSnapshot -> Settling` and ends
//! `Settled` or `Skipped`. Every invocation re-reads the ledger, so callers may
//! re-run settlement for a pool at any time.

mod orchestrator;
mod scheduler;
mod split;

pub use orchestrator::{Orchestrator, OrchestratorSettings};
pub use scheduler::{ChainPipeline, Scheduler, SweepReport};
pub use split::{compute_split, rank, win_amount, winners_count, Split};

use ethers::types::H256;
use std::fmt;
use thiserror::Error;

use crate::ledger::LedgerError;
use crate::oracle::OracleError;
use crate::types::SettlementResult;

/// Non-error result of one settlement attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementOutcome {
    /// `now` is before the snapshot; try again later
    AwaitingSnapshot { snapshot_time: u64 },
    /// Nobody predicted; nothing to settle
    Skipped,
    /// The ledger already holds a completion and the archive has its results
    AlreadySettled { result: Option<SettlementResult> },
    /// The ledger held a completion the archive did not know about
    Reconciled { result: SettlementResult },
    /// Completion submitted but not yet confirmed
    Submitted { tx_hash: H256 },
    Settled { result: SettlementResult, tx_hash: H256 },
    /// Split computed, nothing written
    DryRun { result: SettlementResult },
}

impl SettlementOutcome {
    /// Reason a direct request did not settle anything, if any
    pub fn skip_reason(&self) -> Option<SkipReason> {
        match self {
            SettlementOutcome::AwaitingSnapshot { snapshot_time } => {
                Some(SkipReason::AwaitingSnapshot {
                    snapshot_time: *snapshot_time,
                })
            }
            SettlementOutcome::Skipped => Some(SkipReason::NoPredictions),
            SettlementOutcome::AlreadySettled { .. } => Some(SkipReason::AlreadySettled),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            SettlementOutcome::AwaitingSnapshot { .. } => "awaiting_snapshot",
            SettlementOutcome::Skipped => "skipped",
            SettlementOutcome::AlreadySettled { .. } => "already_settled",
            SettlementOutcome::Reconciled { .. } => "reconciled",
            SettlementOutcome::Submitted { .. } => "submitted",
            SettlementOutcome::Settled { .. } => "settled",
            SettlementOutcome::DryRun { .. } => "dry_run",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    AwaitingSnapshot { snapshot_time: u64 },
    NoPredictions,
    AlreadySettled,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::AwaitingSnapshot { snapshot_time } => {
                write!(f, "snapshot time {} not reached yet", snapshot_time)
            }
            SkipReason::NoPredictions => write!(f, "pool has no predictions"),
            SkipReason::AlreadySettled => write!(f, "pool is already settled"),
        }
    }
}

#[derive(Debug, Error)]
pub enum SettlementError {
    #[error("invalid pool id {0}")]
    InvalidPoolId(String),
    #[error("unknown chain '{0}'")]
    UnknownChain(String),
    #[error("oracle: {0}")]
    Oracle(#[from] OracleError),
    #[error("ledger: {0}")]
    Ledger(#[from] LedgerError),
    #[error("pool {pool_id}: archive holds {archived} predictions but the ledger reports {ledger}")]
    PredictionCountMismatch {
        pool_id: u64,
        archived: u64,
        ledger: u64,
    },
    #[error("pool {pool_id}: completion refused ({reason})")]
    InvalidCompletion { pool_id: u64, reason: String },
    #[error("archive: {0:#}")]
    Archive(anyhow::Error),
    #[error("job queue: {0:#}")]
    Queue(anyhow::Error),
    #[error("pool {pool_id} not settled: {reason}")]
    NotSettled { pool_id: u64, reason: SkipReason },
}

impl SettlementError {
    /// Consistency failures need an operator and must stop a sweep.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SettlementError::PredictionCountMismatch { .. })
    }
}

/// Parse a user-supplied pool id. Pool ids start at 1.
pub fn parse_pool_id(raw: &str) -> Result<u64, SettlementError> {
    match raw.trim().parse::<u64>() {
        Ok(0) | Err(_) => Err(SettlementError::InvalidPoolId(raw.to_string())),
        Ok(id) => Ok(id),
    }
}
