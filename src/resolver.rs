//! Pool Resolver
//!
//! Maps seeds to ledger pool ids through the seeds hash, creating pools whose
//! window is still open. The ledger rejects duplicate hashes, so concurrent
//! creators converge on one pool: the loser re-resolves.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::ledger::{seeds_hash, CommitStatus, Ledger, LedgerError};
use crate::types::PoolSeeds;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Existing(u64),
    Created(u64),
    /// No pool, and none created (window closed, dry run, or creation pending)
    Absent,
}

impl Resolution {
    pub fn pool_id(&self) -> Option<u64> {
        match self {
            Resolution::Existing(id) | Resolution::Created(id) => Some(*id),
            Resolution::Absent => None,
        }
    }
}

pub struct PoolResolver {
    ledger: Arc<dyn Ledger>,
    dry_run: bool,
}

impl PoolResolver {
    pub fn new(ledger: Arc<dyn Ledger>, dry_run: bool) -> Self {
        Self { ledger, dry_run }
    }

    /// Pool id registered for these seeds, if any
    pub async fn resolve(&self, seeds: &PoolSeeds) -> Result<Option<u64>, LedgerError> {
        self.ledger.pool_id_for_hash(seeds_hash(seeds)).await
    }

    /// Resolve, creating the pool when it is absent and its window is still open.
    pub async fn resolve_or_create(
        &self,
        seeds: &PoolSeeds,
        now: u64,
    ) -> Result<Resolution, LedgerError> {
        if let Some(pool_id) = self.resolve(seeds).await? {
            return Ok(Resolution::Existing(pool_id));
        }
        if now >= seeds.window_close_time {
            debug!(seeds = %seeds, "Window closed without a pool");
            return Ok(Resolution::Absent);
        }
        if self.dry_run {
            info!(chain = %self.ledger.chain(), seeds = %seeds, "Dry run, pool not created");
            return Ok(Resolution::Absent);
        }

        let created = self.ledger.create_pool(seeds).await;
        if let Err(e) = &created {
            warn!(chain = %self.ledger.chain(), seeds = %seeds, error = %e, "Pool creation failed, re-resolving");
        }

        match (self.resolve(seeds).await?, created) {
            (Some(pool_id), Ok(status)) => {
                info!(
                    chain = %self.ledger.chain(),
                    pool_id = pool_id,
                    asset = %seeds.prediction_asset,
                    tx = %format!("{:#x}", status.tx_hash()),
                    "🆕 Pool created"
                );
                Ok(Resolution::Created(pool_id))
            }
            // Another creator won the race
            (Some(pool_id), Err(_)) => Ok(Resolution::Existing(pool_id)),
            (None, Ok(CommitStatus::Unconfirmed { tx_hash })) => {
                warn!(chain = %self.ledger.chain(), tx = %format!("{:#x}", tx_hash), "Pool creation unconfirmed");
                Ok(Resolution::Absent)
            }
            (None, Ok(CommitStatus::Confirmed { tx_hash, .. })) => {
                warn!(chain = %self.ledger.chain(), tx = %format!("{:#x}", tx_hash), "Pool created but not yet visible");
                Ok(Resolution::Absent)
            }
            (None, Err(e)) => Err(e),
        }
    }
}
