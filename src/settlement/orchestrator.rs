//! Settlement Orchestrator
//!
//! Drives one pool through the settlement state machine against one chain.
//! Writes go through the chain's `Ledger`, which serializes them per admin key.

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::split::{compute_split, rank, win_amount};
use super::{SettlementError, SettlementOutcome};
use crate::ledger::{
    read_all_predictions, CommitStatus, CompletionParams, Ledger, LedgerError, LedgerRejection,
};
use crate::oracle::PriceOracle;
use crate::persistence::{ArchiveStore, SettlementAuditLog, SettlementAuditRecord};
use crate::queue::JobQueue;
use crate::types::{ArchivedPool, NotificationJob, Pool, Prediction, SettlementResult};

/// Tunables of the orchestrator
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Prediction ids fetched per ledger read
    pub page_size: u64,
    /// Compute and log the split without writing anything
    pub dry_run: bool,
    /// Name of the notification job
    pub job_name: String,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            page_size: 100,
            dry_run: false,
            job_name: "notify-winners".to_string(),
        }
    }
}

pub struct Orchestrator {
    chain: String,
    ledger: Arc<dyn Ledger>,
    oracle: Arc<dyn PriceOracle>,
    archive: Arc<dyn ArchiveStore>,
    queue: Arc<dyn JobQueue>,
    audit: Option<Arc<SettlementAuditLog>>,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        oracle: Arc<dyn PriceOracle>,
        archive: Arc<dyn ArchiveStore>,
        queue: Arc<dyn JobQueue>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            chain: ledger.chain().to_string(),
            ledger,
            oracle,
            archive,
            queue,
            audit: None,
            settings,
        }
    }

    pub fn with_audit_log(mut self, audit: Arc<SettlementAuditLog>) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn chain(&self) -> &str {
        &self.chain
    }

    pub fn ledger(&self) -> Arc<dyn Ledger> {
        Arc::clone(&self.ledger)
    }

    pub fn is_dry_run(&self) -> bool {
        self.settings.dry_run
    }

    /// Settle a pool if it is due.
    ///
    /// Expected conditions (not yet due, empty, already settled) come back as
    /// outcomes. Errors are unit failures, or fatal per `SettlementError::is_fatal`.
    pub async fn settle(&self, pool_id: u64, now: u64) -> Result<SettlementOutcome, SettlementError> {
        let pool = self.fetch_pool(pool_id).await?;

        if now < pool.seeds.snapshot_time {
            debug!(
                chain = %self.chain,
                pool_id = pool_id,
                snapshot_time = pool.seeds.snapshot_time,
                "Pool awaiting snapshot"
            );
            return Ok(SettlementOutcome::AwaitingSnapshot {
                snapshot_time: pool.seeds.snapshot_time,
            });
        }

        if pool.no_of_predictions == 0 {
            info!(chain = %self.chain, pool_id = pool_id, "Pool has no predictions, skipping");
            return Ok(SettlementOutcome::Skipped);
        }

        if pool.is_completed() {
            return self.settled_or_reconcile(pool).await;
        }

        self.settle_open_pool(pool).await
    }

    /// Settle one pool on explicit request; expected skips become errors.
    pub async fn settle_direct(
        &self,
        pool_id: u64,
        now: u64,
    ) -> Result<SettlementOutcome, SettlementError> {
        let outcome = self.settle(pool_id, now).await?;
        match outcome.skip_reason() {
            Some(reason) => Err(SettlementError::NotSettled { pool_id, reason }),
            None => Ok(outcome),
        }
    }

    /// Snapshot a closed pool's predictions into the archive ahead of settlement.
    ///
    /// Returns whether a document was written.
    pub async fn prearchive(&self, pool_id: u64, now: u64) -> Result<bool, SettlementError> {
        if self.settings.dry_run {
            return Ok(false);
        }
        let pool = self.fetch_pool(pool_id).await?;
        if now < pool.seeds.window_close_time || pool.is_completed() {
            return Ok(false);
        }

        let predictions = match self.load_archived(pool_id).await? {
            Some(doc) if doc.results.is_some() => return Ok(false),
            Some(doc) => self.checked_archive_predictions(&pool, doc)?,
            None => self.read_ledger_predictions(&pool).await?,
        };

        let count = predictions.len();
        self.save_archived(ArchivedPool {
            chain: self.chain.clone(),
            pool,
            predictions,
            results: None,
            notification_enqueued: false,
            has_notified_winners: false,
            archived_at: chrono::Utc::now().timestamp(),
        })
        .await?;
        debug!(chain = %self.chain, pool_id = pool_id, predictions = count, "Pool pre-archived");
        Ok(true)
    }

    /// Read a pool after checking `pool_id` against the ledger's pool count.
    async fn fetch_pool(&self, pool_id: u64) -> Result<Pool, SettlementError> {
        if pool_id == 0 {
            return Err(SettlementError::InvalidPoolId(pool_id.to_string()));
        }
        let count = self.ledger.pools_count().await?;
        if pool_id > count {
            return Err(SettlementError::InvalidPoolId(format!(
                "{} (pool count {})",
                pool_id, count
            )));
        }
        match self.ledger.pool(pool_id).await {
            Ok(pool) => Ok(pool),
            Err(LedgerError::Rejected(LedgerRejection::InvalidPoolId)) => {
                Err(SettlementError::InvalidPoolId(pool_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn settle_open_pool(&self, pool: Pool) -> Result<SettlementOutcome, SettlementError> {
        let pool_id = pool.pool_id;
        let snapshot_price = self
            .oracle
            .snapshot_price(&pool.seeds.prediction_asset, pool.seeds.snapshot_time)
            .await?;

        let predictions = self.load_predictions(&pool).await?;
        let split = compute_split(snapshot_price, &predictions);
        let no_of_winners = split.winners.len() as u64;

        let fee_percent = self.ledger.fee_percentage().await?;
        let amount = win_amount(
            pool.seeds.stake_amount,
            pool.no_of_predictions,
            fee_percent,
            no_of_winners,
        )
        .ok_or_else(|| SettlementError::InvalidCompletion {
            pool_id,
            reason: format!(
                "payout out of range (stake {}, predictions {}, fee {}%, winners {})",
                pool.seeds.stake_amount, pool.no_of_predictions, fee_percent, no_of_winners
            ),
        })?;
        let result = SettlementResult::from_winners(&split.winners, amount);

        info!(
            chain = %self.chain,
            pool_id = pool_id,
            asset = %pool.seeds.prediction_asset,
            snapshot_price = %snapshot_price,
            predictions = pool.no_of_predictions,
            winners = no_of_winners,
            win_amount = %amount,
            "🧮 Split computed"
        );

        if self.settings.dry_run {
            info!(chain = %self.chain, pool_id = pool_id, winners = ?result.winner_prediction_ids, "Dry run, completion not submitted");
            return Ok(SettlementOutcome::DryRun { result });
        }

        let params = CompletionParams {
            pool_id,
            snapshot_price,
            no_of_winners,
            win_amount: amount,
            winner_prediction_ids: result.winner_prediction_ids.clone(),
        };
        let status = match self.ledger.commit_completion(&params).await {
            Ok(status) => status,
            Err(LedgerError::Rejected(rejection)) => {
                return self.on_rejection(&pool, rejection).await;
            }
            Err(e) => return Err(e.into()),
        };

        // completionTime and winAmount are only meaningful after the commit
        let fresh = self.ledger.pool(pool_id).await?;
        if !fresh.is_completed() {
            let tx_hash = status.tx_hash();
            if let CommitStatus::Confirmed { .. } = status {
                warn!(chain = %self.chain, pool_id = pool_id, tx = %format!("{:#x}", tx_hash), "Completion confirmed but pool still reads unsettled");
            } else {
                warn!(chain = %self.chain, pool_id = pool_id, tx = %format!("{:#x}", tx_hash), "⏳ Completion unconfirmed, will reconcile on next run");
            }
            return Ok(SettlementOutcome::Submitted { tx_hash });
        }

        let tx_hash = status.tx_hash();
        let doc = self
            .archive_results(fresh.clone(), predictions, result.clone())
            .await?;
        self.append_audit(&fresh, &result, &format!("{:#x}", tx_hash))
            .await;
        self.enqueue_notification(doc).await?;

        info!(
            chain = %self.chain,
            pool_id = pool_id,
            tx = %format!("{:#x}", tx_hash),
            winners = result.no_of_winners,
            "✅ Pool settled"
        );
        Ok(SettlementOutcome::Settled { result, tx_hash })
    }

    /// Map a typed ledger rejection of `completePool` onto a pipeline state.
    async fn on_rejection(
        &self,
        pool: &Pool,
        rejection: LedgerRejection,
    ) -> Result<SettlementOutcome, SettlementError> {
        let pool_id = pool.pool_id;
        warn!(chain = %self.chain, pool_id = pool_id, rejection = %rejection, "Completion rejected by ledger");
        match rejection {
            LedgerRejection::AlreadyCompleted => {
                let fresh = self.ledger.pool(pool_id).await?;
                if fresh.is_completed() {
                    self.settled_or_reconcile(fresh).await
                } else {
                    Ok(SettlementOutcome::AlreadySettled { result: None })
                }
            }
            LedgerRejection::NotYetSnapshotTime => Ok(SettlementOutcome::AwaitingSnapshot {
                snapshot_time: pool.seeds.snapshot_time,
            }),
            LedgerRejection::NoPredictionsInPool => Ok(SettlementOutcome::Skipped),
            LedgerRejection::InvalidPoolId => {
                Err(SettlementError::InvalidPoolId(pool_id.to_string()))
            }
            LedgerRejection::InvalidWinnersCount | LedgerRejection::ZeroAmountSpecified => {
                Err(SettlementError::InvalidCompletion {
                    pool_id,
                    reason: rejection.to_string(),
                })
            }
        }
    }

    /// A completed pool: no-op if the archive has its results, otherwise
    /// rebuild them from the ledger and finish the post-commit steps.
    async fn settled_or_reconcile(&self, pool: Pool) -> Result<SettlementOutcome, SettlementError> {
        let pool_id = pool.pool_id;
        if let Some(doc) = self
            .load_archived(pool_id)
            .await?
            .filter(|doc| doc.results.is_some())
        {
            debug!(chain = %self.chain, pool_id = pool_id, "Pool already settled");
            let result = doc.results.clone();
            if !doc.notification_enqueued && !doc.has_notified_winners && !self.settings.dry_run {
                warn!(chain = %self.chain, pool_id = pool_id, "📮 Settled pool has no queued notification, enqueueing");
                self.enqueue_notification(doc).await?;
            }
            return Ok(SettlementOutcome::AlreadySettled { result });
        }
        if self.settings.dry_run {
            return Ok(SettlementOutcome::AlreadySettled { result: None });
        }

        // Fresh read: the archived copy predates the winner flags
        let predictions = self.read_ledger_predictions(&pool).await?;
        let flagged: Vec<Prediction> = predictions
            .iter()
            .filter(|p| p.is_a_winner)
            .cloned()
            .collect();
        let winners = if flagged.is_empty() {
            compute_split(pool.snapshot_price, &predictions).winners
        } else {
            rank(pool.snapshot_price, &flagged)
        };
        if winners.len() as u64 != pool.no_of_winners {
            warn!(
                chain = %self.chain,
                pool_id = pool_id,
                ledger_winners = pool.no_of_winners,
                rebuilt_winners = winners.len(),
                "Rebuilt winner set differs from ledger count"
            );
        }
        let result = SettlementResult::from_winners(&winners, pool.win_amount);

        let doc = self.archive_results(pool, predictions, result.clone()).await?;
        self.enqueue_notification(doc).await?;
        info!(chain = %self.chain, pool_id = pool_id, winners = result.no_of_winners, "🔁 Settlement reconciled from ledger");
        Ok(SettlementOutcome::Reconciled { result })
    }

    /// Predictions of a pool, preferring the pre-archived copy.
    async fn load_predictions(&self, pool: &Pool) -> Result<Vec<Prediction>, SettlementError> {
        match self.load_archived(pool.pool_id).await? {
            Some(doc) => self.checked_archive_predictions(pool, doc),
            None => self.read_ledger_predictions(pool).await,
        }
    }

    /// Archived predictions, provided they agree with the ledger's count.
    fn checked_archive_predictions(
        &self,
        pool: &Pool,
        doc: ArchivedPool,
    ) -> Result<Vec<Prediction>, SettlementError> {
        let archived = doc.predictions.len() as u64;
        if archived != pool.no_of_predictions {
            error!(
                chain = %self.chain,
                pool_id = pool.pool_id,
                archived = archived,
                ledger = pool.no_of_predictions,
                "🚨 Archive and ledger disagree on prediction count"
            );
            return Err(SettlementError::PredictionCountMismatch {
                pool_id: pool.pool_id,
                archived,
                ledger: pool.no_of_predictions,
            });
        }
        Ok(doc.predictions)
    }

    async fn read_ledger_predictions(&self, pool: &Pool) -> Result<Vec<Prediction>, SettlementError> {
        let predictions =
            read_all_predictions(self.ledger.as_ref(), pool.pool_id, self.settings.page_size)
                .await?;
        if predictions.len() as u64 != pool.no_of_predictions {
            return Err(LedgerError::Decode {
                field: "predictions",
                reason: format!(
                    "pool {} lists {} predictions, expected {}",
                    pool.pool_id,
                    predictions.len(),
                    pool.no_of_predictions
                ),
            }
            .into());
        }
        Ok(predictions)
    }

    async fn archive_results(
        &self,
        pool: Pool,
        predictions: Vec<Prediction>,
        result: SettlementResult,
    ) -> Result<ArchivedPool, SettlementError> {
        let predictions = predictions
            .into_iter()
            .map(|mut p| {
                p.is_a_winner = result.winner_prediction_ids.contains(&p.id);
                p
            })
            .collect();
        let doc = ArchivedPool {
            chain: self.chain.clone(),
            pool,
            predictions,
            results: Some(result),
            notification_enqueued: false,
            has_notified_winners: false,
            archived_at: chrono::Utc::now().timestamp(),
        };
        self.save_archived(doc.clone()).await?;
        Ok(doc)
    }

    /// Queue the winners job for an archived result and record that it was queued.
    ///
    /// Until the flag is saved, every later run re-enqueues; the fan-out drops duplicates.
    async fn enqueue_notification(&self, mut doc: ArchivedPool) -> Result<(), SettlementError> {
        let job = NotificationJob {
            pool_id: doc.pool.pool_id,
            chain: self.chain.clone(),
        };
        self.queue
            .enqueue(&self.settings.job_name, job)
            .await
            .map_err(SettlementError::Queue)?;
        doc.notification_enqueued = true;
        self.save_archived(doc).await
    }

    async fn append_audit(&self, pool: &Pool, result: &SettlementResult, tx_hash: &str) {
        let Some(audit) = &self.audit else {
            return;
        };
        let record = SettlementAuditRecord {
            timestamp: chrono::Utc::now().timestamp(),
            chain: self.chain.clone(),
            pool_id: pool.pool_id,
            asset: pool.seeds.prediction_asset.clone(),
            snapshot_time: pool.seeds.snapshot_time,
            snapshot_price: pool.snapshot_price.to_string(),
            no_of_predictions: pool.no_of_predictions,
            no_of_winners: result.no_of_winners,
            win_amount: result.win_amount.to_string(),
            winner_prediction_ids: result
                .winner_prediction_ids
                .iter()
                .map(|id| id.to_string())
                .collect::<Vec<_>>()
                .join(";"),
            tx_hash: tx_hash.to_string(),
        };
        if let Err(e) = audit.append(&record).await {
            warn!(error = %e, path = %audit.path().display(), "Failed to append settlement audit record");
        }
    }

    async fn load_archived(&self, pool_id: u64) -> Result<Option<ArchivedPool>, SettlementError> {
        self.archive
            .load(&self.chain, pool_id)
            .await
            .map_err(SettlementError::Archive)
    }

    async fn save_archived(&self, doc: ArchivedPool) -> Result<(), SettlementError> {
        self.archive
            .save(&doc)
            .await
            .map_err(SettlementError::Archive)
    }
}
