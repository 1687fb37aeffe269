//! Sweep driver
//!
//! Walks every generated seed of every chain, one full pipeline at a time:
//! resolve or create the pool, pre-archive it once its window closes, settle it.

use tracing::{debug, error, info};

use super::{Orchestrator, SettlementError, SettlementOutcome};
use crate::resolver::{PoolResolver, Resolution};
use crate::seeds::{generate_seeds, StakeTiers};
use crate::types::{MarketClass, PoolSeeds};

/// Everything needed to run the pipeline on one chain
pub struct ChainPipeline {
    orchestrator: Orchestrator,
    resolver: PoolResolver,
    tiers: StakeTiers,
}

impl ChainPipeline {
    pub fn new(orchestrator: Orchestrator, tiers: StakeTiers) -> Self {
        let resolver = PoolResolver::new(orchestrator.ledger(), orchestrator.is_dry_run());
        Self {
            orchestrator,
            resolver,
            tiers,
        }
    }

    pub fn chain(&self) -> &str {
        self.orchestrator.chain()
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }
}

/// Counts of one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub seeds: u64,
    pub created: u64,
    /// Seeds with no pool and none created
    pub absent: u64,
    pub prearchived: u64,
    pub awaiting: u64,
    pub skipped: u64,
    pub already_settled: u64,
    pub reconciled: u64,
    pub submitted: u64,
    pub settled: u64,
    pub dry_run: u64,
    pub failed: u64,
}

impl SweepReport {
    fn record(&mut self, outcome: &SettlementOutcome) {
        match outcome {
            SettlementOutcome::AwaitingSnapshot { .. } => self.awaiting += 1,
            SettlementOutcome::Skipped => self.skipped += 1,
            SettlementOutcome::AlreadySettled { .. } => self.already_settled += 1,
            SettlementOutcome::Reconciled { .. } => self.reconciled += 1,
            SettlementOutcome::Submitted { .. } => self.submitted += 1,
            SettlementOutcome::Settled { .. } => self.settled += 1,
            SettlementOutcome::DryRun { .. } => self.dry_run += 1,
        }
    }
}

pub struct Scheduler {
    markets: Vec<MarketClass>,
    pipelines: Vec<ChainPipeline>,
}

impl Scheduler {
    pub fn new(markets: Vec<MarketClass>) -> Self {
        Self {
            markets,
            pipelines: Vec::new(),
        }
    }

    pub fn with_chain(mut self, pipeline: ChainPipeline) -> Self {
        self.pipelines.push(pipeline);
        self
    }

    pub fn chains(&self) -> Vec<&str> {
        self.pipelines.iter().map(|p| p.chain()).collect()
    }

    /// Run every seed of every chain once.
    ///
    /// Unit failures are logged and counted; a fatal error aborts the sweep.
    pub async fn sweep(&self, now: u64) -> Result<SweepReport, SettlementError> {
        let mut report = SweepReport::default();

        for pipeline in &self.pipelines {
            for class in &self.markets {
                let class_seeds = generate_seeds(now, class, &pipeline.tiers);
                debug!(
                    chain = %pipeline.chain(),
                    hours = %class.hours,
                    assets = class.assets.len(),
                    seeds = class_seeds.len(),
                    "Seeds generated"
                );
                for seeds in class_seeds {
                    report.seeds += 1;
                    if let Err(e) = self.run_seed(pipeline, &seeds, now, &mut report).await {
                        if e.is_fatal() {
                            error!(chain = %pipeline.chain(), seeds = %seeds, error = %e, "🚨 Fatal settlement error, aborting sweep");
                            return Err(e);
                        }
                        error!(chain = %pipeline.chain(), seeds = %seeds, error = %e, "Seed pipeline failed");
                        report.failed += 1;
                    }
                }
            }
        }

        info!(
            seeds = report.seeds,
            created = report.created,
            settled = report.settled,
            reconciled = report.reconciled,
            submitted = report.submitted,
            awaiting = report.awaiting,
            skipped = report.skipped,
            failed = report.failed,
            "Sweep finished"
        );
        Ok(report)
    }

    async fn run_seed(
        &self,
        pipeline: &ChainPipeline,
        seeds: &PoolSeeds,
        now: u64,
        report: &mut SweepReport,
    ) -> Result<(), SettlementError> {
        let pool_id = match pipeline.resolver.resolve_or_create(seeds, now).await? {
            Resolution::Existing(id) => id,
            Resolution::Created(id) => {
                report.created += 1;
                id
            }
            Resolution::Absent => {
                report.absent += 1;
                return Ok(());
            }
        };

        if now < seeds.window_close_time {
            // Still taking predictions
            return Ok(());
        }
        if pipeline.orchestrator.prearchive(pool_id, now).await? {
            report.prearchived += 1;
        }

        let outcome = pipeline.orchestrator.settle(pool_id, now).await?;
        debug!(chain = %pipeline.chain(), pool_id = pool_id, outcome = outcome.label(), "Seed processed");
        report.record(&outcome);
        Ok(())
    }

    /// Settle one pool on request, surfacing skips as errors.
    pub async fn settle_direct(
        &self,
        chain: &str,
        pool_id: u64,
        now: u64,
    ) -> Result<SettlementOutcome, SettlementError> {
        let pipeline = self
            .pipelines
            .iter()
            .find(|p| p.chain() == chain)
            .ok_or_else(|| SettlementError::UnknownChain(chain.to_string()))?;
        pipeline.orchestrator.settle_direct(pool_id, now).await
    }
}
