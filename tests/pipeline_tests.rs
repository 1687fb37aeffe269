//! Resolver, sweep driver and notification fan-out, end to end in memory

mod common;

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio_test::{assert_err, assert_ok};

    use ethers::types::Address;
    use poolsettler::notify::{
        Channel, MemoryChannelRegistry, NotificationFanout, NotificationWorker,
    };
    use poolsettler::persistence::{ArchiveStore, MemoryArchiveStore};
    use poolsettler::queue::MemoryJobQueue;
    use poolsettler::resolver::{PoolResolver, Resolution};
    use poolsettler::seeds::StakeTiers;
    use poolsettler::settlement::{
        ChainPipeline, Orchestrator, OrchestratorSettings, Scheduler, SettlementError,
    };
    use poolsettler::types::{ArchivedPool, MarketClass, MarketHours};

    use crate::common::{seeds, stake_token, FakeLedger, FakeOracle, RecordingNotifier, CHAIN, ONE};

    // 2026-10-14 (Wednesday) 10:00 and 12:30 UTC
    const WED_1000: u64 = 1_791_972_000;
    const WED_1230: u64 = 1_791_981_000;
    const WED_1200: u64 = 1_791_979_200;
    const WED_1100: u64 = 1_791_975_600;
    const STAKE: u128 = 1_000_000;

    // ============================================================================
    // Pool resolver
    // ============================================================================

    #[tokio::test]
    async fn test_resolve_or_create_creates_once() {
        let ledger = Arc::new(FakeLedger::new());
        let resolver = PoolResolver::new(ledger.clone(), false);
        let pool_seeds = seeds("BTC", STAKE, WED_1100, WED_1200);

        assert_eq!(resolver.resolve(&pool_seeds).await.unwrap(), None);
        assert_eq!(
            resolver.resolve_or_create(&pool_seeds, WED_1000).await.unwrap(),
            Resolution::Created(1)
        );
        assert_eq!(
            resolver.resolve_or_create(&pool_seeds, WED_1000).await.unwrap(),
            Resolution::Existing(1)
        );
        assert_eq!(resolver.resolve(&pool_seeds).await.unwrap(), Some(1));
        assert_eq!(ledger.writes(), 1);
    }

    #[tokio::test]
    async fn test_closed_window_is_never_created() {
        let ledger = Arc::new(FakeLedger::new());
        let resolver = PoolResolver::new(ledger.clone(), false);
        let pool_seeds = seeds("BTC", STAKE, WED_1100, WED_1200);

        let resolution = resolver.resolve_or_create(&pool_seeds, WED_1100).await.unwrap();

        assert_eq!(resolution, Resolution::Absent);
        assert_eq!(resolution.pool_id(), None);
        assert_eq!(ledger.writes(), 0);
    }

    #[tokio::test]
    async fn test_lost_creation_race_re_resolves() {
        let ledger = Arc::new(FakeLedger::new());
        ledger.set_lose_create_race(true);
        let resolver = PoolResolver::new(ledger.clone(), false);

        let resolution = resolver
            .resolve_or_create(&seeds("ETH", STAKE, WED_1100, WED_1200), WED_1000)
            .await
            .unwrap();

        assert_eq!(resolution, Resolution::Existing(1));
    }

    #[tokio::test]
    async fn test_dry_run_resolver_does_not_create() {
        let ledger = Arc::new(FakeLedger::new());
        let resolver = PoolResolver::new(ledger.clone(), true);

        let resolution = resolver
            .resolve_or_create(&seeds("ETH", STAKE, WED_1100, WED_1200), WED_1000)
            .await
            .unwrap();

        assert_eq!(resolution, Resolution::Absent);
        assert_eq!(ledger.writes(), 0);
    }

    // ============================================================================
    // Sweep driver and notifications
    // ============================================================================

    struct World {
        ledger: Arc<FakeLedger>,
        archive: Arc<MemoryArchiveStore>,
        queue: Arc<MemoryJobQueue>,
        scheduler: Scheduler,
    }

    fn world() -> World {
        let ledger = Arc::new(FakeLedger::new());
        let archive = Arc::new(MemoryArchiveStore::new());
        let queue = Arc::new(MemoryJobQueue::new(3));
        let orchestrator = Orchestrator::new(
            ledger.clone(),
            Arc::new(FakeOracle::new(100 * ONE)),
            archive.clone(),
            queue.clone(),
            OrchestratorSettings::default(),
        );
        let tiers = StakeTiers {
            stake_asset: stake_token(),
            amounts: vec![STAKE],
        };
        let scheduler = Scheduler::new(vec![MarketClass {
            hours: MarketHours::Continuous,
            assets: vec!["BTC".to_string()],
        }])
        .with_chain(ChainPipeline::new(orchestrator, tiers));

        World {
            ledger,
            archive,
            queue,
            scheduler,
        }
    }

    #[tokio::test]
    async fn test_sweeps_create_settle_and_notify() {
        let w = world();

        // 6h: 06:00 closed, 12:00 and 18:00 open; 24h: 14th closed, 15th and 16th open
        let first = assert_ok!(w.scheduler.sweep(WED_1000).await);
        assert_eq!(first.seeds, 6);
        assert_eq!(first.created, 4);
        assert_eq!(first.absent, 2);
        assert_eq!(first.failed, 0);
        assert_eq!(w.ledger.pool_now(1).seeds.snapshot_time, WED_1200);

        w.ledger.place_prediction(1, 1, 99 * ONE);
        w.ledger.place_prediction(1, 2, 105 * ONE);
        w.ledger.place_prediction(1, 3, 100 * ONE + ONE / 2);

        let second = assert_ok!(w.scheduler.sweep(WED_1230).await);
        assert_eq!(second.settled, 1);
        assert_eq!(second.created, 1);
        assert_eq!(second.awaiting, 1);
        assert_eq!(second.prearchived, 2);
        assert_eq!(second.failed, 0);
        let writes_after_settlement = w.ledger.writes();

        let channels = Arc::new(MemoryChannelRegistry::new());
        channels
            .register(
                Address::from_low_u64_be(3),
                Channel::Webhook {
                    url: "https://hooks.example/3".to_string(),
                },
            )
            .await;
        let notifier = Arc::new(RecordingNotifier::default());
        let fanout = NotificationFanout::new(w.archive.clone(), channels, notifier.clone())
            .with_token_decimals(CHAIN, 6);
        let worker = NotificationWorker::new(w.queue.clone(), fanout);

        let drained = worker.drain().await.unwrap();
        assert_eq!(drained.completed, 1);
        assert_eq!(notifier.count(), 1);
        {
            let sent = notifier.sent.lock().unwrap();
            let (_, notification) = &sent[0];
            assert_eq!(notification.pool_id, 1);
            assert_eq!(notification.total_won, 2_850_000);
            assert_eq!(notification.total_won_display, "2.85");
        }
        assert_eq!(worker.drain().await.unwrap().completed, 0);

        // A later sweep sees the pool as settled and writes nothing
        let third = w.scheduler.sweep(WED_1230 + 60).await.unwrap();
        assert_eq!(third.already_settled, 1);
        assert_eq!(w.ledger.writes(), writes_after_settlement);
        assert!(w.queue.pending().await.is_empty());
        assert_eq!(notifier.count(), 1);
    }

    #[tokio::test]
    async fn test_count_mismatch_aborts_the_sweep() {
        let w = world();
        w.scheduler.sweep(WED_1000).await.unwrap();
        w.ledger.place_prediction(1, 1, 99 * ONE);

        // An archived snapshot that missed the prediction
        w.archive
            .save(&ArchivedPool {
                chain: CHAIN.to_string(),
                pool: w.ledger.pool_now(1),
                predictions: vec![],
                results: None,
                notification_enqueued: false,
                has_notified_winners: false,
                archived_at: 0,
            })
            .await
            .unwrap();

        let err = assert_err!(w.scheduler.sweep(WED_1230).await);
        assert!(err.is_fatal());
        assert!(matches!(err, SettlementError::PredictionCountMismatch { .. }));
    }

    #[tokio::test]
    async fn test_direct_settlement_of_unknown_chain() {
        let w = world();
        let err = w
            .scheduler
            .settle_direct("mainnet", 1, WED_1230)
            .await
            .unwrap_err();
        assert!(matches!(err, SettlementError::UnknownChain(_)));
        assert_eq!(w.scheduler.chains(), vec![CHAIN]);
    }
}
