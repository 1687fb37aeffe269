//! Notification fan-out
//!
//! Consumes `(chain, pool_id)` jobs: tells every winner with a registered
//! channel how much they won. The archive's `has_notified_winners` flag is set
//! only after a full pass, so a crash mid-pass re-sends rather than omits.

mod channels;
mod webhook;

pub use channels::{Channel, ChannelRegistry, FileChannelRegistry, MemoryChannelRegistry};
pub use webhook::{sign_body, WebhookNotifier, SIGNATURE_HEADER};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use ethers::types::Address;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::persistence::ArchiveStore;
use crate::queue::JobQueue;
use crate::types::{dec_str, NotificationJob};

/// Message sent to one winner of one pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WinnerNotification {
    pub chain: String,
    pub pool_id: u64,
    pub asset: String,
    pub winner: Address,
    pub prediction_ids: Vec<u64>,
    #[serde(with = "dec_str")]
    pub total_won: u128,
    /// `total_won` in whole stake tokens
    pub total_won_display: String,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, channel: &Channel, notification: &WinnerNotification) -> Result<()>;
}

/// Format base units as a decimal token amount ("2200000" with 6 decimals -> "2.2").
pub fn format_amount(raw: u128, decimals: u32) -> String {
    match i128::try_from(raw)
        .ok()
        .and_then(|v| Decimal::try_from_i128_with_scale(v, decimals).ok())
    {
        Some(amount) => amount.normalize().to_string(),
        None => {
            let scale = decimals as usize;
            let digits = format!("{:0>width$}", raw, width = scale + 1);
            let (whole, frac) = digits.split_at(digits.len() - scale);
            let frac = frac.trim_end_matches('0');
            if frac.is_empty() {
                whole.to_string()
            } else {
                format!("{}.{}", whole, frac)
            }
        }
    }
}

/// Outcome of notifying one pool
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FanoutReport {
    pub sent: u64,
    pub failed: u64,
    /// Winners without a registered channel
    pub unreachable: u64,
    /// The pool had already been notified
    pub already_notified: bool,
}

pub struct NotificationFanout {
    archive: Arc<dyn ArchiveStore>,
    channels: Arc<dyn ChannelRegistry>,
    notifier: Arc<dyn Notifier>,
    token_decimals: HashMap<String, u32>,
}

impl NotificationFanout {
    pub fn new(
        archive: Arc<dyn ArchiveStore>,
        channels: Arc<dyn ChannelRegistry>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            archive,
            channels,
            notifier,
            token_decimals: HashMap::new(),
        }
    }

    pub fn with_token_decimals(mut self, chain: &str, decimals: u32) -> Self {
        self.token_decimals.insert(chain.to_string(), decimals);
        self
    }

    pub async fn notify_pool(&self, job: &NotificationJob) -> Result<FanoutReport> {
        let mut doc = self
            .archive
            .load(&job.chain, job.pool_id)
            .await?
            .ok_or_else(|| anyhow!("pool {} on {} is not archived", job.pool_id, job.chain))?;

        if doc.has_notified_winners {
            debug!(chain = %job.chain, pool_id = job.pool_id, "Winners already notified");
            return Ok(FanoutReport {
                already_notified: true,
                ..FanoutReport::default()
            });
        }
        let results = doc
            .results
            .clone()
            .ok_or_else(|| anyhow!("pool {} on {} has no results", job.pool_id, job.chain))?;

        let owners: HashMap<u64, Address> = doc
            .predictions
            .iter()
            .map(|p| (p.id, p.predicter))
            .collect();
        let decimals = self.token_decimals.get(&job.chain).copied().unwrap_or(18);
        let mut report = FanoutReport::default();

        for winner in &results.winner_addresses_unique {
            let prediction_ids: Vec<u64> = results
                .winner_prediction_ids
                .iter()
                .copied()
                .filter(|id| owners.get(id) == Some(winner))
                .collect();

            let channel = match self.channels.channel_for(winner).await {
                Ok(Some(channel)) => channel,
                Ok(None) => {
                    report.unreachable += 1;
                    continue;
                }
                Err(e) => {
                    warn!(winner = %format!("{:#x}", winner), error = %e, "Channel lookup failed");
                    report.failed += 1;
                    continue;
                }
            };

            let Some(total_won) = results
                .win_amount
                .checked_mul(prediction_ids.len() as u128)
            else {
                error!(winner = %format!("{:#x}", winner), pool_id = job.pool_id, "Winnings overflow");
                report.failed += 1;
                continue;
            };
            let notification = WinnerNotification {
                chain: job.chain.clone(),
                pool_id: job.pool_id,
                asset: doc.pool.seeds.prediction_asset.clone(),
                winner: *winner,
                prediction_ids,
                total_won,
                total_won_display: format_amount(total_won, decimals),
            };

            match self.notifier.send(&channel, &notification).await {
                Ok(()) => report.sent += 1,
                Err(e) => {
                    warn!(
                        chain = %job.chain,
                        pool_id = job.pool_id,
                        winner = %format!("{:#x}", winner),
                        error = %e,
                        "Winner notification failed"
                    );
                    report.failed += 1;
                }
            }
        }

        doc.has_notified_winners = true;
        doc.archived_at = chrono::Utc::now().timestamp();
        self.archive
            .save(&doc)
            .await
            .context("Failed to mark pool as notified")?;

        let mut counters = self.archive.load_counters(&job.chain).await?;
        counters.pools_notified += 1;
        counters.notifications_sent += report.sent;
        counters.notifications_failed += report.failed;
        self.archive.save_counters(&job.chain, &counters).await?;

        info!(
            chain = %job.chain,
            pool_id = job.pool_id,
            sent = report.sent,
            failed = report.failed,
            unreachable = report.unreachable,
            "📣 Winners notified"
        );
        Ok(report)
    }
}

/// Jobs handled by one `drain()` call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub completed: u64,
    pub failed: u64,
}

pub struct NotificationWorker {
    queue: Arc<dyn JobQueue>,
    fanout: NotificationFanout,
}

impl NotificationWorker {
    pub fn new(queue: Arc<dyn JobQueue>, fanout: NotificationFanout) -> Self {
        Self { queue, fanout }
    }

    /// Process every job pending at call time.
    ///
    /// Jobs failed during the pass return to the queue for the next drain.
    pub async fn drain(&self) -> Result<DrainReport> {
        let mut claimed = Vec::new();
        while let Some(job) = self.queue.claim().await? {
            claimed.push(job);
        }

        let mut report = DrainReport::default();
        for job in claimed {
            match self.fanout.notify_pool(&job.payload).await {
                Ok(_) => {
                    self.queue.ack(&job).await?;
                    report.completed += 1;
                }
                Err(e) => {
                    warn!(job_id = %job.id, pool_id = job.payload.pool_id, error = %e, "Notification job failed");
                    self.queue.fail(&job, &format!("{:#}", e)).await?;
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryArchiveStore;
    use crate::types::{ArchivedPool, Pool, PoolSeeds, Prediction, SettlementResult};
    use ethers::types::H256;
    use rust_decimal_macros::dec;

    fn prediction(id: u64, who: u64) -> Prediction {
        Prediction {
            predicter: Address::from_low_u64_be(who),
            pool_id: 3,
            id,
            price: 100,
            time: 0,
            claimed_winnings_time: 0,
            is_a_winner: false,
        }
    }

    async fn archived_pool(store: &MemoryArchiveStore) {
        let predictions = vec![prediction(1, 10), prediction(2, 20), prediction(3, 10), prediction(4, 30)];
        let winners = vec![predictions[2].clone(), predictions[1].clone(), predictions[0].clone()];
        store
            .save(&ArchivedPool {
                chain: "base".to_string(),
                pool: Pool {
                    pool_id: 3,
                    seeds: PoolSeeds {
                        prediction_asset: "BTC".to_string(),
                        stake_asset: Address::from_low_u64_be(1),
                        stake_amount: 1_000_000,
                        window_close_time: 100,
                        snapshot_time: 200,
                    },
                    seeds_hash: H256::zero(),
                    creation_time: 10,
                    no_of_predictions: 4,
                    snapshot_price: 100,
                    completion_time: 300,
                    win_amount: 1_100_000,
                    no_of_winners: 3,
                    no_of_claimed_winnings: 0,
                },
                predictions,
                results: Some(SettlementResult::from_winners(&winners, 1_100_000)),
                notification_enqueued: false,
                has_notified_winners: false,
                archived_at: 0,
            })
            .await
            .unwrap();
    }

    fn job() -> NotificationJob {
        NotificationJob {
            pool_id: 3,
            chain: "base".to_string(),
        }
    }

    #[test]
    fn amounts_format_with_token_decimals() {
        assert_eq!(format_amount(2_200_000, 6), "2.2");
        assert_eq!(format_amount(2_850_000, 6).parse::<Decimal>().unwrap(), dec!(2.85));
        assert_eq!(format_amount(5 * 10u128.pow(18), 18), "5");
        assert_eq!(format_amount(1, 18), "0.000000000000000001");
        assert_eq!(format_amount(u128::MAX, 18), "340282366920938463463.374607431768211455");
    }

    #[test]
    fn formats_amounts_beyond_decimal_scale() {
        assert_eq!(format_amount(5, 40), format!("0.{}5", "0".repeat(39)));
        assert_eq!(format_amount(10u128.pow(38), 38), "1");
        assert_eq!(format_amount(12 * 10u128.pow(37), 38), "1.2");
    }

    #[tokio::test]
    async fn one_message_per_winner_with_summed_winnings() {
        let store = Arc::new(MemoryArchiveStore::new());
        archived_pool(&store).await;
        let channels = Arc::new(MemoryChannelRegistry::new());
        for who in [10, 20] {
            channels
                .register(
                    Address::from_low_u64_be(who),
                    Channel::Webhook {
                        url: format!("https://hooks.example/{}", who),
                    },
                )
                .await;
        }

        let mut notifier = MockNotifier::new();
        notifier
            .expect_send()
            .withf(|_, n| n.winner == Address::from_low_u64_be(10))
            .times(1)
            .returning(|_, n| {
                assert_eq!(n.prediction_ids, vec![3, 1]);
                assert_eq!(n.total_won, 2_200_000);
                Ok(())
            });
        notifier
            .expect_send()
            .withf(|_, n| n.winner == Address::from_low_u64_be(20))
            .times(1)
            .returning(|_, _| Err(anyhow!("503")));

        let fanout = NotificationFanout::new(store.clone(), channels, Arc::new(notifier))
            .with_token_decimals("base", 6);
        let report = fanout.notify_pool(&job()).await.unwrap();

        assert_eq!(report.sent, 1);
        assert_eq!(report.failed, 1);
        let doc = store.load("base", 3).await.unwrap().unwrap();
        assert!(doc.has_notified_winners);
        let counters = store.load_counters("base").await.unwrap();
        assert_eq!(counters.pools_notified, 1);
        assert_eq!(counters.notifications_sent, 1);
        assert_eq!(counters.notifications_failed, 1);
    }

    #[tokio::test]
    async fn notified_pools_send_nothing() {
        let store = Arc::new(MemoryArchiveStore::new());
        archived_pool(&store).await;
        let channels = Arc::new(MemoryChannelRegistry::new());
        channels
            .register(
                Address::from_low_u64_be(10),
                Channel::Webhook {
                    url: "https://hooks.example/10".to_string(),
                },
            )
            .await;

        let mut notifier = MockNotifier::new();
        notifier.expect_send().times(1).returning(|_, _| Ok(()));
        let fanout = NotificationFanout::new(store.clone(), channels, Arc::new(notifier));

        assert_eq!(fanout.notify_pool(&job()).await.unwrap().sent, 1);
        let second = fanout.notify_pool(&job()).await.unwrap();
        assert!(second.already_notified);
        assert_eq!(second.sent, 0);
        assert_eq!(store.load_counters("base").await.unwrap().pools_notified, 1);
    }

    #[tokio::test]
    async fn unarchived_pool_fails_the_job() {
        let store = Arc::new(MemoryArchiveStore::new());
        let fanout = NotificationFanout::new(
            store,
            Arc::new(MemoryChannelRegistry::new()),
            Arc::new(MockNotifier::new()),
        );
        assert!(fanout.notify_pool(&job()).await.is_err());
    }
}
