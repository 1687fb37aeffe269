//! Seed Generator
//!
//! Produces the canonical pool seeds for the previous, current and next
//! bucket of every cadence. Pure: the same tick always yields the same seeds.

use ethers::types::Address;

use crate::types::{Cadence, MarketClass, MarketHours, PoolSeeds};

const DAY_SECS: u64 = 24 * 60 * 60;

// 1970-01-01 was a Thursday; Monday = 0.
const EPOCH_WEEKDAY_OFFSET: u64 = 3;
const SATURDAY: u64 = 5;
const SUNDAY: u64 = 6;
const MONDAY: u64 = 0;

/// Stake tiers offered on one chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StakeTiers {
    pub stake_asset: Address,
    pub amounts: Vec<u128>,
}

/// Generate seeds for every cadence, asset and stake tier at `now` (unix seconds).
///
/// Order: cadence, then asset, then stake tier, then previous/current/next bucket.
/// Duplicates created by the weekend merge are dropped, first occurrence kept.
pub fn generate_seeds(now: u64, class: &MarketClass, tiers: &StakeTiers) -> Vec<PoolSeeds> {
    let mut seeds: Vec<PoolSeeds> = Vec::new();

    for cadence in Cadence::ALL {
        let windows: Vec<(u64, u64)> = bucket_snapshots(now, cadence)
            .into_iter()
            .map(|snapshot| pool_window(snapshot, cadence, class.hours))
            .collect();

        for asset in &class.assets {
            for &stake_amount in &tiers.amounts {
                for &(window_close_time, snapshot_time) in &windows {
                    let candidate = PoolSeeds {
                        prediction_asset: asset.clone(),
                        stake_asset: tiers.stake_asset,
                        stake_amount,
                        window_close_time,
                        snapshot_time,
                    };
                    if !seeds.contains(&candidate) {
                        seeds.push(candidate);
                    }
                }
            }
        }
    }

    seeds
}

/// Snapshot times of the previous, current and next bucket.
///
/// The current bucket's snapshot is the first boundary strictly after `now`.
pub fn bucket_snapshots(now: u64, cadence: Cadence) -> [u64; 3] {
    let period = cadence.period_secs();
    let current = (now / period) * period + period;
    [current - period, current, current + period]
}

/// (window close, snapshot) for a raw bucket snapshot.
pub fn pool_window(snapshot: u64, cadence: Cadence, hours: MarketHours) -> (u64, u64) {
    let buffer = cadence.close_buffer_secs();
    match hours {
        MarketHours::Continuous => (snapshot - buffer, snapshot),
        MarketHours::Weekdays => {
            let snapshot = push_past_weekend(snapshot);
            let day = snapshot / DAY_SECS;
            if weekday(day) == MONDAY && snapshot % DAY_SECS == 0 {
                // Monday open spans the weekend and closes with Friday's session.
                let saturday = (day - 2) * DAY_SECS;
                (saturday - buffer, snapshot)
            } else {
                (snapshot - buffer, snapshot)
            }
        }
    }
}

fn push_past_weekend(snapshot: u64) -> u64 {
    let day = snapshot / DAY_SECS;
    match weekday(day) {
        SATURDAY => (day + 2) * DAY_SECS,
        SUNDAY => (day + 1) * DAY_SECS,
        _ => snapshot,
    }
}

fn weekday(days_since_epoch: u64) -> u64 {
    (days_since_epoch + EPOCH_WEEKDAY_OFFSET) % 7
}
