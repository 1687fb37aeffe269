//! Core types used throughout PoolSettler
//!
//! Defines pool seeds, ledger pools and predictions, settlement results and
//! the archived pool document.

use ethers::types::{Address, H256};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Fixed-point decimals of every price handled by the pipeline
pub const PRICE_DECIMALS: u32 = 8;

/// Trading hours of an asset class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarketHours {
    /// Traded around the clock (crypto)
    Continuous,
    /// Traded Monday to Friday only (equities, FX, metals)
    Weekdays,
}

impl Default for MarketHours {
    fn default() -> Self {
        MarketHours::Continuous
    }
}

impl fmt::Display for MarketHours {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketHours::Continuous => write!(f, "continuous"),
            MarketHours::Weekdays => write!(f, "weekdays"),
        }
    }
}

/// A set of assets sharing the same trading hours
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketClass {
    pub hours: MarketHours,
    pub assets: Vec<String>,
}

/// Pool cadence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Cadence {
    Hours6,
    Hours24,
}

impl Cadence {
    pub const ALL: [Cadence; 2] = [Cadence::Hours6, Cadence::Hours24];

    /// Bucket length in seconds
    pub fn period_secs(&self) -> u64 {
        match self {
            Cadence::Hours6 => 6 * 60 * 60,
            Cadence::Hours24 => 24 * 60 * 60,
        }
    }

    /// Gap between window close and snapshot in seconds
    pub fn close_buffer_secs(&self) -> u64 {
        match self {
            Cadence::Hours6 => 60 * 60,
            Cadence::Hours24 => 12 * 60 * 60,
        }
    }
}

/// Tuple that identifies a pool before it exists on the ledger.
///
/// Its keccak hash is the ledger's dedup key for pool creation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolSeeds {
    pub prediction_asset: String,
    pub stake_asset: Address,
    #[serde(with = "dec_str")]
    pub stake_amount: u128,
    pub window_close_time: u64,
    pub snapshot_time: u64,
}

impl fmt::Display for PoolSeeds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{:#x}/{} close={} snapshot={}",
            self.prediction_asset,
            self.stake_asset,
            self.stake_amount,
            self.window_close_time,
            self.snapshot_time
        )
    }
}

/// Pool as read from the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pool {
    pub pool_id: u64,
    pub seeds: PoolSeeds,
    pub seeds_hash: H256,
    pub creation_time: u64,
    pub no_of_predictions: u64,
    #[serde(with = "dec_str")]
    pub snapshot_price: u128,
    /// Zero while unsettled
    pub completion_time: u64,
    #[serde(with = "dec_str")]
    pub win_amount: u128,
    pub no_of_winners: u64,
    pub no_of_claimed_winnings: u64,
}

impl Pool {
    pub fn is_completed(&self) -> bool {
        self.completion_time != 0
    }
}

/// A single prediction placed in a pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prediction {
    pub predicter: Address,
    pub pool_id: u64,
    /// Assigned sequentially by the ledger in submission order
    pub id: u64,
    #[serde(with = "dec_str")]
    pub price: u128,
    pub time: u64,
    pub claimed_winnings_time: u64,
    pub is_a_winner: bool,
}

/// Outcome of the winner split as committed to the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementResult {
    pub winner_addresses_unique: Vec<Address>,
    pub winner_prediction_ids: Vec<u64>,
    #[serde(with = "dec_str")]
    pub win_amount: u128,
    pub no_of_winners: u64,
}

impl SettlementResult {
    /// Build a result from winners in rank order.
    pub fn from_winners(winners: &[Prediction], win_amount: u128) -> Self {
        let mut winner_addresses_unique: Vec<Address> = Vec::new();
        for prediction in winners {
            if !winner_addresses_unique.contains(&prediction.predicter) {
                winner_addresses_unique.push(prediction.predicter);
            }
        }

        Self {
            winner_addresses_unique,
            winner_prediction_ids: winners.iter().map(|p| p.id).collect(),
            win_amount,
            no_of_winners: winners.len() as u64,
        }
    }
}

/// Off-chain record of a pool's predictions and settlement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchivedPool {
    pub chain: String,
    pub pool: Pool,
    pub predictions: Vec<Prediction>,
    #[serde(default)]
    pub results: Option<SettlementResult>,
    /// A notification job for the results has been queued
    #[serde(default)]
    pub notification_enqueued: bool,
    #[serde(default)]
    pub has_notified_winners: bool,
    /// Unix seconds of the last write
    #[serde(default)]
    pub archived_at: i64,
}

/// Payload of a notification job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationJob {
    pub pool_id: u64,
    pub chain: String,
}

/// Running totals of the notification fan-out for one chain
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationCounters {
    pub pools_notified: u64,
    pub notifications_sent: u64,
    pub notifications_failed: u64,
}

/// Current unix time in seconds
pub fn unix_now() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp()).unwrap_or_default()
}

/// Serialize `u128` amounts as decimal strings so JSON readers keep full precision.
pub mod dec_str {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse::<u128>()
            .map_err(|e| D::Error::custom(format!("invalid amount '{}': {}", raw, e)))
    }
}
