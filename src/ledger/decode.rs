//! Strict decoding of raw contract tuples into typed pools and predictions
//!
//! Every `uint256` is range-checked into `u64` or `u128` before any arithmetic.

use ethers::types::{Address, H256, U256};

use super::LedgerError;
use crate::types::{Pool, PoolSeeds, Prediction};

/// `getPoolSeeds` output: (predictionAsset, stakeToken, stakeAmount, windowCloseTime, snapshotTime)
pub type RawPoolSeeds = (String, Address, U256, U256, U256);

/// `getPoolStatus` output: (seedsHash, creationTime, noOfPredictions, snapshotPrice,
/// completionTime, winAmount, noOfWinners, noOfClaimedWinnings)
pub type RawPoolStatus = ([u8; 32], U256, U256, U256, U256, U256, U256, U256);

/// `getPrediction` output: (predicter, poolId, price, time, claimedWinningsTime, isAWinner)
pub type RawPrediction = (Address, U256, U256, U256, U256, bool);

pub(crate) fn to_u64(value: U256, field: &'static str) -> Result<u64, LedgerError> {
    if value > U256::from(u64::MAX) {
        return Err(LedgerError::Decode {
            field,
            reason: format!("{} exceeds u64", value),
        });
    }
    Ok(value.as_u64())
}

pub(crate) fn to_u128(value: U256, field: &'static str) -> Result<u128, LedgerError> {
    if value > U256::from(u128::MAX) {
        return Err(LedgerError::Decode {
            field,
            reason: format!("{} exceeds u128", value),
        });
    }
    Ok(value.as_u128())
}

pub fn decode_pool(
    pool_id: u64,
    seeds: RawPoolSeeds,
    status: RawPoolStatus,
) -> Result<Pool, LedgerError> {
    let (prediction_asset, stake_asset, stake_amount, window_close_time, snapshot_time) = seeds;
    let (
        seeds_hash,
        creation_time,
        no_of_predictions,
        snapshot_price,
        completion_time,
        win_amount,
        no_of_winners,
        no_of_claimed_winnings,
    ) = status;

    if prediction_asset.trim().is_empty() {
        return Err(LedgerError::Decode {
            field: "predictionAsset",
            reason: format!("pool {} has an empty prediction asset", pool_id),
        });
    }

    let seeds = PoolSeeds {
        prediction_asset,
        stake_asset,
        stake_amount: to_u128(stake_amount, "stakeAmount")?,
        window_close_time: to_u64(window_close_time, "windowCloseTime")?,
        snapshot_time: to_u64(snapshot_time, "snapshotTime")?,
    };

    Ok(Pool {
        pool_id,
        seeds,
        seeds_hash: H256::from(seeds_hash),
        creation_time: to_u64(creation_time, "creationTime")?,
        no_of_predictions: to_u64(no_of_predictions, "noOfPredictions")?,
        snapshot_price: to_u128(snapshot_price, "snapshotPrice")?,
        completion_time: to_u64(completion_time, "completionTime")?,
        win_amount: to_u128(win_amount, "winAmount")?,
        no_of_winners: to_u64(no_of_winners, "noOfWinners")?,
        no_of_claimed_winnings: to_u64(no_of_claimed_winnings, "noOfClaimedWinnings")?,
    })
}

pub fn decode_prediction(prediction_id: u64, raw: RawPrediction) -> Result<Prediction, LedgerError> {
    let (predicter, pool_id, price, time, claimed_winnings_time, is_a_winner) = raw;

    if predicter.is_zero() {
        return Err(LedgerError::Decode {
            field: "predicter",
            reason: format!("prediction {} does not exist", prediction_id),
        });
    }

    Ok(Prediction {
        predicter,
        pool_id: to_u64(pool_id, "poolId")?,
        id: prediction_id,
        price: to_u128(price, "price")?,
        time: to_u64(time, "time")?,
        claimed_winnings_time: to_u64(claimed_winnings_time, "claimedWinningsTime")?,
        is_a_winner,
    })
}
