//! Winner split and payout arithmetic
//!
//! Pure functions. Ranking is by absolute distance to the snapshot price,
//! ties broken by the lower (earlier) prediction id.

use crate::types::Prediction;

/// Winners and losers of a pool, winners in rank order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Split {
    pub winners: Vec<Prediction>,
    pub losers: Vec<Prediction>,
}

/// Number of winners for a pool with `no_of_predictions` entries
pub fn winners_count(no_of_predictions: usize) -> usize {
    if no_of_predictions == 1 {
        1
    } else {
        no_of_predictions / 2
    }
}

/// Order predictions from closest to furthest from `snapshot_price`.
pub fn rank(snapshot_price: u128, predictions: &[Prediction]) -> Vec<Prediction> {
    let mut ranked = predictions.to_vec();
    ranked.sort_by(|a, b| {
        a.price
            .abs_diff(snapshot_price)
            .cmp(&b.price.abs_diff(snapshot_price))
            .then(a.id.cmp(&b.id))
    });
    ranked
}

pub fn compute_split(snapshot_price: u128, predictions: &[Prediction]) -> Split {
    let mut winners = rank(snapshot_price, predictions);
    let losers = winners.split_off(winners_count(winners.len()));
    Split { winners, losers }
}

/// Per-winner payout: `floor(stake * predictions * (100 - fee) / (winners * 100))`.
///
/// Returns `None` on overflow, a fee above 100% or zero winners.
pub fn win_amount(
    stake_amount: u128,
    no_of_predictions: u64,
    fee_percent: u64,
    no_of_winners: u64,
) -> Option<u128> {
    if no_of_winners == 0 || fee_percent > 100 {
        return None;
    }
    let pot = stake_amount
        .checked_mul(u128::from(no_of_predictions))?
        .checked_mul(u128::from(100 - fee_percent))?;
    pot.checked_div(u128::from(no_of_winners) * 100)
}
