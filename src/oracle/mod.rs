//! Oracle module - Historical reference prices
//!
//! Fetches the price of an asset at a past timestamp from the Pyth network
//! and normalizes it to the pipeline's 8-decimal fixed-point convention.

mod feeds;
mod hermes;

pub use feeds::{feed_id, registered_assets};
pub use hermes::HermesClient;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::PRICE_DECIMALS;

/// Oracle failures. Every variant is terminal for the attempt.
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("asset {0} has no registered oracle feed")]
    AssetNotRegistered(String),
    #[error("oracle request failed: {0}")]
    Network(String),
    #[error("oracle response could not be parsed: {0}")]
    Parse(String),
    #[error("oracle returned a positive exponent {0}")]
    PositiveExponent(i32),
    #[error("oracle returned a non-positive price {0}")]
    NonPositivePrice(i64),
    #[error("price {mantissa}e{expo} overflows the fixed-point range")]
    Overflow { mantissa: i64, expo: i32 },
}

/// Source of snapshot prices
#[async_trait]
pub trait PriceOracle: Send + Sync {
    /// Price of `asset` at `timestamp` (unix seconds), scaled to 8 decimals.
    async fn snapshot_price(&self, asset: &str, timestamp: u64) -> Result<u128, OracleError>;
}

/// Rescale an oracle `mantissa * 10^expo` to an integer with 8 decimals.
///
/// Exponents below -8 truncate toward zero.
pub fn normalize_price(mantissa: i64, expo: i32) -> Result<u128, OracleError> {
    if expo > 0 {
        return Err(OracleError::PositiveExponent(expo));
    }
    if mantissa <= 0 {
        return Err(OracleError::NonPositivePrice(mantissa));
    }

    let value = mantissa as u128;
    let delta = PRICE_DECIMALS as i32 + expo;
    if delta >= 0 {
        10u128
            .checked_pow(delta as u32)
            .and_then(|factor| value.checked_mul(factor))
            .ok_or(OracleError::Overflow { mantissa, expo })
    } else {
        // 10^39 already exceeds u128; the quotient is zero well before that.
        Ok(10u128
            .checked_pow(delta.unsigned_abs())
            .map(|factor| value / factor)
            .unwrap_or(0))
    }
}
