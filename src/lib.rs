//! PoolSettler Library
//!
//! Settlement pipeline for parimutuel price-prediction pools on EVM ledgers

pub mod config;
pub mod ledger;
pub mod notify;
pub mod oracle;
pub mod persistence;
pub mod queue;
pub mod resolver;
pub mod seeds;
pub mod settlement;
pub mod types;
