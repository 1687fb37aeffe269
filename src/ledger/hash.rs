//! Seeds hash, identical to the contract's `keccak256(abi.encode(seeds))`

use ethers::abi::{encode, Token};
use ethers::types::{H256, U256};
use ethers::utils::keccak256;

use crate::types::PoolSeeds;

pub fn seeds_hash(seeds: &PoolSeeds) -> H256 {
    let encoded = encode(&[
        Token::String(seeds.prediction_asset.clone()),
        Token::Address(seeds.stake_asset),
        Token::Uint(U256::from(seeds.stake_amount)),
        Token::Uint(U256::from(seeds.window_close_time)),
        Token::Uint(U256::from(seeds.snapshot_time)),
    ]);
    H256::from(keccak256(encoded))
}
