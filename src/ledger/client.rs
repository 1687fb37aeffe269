//! Per-chain pool contract client
//!
//! Owns the admin signer for one chain. Writes go through a single async lock
//! so that simulate, submit and receipt-wait never interleave on one nonce.

use async_trait::async_trait;
use ethers::abi::Detokenize;
use ethers::contract::{abigen, ContractCall, ContractError};
use ethers::middleware::SignerMiddleware;
use ethers::providers::{Http, Middleware, Provider, ProviderError};
use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, TransactionReceipt, H256, U256};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use super::decode::{decode_pool, decode_prediction, to_u64};
use super::{CommitStatus, CompletionParams, Ledger, LedgerError, LedgerRejection};
use crate::config::{ChainConfig, LedgerConfig};
use crate::types::{Pool, PoolSeeds, Prediction};

abigen!(
    PredictionPoolsContract,
    r#"[
        function getPoolsCount() external view returns (uint256)
        function getPoolIdFromSeedsHash(bytes32 seedsHash) external view returns (uint256)
        function getPoolSeeds(uint256 poolId) external view returns (string, address, uint256, uint256, uint256)
        function getPoolStatus(uint256 poolId) external view returns (bytes32, uint256, uint256, uint256, uint256, uint256, uint256, uint256)
        function getPoolPredictionIds(uint256 poolId, uint256 offset, uint256 limit) external view returns (uint256[])
        function getPrediction(uint256 predictionId) external view returns (address, uint256, uint256, uint256, uint256, bool)
        function feePercentage() external view returns (uint256)
        function createPool(string predictionAsset, address stakeToken, uint256 stakeAmount, uint256 windowCloseTime, uint256 snapshotTime) external returns (uint256)
        function completePool(uint256 poolId, uint256 snapshotPrice, uint256 noOfWinners, uint256 winAmount, uint256[] winnerPredictionIds) external
    ]"#
);

type AdminClient = SignerMiddleware<Provider<Http>, LocalWallet>;

fn map_contract_error<M: Middleware>(err: ContractError<M>) -> LedgerError {
    if let Some(data) = err.as_revert() {
        if let Some(rejection) = LedgerRejection::from_revert_data(data) {
            return LedgerError::Rejected(rejection);
        }
    }
    // require-string reverts carry the reason as Error(string)
    if let Some(rejection) = err
        .decode_revert::<String>()
        .and_then(|reason| LedgerRejection::from_message(&reason))
    {
        return LedgerError::Rejected(rejection);
    }
    let message = err.to_string();
    match LedgerRejection::from_message(&message) {
        Some(rejection) => LedgerError::Rejected(rejection),
        None => LedgerError::Rpc(message),
    }
}

/// Pool contract client for one chain, constructed once and shared
pub struct LedgerClient {
    chain: String,
    contract: PredictionPoolsContract<AdminClient>,
    receipt_timeout: Duration,
    write_lock: Mutex<()>,
}

impl LedgerClient {
    pub fn new(
        chain: &ChainConfig,
        settings: &LedgerConfig,
        private_key: &str,
    ) -> Result<Self, LedgerError> {
        let provider = Provider::<Http>::try_from(chain.rpc_url.as_str())
            .map_err(|e| LedgerError::Rpc(format!("invalid rpc_url '{}': {}", chain.rpc_url, e)))?
            .interval(Duration::from_millis(settings.poll_interval_ms));
        let wallet: LocalWallet = private_key
            .parse()
            .map_err(|e: ethers::signers::WalletError| LedgerError::Signer(e.to_string()))?;
        let signer = wallet.with_chain_id(chain.chain_id);
        let client = Arc::new(SignerMiddleware::new(provider, signer));

        let address: Address = chain
            .contract_address
            .parse()
            .map_err(|_| LedgerError::InvalidAddress(chain.contract_address.clone()))?;

        tracing::info!(
            chain = %chain.name,
            chain_id = chain.chain_id,
            contract = %chain.contract_address,
            admin = %format!("{:#x}", client.address()),
            "Ledger client ready"
        );

        Ok(Self {
            chain: chain.name.clone(),
            contract: PredictionPoolsContract::new(address, client),
            receipt_timeout: Duration::from_secs(settings.receipt_timeout_secs),
            write_lock: Mutex::new(()),
        })
    }

    /// One write at a time per admin key
    async fn serialized_write<D: Detokenize>(
        &self,
        method: &'static str,
        call: ContractCall<AdminClient, D>,
    ) -> Result<CommitStatus, LedgerError> {
        let _guard = self.write_lock.lock().await;
        simulate_and_submit(&self.chain, method, call, self.receipt_timeout).await
    }
}

/// Dry-run the call, then submit it and wait for the receipt.
///
/// A reverting simulation never reaches `send`.
async fn simulate_and_submit<M: Middleware, D: Detokenize>(
    chain: &str,
    method: &'static str,
    call: ContractCall<M, D>,
    receipt_timeout: Duration,
) -> Result<CommitStatus, LedgerError> {
    call.call().await.map_err(map_contract_error)?;
    tracing::debug!(chain = %chain, method = method, "Simulation succeeded");

    let pending = call.send().await.map_err(map_contract_error)?;
    let tx_hash = pending.tx_hash();
    tracing::info!(
        chain = %chain,
        method = method,
        tx_hash = %format!("{:#x}", tx_hash),
        "Transaction submitted"
    );

    await_receipt(chain, method, tx_hash, pending, receipt_timeout).await
}

/// Bounded receipt wait. A timeout is reported as `Unconfirmed`, never retried here.
async fn await_receipt<F>(
    chain: &str,
    method: &'static str,
    tx_hash: H256,
    pending: F,
    receipt_timeout: Duration,
) -> Result<CommitStatus, LedgerError>
where
    F: Future<Output = Result<Option<TransactionReceipt>, ProviderError>>,
{
    match tokio::time::timeout(receipt_timeout, pending).await {
        Ok(Ok(Some(receipt))) => {
            if receipt.status == Some(0u64.into()) {
                return Err(LedgerError::Reverted(tx_hash));
            }
            let block = receipt.block_number.map(|b| b.as_u64());
            tracing::info!(
                chain = %chain,
                method = method,
                tx_hash = %format!("{:#x}", tx_hash),
                block = ?block,
                "Transaction confirmed"
            );
            Ok(CommitStatus::Confirmed { tx_hash, block })
        }
        Ok(Ok(None)) => Err(LedgerError::ReceiptDropped(tx_hash)),
        Ok(Err(e)) => Err(LedgerError::Rpc(e.to_string())),
        Err(_) => {
            tracing::warn!(
                chain = %chain,
                method = method,
                tx_hash = %format!("{:#x}", tx_hash),
                timeout_secs = receipt_timeout.as_secs(),
                "Timed out waiting for receipt; transaction may still land"
            );
            Ok(CommitStatus::Unconfirmed { tx_hash })
        }
    }
}

#[async_trait]
impl Ledger for LedgerClient {
    fn chain(&self) -> &str {
        &self.chain
    }

    async fn pools_count(&self) -> Result<u64, LedgerError> {
        let count = self
            .contract
            .get_pools_count()
            .call()
            .await
            .map_err(map_contract_error)?;
        to_u64(count, "poolsCount")
    }

    async fn pool_id_for_hash(&self, seeds_hash: H256) -> Result<Option<u64>, LedgerError> {
        let id = self
            .contract
            .get_pool_id_from_seeds_hash(seeds_hash.to_fixed_bytes())
            .call()
            .await
            .map_err(map_contract_error)?;
        let id = to_u64(id, "poolId")?;
        Ok(if id == 0 { None } else { Some(id) })
    }

    async fn pool(&self, pool_id: u64) -> Result<Pool, LedgerError> {
        let seeds = self
            .contract
            .get_pool_seeds(U256::from(pool_id))
            .call()
            .await
            .map_err(map_contract_error)?;
        let status = self
            .contract
            .get_pool_status(U256::from(pool_id))
            .call()
            .await
            .map_err(map_contract_error)?;
        decode_pool(pool_id, seeds, status)
    }

    async fn prediction_ids(
        &self,
        pool_id: u64,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<u64>, LedgerError> {
        let ids = self
            .contract
            .get_pool_prediction_ids(U256::from(pool_id), U256::from(offset), U256::from(limit))
            .call()
            .await
            .map_err(map_contract_error)?;
        ids.into_iter().map(|id| to_u64(id, "predictionId")).collect()
    }

    async fn prediction(&self, prediction_id: u64) -> Result<Prediction, LedgerError> {
        let raw = self
            .contract
            .get_prediction(U256::from(prediction_id))
            .call()
            .await
            .map_err(map_contract_error)?;
        decode_prediction(prediction_id, raw)
    }

    async fn fee_percentage(&self) -> Result<u64, LedgerError> {
        let fee = self
            .contract
            .fee_percentage()
            .call()
            .await
            .map_err(map_contract_error)?;
        to_u64(fee, "feePercentage")
    }

    async fn create_pool(&self, seeds: &PoolSeeds) -> Result<CommitStatus, LedgerError> {
        let call = self.contract.create_pool(
            seeds.prediction_asset.clone(),
            seeds.stake_asset,
            U256::from(seeds.stake_amount),
            U256::from(seeds.window_close_time),
            U256::from(seeds.snapshot_time),
        );
        self.serialized_write("createPool", call).await
    }

    async fn commit_completion(
        &self,
        params: &CompletionParams,
    ) -> Result<CommitStatus, LedgerError> {
        let call = self.contract.complete_pool(
            U256::from(params.pool_id),
            U256::from(params.snapshot_price),
            U256::from(params.no_of_winners),
            U256::from(params.win_amount),
            params
                .winner_prediction_ids
                .iter()
                .map(|&id| U256::from(id))
                .collect(),
        );
        self.serialized_write("completePool", call).await
    }
}
