//! In-memory collaborators for the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use ethers::types::{Address, H256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use poolsettler::ledger::{
    seeds_hash, CommitStatus, CompletionParams, Ledger, LedgerError, LedgerRejection,
};
use poolsettler::notify::{Channel, Notifier, WinnerNotification};
use poolsettler::oracle::{OracleError, PriceOracle};
use poolsettler::queue::{JobQueue, MemoryJobQueue, QueuedJob};
use poolsettler::types::{NotificationJob, Pool, PoolSeeds, Prediction};

pub const CHAIN: &str = "testnet";
pub const FEE_PERCENT: u64 = 5;

/// How the fake answers `completePool`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitMode {
    /// Apply and confirm
    Confirm,
    /// Apply, but the receipt wait times out
    TimeoutLanded,
    /// Receipt wait times out and the transaction has not landed
    TimeoutPending,
    /// Simulation reverts with this reason
    Reject(LedgerRejection),
    /// Someone else completes the pool right before our call
    CompletedElsewhere,
}

#[derive(Default)]
struct State {
    pools: Vec<Pool>,
    pool_predictions: HashMap<u64, Vec<u64>>,
    predictions: HashMap<u64, Prediction>,
    next_prediction_id: u64,
    pending: Option<CompletionParams>,
}

pub struct FakeLedger {
    state: Mutex<State>,
    mode: Mutex<CommitMode>,
    /// Creation succeeds for someone else, our transaction reverts
    lose_create_race: Mutex<bool>,
    pub writes: AtomicU32,
    pub reads: AtomicU32,
}

impl FakeLedger {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            mode: Mutex::new(CommitMode::Confirm),
            lose_create_race: Mutex::new(false),
            writes: AtomicU32::new(0),
            reads: AtomicU32::new(0),
        }
    }

    pub fn set_mode(&self, mode: CommitMode) {
        *self.mode.lock().unwrap() = mode;
    }

    pub fn set_lose_create_race(&self, lose: bool) {
        *self.lose_create_race.lock().unwrap() = lose;
    }

    pub fn writes(&self) -> u32 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Add a pool directly, bypassing `create_pool`
    pub fn insert_pool(&self, seeds: PoolSeeds) -> u64 {
        let mut state = self.state.lock().unwrap();
        Self::push_pool(&mut state, seeds)
    }

    fn push_pool(state: &mut State, seeds: PoolSeeds) -> u64 {
        let pool_id = state.pools.len() as u64 + 1;
        state.pools.push(Pool {
            pool_id,
            seeds_hash: seeds_hash(&seeds),
            creation_time: seeds.window_close_time.saturating_sub(3_600),
            seeds,
            no_of_predictions: 0,
            snapshot_price: 0,
            completion_time: 0,
            win_amount: 0,
            no_of_winners: 0,
            no_of_claimed_winnings: 0,
        });
        pool_id
    }

    pub fn place_prediction(&self, pool_id: u64, who: u64, price: u128) -> u64 {
        let mut state = self.state.lock().unwrap();
        state.next_prediction_id += 1;
        let id = state.next_prediction_id;
        let pool = &mut state.pools[pool_id as usize - 1];
        pool.no_of_predictions += 1;
        let time = pool.creation_time + id;
        state.predictions.insert(
            id,
            Prediction {
                predicter: Address::from_low_u64_be(who),
                pool_id,
                id,
                price,
                time,
                claimed_winnings_time: 0,
                is_a_winner: false,
            },
        );
        state.pool_predictions.entry(pool_id).or_default().push(id);
        id
    }

    pub fn pool_now(&self, pool_id: u64) -> Pool {
        self.state.lock().unwrap().pools[pool_id as usize - 1].clone()
    }

    /// Land a completion that previously timed out
    pub fn land_pending(&self) {
        let mut state = self.state.lock().unwrap();
        if let Some(params) = state.pending.take() {
            Self::apply(&mut state, &params);
        }
    }

    fn apply(state: &mut State, params: &CompletionParams) {
        let pool = &mut state.pools[params.pool_id as usize - 1];
        pool.snapshot_price = params.snapshot_price;
        pool.win_amount = params.win_amount;
        pool.no_of_winners = params.no_of_winners;
        pool.completion_time = pool.seeds.snapshot_time + 60;
        for id in &params.winner_prediction_ids {
            if let Some(prediction) = state.predictions.get_mut(id) {
                prediction.is_a_winner = true;
            }
        }
    }
}

#[async_trait]
impl Ledger for FakeLedger {
    fn chain(&self) -> &str {
        CHAIN
    }

    async fn pools_count(&self) -> Result<u64, LedgerError> {
        Ok(self.state.lock().unwrap().pools.len() as u64)
    }

    async fn pool_id_for_hash(&self, hash: H256) -> Result<Option<u64>, LedgerError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .pools
            .iter()
            .find(|p| p.seeds_hash == hash)
            .map(|p| p.pool_id))
    }

    async fn pool(&self, pool_id: u64) -> Result<Pool, LedgerError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let state = self.state.lock().unwrap();
        if pool_id == 0 || pool_id as usize > state.pools.len() {
            return Err(LedgerError::Rejected(LedgerRejection::InvalidPoolId));
        }
        Ok(state.pools[pool_id as usize - 1].clone())
    }

    async fn prediction_ids(
        &self,
        pool_id: u64,
        offset: u64,
        limit: u64,
    ) -> Result<Vec<u64>, LedgerError> {
        let state = self.state.lock().unwrap();
        let ids = state.pool_predictions.get(&pool_id).cloned().unwrap_or_default();
        Ok(ids
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn prediction(&self, prediction_id: u64) -> Result<Prediction, LedgerError> {
        self.state
            .lock()
            .unwrap()
            .predictions
            .get(&prediction_id)
            .cloned()
            .ok_or_else(|| LedgerError::Rpc(format!("no prediction {}", prediction_id)))
    }

    async fn fee_percentage(&self) -> Result<u64, LedgerError> {
        Ok(FEE_PERCENT)
    }

    async fn create_pool(&self, seeds: &PoolSeeds) -> Result<CommitStatus, LedgerError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock().unwrap();
        let hash = seeds_hash(seeds);
        if state.pools.iter().any(|p| p.seeds_hash == hash) {
            return Err(LedgerError::Rpc("execution reverted: pool exists".into()));
        }
        Self::push_pool(&mut state, seeds.clone());
        if *self.lose_create_race.lock().unwrap() {
            return Err(LedgerError::Rpc("execution reverted: pool exists".into()));
        }
        Ok(CommitStatus::Confirmed {
            tx_hash: H256::from_low_u64_be(state.pools.len() as u64),
            block: Some(1),
        })
    }

    async fn commit_completion(
        &self,
        params: &CompletionParams,
    ) -> Result<CommitStatus, LedgerError> {
        let mode = *self.mode.lock().unwrap();
        let mut state = self.state.lock().unwrap();
        let tx_hash = H256::from_low_u64_be(1_000 + params.pool_id);

        if let CommitMode::Reject(rejection) = mode {
            return Err(LedgerError::Rejected(rejection));
        }
        if mode == CommitMode::CompletedElsewhere {
            Self::apply(&mut state, params);
            return Err(LedgerError::Rejected(LedgerRejection::AlreadyCompleted));
        }
        if state.pools[params.pool_id as usize - 1].completion_time != 0 {
            return Err(LedgerError::Rejected(LedgerRejection::AlreadyCompleted));
        }

        self.writes.fetch_add(1, Ordering::SeqCst);
        match mode {
            CommitMode::Confirm => {
                Self::apply(&mut state, params);
                Ok(CommitStatus::Confirmed {
                    tx_hash,
                    block: Some(2),
                })
            }
            CommitMode::TimeoutLanded => {
                Self::apply(&mut state, params);
                Ok(CommitStatus::Unconfirmed { tx_hash })
            }
            CommitMode::TimeoutPending => {
                state.pending = Some(params.clone());
                Ok(CommitStatus::Unconfirmed { tx_hash })
            }
            CommitMode::Reject(_) | CommitMode::CompletedElsewhere => unreachable!(),
        }
    }
}

pub struct FakeOracle {
    price: Mutex<Result<u128, String>>,
    pub calls: AtomicU32,
}

impl FakeOracle {
    pub fn new(price: u128) -> Self {
        Self {
            price: Mutex::new(Ok(price)),
            calls: AtomicU32::new(0),
        }
    }

    pub fn fail_with(&self, message: &str) {
        *self.price.lock().unwrap() = Err(message.to_string());
    }
}

#[async_trait]
impl PriceOracle for FakeOracle {
    async fn snapshot_price(&self, _asset: &str, _timestamp: u64) -> Result<u128, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.price
            .lock()
            .unwrap()
            .clone()
            .map_err(OracleError::Network)
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<(Channel, WinnerNotification)>>,
}

impl RecordingNotifier {
    pub fn count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(
        &self,
        channel: &Channel,
        notification: &WinnerNotification,
    ) -> anyhow::Result<()> {
        self.sent
            .lock()
            .unwrap()
            .push((channel.clone(), notification.clone()));
        Ok(())
    }
}

/// Memory queue whose first `outages` enqueues fail
pub struct FlakyQueue {
    pub inner: MemoryJobQueue,
    outages: AtomicU32,
}

impl FlakyQueue {
    pub fn new(outages: u32) -> Self {
        Self {
            inner: MemoryJobQueue::new(3),
            outages: AtomicU32::new(outages),
        }
    }
}

#[async_trait]
impl JobQueue for FlakyQueue {
    async fn enqueue(&self, name: &str, payload: NotificationJob) -> anyhow::Result<String> {
        let down = self
            .outages
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if down {
            anyhow::bail!("broker unavailable");
        }
        self.inner.enqueue(name, payload).await
    }

    async fn claim(&self) -> anyhow::Result<Option<QueuedJob>> {
        self.inner.claim().await
    }

    async fn ack(&self, job: &QueuedJob) -> anyhow::Result<()> {
        self.inner.ack(job).await
    }

    async fn fail(&self, job: &QueuedJob, reason: &str) -> anyhow::Result<()> {
        self.inner.fail(job, reason).await
    }
}

pub fn stake_token() -> Address {
    Address::from_low_u64_be(0xbeef)
}

/// 1.00000000 in the 8-decimal price convention
pub const ONE: u128 = 100_000_000;

pub fn seeds(asset: &str, stake_amount: u128, window_close_time: u64, snapshot_time: u64) -> PoolSeeds {
    PoolSeeds {
        prediction_asset: asset.to_string(),
        stake_asset: stake_token(),
        stake_amount,
        window_close_time,
        snapshot_time,
    }
}
