use crate::da::{
    split_message, DaError, DataAvailabilityHeader, ExtendedHeader, HeaderSubscriber, Share,
    ShareService, Subscription,
};
use crate::executor::{
    AppError, BlockExecutor, ConsensusApplication, DeliverBlockResponse, ExecutorError, TxResult,
};
use crate::store::{MemStateStore, StateStore};
use alloy_primitives::Bytes;
use async_trait::async_trait;
use k256::ecdsa::SigningKey;
use rollnode_common::{
    address_from_sk,
    block::{Address, Block, BlockId, BlockIdFlag, CanonicalVote, Commit, CommitSig, Data, Time},
    codec::{encode_multiblock, MultiBlock},
    merkle::{hash_leaf, Hash},
    namespace::NamespaceId,
    state::{ConsensusParams, GenesisDoc, GenesisValidator, State},
    validator::ValidatorUpdate,
};
use sha3::Keccak256;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

pub const CHAIN_ID: &str = "execution-test";
pub const GENESIS_TIME: Time = 1_700_000_000_000;
pub const NAMESPACE: NamespaceId = NamespaceId([0, 0, 0, 0, 0, 0, 0, 1]);

pub fn genesis_doc(n_vals: usize, initial_height: u64) -> GenesisDoc {
    make_genesis(&make_keys(n_vals), initial_height)
}

fn make_keys(n_vals: usize) -> HashMap<Address, SigningKey> {
    let mut rng = rand::thread_rng();
    (0..n_vals)
        .map(|_| {
            let sk = SigningKey::random(&mut rng);
            (address_from_sk(&sk), sk)
        })
        .collect()
}

fn make_genesis(keys: &HashMap<Address, SigningKey>, initial_height: u64) -> GenesisDoc {
    GenesisDoc {
        chain_id: CHAIN_ID.to_string(),
        genesis_time: GENESIS_TIME,
        initial_height,
        validators: keys
            .keys()
            .map(|address| GenesisValidator { address: *address, power: 1 })
            .collect(),
        consensus_params: ConsensusParams::default(),
        app_hash: Hash::default(),
    }
}

/// Bootstrapping state with `n_vals` validators of power 1, and their keys.
pub fn make_state(n_vals: usize, initial_height: u64) -> (State, HashMap<Address, SigningKey>) {
    let keys = make_keys(n_vals);
    let state = State::from_genesis(&make_genesis(&keys, initial_height)).unwrap();
    (state, keys)
}

pub fn make_data(height: u64) -> Data {
    Data::new((0..10).map(|i| Bytes::from(format!("tx-{height}-{i}").into_bytes())).collect())
}

pub fn sign_vote(
    chain_id: &str, height: u64, block_id: BlockId, sk: &SigningKey, timestamp: Time,
) -> CommitSig {
    let chain_id = chain_id.to_string();
    let vote = CanonicalVote { height, round: 0, block_id, timestamp, chain_id };
    vote.sign(sk, BlockIdFlag::Commit).unwrap()
}

pub fn executor_with_state(state: State) -> BlockExecutor<MemStateStore, TestApp> {
    let mut store = MemStateStore::default();
    store.save(&state).unwrap();
    BlockExecutor::new(store, TestApp::default()).unwrap()
}

/// Builds the block at `height` from the executor's state, applies it and returns the commit for
/// it, signed by every validator of that height.
pub fn make_and_commit_good_block<S: StateStore>(
    executor: &mut BlockExecutor<S, TestApp>, height: u64, last_commit: Commit,
    keys: &HashMap<Address, SigningKey>,
) -> Result<Commit, ExecutorError> {
    let state = executor.state().clone();
    let proposer = state.validators.get_proposer().map(|v| v.address).unwrap_or_default();
    let block = state.make_block(height, make_data(height), last_commit, vec![], proposer);
    let next = executor.apply_block(&block)?;
    Ok(commit_block(&next, &block, keys))
}

/// `n` valid consecutive blocks on top of `state`, each carrying the commit of its parent.
pub fn make_chain(state: &State, keys: &HashMap<Address, SigningKey>, n: u64) -> Vec<Block> {
    let mut executor = executor_with_state(state.clone());
    let mut last_commit = Commit::default();
    let mut blocks = Vec::new();
    for height in state.initial_height..state.initial_height + n {
        let current = executor.state().clone();
        let proposer = current.validators.get_proposer().map(|v| v.address).unwrap_or_default();
        let block = current.make_block(height, make_data(height), last_commit, vec![], proposer);
        let next = executor.apply_block(&block).unwrap();
        last_commit = commit_block(&next, &block, keys);
        blocks.push(block);
    }
    blocks
}

/// Commit for `block`, signed by the validators of `state` that applied it.
pub fn commit_block(state: &State, block: &Block, keys: &HashMap<Address, SigningKey>) -> Commit {
    let block_id = block.block_id();
    let timestamp = block.header.time + 1;
    let signatures = state
        .last_validators
        .validators()
        .iter()
        .map(|v| sign_vote(&state.chain_id, block.height(), block_id, &keys[&v.address], timestamp))
        .collect();
    Commit::new(block.height(), 0, block_id, signatures)
}

#[derive(Default)]
/// Application that chains the hash of every delivered transaction into its app hash.
pub struct TestApp {
    app_hash: Hash,
    fail_at: Option<u64>,
    validator_updates: HashMap<u64, Vec<ValidatorUpdate>>,
    param_updates: HashMap<u64, ConsensusParams>,
}

impl TestApp {
    pub fn failing_at(height: u64) -> Self {
        Self { fail_at: Some(height), ..Default::default() }
    }

    pub fn queue_validator_updates(&mut self, height: u64, updates: Vec<ValidatorUpdate>) {
        self.validator_updates.insert(height, updates);
    }

    pub fn queue_param_updates(&mut self, height: u64, params: ConsensusParams) {
        self.param_updates.insert(height, params);
    }
}

impl ConsensusApplication for TestApp {
    fn deliver_block(&mut self, block: &Block) -> Result<DeliverBlockResponse, AppError> {
        let height = block.height();
        if self.fail_at == Some(height) {
            return Err(AppError(format!("refusing block {height}")));
        }
        let mut tx_results = Vec::new();
        for tx in &block.data.txs {
            let mut preimage = self.app_hash.as_bytes().to_vec();
            preimage.extend_from_slice(tx);
            self.app_hash = hash_leaf::<Keccak256>(preimage);
            tx_results.push(TxResult { code: 0, data: Bytes::new(), gas_used: tx.len() as u64 });
        }
        if block.data.txs.is_empty() {
            self.app_hash = hash_leaf::<Keccak256>(height.to_be_bytes().to_vec());
        }
        Ok(DeliverBlockResponse {
            app_hash: self.app_hash,
            tx_results,
            validator_updates: self.validator_updates.remove(&height).unwrap_or_default(),
            consensus_param_updates: self.param_updates.remove(&height),
        })
    }
}

/// Blocks with only their heights set.
pub fn blocks_at(heights: &[u64]) -> Vec<Block> {
    heights
        .iter()
        .map(|height| {
            let mut block = Block::default();
            block.header.height = *height;
            block
        })
        .collect()
}

/// Shares carrying one message per multiblock.
pub fn publish(namespace: NamespaceId, multiblocks: &[Vec<Block>]) -> Vec<Share> {
    multiblocks
        .iter()
        .flat_map(|blocks| {
            let bytes = encode_multiblock(&MultiBlock::new(blocks.clone()));
            split_message(namespace, &bytes).unwrap()
        })
        .collect()
}

fn dah_for(height: u64) -> DataAvailabilityHeader {
    let mut root = [0u8; 32];
    root[24..].copy_from_slice(&height.to_be_bytes());
    DataAvailabilityHeader { row_roots: vec![Hash(root)], column_roots: vec![Hash(root)] }
}

#[derive(Default)]
struct MockDaInner {
    headers: Vec<ExtendedHeader>,
    shares: Vec<(DataAvailabilityHeader, Result<Vec<Share>, DaError>)>,
    close_after_headers: bool,
}

#[derive(Default)]
/// DA layer that serves a fixed list of headers to every subscription.
pub struct MockDa {
    inner: Mutex<MockDaInner>,
    subscriptions: AtomicUsize,
}

impl MockDa {
    fn push(&self, height: u64, shares: Result<Vec<Share>, DaError>) {
        let mut inner = self.inner.lock().unwrap();
        let dah = dah_for(height);
        inner.headers.push(ExtendedHeader { height, dah: dah.clone() });
        inner.shares.push((dah, shares));
    }

    pub fn publish(&self, height: u64, shares: Vec<Share>) {
        self.push(height, Ok(shares));
    }

    pub fn fail_at(&self, height: u64) {
        self.push(height, Err(DaError::Service(format!("no shares for height {height}"))));
    }

    /// Ends subscriptions with an error once all headers were served, instead of waiting.
    pub fn close_after_headers(&self) {
        self.inner.lock().unwrap().close_after_headers = true;
    }

    pub fn subscriptions(&self) -> usize {
        self.subscriptions.load(Ordering::SeqCst)
    }
}

struct MockSubscription {
    headers: VecDeque<ExtendedHeader>,
    close_after_headers: bool,
}

#[async_trait]
impl Subscription for MockSubscription {
    async fn next_header(&mut self) -> Result<ExtendedHeader, DaError> {
        match self.headers.pop_front() {
            Some(header) => Ok(header),
            None if self.close_after_headers => Err(DaError::Closed),
            None => futures::future::pending().await,
        }
    }
}

#[async_trait]
impl HeaderSubscriber for MockDa {
    async fn subscribe(&self) -> Result<Box<dyn Subscription>, DaError> {
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        let inner = self.inner.lock().unwrap();
        Ok(Box::new(MockSubscription {
            headers: inner.headers.iter().cloned().collect(),
            close_after_headers: inner.close_after_headers,
        }))
    }
}

#[async_trait]
impl ShareService for MockDa {
    async fn get_shares_by_namespace(
        &self, root: &DataAvailabilityHeader, _namespace: NamespaceId,
    ) -> Result<Vec<Share>, DaError> {
        let inner = self.inner.lock().unwrap();
        let found = inner.shares.iter().find(|(dah, _)| dah == root);
        found.map(|(_, shares)| shares.clone()).unwrap_or_else(|| Ok(Vec::new()))
    }
}
