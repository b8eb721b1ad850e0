//! Applies validated blocks to the chain state, one height at a time.

use crate::store::{StateStore, StoreError};
use crate::validation::{
    validate_block_with, CommitVerifier, EcdsaCommitVerifier, ValidationError,
};
use alloy_primitives::Bytes;
use alloy_rlp::encode;
use alloy_rlp_derive::{RlpDecodable, RlpEncodable};
use rollnode_common::{
    block::{Block, Version},
    merkle::{root_of, Hash},
    state::{ConsensusParams, State},
    validator::{self, ValidatorUpdate},
};
use serde::{Deserialize, Serialize};
use sha3::Keccak256;
use tracing::{debug, info, instrument};

#[derive(Debug, Clone, Default, PartialEq, Eq, RlpEncodable, RlpDecodable, Serialize, Deserialize)]
/// Outcome of one transaction, as reported by the application.
pub struct TxResult {
    pub code: u32,
    pub data: Bytes,
    pub gas_used: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliverBlockResponse {
    /// Application state after executing the block.
    pub app_hash: Hash,
    pub tx_results: Vec<TxResult>,
    pub validator_updates: Vec<ValidatorUpdate>,
    pub consensus_param_updates: Option<ConsensusParams>,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct AppError(pub String);

/// State machine of the rollup, driven block by block.
pub trait ConsensusApplication: Send {
    fn deliver_block(&mut self, block: &Block) -> Result<DeliverBlockResponse, AppError>;
}

#[derive(thiserror::Error, Debug)]
pub enum ExecutorError {
    #[error("invalid block: {0}")]
    Validation(#[from] ValidationError),
    #[error("application failed to execute block {height}: {source}")]
    Execution { height: u64, source: AppError },
    #[error("application returned invalid validator updates at height {height}: {source}")]
    ValidatorUpdates { height: u64, source: validator::Error },
    #[error("state store failed: {0}")]
    Store(#[from] StoreError),
}

/// Merkle root of the transaction results of a block.
pub fn results_hash(results: &[TxResult]) -> Hash {
    root_of::<Keccak256>(results.iter().map(encode).collect())
}

/// Derives the state that follows `state` once `block` has been executed with `response`.
pub fn update_state(
    state: &State, block: &Block, response: DeliverBlockResponse,
) -> Result<State, validator::Error> {
    let height = block.height();

    let mut next_validators = state.next_validators.clone();
    let mut last_height_validators_changed = state.last_height_validators_changed;
    if !response.validator_updates.is_empty() {
        next_validators.update_with_change_set(&response.validator_updates)?;
        // signed by the validators of height + 1, so the change shows up at height + 2
        last_height_validators_changed = height + 2;
    }
    next_validators.increment_proposer_priority(1);

    let (consensus_params, last_height_consensus_params_changed) =
        match response.consensus_param_updates {
            Some(params) => (params, height + 1),
            None => (state.consensus_params, state.last_height_consensus_params_changed),
        };

    Ok(State {
        chain_id: state.chain_id.clone(),
        version: Version::new(state.version.block, consensus_params.version.app),
        initial_height: state.initial_height,
        last_block_height: height,
        last_block_id: block.block_id(),
        last_block_time: block.header.time,
        validators: state.next_validators.clone(),
        next_validators,
        last_validators: state.validators.clone(),
        last_height_validators_changed,
        consensus_params,
        last_height_consensus_params_changed,
        last_results_hash: results_hash(&response.tx_results),
        app_hash: response.app_hash,
    })
}

/// Owns the live chain state and advances it one validated block at a time.
pub struct BlockExecutor<S, A> {
    store: S,
    app: A,
    state: State,
    verifier: Box<dyn CommitVerifier>,
}

impl<S: StateStore, A: ConsensusApplication> BlockExecutor<S, A> {
    /// Resumes from the latest state persisted in `store`.
    pub fn new(store: S, app: A) -> Result<Self, ExecutorError> {
        let state = store.load()?;
        info!(height = state.last_block_height, chain_id = %state.chain_id, "loaded chain state");
        Ok(Self { store, app, state, verifier: Box::new(EcdsaCommitVerifier) })
    }

    pub fn with_verifier(mut self, verifier: Box<dyn CommitVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn app_mut(&mut self) -> &mut A {
        &mut self.app
    }

    pub fn validate_block(&self, state: &State, block: &Block) -> Result<(), ValidationError> {
        validate_block_with(state, block, self.verifier.as_ref())
    }

    /// Validates, executes and persists `block`. Nothing changes unless every step succeeds.
    #[instrument(skip_all, fields(height = block.height()))]
    pub fn apply_block(&mut self, block: &Block) -> Result<State, ExecutorError> {
        self.validate_block(&self.state, block)?;

        let height = block.height();
        let response = self
            .app
            .deliver_block(block)
            .map_err(|source| ExecutorError::Execution { height, source })?;
        debug!(
            txs = block.data.txs.len(),
            validator_updates = response.validator_updates.len(),
            "delivered block"
        );

        let next = update_state(&self.state, block, response)
            .map_err(|source| ExecutorError::ValidatorUpdates { height, source })?;
        self.store.save(&next)?;
        self.state = next.clone();

        info!(app_hash = %next.app_hash, block_id = %next.last_block_id, "applied block");
        Ok(next)
    }
}
