//! Chain state: the node's local view of chain progress needed to validate the next block.

use crate::{
    block::{evidence_hash, Address, Block, BlockId, Commit, Data, Evidence, Header, Time, Version},
    merkle::{hash_leaf, Hash},
    validator::{checked_total_power, Validator, ValidatorSet, MAX_TOTAL_VOTING_POWER},
};
use alloy_primitives::Bytes;
use alloy_rlp::encode;
use alloy_rlp_derive::{RlpDecodable, RlpEncodable};
use serde::{Deserialize, Serialize};
use sha3::Keccak256;

/// Version of the block protocol implemented by this crate.
pub const BLOCK_PROTOCOL: u64 = 11;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum GenesisError {
    #[error("genesis chain_id is empty")]
    EmptyChainId,
    #[error("genesis has no validators")]
    NoValidators,
    #[error("genesis validator {0} has zero voting power")]
    ZeroPower(Address),
    #[error("genesis total voting power exceeds {}", MAX_TOTAL_VOTING_POWER)]
    TotalVotingPowerTooLarge,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, RlpEncodable, RlpDecodable, Serialize, Deserialize,
)]
pub struct BlockParams {
    pub max_bytes: u64,
    /// 0 means unlimited.
    pub max_gas: u64,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, RlpEncodable, RlpDecodable, Serialize, Deserialize,
)]
pub struct EvidenceParams {
    pub max_age_num_blocks: u64,
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, RlpEncodable, RlpDecodable, Serialize, Deserialize,
)]
pub struct VersionParams {
    pub app: u64,
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, RlpEncodable, RlpDecodable, Serialize, Deserialize,
)]
pub struct ConsensusParams {
    pub block: BlockParams,
    pub evidence: EvidenceParams,
    pub version: VersionParams,
}

impl Default for BlockParams {
    fn default() -> Self {
        Self { max_bytes: 22_020_096, max_gas: 0 }
    }
}

impl Default for EvidenceParams {
    fn default() -> Self {
        Self { max_age_num_blocks: 100_000 }
    }
}

impl ConsensusParams {
    pub fn hash(&self) -> Hash {
        hash_leaf::<Keccak256>(encode(self))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenesisValidator {
    pub address: Address,
    pub power: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
/// Initial conditions of a chain.
pub struct GenesisDoc {
    pub chain_id: String,
    /// Unix milliseconds. The first block must not be older than this.
    pub genesis_time: Time,
    #[serde(default = "default_initial_height")]
    pub initial_height: u64,
    pub validators: Vec<GenesisValidator>,
    #[serde(default)]
    pub consensus_params: ConsensusParams,
    #[serde(default)]
    pub app_hash: Hash,
}

fn default_initial_height() -> u64 {
    1
}

impl GenesisDoc {
    pub fn validate(&self) -> Result<(), GenesisError> {
        if self.chain_id.is_empty() {
            return Err(GenesisError::EmptyChainId);
        }
        if self.validators.is_empty() {
            return Err(GenesisError::NoValidators);
        }
        if let Some(v) = self.validators.iter().find(|v| v.power == 0) {
            return Err(GenesisError::ZeroPower(v.address));
        }
        if checked_total_power(self.validators.iter().map(|v| v.power)).is_none() {
            return Err(GenesisError::TotalVotingPowerTooLarge);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    pub chain_id: String,
    /// Consensus version every block header must carry.
    pub version: Version,
    pub initial_height: u64,

    /// `initial_height - 1` until the first block is applied.
    pub last_block_height: u64,
    pub last_block_id: BlockId,
    pub last_block_time: Time,

    /// Validators of the next block. Its proposer is the expected proposer.
    pub validators: ValidatorSet,
    pub next_validators: ValidatorSet,
    /// Validators of the last block, i.e. the signers of the next block's last commit.
    pub last_validators: ValidatorSet,
    pub last_height_validators_changed: u64,

    pub consensus_params: ConsensusParams,
    pub last_height_consensus_params_changed: u64,

    /// Merkle root of the results of the last block's transactions.
    pub last_results_hash: Hash,
    /// Application state after executing the last block.
    pub app_hash: Hash,
}

impl State {
    /// Builds the bootstrapping state, before any block has been applied.
    pub fn from_genesis(genesis: &GenesisDoc) -> Result<Self, GenesisError> {
        genesis.validate()?;
        let initial_height = genesis.initial_height.max(1);
        let validators = ValidatorSet::new(
            genesis.validators.iter().map(|v| Validator::new(v.address, v.power)).collect(),
        );
        let next_validators = validators.copy_increment_proposer_priority(1);
        Ok(Self {
            chain_id: genesis.chain_id.clone(),
            version: Version::new(BLOCK_PROTOCOL, genesis.consensus_params.version.app),
            initial_height,
            last_block_height: initial_height - 1,
            last_block_id: BlockId::default(),
            last_block_time: genesis.genesis_time,
            validators,
            next_validators,
            last_validators: ValidatorSet::empty(),
            last_height_validators_changed: initial_height,
            consensus_params: genesis.consensus_params,
            last_height_consensus_params_changed: initial_height,
            last_results_hash: Hash::default(),
            app_hash: genesis.app_hash,
        })
    }

    /// No block has been applied on top of genesis yet.
    pub fn is_bootstrapping(&self) -> bool {
        self.last_block_height < self.initial_height
    }

    /// Time a block at `height` carrying `last_commit` gets when derived from this state.
    pub fn block_time(&self, height: u64, last_commit: &Commit) -> Time {
        if height == self.initial_height {
            return self.last_block_time;
        }
        let latest_vote = last_commit.signatures.iter().map(|sig| sig.timestamp).max().unwrap_or(0);
        latest_vote.max(self.last_block_time + 1)
    }

    /// Creates a block at `height` whose header is derived from this state.
    pub fn make_block(
        &self, height: u64, data: Data, last_commit: Commit, evidence: Vec<Evidence>,
        proposer_address: Address,
    ) -> Block {
        let header = Header {
            version: self.version,
            chain_id: self.chain_id.clone(),
            height,
            time: self.block_time(height, &last_commit),
            last_block_id: self.last_block_id,
            last_commit_hash: last_commit.hash(),
            data_hash: data.hash(),
            validators_hash: self.validators.hash(),
            next_validators_hash: self.next_validators.hash(),
            consensus_hash: self.consensus_params.hash(),
            app_hash: self.app_hash,
            last_results_hash: self.last_results_hash,
            evidence_hash: evidence_hash(&evidence),
            proposer_address: Bytes::copy_from_slice(proposer_address.as_slice()),
        };
        Block { header, data, evidence, last_commit }
    }
}
