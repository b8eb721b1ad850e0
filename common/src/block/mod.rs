//! Rollup block types: headers, block ids, transaction data and evidence.

use crate::merkle::{hash_leaf, root_of, Hash};
use alloy_primitives::Bytes;
use alloy_rlp::encode;
use alloy_rlp_derive::{RlpDecodable, RlpEncodable};
use serde::{Deserialize, Serialize};
use sha3::Keccak256;
use std::fmt::{Display, Formatter, Result as FmtResult};

pub mod commit;

pub use commit::{BlockIdFlag, CanonicalVote, Commit, CommitSig, Signature};

pub type Address = alloy_primitives::Address;

/// Length in bytes of a well-formed validator address.
pub const ADDRESS_LENGTH: usize = 20;

/// Unix timestamp in milliseconds.
pub type Time = u64;

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, RlpEncodable, RlpDecodable, Serialize, Deserialize,
)]
/// Consensus version of a block: the block protocol and the application protocol.
pub struct Version {
    pub block: u64,
    pub app: u64,
}

impl Version {
    pub fn new(block: u64, app: u64) -> Self {
        Self { block, app }
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        write!(f, "{{block: {}, app: {}}}", self.block, self.app)
    }
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, RlpEncodable, RlpDecodable, Serialize, Deserialize,
)]
pub struct PartSetHeader {
    pub total: u32,
    pub hash: Hash,
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, RlpEncodable, RlpDecodable, Serialize, Deserialize,
)]
/// Identifies a block by its header hash and the hash of its serialized parts.
pub struct BlockId {
    pub hash: Hash,
    pub part_set_header: PartSetHeader,
}

impl BlockId {
    /// Zero id, used as the "last block" of a chain that has not produced any block yet.
    pub fn is_zero(&self) -> bool {
        self == &Self::default()
    }
}

impl Display for BlockId {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        write!(
            f,
            "{}:{}:{}",
            self.hash, self.part_set_header.total, self.part_set_header.hash
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, RlpEncodable, RlpDecodable, Serialize, Deserialize)]
pub struct Header {
    pub version: Version,
    pub chain_id: String,
    pub height: u64,
    pub time: Time,
    pub last_block_id: BlockId,
    /// Merkle root of the previous block's commit signatures.
    pub last_commit_hash: Hash,
    /// Merkle root of the transactions in this block.
    pub data_hash: Hash,
    pub validators_hash: Hash,
    pub next_validators_hash: Hash,
    pub consensus_hash: Hash,
    /// State after executing the previous block.
    pub app_hash: Hash,
    pub last_results_hash: Hash,
    pub evidence_hash: Hash,
    /// Raw proposer address; a well-formed one has `ADDRESS_LENGTH` bytes.
    pub proposer_address: Bytes,
}

impl Header {
    pub fn hash(&self) -> Hash {
        hash_leaf::<Keccak256>(encode(self))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, RlpEncodable, RlpDecodable, Serialize, Deserialize)]
pub struct Data {
    pub txs: Vec<Bytes>,
}

impl Data {
    pub fn new(txs: Vec<Bytes>) -> Self {
        Self { txs }
    }

    pub fn hash(&self) -> Hash {
        root_of::<Keccak256>(self.txs.iter().map(|tx| tx.to_vec()).collect())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, RlpEncodable, RlpDecodable, Serialize, Deserialize)]
/// Proof that a validator signed two conflicting votes at the same height.
pub struct Evidence {
    pub validator_address: Address,
    pub height: u64,
    pub time: Time,
    pub vote_a: Hash,
    pub vote_b: Hash,
}

pub fn evidence_hash(evidence: &[Evidence]) -> Hash {
    root_of::<Keccak256>(evidence.iter().map(encode).collect())
}

#[derive(Debug, Clone, Default, PartialEq, Eq, RlpEncodable, RlpDecodable, Serialize, Deserialize)]
pub struct Block {
    pub header: Header,
    pub data: Data,
    pub evidence: Vec<Evidence>,
    /// Commit for the previous block.
    pub last_commit: Commit,
}

impl Block {
    pub fn height(&self) -> u64 {
        self.header.height
    }

    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    pub fn block_id(&self) -> BlockId {
        BlockId {
            hash: self.header.hash(),
            part_set_header: PartSetHeader {
                total: 1,
                hash: hash_leaf::<Keccak256>(encode(self)),
            },
        }
    }
}
