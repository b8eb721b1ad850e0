use super::{Address, BlockId, Time};
use crate::merkle::{hash_leaf, root_of, Hash};
use alloy_rlp::{encode, BufMut, Decodable, Encodable, Error as RlpError, Result as RlpResult};
use alloy_rlp_derive::{RlpDecodable, RlpEncodable};
use k256::ecdsa::signature::hazmat::PrehashVerifier;
use k256::ecdsa::{
    Error as EcdsaError, RecoveryId, Signature as EcdsaSignature, SigningKey, VerifyingKey,
};
use serde::{Deserialize, Serialize};
use sha3::Keccak256;

#[derive(
    Debug, Clone, PartialEq, Eq, Default, RlpDecodable, RlpEncodable, Serialize, Deserialize,
)]
/// Recoverable secp256k1 signature.
pub struct Signature {
    pub s: [u8; 32],
    pub r: [u8; 32],
    r_id: u8,
}

impl Signature {
    pub fn new(s: [u8; 32], r: [u8; 32], r_id: u8) -> Self {
        Self { s, r, r_id }
    }

    pub fn r_id(&self) -> u8 {
        self.r_id
    }

    /// Signs a 32-byte message digest.
    pub fn sign(sk: &SigningKey, message: &Hash) -> Result<Self, EcdsaError> {
        let (sig, rec) = sk.sign_prehash_recoverable(message.as_bytes())?;
        let s: [u8; 32] = sig.s().to_bytes().into();
        let r: [u8; 32] = sig.r().to_bytes().into();
        Ok(Self::new(s, r, rec.to_byte()))
    }

    /// Recovers the signer address of `message`, checking the signature along the way.
    pub fn recover(&self, message: &Hash) -> Result<Address, EcdsaError> {
        let mut bytes = Vec::new();
        bytes.extend(self.r);
        bytes.extend(self.s);

        let sig = EcdsaSignature::try_from(bytes.as_slice())?;
        let rec_id = RecoveryId::from_byte(self.r_id).ok_or(EcdsaError::new())?;
        let verifying_key = VerifyingKey::recover_from_prehash(message.as_bytes(), &sig, rec_id)?;
        verifying_key.verify_prehash(message.as_bytes(), &sig)?;

        let uncompressed_point = verifying_key.to_encoded_point(false);
        let vk_bytes = uncompressed_point.as_bytes();

        let hash = hash_leaf::<Keccak256>(vk_bytes[1..].to_vec());
        let mut address_bytes = [0u8; 20];
        address_bytes.copy_from_slice(&hash.0[12..]);
        Ok(Address::from_slice(&address_bytes))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
/// What a validator voted for in a commit.
pub enum BlockIdFlag {
    /// No vote was received from the validator.
    #[default]
    Absent,
    /// Voted for the committed block.
    Commit,
    /// Voted for nil.
    Nil,
}

impl From<BlockIdFlag> for u8 {
    fn from(flag: BlockIdFlag) -> Self {
        match flag {
            BlockIdFlag::Absent => 1,
            BlockIdFlag::Commit => 2,
            BlockIdFlag::Nil => 3,
        }
    }
}

impl Encodable for BlockIdFlag {
    fn encode(&self, out: &mut dyn BufMut) {
        u8::from(*self).encode(out);
    }

    fn length(&self) -> usize {
        u8::from(*self).length()
    }
}

impl Decodable for BlockIdFlag {
    fn decode(buf: &mut &[u8]) -> RlpResult<Self> {
        match u8::decode(buf)? {
            1 => Ok(BlockIdFlag::Absent),
            2 => Ok(BlockIdFlag::Commit),
            3 => Ok(BlockIdFlag::Nil),
            _ => Err(RlpError::Custom("unknown block id flag")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, RlpEncodable, RlpDecodable, Serialize, Deserialize)]
pub struct CommitSig {
    pub block_id_flag: BlockIdFlag,
    pub validator_address: Address,
    pub timestamp: Time,
    pub signature: Signature,
}

impl CommitSig {
    pub fn absent() -> Self {
        Self::default()
    }

    pub fn is_absent(&self) -> bool {
        self.block_id_flag == BlockIdFlag::Absent
    }

    pub fn is_for_block(&self) -> bool {
        self.block_id_flag == BlockIdFlag::Commit
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, RlpEncodable, RlpDecodable, Serialize, Deserialize)]
/// Quorum certificate for a block, carried by the block that follows it.
pub struct Commit {
    pub height: u64,
    pub round: u32,
    pub block_id: BlockId,
    pub signatures: Vec<CommitSig>,
}

impl Commit {
    pub fn new(height: u64, round: u32, block_id: BlockId, signatures: Vec<CommitSig>) -> Self {
        Self { height, round, block_id, signatures }
    }

    pub fn hash(&self) -> Hash {
        root_of::<Keccak256>(self.signatures.iter().map(encode).collect())
    }

    /// Vote that the signature at `index` is expected to sign.
    pub fn canonical_vote(&self, chain_id: &str, index: usize) -> Option<CanonicalVote> {
        let sig = self.signatures.get(index)?;
        let block_id = if sig.is_for_block() { self.block_id } else { BlockId::default() };
        Some(CanonicalVote {
            height: self.height,
            round: self.round,
            block_id,
            timestamp: sig.timestamp,
            chain_id: chain_id.to_string(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, RlpEncodable, RlpDecodable)]
/// Sign bytes of a precommit vote.
pub struct CanonicalVote {
    pub height: u64,
    pub round: u32,
    pub block_id: BlockId,
    pub timestamp: Time,
    pub chain_id: String,
}

impl CanonicalVote {
    pub fn sign_bytes(&self) -> Hash {
        hash_leaf::<Keccak256>(encode(self))
    }

    /// Signs the vote, producing the `CommitSig` that goes into a commit.
    pub fn sign(&self, sk: &SigningKey, flag: BlockIdFlag) -> Result<CommitSig, EcdsaError> {
        let signature = Signature::sign(sk, &self.sign_bytes())?;
        Ok(CommitSig {
            block_id_flag: flag,
            validator_address: crate::address_from_sk(sk),
            timestamp: self.timestamp,
            signature,
        })
    }
}
