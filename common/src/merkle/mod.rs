use alloy_rlp_derive::{RlpDecodable, RlpEncodable};
use serde::{Deserialize, Serialize};
use sha3::Digest;
use std::fmt::{Display, Formatter, Result as FmtResult};

#[cfg(test)]
use rand::Rng;

pub mod fixed;

use fixed::DenseMerkleTree;

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, RlpDecodable, RlpEncodable, Serialize, Deserialize,
)]
pub struct Hash(#[serde(with = "hex")] pub [u8; 32]);

impl Hash {
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let inner: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(inner))
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_slice()
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; 32]
    }

    pub fn to_hex(self) -> String {
        hex::encode(self.0)
    }
}

impl Display for Hash {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        write!(f, "{}", hex::encode(self.0))
    }
}

#[cfg(test)]
impl Hash {
    pub fn random<R: Rng>(rng: &mut R) -> Self {
        Hash(rng.gen::<[u8; 32]>())
    }
}

pub fn hash_two<H: Digest>(left: Hash, right: Hash) -> Hash {
    let mut hasher = H::new();
    hasher.update(left.0);
    hasher.update(right.0);
    let hash = hasher.finalize().to_vec();
    let mut bytes: [u8; 32] = [0; 32];
    bytes.copy_from_slice(&hash);
    Hash(bytes)
}

pub fn hash_leaf<H: Digest>(preimage: Vec<u8>) -> Hash {
    let mut hasher = H::new();
    hasher.update(preimage);
    let hash = hasher.finalize().to_vec();
    let mut bytes: [u8; 32] = [0; 32];
    bytes.copy_from_slice(&hash);
    Hash(bytes)
}

/// Computes the merkle root over the given leaf preimages.
///
/// Each preimage is hashed into a leaf first. An empty list has the digest of the empty
/// preimage as its root, so that "no items" still commits to a well-defined value.
pub fn root_of<H: Digest>(preimages: Vec<Vec<u8>>) -> Hash {
    if preimages.is_empty() {
        return hash_leaf::<H>(Vec::new());
    }
    let leaves = preimages.into_iter().map(hash_leaf::<H>).collect();
    DenseMerkleTree::<H>::new(leaves).root()
}
