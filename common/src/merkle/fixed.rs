use super::{hash_two, Hash};
use sha3::Digest;
use std::{collections::HashMap, marker::PhantomData};

#[derive(Clone, Debug)]
/// Dense binary merkle tree over a fixed set of leaves.
///
/// Leaves are padded with `Hash::default()` up to the next power of two.
pub struct DenseMerkleTree<H>
where
    H: Digest,
{
    /// HashMap to keep the level and index of the nodes
    pub(crate) nodes: HashMap<u8, Vec<Hash>>,
    // Number of levels above the leaves
    num_levels: u8,
    /// PhantomData for the hasher
    _h: PhantomData<H>,
}

impl<H> DenseMerkleTree<H>
where
    H: Digest,
{
    pub fn root(&self) -> Hash {
        self.nodes
            .get(&self.num_levels)
            .and_then(|level| level.first())
            .copied()
            .unwrap_or_default()
    }

    /// Build a MerkleTree from given leaf nodes
    pub fn new(mut leaves: Vec<Hash>) -> Self {
        let next_power_of_two = leaves.len().max(1).next_power_of_two();
        leaves.resize(next_power_of_two, Hash::default());
        let num_levels = next_power_of_two.trailing_zeros() as u8;

        let mut tree = HashMap::new();
        tree.insert(0u8, leaves);

        for i in 0..num_levels {
            let next: Vec<Hash> = tree
                .get(&i)
                .map(|nodes| {
                    nodes.chunks(2).map(|chunk| hash_two::<H>(chunk[0], chunk[1])).collect()
                })
                .unwrap_or_default();
            tree.insert(i + 1, next);
        }

        Self { nodes: tree, num_levels, _h: PhantomData }
    }
}
