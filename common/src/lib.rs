pub mod block;
pub mod codec;
pub mod config;
#[cfg(feature = "db")]
pub mod db;
pub mod merkle;
pub mod namespace;
pub mod state;
pub mod validator;

use k256::ecdsa::SigningKey;
use merkle::hash_leaf;
use sha3::Keccak256;

pub use block::Address;

/// Derives the 20-byte address of the given secret key's public key.
pub fn address_from_sk(sk: &SigningKey) -> Address {
    let vk = sk.verifying_key();
    let uncompressed_point = vk.to_encoded_point(false);
    let vk_bytes = uncompressed_point.as_bytes();

    let hash = hash_leaf::<Keccak256>(vk_bytes[1..].to_vec());
    let mut address_bytes = [0u8; 20];
    address_bytes.copy_from_slice(&hash.0[12..]);

    Address::from_slice(&address_bytes)
}
