//! Contracts of the data-availability layer collaborators the node consumes.

use async_trait::async_trait;
use rollnode_common::{
    merkle::{root_of, Hash},
    namespace::NamespaceId,
};
use sha3::Keccak256;

pub mod shares;

pub use shares::{split_message, ShareDecoder, SHARE_SIZE};

/// Raw namespaced share, as served by the DA layer.
pub type Share = Vec<u8>;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DaError {
    #[error("header subscription closed")]
    Closed,
    #[error("DA service error: {0}")]
    Service(String),
    #[error("malformed shares: {0}")]
    Share(shares::ParseError),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Commitment to the erasure-coded square of one DA-layer block.
pub struct DataAvailabilityHeader {
    pub row_roots: Vec<Hash>,
    pub column_roots: Vec<Hash>,
}

impl DataAvailabilityHeader {
    pub fn hash(&self) -> Hash {
        let roots = self.row_roots.iter().chain(self.column_roots.iter());
        root_of::<Keccak256>(roots.map(|root| root.as_bytes().to_vec()).collect())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtendedHeader {
    pub height: u64,
    pub dah: DataAvailabilityHeader,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Application message reassembled from a sequence of shares.
pub struct Message {
    pub namespace: NamespaceId,
    pub data: Vec<u8>,
}

#[async_trait]
pub trait HeaderSubscriber: Send + Sync {
    /// Opens a new feed of DA-layer headers, in DA-layer height order.
    async fn subscribe(&self) -> Result<Box<dyn Subscription>, DaError>;
}

#[async_trait]
pub trait Subscription: Send {
    /// Waits for the next header. An error ends the subscription.
    async fn next_header(&mut self) -> Result<ExtendedHeader, DaError>;
}

#[async_trait]
pub trait ShareService: Send + Sync {
    async fn get_shares_by_namespace(
        &self, root: &DataAvailabilityHeader, namespace: NamespaceId,
    ) -> Result<Vec<Share>, DaError>;
}

pub trait MessageDecoder: Send + Sync {
    /// Reassembles the ordered messages carried by `shares`.
    fn parse_messages(&self, shares: &[Share]) -> Result<Vec<Message>, DaError>;
}
