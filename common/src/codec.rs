//! Binary encoding of the `MultiBlock` container carried by one DA-layer message.

use crate::block::Block;
use alloy_rlp::{encode, Decodable, Error as RlpError};
use alloy_rlp_derive::{RlpDecodable, RlpEncodable};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("malformed multiblock: {0}")]
    Rlp(RlpError),
    #[error("{0} trailing bytes after multiblock")]
    TrailingBytes(usize),
    #[error("multiblock contains no blocks")]
    Empty,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, RlpEncodable, RlpDecodable)]
/// One or more rollup blocks packed into a single namespaced message, in height order.
pub struct MultiBlock {
    pub blocks: Vec<Block>,
}

impl MultiBlock {
    pub fn new(blocks: Vec<Block>) -> Self {
        Self { blocks }
    }

    pub fn into_blocks(self) -> Vec<Block> {
        self.blocks
    }
}

pub fn encode_multiblock(multiblock: &MultiBlock) -> Vec<u8> {
    encode(multiblock)
}

/// Decodes a message payload. Either the whole payload is a well-formed, non-empty
/// multiblock or an error is returned.
pub fn decode_multiblock(bytes: &[u8]) -> Result<MultiBlock, DecodeError> {
    let mut buf = bytes;
    let multiblock = MultiBlock::decode(&mut buf).map_err(DecodeError::Rlp)?;
    if !buf.is_empty() {
        return Err(DecodeError::TrailingBytes(buf.len()));
    }
    if multiblock.blocks.is_empty() {
        return Err(DecodeError::Empty);
    }
    Ok(multiblock)
}
