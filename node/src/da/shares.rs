//! Default share layout: every share is `SHARE_SIZE` bytes, starting with the namespace id and
//! an info byte. The first share of a message also carries the message length (u32, big endian);
//! the remaining bytes of each share are payload, zero padded at the end of a message.

use super::{DaError, Message, MessageDecoder, Share};
use rollnode_common::namespace::{NamespaceId, NAMESPACE_ID_LEN};

pub const SHARE_SIZE: usize = 512;

/// Info byte flag marking the first share of a message.
const SEQUENCE_START: u8 = 0b0000_0001;
const INFO_BYTE_INDEX: usize = NAMESPACE_ID_LEN;
const LENGTH_PREFIX_LEN: usize = 4;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("share {index} has {size} bytes")]
    WrongSize { index: usize, size: usize },
    #[error("share {0} continues a message that was never started")]
    MissingStart(usize),
    #[error("share {0} switches namespace inside a message")]
    NamespaceChanged(usize),
    #[error("message ended after {got} of {expected} bytes")]
    Truncated { expected: usize, got: usize },
    #[error("message of {0} bytes does not fit the length prefix")]
    TooLarge(usize),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ShareDecoder;

impl MessageDecoder for ShareDecoder {
    fn parse_messages(&self, shares: &[Share]) -> Result<Vec<Message>, DaError> {
        parse_shares(shares).map_err(DaError::Share)
    }
}

struct Pending {
    namespace: NamespaceId,
    len: usize,
    data: Vec<u8>,
}

/// Reassembles messages from shares in the order they are given.
pub fn parse_shares(shares: &[Share]) -> Result<Vec<Message>, ParseError> {
    let mut messages = Vec::new();
    let mut pending: Option<Pending> = None;

    for (index, share) in shares.iter().enumerate() {
        if share.len() != SHARE_SIZE {
            return Err(ParseError::WrongSize { index, size: share.len() });
        }
        let namespace = NamespaceId::from_slice(&share[..NAMESPACE_ID_LEN])
            .map_err(|_| ParseError::WrongSize { index, size: share.len() })?;

        let payload_start = if share[INFO_BYTE_INDEX] & SEQUENCE_START != 0 {
            if let Some(unfinished) = pending.take() {
                return Err(ParseError::Truncated {
                    expected: unfinished.len,
                    got: unfinished.data.len(),
                });
            }
            let prefix_start = INFO_BYTE_INDEX + 1;
            let mut len_bytes = [0u8; LENGTH_PREFIX_LEN];
            len_bytes.copy_from_slice(&share[prefix_start..prefix_start + LENGTH_PREFIX_LEN]);
            let len = u32::from_be_bytes(len_bytes) as usize;
            // the length prefix is untrusted
            let capacity = len.min(shares.len().saturating_sub(index) * SHARE_SIZE);
            pending = Some(Pending { namespace, len, data: Vec::with_capacity(capacity) });
            prefix_start + LENGTH_PREFIX_LEN
        } else {
            match &pending {
                None => return Err(ParseError::MissingStart(index)),
                Some(p) if p.namespace != namespace => {
                    return Err(ParseError::NamespaceChanged(index))
                },
                Some(_) => INFO_BYTE_INDEX + 1,
            }
        };

        if let Some(p) = pending.as_mut() {
            let payload = &share[payload_start..];
            let take = (p.len - p.data.len()).min(payload.len());
            p.data.extend_from_slice(&payload[..take]);
        }
        if let Some(p) = pending.take_if(|p| p.data.len() == p.len) {
            messages.push(Message { namespace: p.namespace, data: p.data });
        }
    }

    if let Some(unfinished) = pending {
        return Err(ParseError::Truncated { expected: unfinished.len, got: unfinished.data.len() });
    }
    Ok(messages)
}

/// Splits `data` into the shares that carry it under `namespace`.
pub fn split_message(namespace: NamespaceId, data: &[u8]) -> Result<Vec<Share>, ParseError> {
    let len = u32::try_from(data.len()).map_err(|_| ParseError::TooLarge(data.len()))?;
    let mut shares = Vec::new();
    let mut rest = data;
    loop {
        let mut share = Vec::with_capacity(SHARE_SIZE);
        share.extend_from_slice(namespace.as_bytes());
        if shares.is_empty() {
            share.push(SEQUENCE_START);
            share.extend_from_slice(&len.to_be_bytes());
        } else {
            share.push(0);
        }
        let take = (SHARE_SIZE - share.len()).min(rest.len());
        share.extend_from_slice(&rest[..take]);
        share.resize(SHARE_SIZE, 0);
        shares.push(share);

        rest = &rest[take..];
        if rest.is_empty() {
            break;
        }
    }
    Ok(shares)
}
