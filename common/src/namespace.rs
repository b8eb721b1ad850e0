use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

/// Length in bytes of a DA-layer namespace id.
pub const NAMESPACE_ID_LEN: usize = 8;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ParseNamespaceError {
    #[error("namespace is not valid hex: {0}")]
    Hex(hex::FromHexError),
    #[error("namespace must be 8 bytes, got {0}")]
    Length(usize),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
/// Identifier partitioning DA-layer data among independent rollups.
pub struct NamespaceId(#[serde(with = "hex")] pub [u8; NAMESPACE_ID_LEN]);

impl NamespaceId {
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ParseNamespaceError> {
        let inner: [u8; NAMESPACE_ID_LEN] =
            bytes.try_into().map_err(|_| ParseNamespaceError::Length(bytes.len()))?;
        Ok(Self(inner))
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_slice()
    }
}

impl FromStr for NamespaceId {
    type Err = ParseNamespaceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s.trim_start_matches("0x")).map_err(ParseNamespaceError::Hex)?;
        Self::from_slice(&bytes)
    }
}

impl Display for NamespaceId {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        write!(f, "{}", hex::encode(self.0))
    }
}
