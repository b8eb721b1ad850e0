use crate::{db::DbItem, state::State};
use serde::{Deserialize, Serialize};

/// Column family holding chain states and the pointer to the latest one.
pub const STATE_CF: &str = "state";

const STATE_PREFIX: &str = "state";
const LATEST_PREFIX: &str = "latest";

/// Full key of the state persisted after applying the block at `height`.
pub fn state_key(height: u64) -> Vec<u8> {
    let mut key = STATE_PREFIX.as_bytes().to_vec();
    key.extend(height.to_be_bytes());
    key
}

impl DbItem for State {
    fn get_key(&self) -> Vec<u8> {
        self.last_block_height.to_be_bytes().to_vec()
    }

    fn get_cf() -> String {
        STATE_CF.to_string()
    }

    fn get_prefix(&self) -> String {
        STATE_PREFIX.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
/// Height of the most recently persisted state.
pub struct LatestHeight(pub u64);

impl LatestHeight {
    pub fn full_key() -> Vec<u8> {
        LATEST_PREFIX.as_bytes().to_vec()
    }
}

impl DbItem for LatestHeight {
    fn get_key(&self) -> Vec<u8> {
        Vec::new()
    }

    fn get_cf() -> String {
        STATE_CF.to_string()
    }

    fn get_prefix(&self) -> String {
        LATEST_PREFIX.to_string()
    }
}
