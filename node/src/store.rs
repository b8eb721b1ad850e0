//! Persistence of the chain state, one record per height.

use rollnode_common::{
    db::{self, state_key, Db, LatestHeight, STATE_CF},
    state::{GenesisDoc, GenesisError, State},
};
use std::collections::BTreeMap;
use tracing::info;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("no state persisted")]
    NotFound,
    #[error("database error: {0}")]
    Db(db::Error),
    #[error("invalid genesis: {0}")]
    Genesis(#[from] GenesisError),
    #[error("stored chain {stored} does not match genesis chain {genesis}")]
    ChainMismatch { stored: String, genesis: String },
}

impl From<db::Error> for StoreError {
    fn from(err: db::Error) -> Self {
        match err {
            db::Error::NotFound => StoreError::NotFound,
            err => StoreError::Db(err),
        }
    }
}

pub trait StateStore: Send {
    /// Latest persisted state.
    fn load(&self) -> Result<State, StoreError>;
    fn save(&mut self, state: &State) -> Result<(), StoreError>;
}

/// State store backed by rocksdb.
pub struct DbStateStore {
    db: Db,
}

impl DbStateStore {
    pub fn new(config: &db::Config) -> Result<Self, StoreError> {
        let db = Db::new(config, &[STATE_CF])?;
        Ok(Self { db })
    }

    /// State persisted after applying the block at `height`.
    pub fn load_at(&self, height: u64) -> Result<State, StoreError> {
        Ok(self.db.get::<State>(state_key(height))?)
    }
}

impl StateStore for DbStateStore {
    fn load(&self) -> Result<State, StoreError> {
        let latest = self.db.get::<LatestHeight>(LatestHeight::full_key())?;
        self.load_at(latest.0)
    }

    fn save(&mut self, state: &State) -> Result<(), StoreError> {
        let mut batch = self.db.batch();
        batch.put(state)?;
        batch.put(&LatestHeight(state.last_block_height))?;
        batch.commit()?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
/// In-memory state store, for ephemeral nodes.
pub struct MemStateStore {
    states: BTreeMap<u64, State>,
}

impl MemStateStore {
    pub fn load_at(&self, height: u64) -> Result<State, StoreError> {
        self.states.get(&height).cloned().ok_or(StoreError::NotFound)
    }
}

impl StateStore for MemStateStore {
    fn load(&self) -> Result<State, StoreError> {
        self.states.last_key_value().map(|(_, state)| state.clone()).ok_or(StoreError::NotFound)
    }

    fn save(&mut self, state: &State) -> Result<(), StoreError> {
        self.states.insert(state.last_block_height, state.clone());
        Ok(())
    }
}

/// Returns the latest persisted state, persisting the genesis state first if the store is empty.
pub fn bootstrap<S: StateStore>(store: &mut S, genesis: &GenesisDoc) -> Result<State, StoreError> {
    match store.load() {
        Ok(state) if state.chain_id != genesis.chain_id => Err(StoreError::ChainMismatch {
            stored: state.chain_id,
            genesis: genesis.chain_id.clone(),
        }),
        Ok(state) => {
            info!(height = state.last_block_height, "resuming from persisted state");
            Ok(state)
        },
        Err(StoreError::NotFound) => {
            let state = State::from_genesis(genesis)?;
            store.save(&state)?;
            info!(
                chain_id = %state.chain_id,
                initial_height = state.initial_height,
                "bootstrapped from genesis"
            );
            Ok(state)
        },
        Err(err) => Err(err),
    }
}
