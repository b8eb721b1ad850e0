use getset::Getters;
use rocksdb::{self, Options, WriteBatch, DB};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{self, to_vec};
use std::error::Error as StdError;
use std::fmt::{Display, Formatter, Result as FmtResult};

mod items;

pub use items::{state_key, LatestHeight, STATE_CF};

#[derive(Debug)]
/// Errors that can arise while using database.
pub enum Error {
    /// RocksDB failed.
    RocksDB(rocksdb::Error),
    /// Error when encoding or decoding entries.
    Serde(serde_json::Error),
    /// Error when column family is not found.
    CfNotFound(String),
    /// Error when entry is not found.
    NotFound,
}

impl StdError for Error {}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter) -> FmtResult {
        match self {
            Self::RocksDB(e) => write!(f, "{}", e),
            Self::Serde(e) => write!(f, "{}", e),
            Self::CfNotFound(cf) => write!(f, "CfNotFound({})", cf),
            Self::NotFound => write!(f, "NotFound"),
        }
    }
}

pub trait DbItem {
    fn get_key(&self) -> Vec<u8>;
    fn get_prefix(&self) -> String;
    fn get_cf() -> String;
    fn get_full_key(&self) -> Vec<u8> {
        let suffix = self.get_key();
        let mut key = self.get_prefix().as_bytes().to_vec();
        key.extend(suffix);
        key
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Getters)]
#[getset(get = "pub")]
pub struct Config {
    directory: String,
}

impl Config {
    pub fn new(directory: impl Into<String>) -> Self {
        Self { directory: directory.into() }
    }
}

#[derive(Getters)]
#[getset(get = "pub")]
/// Wrapper for database connection.
pub struct Db {
    connection: DB,
    config: Config,
}

impl Db {
    /// Opens (creating if needed) the database at the configured directory with the given
    /// column families.
    pub fn new(config: &Config, cfs: &[&str]) -> Result<Self, Error> {
        let path = &config.directory;
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        let db = DB::open_cf(&opts, path, cfs).map_err(Error::RocksDB)?;
        Ok(Self { connection: db, config: config.clone() })
    }

    /// Puts value into database.
    pub fn put<I: DbItem + Serialize>(&self, item: &I) -> Result<(), Error> {
        let cf = self
            .connection
            .cf_handle(I::get_cf().as_str())
            .ok_or(Error::CfNotFound(I::get_cf()))?;
        let key = item.get_full_key();
        let value = to_vec(item).map_err(Error::Serde)?;
        self.connection.put_cf(&cf, key, value).map_err(Error::RocksDB)
    }

    /// Gets value from database.
    pub fn get<I: DbItem + DeserializeOwned>(&self, key: Vec<u8>) -> Result<I, Error> {
        let cf = self
            .connection
            .cf_handle(I::get_cf().as_str())
            .ok_or(Error::CfNotFound(I::get_cf()))?;
        let item_res = self.connection.get_cf(&cf, key).map_err(Error::RocksDB)?;
        let item = item_res.ok_or(Error::NotFound)?;
        let value = serde_json::from_slice(&item).map_err(Error::Serde)?;
        Ok(value)
    }

    /// Starts a batch of puts that is written atomically on `commit`.
    pub fn batch(&self) -> Batch<'_> {
        Batch { db: self, inner: WriteBatch::default() }
    }
}

/// Atomic group of writes.
pub struct Batch<'a> {
    db: &'a Db,
    inner: WriteBatch,
}

impl Batch<'_> {
    pub fn put<I: DbItem + Serialize>(&mut self, item: &I) -> Result<(), Error> {
        let cf = self
            .db
            .connection
            .cf_handle(I::get_cf().as_str())
            .ok_or(Error::CfNotFound(I::get_cf()))?;
        let value = to_vec(item).map_err(Error::Serde)?;
        self.inner.put_cf(&cf, item.get_full_key(), value);
        Ok(())
    }

    pub fn commit(self) -> Result<(), Error> {
        self.db.connection.write(self.inner).map_err(Error::RocksDB)
    }
}
