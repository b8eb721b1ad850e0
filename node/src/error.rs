use crate::executor::ExecutorError;
use crate::pipeline::IngestionError;
use crate::store::StoreError;
use rollnode_common::config::LoadError;

#[derive(thiserror::Error, Debug)]
/// Errors that can arise while running the node.
pub enum Error {
    #[error("ingestion stopped: {0}")]
    Ingestion(#[from] IngestionError),
    #[error("executor stopped: {0}")]
    Executor(#[from] ExecutorError),
    #[error("state store: {0}")]
    Store(#[from] StoreError),
    #[error("config: {0}")]
    Config(#[from] LoadError),
    #[error("task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("application is already running")]
    AlreadyRunning,
    #[error("application is not running")]
    NotRunning,
}
