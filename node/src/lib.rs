use da::{HeaderSubscriber, MessageDecoder, ShareDecoder, ShareService};
use dotenv::dotenv;
use executor::{BlockExecutor, ConsensusApplication, ExecutorError};
use pipeline::{IngestionError, IngestionPipeline};
use rollnode_common::{
    block::Block,
    config, db,
    namespace::NamespaceId,
    state::{GenesisDoc, State},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use store::{bootstrap, DbStateStore, StateStore};
use tokio::{select, sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use tracing_subscriber::EnvFilter;

pub mod da;
mod error;
pub mod executor;
pub mod pipeline;
pub mod store;
#[cfg(test)]
mod test_utils;
pub mod validation;

pub use error::Error;

const DEFAULT_QUEUE_CAPACITY: usize = 8;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
/// What the application does when ingestion stops with an error.
pub enum FailurePolicy {
    /// Stop the application and report the error.
    #[default]
    Halt,
    /// Run ingestion again on a fresh subscription after `delay_ms`, at most `max_restarts` times.
    Restart { delay_ms: u64, max_restarts: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionConfig {
    /// Capacity of the block queue between ingestion and execution. At least 1.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default)]
    pub on_failure: FailurePolicy,
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self { queue_capacity: DEFAULT_QUEUE_CAPACITY, on_failure: FailurePolicy::default() }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Stop executing on the first invalid block instead of skipping it.
    #[serde(default)]
    pub halt_on_invalid_block: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub namespace: NamespaceId,
    pub genesis: GenesisDoc,
    pub database: db::Config,
    #[serde(default)]
    pub ingestion: IngestionConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
}

type ConsumerOutcome<S, A> = (BlockExecutor<S, A>, Result<(), ExecutorError>);

struct Running<S, A> {
    token: CancellationToken,
    producer: JoinHandle<Result<(), IngestionError>>,
    consumer: JoinHandle<ConsumerOutcome<S, A>>,
}

/// Rollup node: ingests blocks from the DA layer and applies them in order.
pub struct Application<S, A> {
    config: Config,
    pipeline: Arc<IngestionPipeline>,
    /// Present while stopped; moved into the consumer while running.
    executor: Option<BlockExecutor<S, A>>,
    running: Option<Running<S, A>>,
}

impl<A: ConsensusApplication + 'static> Application<DbStateStore, A> {
    /// Initializes the node:
    /// - Loads the config from rollnode.toml, creating it with defaults if missing.
    /// - Opens the state store, persisting the genesis state on first start.
    /// - Loads the latest state into the executor.
    pub fn init(
        subscriber: Arc<dyn HeaderSubscriber>, shares: Arc<dyn ShareService>, app: A,
    ) -> Result<Self, Error> {
        dotenv().ok();
        // a subscriber may already be installed by the embedding program
        let _ = tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).try_init();

        let config_loader = config::Loader::new("rollnode")?;
        let config: Config = config_loader.load_or_create(include_str!("../config.toml"))?;

        let mut store = DbStateStore::new(&config.database)?;
        bootstrap(&mut store, &config.genesis)?;
        let executor = BlockExecutor::new(store, app)?;
        info!(namespace = %config.namespace, "rollnode initialized");

        Ok(Self::new(config, subscriber, shares, Arc::new(ShareDecoder), executor))
    }
}

impl<S, A> Application<S, A>
where
    S: StateStore + 'static,
    A: ConsensusApplication + 'static,
{
    pub fn new(
        config: Config, subscriber: Arc<dyn HeaderSubscriber>, shares: Arc<dyn ShareService>,
        decoder: Arc<dyn MessageDecoder>, executor: BlockExecutor<S, A>,
    ) -> Self {
        let pipeline = IngestionPipeline::new(config.namespace, subscriber, shares, decoder);
        Self { config, pipeline: Arc::new(pipeline), executor: Some(executor), running: None }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Current chain state, unavailable while the application is running.
    pub fn state(&self) -> Option<&State> {
        self.executor.as_ref().map(|executor| executor.state())
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Spawns ingestion and execution. Both stop when `token` is cancelled.
    pub async fn start(&mut self, token: CancellationToken) -> Result<(), Error> {
        let executor = self.executor.take().ok_or(Error::AlreadyRunning)?;
        let capacity = self.config.ingestion.queue_capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);

        let producer = tokio::spawn(run_ingestion(
            self.pipeline.clone(),
            token.clone(),
            tx,
            self.config.ingestion.on_failure,
        ));
        let halt_on_invalid_block = self.config.executor.halt_on_invalid_block;
        let consumer = tokio::task::spawn_blocking(move || {
            consume_blocks(executor, rx, halt_on_invalid_block)
        });
        info!(capacity, "application started");

        self.running = Some(Running { token, producer, consumer });
        Ok(())
    }

    /// Cancels the running tasks and waits for them.
    pub async fn stop(&mut self) -> Result<(), Error> {
        if let Some(running) = &self.running {
            running.token.cancel();
        }
        self.wait().await
    }

    /// Waits until both tasks have finished and takes the executor back. An ingestion failure is
    /// reported first, then an execution failure.
    pub async fn wait(&mut self) -> Result<(), Error> {
        let running = self.running.take().ok_or(Error::NotRunning)?;
        let ingestion = running.producer.await;
        let (executor, execution) = running.consumer.await?;
        info!(height = executor.state().last_block_height, "application stopped");
        self.executor = Some(executor);

        ingestion??;
        execution?;
        Ok(())
    }
}

#[instrument(skip_all)]
async fn run_ingestion(
    pipeline: Arc<IngestionPipeline>, token: CancellationToken, queue: mpsc::Sender<Block>,
    policy: FailurePolicy,
) -> Result<(), IngestionError> {
    let mut restarts = 0;
    loop {
        let err = match pipeline.run(token.clone(), queue.clone()).await {
            Ok(()) => return Ok(()),
            Err(err) => err,
        };
        match policy {
            FailurePolicy::Restart { delay_ms, max_restarts } if restarts < max_restarts => {
                restarts += 1;
                warn!(%err, restarts, max_restarts, "ingestion failed, restarting");
                select! {
                    biased;
                    () = token.cancelled() => return Ok(()),
                    () = queue.closed() => return Ok(()),
                    () = tokio::time::sleep(Duration::from_millis(delay_ms)) => {},
                }
            },
            _ => {
                error!(%err, "ingestion failed");
                return Err(err);
            },
        }
    }
}

/// Applies queued blocks in order until the queue is closed and drained.
fn consume_blocks<S: StateStore, A: ConsensusApplication>(
    mut executor: BlockExecutor<S, A>, mut queue: mpsc::Receiver<Block>,
    halt_on_invalid_block: bool,
) -> ConsumerOutcome<S, A> {
    while let Some(block) = queue.blocking_recv() {
        let height = block.height();
        match executor.apply_block(&block) {
            Ok(_) => {},
            Err(ExecutorError::Validation(err)) if !halt_on_invalid_block => {
                warn!(height, %err, "rejected invalid block");
            },
            Err(err) => {
                error!(height, %err, "execution halted");
                return (executor, Err(err));
            },
        }
    }
    info!("block queue closed");
    (executor, Ok(()))
}
