//! Turns the DA-layer header feed into an ordered stream of candidate blocks.

use crate::da::{DaError, HeaderSubscriber, MessageDecoder, Share, ShareService};
use getset::Getters;
use rollnode_common::{
    block::Block,
    codec::{decode_multiblock, DecodeError},
    namespace::NamespaceId,
};
use std::sync::Arc;
use tokio::{select, sync::mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

#[derive(thiserror::Error, Debug)]
pub enum IngestionError {
    #[error("header subscription failed: {0}")]
    Subscription(DaError),
    #[error("fetching shares for DA height {height} failed: {source}")]
    Fetch { height: u64, source: DaError },
    #[error("parsing messages at DA height {height} failed: {source}")]
    MessageParse { height: u64, source: DaError },
    #[error("decoding multiblock at DA height {height} failed: {source}")]
    Decode { height: u64, source: DecodeError },
}

#[derive(Getters)]
#[getset(get = "pub")]
pub struct IngestionPipeline {
    namespace: NamespaceId,
    #[getset(skip)]
    subscriber: Arc<dyn HeaderSubscriber>,
    #[getset(skip)]
    shares: Arc<dyn ShareService>,
    #[getset(skip)]
    decoder: Arc<dyn MessageDecoder>,
}

impl IngestionPipeline {
    pub fn new(
        namespace: NamespaceId, subscriber: Arc<dyn HeaderSubscriber>,
        shares: Arc<dyn ShareService>, decoder: Arc<dyn MessageDecoder>,
    ) -> Self {
        Self { namespace, subscriber, shares, decoder }
    }

    /// Runs until cancelled, until the consumer drops its end of `queue`, or until the first
    /// failure. `queue` is dropped on return, which closes it once no other sender is left.
    #[instrument(skip_all, fields(namespace = %self.namespace))]
    pub async fn run(
        &self, token: CancellationToken, queue: mpsc::Sender<Block>,
    ) -> Result<(), IngestionError> {
        let mut subscription = select! {
            biased;
            () = token.cancelled() => return Ok(()),
            res = self.subscriber.subscribe() => res.map_err(IngestionError::Subscription)?,
        };
        info!("subscribed to DA headers");

        while !token.is_cancelled() {
            let header = select! {
                biased;
                () = token.cancelled() => break,
                () = queue.closed() => {
                    info!("block queue closed by consumer, stopping ingestion");
                    return Ok(());
                },
                res = subscription.next_header() => res.map_err(IngestionError::Subscription)?,
            };
            let height = header.height;

            let shares = select! {
                biased;
                () = token.cancelled() => break,
                res = self.shares.get_shares_by_namespace(&header.dah, self.namespace) => {
                    res.map_err(|source| IngestionError::Fetch { height, source })?
                },
            };
            let blocks = self.decode_blocks(height, &shares)?;
            debug!(height, shares = shares.len(), blocks = blocks.len(), "decoded DA block");

            for block in blocks {
                select! {
                    biased;
                    () = token.cancelled() => return Ok(()),
                    res = queue.send(block) => {
                        if res.is_err() {
                            info!("block queue closed by consumer, stopping ingestion");
                            return Ok(());
                        }
                    },
                }
            }
        }

        info!("ingestion cancelled");
        Ok(())
    }

    /// Decodes every block carried by `shares`; nothing is returned unless all messages decode.
    fn decode_blocks(&self, height: u64, shares: &[Share]) -> Result<Vec<Block>, IngestionError> {
        let messages = self
            .decoder
            .parse_messages(shares)
            .map_err(|source| IngestionError::MessageParse { height, source })?;

        let mut blocks = Vec::new();
        for message in messages {
            if message.namespace != self.namespace {
                debug!(height, namespace = %message.namespace, "skipping foreign message");
                continue;
            }
            let multiblock = decode_multiblock(&message.data)
                .map_err(|source| IngestionError::Decode { height, source })?;
            blocks.extend(multiblock.into_blocks());
        }
        Ok(blocks)
    }
}
