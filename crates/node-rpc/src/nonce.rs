use {
    crate::{error::Error, jsonrpc::methods, transport::{Transport, TransportExt}},
    alloy::{eips::BlockNumberOrTag, primitives::Address},
    futures::future,
    std::sync::Arc,
};

/// Anything that can tell the next nonce of an address.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait NonceSource: Send + Sync + 'static {
    async fn nonce(&self, block: BlockNumberOrTag) -> Result<u64, Error>;
}

/// `eth_getTransactionCount` of one address against one node.
pub struct TransactionCountSource {
    transport: Arc<dyn Transport>,
    address: Address,
    pending: bool,
}

impl TransactionCountSource {
    pub fn new(transport: Arc<dyn Transport>, address: Address) -> Self {
        Self {
            transport,
            address,
            pending: false,
        }
    }

    /// Counts transactions still waiting in the node's pool, whatever block
    /// the caller asks for.
    pub fn pending(transport: Arc<dyn Transport>, address: Address) -> Self {
        Self {
            transport,
            address,
            pending: true,
        }
    }
}

#[async_trait::async_trait]
impl NonceSource for TransactionCountSource {
    async fn nonce(&self, block: BlockNumberOrTag) -> Result<u64, Error> {
        let block = if self.pending {
            BlockNumberOrTag::Pending
        } else {
            block
        };
        self.transport
            .fetch(methods::get_transaction_count(self.address, block))
            .await
    }
}

/// Asks every registered source and takes the highest answer. Nodes lag
/// behind each other, so the maximum is the only value that can't reuse a
/// nonce.
#[derive(Default)]
pub struct NonceAggregator {
    sources: Vec<Arc<dyn NonceSource>>,
}

impl NonceAggregator {
    pub fn new(sources: Vec<Arc<dyn NonceSource>>) -> Self {
        Self { sources }
    }

    pub fn add(&mut self, source: Arc<dyn NonceSource>) {
        self.sources.push(source);
    }
}

#[async_trait::async_trait]
impl NonceSource for NonceAggregator {
    /// Fails with [`Error::NoNonceSource`] only when no source answered.
    async fn nonce(&self, block: BlockNumberOrTag) -> Result<u64, Error> {
        let results =
            future::join_all(self.sources.iter().map(|source| source.nonce(block))).await;
        results
            .into_iter()
            .filter_map(|result| {
                result
                    .inspect_err(|err| tracing::debug!(?err, "nonce source failed"))
                    .ok()
            })
            .max()
            .ok_or(Error::NoNonceSource)
    }
}
