//! The node operations surface used by the rest of an application.
//!
//! [`Blockchain`] owns one syncer for its whole life, turns the syncer's
//! connectivity into a [`SyncState`], keeps the last known block height and
//! [`AccountState`] of one address and forwards every node operation to the
//! syncer.

use {
    crate::{
        error::Error,
        jsonrpc::{
            RpcRequest,
            methods::{self, EstimateGas, LogFilter},
        },
        models::{AccountState, GasPrice, RawTransaction, Signature, SyncState, Transaction},
        nonce::NonceSource,
        storage::ApiStorage,
        syncer::{Delegate, RpcSyncer, SyncError, SyncerEvent, SyncerState},
        transport::TransportExt,
    },
    alloy::{
        eips::BlockNumberOrTag,
        primitives::{Address, B256, Bytes, U256, keccak256},
        rpc::types::{Block, Log, TransactionReceipt},
    },
    std::{
        sync::{Arc, Mutex, Weak},
        time::{SystemTime, UNIX_EPOCH},
    },
    tokio::{sync::mpsc, task::JoinHandle},
    tokio_util::sync::CancellationToken,
    tracing::Instrument,
};

/// Signs nothing itself: turns an already signed transaction into the bytes
/// `eth_sendRawTransaction` expects.
#[cfg_attr(test, mockall::automock)]
pub trait TransactionEncoder: Send + Sync + 'static {
    fn encode(&self, transaction: &RawTransaction, signature: &Signature) -> Bytes;
}

/// What the façade reports to its delegate.
#[derive(Clone, Debug, PartialEq)]
pub enum BlockchainEvent {
    BlockHeight(u64),
    AccountState(AccountState),
    SyncState(SyncState),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Effect {
    RefreshAccount,
    RefreshBlockHeight,
    CancelRefreshes,
}

/// `before` effects run before the new state is published, `after` effects
/// once it is.
#[derive(Clone, Debug, PartialEq)]
pub struct Transition {
    pub state: SyncState,
    pub before: Vec<Effect>,
    pub after: Vec<Effect>,
}

/// How a syncer state change is reflected by the façade.
pub fn transition(syncer: &SyncerState) -> Transition {
    match syncer {
        SyncerState::Preparing => Transition {
            state: SyncState::Syncing { progress: None },
            before: vec![],
            after: vec![],
        },
        SyncerState::Ready => Transition {
            state: SyncState::Syncing { progress: None },
            before: vec![],
            after: vec![Effect::RefreshAccount, Effect::RefreshBlockHeight],
        },
        SyncerState::NotReady(cause) => Transition {
            state: SyncState::NotSynced(cause.clone()),
            before: vec![Effect::CancelRefreshes],
            after: vec![],
        },
    }
}

pub struct Blockchain {
    inner: Arc<Inner>,
    listener: JoinHandle<()>,
}

struct Inner {
    address: Address,
    syncer: Arc<dyn RpcSyncer>,
    storage: Arc<dyn ApiStorage>,
    cache: Mutex<Cache>,
    delegate: Delegate<BlockchainEvent>,
    /// Cancelled whenever the syncer stops being ready.
    refreshes: Mutex<CancellationToken>,
    /// Child of `refreshes` for the latest account refresh. A newer refresh
    /// cancels the previous one so an older pair never overwrites a newer.
    account_refresh: Mutex<CancellationToken>,
}

/// Readers always get a consistent snapshot; the account state is only ever
/// replaced as a whole.
struct Cache {
    sync_state: SyncState,
    account_state: Option<AccountState>,
    last_block_height: Option<u64>,
}

impl Blockchain {
    /// Registers as the syncer's delegate and seeds the cache from `storage`.
    /// Must be called from within a tokio runtime.
    pub fn new(address: Address, syncer: Arc<dyn RpcSyncer>, storage: Arc<dyn ApiStorage>) -> Self {
        let events = syncer.events();
        let inner = Arc::new(Inner {
            address,
            syncer,
            cache: Mutex::new(Cache {
                sync_state: SyncState::NotSynced(SyncError::NotStarted),
                account_state: storage.account_state(),
                last_block_height: storage.last_block_height(),
            }),
            storage,
            delegate: Default::default(),
            refreshes: Mutex::new(CancellationToken::new()),
            account_refresh: Mutex::new(CancellationToken::new()),
        });
        let listener = tokio::spawn(
            listen(Arc::downgrade(&inner), events).instrument(tracing::info_span!("blockchain")),
        );
        Self { inner, listener }
    }

    /// Registers the delegate. Only the most recently returned receiver gets
    /// events.
    pub fn events(&self) -> mpsc::UnboundedReceiver<BlockchainEvent> {
        self.inner.delegate.register()
    }

    pub fn address(&self) -> Address {
        self.inner.address
    }

    pub fn source(&self) -> String {
        format!("RPC {}", self.inner.syncer.source())
    }

    pub fn sync_state(&self) -> SyncState {
        self.inner.cache.lock().unwrap().sync_state.clone()
    }

    pub fn account_state(&self) -> Option<AccountState> {
        self.inner.cache.lock().unwrap().account_state
    }

    pub fn last_block_height(&self) -> Option<u64> {
        self.inner.cache.lock().unwrap().last_block_height
    }

    pub fn start(&self) {
        self.inner.set_sync_state(SyncState::Syncing { progress: None });
        self.inner.syncer.start();
    }

    pub fn stop(&self) {
        self.inner.syncer.stop();
    }

    /// Manual resync: nothing while the syncer is preparing, both refreshes
    /// while it is ready, a restart otherwise.
    pub fn refresh(&self) {
        match self.inner.syncer.state() {
            SyncerState::Preparing => (),
            SyncerState::Ready => {
                self.inner.refresh_account();
                self.inner.refresh_block_height();
            }
            SyncerState::NotReady(_) => self.inner.syncer.start(),
        }
    }

    /// Broadcasts a signed transaction encoded by `encoder` and returns its
    /// local record.
    pub async fn send(
        &self,
        encoder: &dyn TransactionEncoder,
        transaction: RawTransaction,
        signature: Signature,
    ) -> Result<Transaction, Error> {
        let encoded = encoder.encode(&transaction, &signature);
        let hash = keccak256(&encoded);
        let reported = self
            .inner
            .syncer
            .fetch(methods::send_raw_transaction(&encoded))
            .await?;
        if reported != hash {
            tracing::warn!(%hash, %reported, "node reported a different transaction hash");
        }
        tracing::debug!(%hash, nonce = transaction.nonce, "sent transaction");

        Ok(Transaction {
            hash,
            nonce: transaction.nonce,
            from: self.inner.address,
            to: transaction.to,
            value: transaction.value,
            gas_price: transaction.gas_price,
            gas_limit: transaction.gas_limit,
            input: transaction.data,
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|elapsed| elapsed.as_secs())
                .unwrap_or_default(),
        })
    }

    pub async fn transaction(
        &self,
        hash: B256,
    ) -> Result<Option<alloy::rpc::types::Transaction>, Error> {
        self.fetch(methods::get_transaction_by_hash(hash)).await
    }

    pub async fn transaction_receipt(&self, hash: B256) -> Result<Option<TransactionReceipt>, Error> {
        self.fetch(methods::get_transaction_receipt(hash)).await
    }

    pub async fn get_storage_at(
        &self,
        contract: Address,
        position: B256,
        block: BlockNumberOrTag,
    ) -> Result<Bytes, Error> {
        self.fetch(methods::get_storage_at(contract, position.as_slice(), block))
            .await
    }

    pub async fn call(
        &self,
        contract: Address,
        data: &[u8],
        block: BlockNumberOrTag,
    ) -> Result<Bytes, Error> {
        self.fetch(methods::call(contract, data, block)).await
    }

    /// Estimates gas for a transaction sent from the façade's address.
    pub async fn estimate_gas(
        &self,
        to: Option<Address>,
        value: Option<U256>,
        gas_limit: Option<u64>,
        gas_price: GasPrice,
        data: Option<Bytes>,
    ) -> Result<u64, Error> {
        self.fetch(methods::estimate_gas(EstimateGas {
            from: self.inner.address,
            to,
            value,
            gas_limit,
            gas_price: Some(gas_price),
            data,
        }))
        .await
    }

    pub async fn get_block(&self, number: u64) -> Result<Option<Block>, Error> {
        self.fetch(methods::get_block_by_number(number)).await
    }

    pub async fn get_logs(&self, filter: LogFilter) -> Result<Vec<Log>, Error> {
        self.fetch(methods::get_logs(filter)).await
    }

    /// Pass-through for requests the façade has no dedicated method for.
    pub async fn fetch<T: Send + 'static>(&self, request: RpcRequest<T>) -> Result<T, Error> {
        self.inner.syncer.fetch(request).await
    }
}

impl Drop for Blockchain {
    fn drop(&mut self) {
        self.listener.abort();
        self.inner.refreshes.lock().unwrap().cancel();
    }
}

#[async_trait::async_trait]
impl NonceSource for Blockchain {
    async fn nonce(&self, block: BlockNumberOrTag) -> Result<u64, Error> {
        self.fetch(methods::get_transaction_count(self.inner.address, block))
            .await
    }
}

async fn listen(inner: Weak<Inner>, mut events: mpsc::UnboundedReceiver<SyncerEvent>) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        match event {
            SyncerEvent::State(state) => inner.on_syncer_state(&state),
            SyncerEvent::BlockHeight(height) => inner.on_block_height(height),
        }
    }
}

impl Inner {
    fn on_syncer_state(self: &Arc<Self>, state: &SyncerState) {
        let Transition {
            state,
            before,
            after,
        } = transition(state);
        {
            // Cancelling and publishing under the cache lock keeps a
            // finishing refresh from overwriting the new state.
            let mut cache = self.cache.lock().unwrap();
            for effect in before {
                self.run_effect(effect);
            }
            self.publish_sync_state(&mut cache, state);
        }
        for effect in after {
            self.run_effect(effect);
        }
    }

    fn run_effect(self: &Arc<Self>, effect: Effect) {
        match effect {
            Effect::RefreshAccount => self.refresh_account(),
            Effect::RefreshBlockHeight => self.refresh_block_height(),
            Effect::CancelRefreshes => {
                let mut refreshes = self.refreshes.lock().unwrap();
                refreshes.cancel();
                *refreshes = CancellationToken::new();
            }
        }
    }

    fn set_sync_state(&self, state: SyncState) {
        let mut cache = self.cache.lock().unwrap();
        self.publish_sync_state(&mut cache, state);
    }

    fn publish_sync_state(&self, cache: &mut Cache, state: SyncState) {
        if cache.sync_state == state {
            return;
        }
        tracing::debug!(from = %cache.sync_state, to = %state, "sync state changed");
        cache.sync_state = state.clone();
        self.delegate.emit(BlockchainEvent::SyncState(state));
    }

    fn on_block_height(&self, height: u64) {
        let mut cache = self.cache.lock().unwrap();
        cache.last_block_height = Some(height);
        self.storage.save_last_block_height(height);
        self.delegate.emit(BlockchainEvent::BlockHeight(height));
    }

    /// Fetches balance and nonce concurrently; the pair is committed only if
    /// both arrive.
    fn refresh_account(self: &Arc<Self>) {
        let token = self.refreshes.lock().unwrap().child_token();
        let previous = std::mem::replace(
            &mut *self.account_refresh.lock().unwrap(),
            token.clone(),
        );
        previous.cancel();
        let syncer = self.syncer.clone();
        let address = self.address;
        let inner = Arc::downgrade(self);
        let task = async move {
            let balance = syncer.fetch_cancellable(
                methods::get_balance(address, BlockNumberOrTag::Latest),
                token.clone(),
            );
            let nonce = syncer.fetch_cancellable(
                methods::get_transaction_count(address, BlockNumberOrTag::Latest),
                token.clone(),
            );
            let result = tokio::try_join!(balance, nonce);
            if let Some(inner) = inner.upgrade() {
                inner.commit_account(result, &token);
            }
        };
        tokio::spawn(task.instrument(tracing::info_span!("account_refresh")));
    }

    fn commit_account(&self, result: Result<(U256, u64), Error>, token: &CancellationToken) {
        let mut cache = self.cache.lock().unwrap();
        if token.is_cancelled() {
            return;
        }
        match result {
            Ok((balance, nonce)) => {
                let state = AccountState { balance, nonce };
                cache.account_state = Some(state);
                self.storage.save_account_state(state);
                self.delegate.emit(BlockchainEvent::AccountState(state));
                self.publish_sync_state(&mut cache, SyncState::Synced);
            }
            Err(Error::Cancelled) => (),
            Err(err) => {
                tracing::warn!(?err, "failed to refresh account state");
                self.publish_sync_state(&mut cache, SyncState::NotSynced(SyncError::Request(err)));
            }
        }
    }

    fn refresh_block_height(self: &Arc<Self>) {
        let token = self.refreshes.lock().unwrap().clone();
        let syncer = self.syncer.clone();
        let inner = Arc::downgrade(self);
        let task = async move {
            match syncer
                .fetch_cancellable(methods::block_number(), token)
                .await
            {
                Ok(height) => {
                    if let Some(inner) = inner.upgrade() {
                        inner.on_block_height(height);
                    }
                }
                Err(Error::Cancelled) => (),
                Err(err) => tracing::warn!(?err, "failed to refresh block height"),
            }
        };
        tokio::spawn(task.instrument(tracing::info_span!("block_height_refresh")));
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            mock::{MockTransport, TestSyncer},
            storage::InMemoryStorage,
        },
        serde_json::json,
        std::{
            sync::atomic::{AtomicU64, Ordering},
            time::Duration,
        },
    };

    const ADDRESS: Address = Address::repeat_byte(0xaa);

    struct Setup {
        syncer: Arc<TestSyncer>,
        storage: Arc<InMemoryStorage>,
        blockchain: Blockchain,
        events: mpsc::UnboundedReceiver<BlockchainEvent>,
    }

    fn setup(transport: MockTransport) -> Setup {
        let syncer = Arc::new(TestSyncer::new(transport));
        let storage = Arc::new(InMemoryStorage::default());
        storage.save_account_state(AccountState {
            balance: U256::from(1),
            nonce: 1,
        });
        let blockchain = Blockchain::new(ADDRESS, syncer.clone(), storage.clone());
        let events = blockchain.events();
        Setup {
            syncer,
            storage,
            blockchain,
            events,
        }
    }

    /// Node answering balance 100, nonce 3 and block 16, except for the
    /// methods listed in `failing`.
    fn node(failing: &'static [&'static str]) -> MockTransport {
        let transport = MockTransport::new();
        transport
            .mock()
            .expect_execute()
            .returning(move |method, _| {
                if failing.iter().any(|failing| *failing == method) {
                    return Err(Error::Transport(format!("{method} timed out")));
                }
                match method.as_str() {
                    "eth_getBalance" => Ok(json!("0x64")),
                    "eth_getTransactionCount" => Ok(json!("0x3")),
                    "eth_blockNumber" => Ok(json!("0x10")),
                    other => panic!("unexpected call {other}"),
                }
            });
        transport
    }

    /// Collects events until the sync state settles on something other than
    /// `Syncing`, and until the block height arrived.
    async fn settle(events: &mut mpsc::UnboundedReceiver<BlockchainEvent>) -> Vec<BlockchainEvent> {
        let mut seen = Vec::new();
        loop {
            let event = events.recv().await.unwrap();
            seen.push(event);
            let settled = seen.iter().any(|event| {
                matches!(event, BlockchainEvent::SyncState(state) if !state.is_syncing())
            });
            let height = seen
                .iter()
                .any(|event| matches!(event, BlockchainEvent::BlockHeight(_)));
            if settled && height {
                return seen;
            }
        }
    }

    /// Node whose balance answer is whatever `balance` holds when the call is
    /// made.
    fn node_with_balance(balance: Arc<AtomicU64>) -> MockTransport {
        let transport = MockTransport::new();
        transport
            .mock()
            .expect_execute()
            .returning(move |method, _| match method.as_str() {
                "eth_getBalance" => Ok(json!(format!("0x{:x}", balance.load(Ordering::SeqCst)))),
                "eth_getTransactionCount" => Ok(json!("0x3")),
                "eth_blockNumber" => Ok(json!("0x10")),
                other => panic!("unexpected call {other}"),
            });
        transport
    }

    fn drain(events: &mut mpsc::UnboundedReceiver<BlockchainEvent>) -> Vec<BlockchainEvent> {
        std::iter::from_fn(|| events.try_recv().ok()).collect()
    }

    #[test]
    fn transition_table() {
        let preparing = transition(&SyncerState::Preparing);
        assert_eq!(preparing.state, SyncState::Syncing { progress: None });
        assert!(preparing.before.is_empty() && preparing.after.is_empty());

        let ready = transition(&SyncerState::Ready);
        assert_eq!(ready.state, SyncState::Syncing { progress: None });
        assert_eq!(
            ready.after,
            vec![Effect::RefreshAccount, Effect::RefreshBlockHeight]
        );

        let lost = transition(&SyncerState::NotReady(SyncError::NoNetworkConnection));
        assert_eq!(
            lost.state,
            SyncState::NotSynced(SyncError::NoNetworkConnection)
        );
        assert_eq!(lost.before, vec![Effect::CancelRefreshes]);
    }

    #[tokio::test]
    async fn ready_syncer_refreshes_account_and_height() {
        let mut setup = setup(node(&[]));
        setup.syncer.set_state(SyncerState::Ready);

        let events = settle(&mut setup.events).await;
        assert_eq!(
            events[0],
            BlockchainEvent::SyncState(SyncState::Syncing { progress: None })
        );
        let fresh = AccountState {
            balance: U256::from(100),
            nonce: 3,
        };
        assert!(events.contains(&BlockchainEvent::AccountState(fresh)));
        assert!(events.contains(&BlockchainEvent::BlockHeight(16)));
        assert!(events.contains(&BlockchainEvent::SyncState(SyncState::Synced)));

        assert_eq!(setup.blockchain.sync_state(), SyncState::Synced);
        assert_eq!(setup.blockchain.account_state(), Some(fresh));
        assert_eq!(setup.blockchain.last_block_height(), Some(16));
        assert_eq!(setup.storage.account_state(), Some(fresh));
        assert_eq!(setup.storage.last_block_height(), Some(16));
    }

    #[tokio::test]
    async fn partial_account_refresh_keeps_previous_state() {
        let mut setup = setup(node(&["eth_getTransactionCount"]));
        setup.syncer.set_state(SyncerState::Ready);

        let events = settle(&mut setup.events).await;
        assert!(
            !events
                .iter()
                .any(|event| matches!(event, BlockchainEvent::AccountState(_)))
        );
        assert_eq!(
            setup.blockchain.sync_state(),
            SyncState::NotSynced(SyncError::Request(Error::Transport(
                "eth_getTransactionCount timed out".into()
            )))
        );
        let previous = AccountState {
            balance: U256::from(1),
            nonce: 1,
        };
        assert_eq!(setup.blockchain.account_state(), Some(previous));
        // The block height refresh is independent of the account refresh.
        assert_eq!(setup.blockchain.last_block_height(), Some(16));
    }

    #[tokio::test]
    async fn not_ready_syncer_reports_cause() {
        let mut setup = setup(node(&[]));
        setup.syncer.set_state(SyncerState::Preparing);
        assert_eq!(
            setup.events.recv().await,
            Some(BlockchainEvent::SyncState(SyncState::Syncing { progress: None }))
        );

        setup
            .syncer
            .set_state(SyncerState::NotReady(SyncError::Disconnected("eof".into())));
        assert_eq!(
            setup.events.recv().await,
            Some(BlockchainEvent::SyncState(SyncState::NotSynced(
                SyncError::Disconnected("eof".into())
            )))
        );
    }

    #[tokio::test]
    async fn syncer_block_heights_are_forwarded() {
        let mut setup = setup(node(&[]));
        setup.syncer.emit_block_height(42);
        assert_eq!(
            setup.events.recv().await,
            Some(BlockchainEvent::BlockHeight(42))
        );
        assert_eq!(setup.storage.last_block_height(), Some(42));
    }

    #[tokio::test]
    async fn refresh_depends_on_syncer_state() {
        let setup = setup(node(&[]));
        setup.blockchain.refresh();
        assert_eq!(setup.syncer.starts(), 1);

        setup.syncer.set_state(SyncerState::Preparing);
        setup.blockchain.refresh();
        assert_eq!(setup.syncer.starts(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn losing_the_syncer_discards_in_flight_refresh() {
        let transport = node(&[]);
        transport.set_latency(Duration::from_secs(10));
        let mut setup = setup(transport);

        setup.syncer.set_state(SyncerState::Ready);
        tokio::time::sleep(Duration::from_secs(1)).await;
        setup
            .syncer
            .set_state(SyncerState::NotReady(SyncError::Disconnected("eof".into())));
        tokio::time::sleep(Duration::from_secs(20)).await;

        let lost = SyncState::NotSynced(SyncError::Disconnected("eof".into()));
        assert_eq!(
            drain(&mut setup.events),
            vec![
                BlockchainEvent::SyncState(SyncState::Syncing { progress: None }),
                BlockchainEvent::SyncState(lost.clone()),
            ]
        );
        let previous = AccountState {
            balance: U256::from(1),
            nonce: 1,
        };
        assert_eq!(setup.blockchain.sync_state(), lost);
        assert_eq!(setup.blockchain.account_state(), Some(previous));
        assert_eq!(setup.storage.account_state(), Some(previous));
        assert_eq!(setup.blockchain.last_block_height(), None);
    }

    #[tokio::test]
    async fn refresh_while_ready_refetches_account() {
        let balance = Arc::new(AtomicU64::new(100));
        let mut setup = setup(node_with_balance(balance.clone()));
        setup.syncer.set_state(SyncerState::Ready);
        settle(&mut setup.events).await;

        balance.store(250, Ordering::SeqCst);
        setup.blockchain.refresh();
        let fresh = AccountState {
            balance: U256::from(250),
            nonce: 3,
        };
        loop {
            match setup.events.recv().await.unwrap() {
                BlockchainEvent::AccountState(state) if state == fresh => break,
                _ => continue,
            }
        }
        assert_eq!(setup.blockchain.account_state(), Some(fresh));
        assert_eq!(setup.storage.account_state(), Some(fresh));
        assert_eq!(setup.blockchain.sync_state(), SyncState::Synced);
    }

    #[tokio::test(start_paused = true)]
    async fn newer_account_refresh_wins_over_slower_older_one() {
        let balance = Arc::new(AtomicU64::new(100));
        let transport = node_with_balance(balance.clone());
        let mut setup = setup(transport.clone());
        setup.syncer.set_state(SyncerState::Ready);
        settle(&mut setup.events).await;

        transport.set_latency(Duration::from_secs(10));
        balance.store(200, Ordering::SeqCst);
        setup.blockchain.refresh();
        tokio::time::sleep(Duration::from_millis(1)).await;

        transport.set_latency(Duration::from_secs(1));
        balance.store(300, Ordering::SeqCst);
        setup.blockchain.refresh();
        tokio::time::sleep(Duration::from_secs(20)).await;

        let newest = AccountState {
            balance: U256::from(300),
            nonce: 3,
        };
        let updates: Vec<_> = drain(&mut setup.events)
            .into_iter()
            .filter(|event| matches!(event, BlockchainEvent::AccountState(_)))
            .collect();
        assert_eq!(updates, vec![BlockchainEvent::AccountState(newest)]);
        assert_eq!(setup.blockchain.account_state(), Some(newest));
        assert_eq!(setup.storage.account_state(), Some(newest));
    }

    #[tokio::test]
    async fn start_and_stop_drive_the_syncer() {
        let mut setup = setup(node(&[]));
        setup.blockchain.start();
        assert_eq!(
            setup.events.recv().await,
            Some(BlockchainEvent::SyncState(SyncState::Syncing { progress: None }))
        );
        assert_eq!(setup.syncer.starts(), 1);

        setup.blockchain.stop();
        assert_eq!(setup.syncer.stops(), 1);
        assert_eq!(setup.blockchain.source(), "RPC test");
    }

    #[tokio::test]
    async fn send_forwards_encoded_transaction() {
        let encoded = Bytes::from_static(&[0x02, 0xf8, 0x01]);
        let hash = keccak256(&encoded);

        let transport = MockTransport::new();
        transport
            .mock()
            .expect_execute()
            .withf(|method, params| {
                method == "eth_sendRawTransaction" && params == &vec![json!("0x02f801")]
            })
            .times(1)
            .returning(move |_, _| Ok(json!(hash)));
        let mut encoder = MockTransactionEncoder::new();
        encoder.expect_encode().returning({
            let encoded = encoded.clone();
            move |_, _| encoded.clone()
        });
        let setup = setup(transport);

        let raw = RawTransaction {
            gas_price: GasPrice::Legacy { gas_price: 1 },
            gas_limit: 21_000,
            to: Address::repeat_byte(0xbb),
            value: U256::from(5),
            data: Bytes::new(),
            nonce: 7,
        };
        let signature = Signature {
            v: 27,
            r: B256::repeat_byte(1),
            s: B256::repeat_byte(2),
        };
        let transaction = setup
            .blockchain
            .send(&encoder, raw, signature)
            .await
            .unwrap();
        assert_eq!(transaction.hash, hash);
        assert_eq!(transaction.from, ADDRESS);
        assert_eq!(transaction.nonce, 7);
        assert_eq!(transaction.gas_limit, 21_000);
    }

    #[tokio::test]
    async fn operations_delegate_to_syncer() {
        let transport = MockTransport::new();
        transport
            .mock()
            .expect_execute()
            .returning(|method, params| match method.as_str() {
                "eth_getTransactionReceipt" => Ok(json!(null)),
                "eth_getTransactionCount" => {
                    assert_eq!(params[1], json!("pending"));
                    Ok(json!("0x9"))
                }
                "eth_estimateGas" => {
                    assert_eq!(params[0]["from"], json!(ADDRESS));
                    assert_eq!(params[0]["gasPrice"], json!("0x2"));
                    Ok(json!("0x5208"))
                }
                "eth_call" => Ok(json!("0xdeadbeef")),
                other => panic!("unexpected call {other}"),
            });
        let setup = setup(transport);
        let blockchain = &setup.blockchain;

        assert_eq!(
            blockchain.transaction_receipt(B256::ZERO).await.map(|receipt| receipt.is_none()),
            Ok(true)
        );
        assert_eq!(blockchain.nonce(BlockNumberOrTag::Pending).await, Ok(9));
        assert_eq!(
            blockchain
                .estimate_gas(
                    Some(Address::ZERO),
                    None,
                    None,
                    GasPrice::Legacy { gas_price: 2 },
                    None
                )
                .await,
            Ok(21_000)
        );
        assert_eq!(
            blockchain
                .call(Address::ZERO, &[], BlockNumberOrTag::Latest)
                .await,
            Ok(Bytes::from_static(&[0xde, 0xad, 0xbe, 0xef]))
        );
    }
}
