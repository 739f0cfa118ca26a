//! Test doubles for the transport, socket and syncer seams.

use {
    crate::{
        error::Error,
        jsonrpc::{RequestId, RpcCall, RpcResponse},
        socket::{RpcSocket, SocketEvent},
        syncer::{RpcSyncer, StateCell, SyncerEvent, SyncerState},
        transport::Transport,
    },
    serde_json::Value,
    std::{
        fmt::{self, Debug, Formatter},
        sync::{
            Arc,
            Mutex,
            MutexGuard,
            atomic::{AtomicU64, AtomicUsize, Ordering},
        },
        time::Duration,
    },
    tokio::sync::mpsc,
};

/// An intermediate trait used for `mockall` to automatically generate a mock
/// transport for us.
#[mockall::automock]
pub trait MockableTransport {
    /// `Err(Error::Rpc(..))` is delivered as a node fault response, any other
    /// error as a transport failure.
    fn execute(&self, method: String, params: Vec<Value>) -> Result<Value, Error>;
}

#[derive(Clone, Default)]
pub struct MockTransport(Arc<Inner>);

#[derive(Default)]
struct Inner {
    inner: Mutex<MockMockableTransport>,
    current_id: AtomicU64,
    latency: Mutex<Duration>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mock(&self) -> MutexGuard<'_, MockMockableTransport> {
        self.0.inner.lock().unwrap()
    }

    /// Delays every response issued from now on. The mock is consulted when
    /// the call is sent, the answer arrives `latency` later.
    pub fn set_latency(&self, latency: Duration) {
        *self.0.latency.lock().unwrap() = latency;
    }
}

impl Debug for MockTransport {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.debug_struct("MockTransport").finish()
    }
}

#[async_trait::async_trait]
impl Transport for MockTransport {
    fn source(&self) -> String {
        "mock".to_string()
    }

    async fn send(&self, call: RpcCall) -> Result<RpcResponse, Error> {
        let id = self.0.current_id.fetch_add(1, Ordering::SeqCst) + 1;
        let result = self.mock().execute(call.method.into_owned(), call.params);
        let latency = *self.0.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        match result {
            Ok(Value::Null) => Ok(RpcResponse::Success { id, result: None }),
            Ok(value) => Ok(RpcResponse::Success {
                id,
                result: Some(value),
            }),
            Err(Error::Rpc(fault)) => Ok(RpcResponse::Error { id, fault }),
            Err(err) => Err(err),
        }
    }
}

/// In-memory socket. Frames the syncer sends are recorded, events are pushed
/// by the test through [`TestSocket::emit`].
#[derive(Clone, Default)]
pub struct TestSocket(Arc<SocketInner>);

#[derive(Default)]
struct SocketInner {
    events: Mutex<Option<mpsc::UnboundedSender<SocketEvent>>>,
    sent: Mutex<Vec<Value>>,
    starts: AtomicUsize,
    stops: AtomicUsize,
}

impl TestSocket {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: SocketEvent) {
        if let Some(events) = self.0.events.lock().unwrap().as_ref() {
            let _ = events.send(event);
        }
    }

    /// Pushes a raw frame as if the node sent it.
    pub fn receive(&self, frame: Value) {
        self.emit(SocketEvent::Message(frame.to_string()));
    }

    /// Answers the request with `id` with a successful result.
    pub fn respond(&self, id: RequestId, result: Value) {
        self.receive(serde_json::json!({ "jsonrpc": "2.0", "id": id, "result": result }));
    }

    /// Every frame sent so far, parsed.
    pub fn sent(&self) -> Vec<Value> {
        self.0.sent.lock().unwrap().clone()
    }

    /// Id of the last request sent for `method`.
    pub fn last_id(&self, method: &str) -> Option<RequestId> {
        self.sent()
            .iter()
            .rev()
            .find(|frame| frame["method"] == method)
            .and_then(|frame| frame["id"].as_u64())
    }

    pub fn starts(&self) -> usize {
        self.0.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.0.stops.load(Ordering::SeqCst)
    }
}

impl RpcSocket for TestSocket {
    fn source(&self) -> String {
        "test socket".to_string()
    }

    fn start(&self, events: mpsc::UnboundedSender<SocketEvent>) {
        self.0.starts.fetch_add(1, Ordering::SeqCst);
        *self.0.events.lock().unwrap() = Some(events);
    }

    fn stop(&self) {
        self.0.stops.fetch_add(1, Ordering::SeqCst);
    }

    fn send(&self, frame: String) -> Result<(), Error> {
        let frame = serde_json::from_str(&frame).map_err(|err| Error::Transport(err.to_string()))?;
        self.0.sent.lock().unwrap().push(frame);
        Ok(())
    }
}

/// A syncer whose state is driven by the test. Calls go to a
/// [`MockTransport`].
pub struct TestSyncer {
    transport: MockTransport,
    cell: StateCell,
    starts: AtomicUsize,
    stops: AtomicUsize,
}

impl TestSyncer {
    pub fn new(transport: MockTransport) -> Self {
        Self {
            transport,
            cell: StateCell::new("test"),
            starts: Default::default(),
            stops: Default::default(),
        }
    }

    pub fn set_state(&self, state: SyncerState) {
        self.cell.set(state);
    }

    pub fn emit_block_height(&self, height: u64) {
        self.cell.emit(SyncerEvent::BlockHeight(height));
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Transport for TestSyncer {
    fn source(&self) -> String {
        "test".to_string()
    }

    async fn send(&self, call: RpcCall) -> Result<RpcResponse, Error> {
        self.transport.send(call).await
    }
}

impl RpcSyncer for TestSyncer {
    fn state(&self) -> SyncerState {
        self.cell.get()
    }

    fn events(&self) -> mpsc::UnboundedReceiver<SyncerEvent> {
        self.cell.register()
    }

    fn start(&self) {
        self.starts.fetch_add(1, Ordering::SeqCst);
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}
