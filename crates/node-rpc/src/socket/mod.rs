//! Syncer over one persistent connection.
//!
//! A single worker task owns the table of in-flight requests and the table of
//! subscription handlers. Callers, the socket and the syncer lifecycle only
//! talk to it through channels, so responses, notifications, cancellations
//! and disconnects are applied one at a time in the order the worker sees
//! them.
//!
//! Requests issued while the syncer is not [`SyncerState::Ready`] fail right
//! away with [`Error::NotConnected`]; nothing is queued for a future
//! connection.

pub mod ws;

use {
    crate::{
        error::{Error, ProtocolError},
        instrumentation::Metrics,
        jsonrpc::{Incoming, RequestId, RpcCall, RpcResponse, RpcSubscription, subscription},
        syncer::{RpcSyncer, StateCell, SyncError, SyncerEvent, SyncerState},
        transport::Transport,
    },
    serde_json::Value,
    std::{
        collections::HashMap,
        sync::{
            Arc,
            atomic::{AtomicU64, Ordering},
        },
    },
    tokio::sync::{mpsc, oneshot},
    tracing::Instrument,
};

/// Lifecycle and traffic of the underlying connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SocketEvent {
    Connecting,
    Connected,
    Disconnected(String),
    Message(String),
}

/// A bidirectional text connection to a node.
pub trait RpcSocket: Send + Sync + 'static {
    fn source(&self) -> String;

    /// Opens the connection and keeps reporting to `events` until
    /// [`RpcSocket::stop`] is called.
    fn start(&self, events: mpsc::UnboundedSender<SocketEvent>);

    fn stop(&self);

    /// Queues a text frame on the open connection.
    fn send(&self, frame: String) -> Result<(), Error>;
}

/// Connection level inputs of the state machine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Input {
    Start,
    Stop,
    Connecting,
    Connected,
    Disconnected(String),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Effect {
    OpenSocket,
    CloseSocket,
    /// Fails every pending request with the error and drops all
    /// subscription handlers.
    FailPending(Error),
    SubscribeNewHeads,
}

/// Result of one transition. `before` effects run before the new state is
/// published, `after` effects once it is.
#[derive(Clone, Debug, PartialEq)]
pub struct Transition {
    pub state: SyncerState,
    pub before: Vec<Effect>,
    pub after: Vec<Effect>,
}

pub fn transition(state: &SyncerState, input: Input) -> Transition {
    let stopped = *state == SyncerState::NotReady(SyncError::NotStarted);
    let unchanged = || Transition {
        state: state.clone(),
        before: vec![],
        after: vec![],
    };
    match input {
        Input::Start if stopped => Transition {
            state: SyncerState::Preparing,
            before: vec![],
            after: vec![Effect::OpenSocket],
        },
        Input::Start => unchanged(),
        Input::Stop => Transition {
            state: SyncerState::NotReady(SyncError::NotStarted),
            before: vec![
                Effect::CloseSocket,
                Effect::FailPending(Error::TransportClosed("syncer stopped".to_string())),
            ],
            after: vec![],
        },
        // An explicit stop wins over whatever the socket still reports.
        _ if stopped => unchanged(),
        Input::Connecting => Transition {
            state: SyncerState::Preparing,
            before: vec![],
            after: vec![],
        },
        Input::Connected => Transition {
            state: SyncerState::Ready,
            before: vec![],
            after: vec![Effect::SubscribeNewHeads],
        },
        Input::Disconnected(reason) => Transition {
            state: SyncerState::NotReady(SyncError::Disconnected(reason.clone())),
            before: vec![Effect::FailPending(Error::TransportClosed(reason))],
            after: vec![],
        },
    }
}

type Responder = oneshot::Sender<Result<RpcResponse, Error>>;
type Handler = Box<dyn FnMut(Value) + Send>;

enum Completion {
    Call(Responder),
    /// On success the handler is registered under the returned subscription
    /// id.
    Subscribe {
        responder: Option<Responder>,
        handler: Handler,
    },
}

impl Completion {
    fn fail(self, err: Error) {
        let responder = match self {
            Self::Call(responder) => Some(responder),
            Self::Subscribe { responder, .. } => responder,
        };
        if let Some(responder) = responder {
            let _ = responder.send(Err(err));
        }
    }
}

enum Command {
    Lifecycle(Input),
    Send {
        id: RequestId,
        call: RpcCall,
        completion: Completion,
    },
    Cancel(RequestId),
    PendingCount(oneshot::Sender<usize>),
}

pub struct SocketSyncer {
    source: String,
    cell: Arc<StateCell>,
    ids: Arc<AtomicU64>,
    commands: mpsc::UnboundedSender<Command>,
}

impl SocketSyncer {
    /// Spawns the worker owning the request tables. Must be called from
    /// within a tokio runtime.
    pub fn new(socket: impl RpcSocket) -> Self {
        let socket: Arc<dyn RpcSocket> = Arc::new(socket);
        let cell = Arc::new(StateCell::new("socket"));
        let ids = Arc::new(AtomicU64::new(0));
        let (commands, command_receiver) = mpsc::unbounded_channel();
        let (socket_events, socket_event_receiver) = mpsc::unbounded_channel();

        let worker = Worker {
            socket: socket.clone(),
            cell: cell.clone(),
            ids: ids.clone(),
            commands: command_receiver,
            socket_events: socket_event_receiver,
            socket_sender: socket_events,
            pending: HashMap::new(),
            subscriptions: HashMap::new(),
            metrics: Metrics::get(),
        };
        tokio::spawn(worker.run().instrument(tracing::info_span!("socket_worker")));

        Self {
            source: format!("WebSocket {}", socket.source()),
            cell,
            ids,
            commands,
        }
    }

    /// Establishes a subscription and returns the stream of its parsed
    /// notifications. The stream ends when the connection goes away.
    pub async fn subscribe<T: Send + 'static>(
        &self,
        subscription: RpcSubscription<T>,
    ) -> Result<mpsc::UnboundedReceiver<Result<T, ProtocolError>>, Error> {
        let request = subscription.subscribe_request();
        let (sender, receiver) = mpsc::unbounded_channel();
        let handler: Handler = Box::new(move |value| {
            let _ = sender.send(subscription.parse(value));
        });
        let response = self
            .execute(request.call().clone(), Some(handler))
            .await?;
        let id = request.parse_response(response)?;
        tracing::debug!(%id, "subscribed");
        Ok(receiver)
    }

    /// Number of requests waiting for a response.
    pub async fn pending_requests(&self) -> usize {
        let (sender, receiver) = oneshot::channel();
        if self.commands.send(Command::PendingCount(sender)).is_err() {
            return 0;
        }
        receiver.await.unwrap_or_default()
    }

    fn lifecycle(&self, input: Input) {
        let _ = self.commands.send(Command::Lifecycle(input));
    }

    async fn execute(&self, call: RpcCall, handler: Option<Handler>) -> Result<RpcResponse, Error> {
        let id = self.ids.fetch_add(1, Ordering::SeqCst) + 1;
        let (responder, response) = oneshot::channel();
        let completion = match handler {
            None => Completion::Call(responder),
            Some(handler) => Completion::Subscribe {
                responder: Some(responder),
                handler,
            },
        };
        self.commands
            .send(Command::Send {
                id,
                call,
                completion,
            })
            .map_err(|_| Error::TransportClosed("socket worker gone".to_string()))?;

        // Dropping the future before the response arrives removes the
        // request from the pending table.
        let guard = scopeguard::guard(self.commands.clone(), move |commands| {
            let _ = commands.send(Command::Cancel(id));
        });
        let result = response
            .await
            .unwrap_or_else(|_| Err(Error::TransportClosed("request dropped".to_string())));
        scopeguard::ScopeGuard::into_inner(guard);
        result
    }
}

#[async_trait::async_trait]
impl Transport for SocketSyncer {
    fn source(&self) -> String {
        self.source.clone()
    }

    async fn send(&self, call: RpcCall) -> Result<RpcResponse, Error> {
        self.execute(call, None).await
    }
}

impl RpcSyncer for SocketSyncer {
    fn state(&self) -> SyncerState {
        self.cell.get()
    }

    fn events(&self) -> mpsc::UnboundedReceiver<SyncerEvent> {
        self.cell.register()
    }

    fn start(&self) {
        self.lifecycle(Input::Start);
    }

    fn stop(&self) {
        self.lifecycle(Input::Stop);
    }
}

struct Worker {
    socket: Arc<dyn RpcSocket>,
    cell: Arc<StateCell>,
    ids: Arc<AtomicU64>,
    commands: mpsc::UnboundedReceiver<Command>,
    socket_events: mpsc::UnboundedReceiver<SocketEvent>,
    socket_sender: mpsc::UnboundedSender<SocketEvent>,
    pending: HashMap<RequestId, Completion>,
    subscriptions: HashMap<String, Handler>,
    metrics: &'static Metrics,
}

impl Worker {
    async fn run(mut self) {
        loop {
            // Socket traffic first so responses that already arrived are
            // delivered before anything queued after them.
            tokio::select! {
                biased;
                Some(event) = self.socket_events.recv() => self.on_socket(event),
                command = self.commands.recv() => match command {
                    Some(command) => self.on_command(command),
                    None => break,
                },
            }
        }
        tracing::debug!("syncer dropped, closing socket");
        self.socket.stop();
        self.fail_pending(Error::TransportClosed("syncer dropped".to_string()));
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Lifecycle(input) => self.apply(input),
            Command::Send {
                id,
                call,
                completion,
            } => self.dispatch(id, call, completion),
            Command::Cancel(id) => {
                if let Some(completion) = self.pending.remove(&id) {
                    tracing::debug!(%id, "request cancelled");
                    completion.fail(Error::Cancelled);
                    self.update_gauge();
                }
            }
            Command::PendingCount(reply) => {
                let _ = reply.send(self.pending.len());
            }
        }
    }

    fn on_socket(&mut self, event: SocketEvent) {
        match event {
            SocketEvent::Message(text) => self.on_message(&text),
            SocketEvent::Connecting => self.apply(Input::Connecting),
            SocketEvent::Connected => self.apply(Input::Connected),
            SocketEvent::Disconnected(reason) => self.apply(Input::Disconnected(reason)),
        }
    }

    fn apply(&mut self, input: Input) {
        let Transition {
            state,
            before,
            after,
        } = transition(&self.cell.get(), input);
        for effect in before {
            self.run_effect(effect);
        }
        self.cell.set(state);
        for effect in after {
            self.run_effect(effect);
        }
    }

    fn run_effect(&mut self, effect: Effect) {
        match effect {
            Effect::OpenSocket => self.socket.start(self.socket_sender.clone()),
            Effect::CloseSocket => self.socket.stop(),
            Effect::FailPending(err) => self.fail_pending(err),
            Effect::SubscribeNewHeads => self.subscribe_new_heads(),
        }
    }

    fn fail_pending(&mut self, err: Error) {
        for (_, completion) in self.pending.drain() {
            completion.fail(err.clone());
        }
        self.subscriptions.clear();
        self.update_gauge();
    }

    fn dispatch(&mut self, id: RequestId, call: RpcCall, completion: Completion) {
        if !self.cell.get().is_ready() {
            completion.fail(Error::NotConnected);
            return;
        }
        tracing::trace!(%id, method = %call.method, "sending request");
        if let Err(err) = self.socket.send(call.to_json(id)) {
            completion.fail(err);
            return;
        }
        self.pending.insert(id, completion);
        self.update_gauge();
    }

    fn subscribe_new_heads(&mut self) {
        let id = self.ids.fetch_add(1, Ordering::SeqCst) + 1;
        let subscription = subscription::new_head_numbers();
        let call = subscription.subscribe_request().call().clone();
        let cell = self.cell.clone();
        let handler: Handler = Box::new(move |value| match subscription.parse(value) {
            Ok(height) => cell.emit(SyncerEvent::BlockHeight(height)),
            Err(err) => tracing::error!(?err, "failed to decode new head"),
        });
        self.dispatch(
            id,
            call,
            Completion::Subscribe {
                responder: None,
                handler,
            },
        );
    }

    fn on_message(&mut self, text: &str) {
        match Incoming::from_str(text) {
            Ok(Incoming::Response(response)) => {
                let id = response.id();
                match self.pending.remove(&id) {
                    Some(completion) => {
                        self.complete(completion, response);
                        self.update_gauge();
                    }
                    None => tracing::debug!(%id, "response for unknown request"),
                }
            }
            Ok(Incoming::Notification(notification)) => {
                self.metrics.socket_notifications.inc();
                match self.subscriptions.get_mut(&notification.subscription) {
                    Some(handler) => handler(notification.result),
                    None => tracing::debug!(
                        subscription = %notification.subscription,
                        "notification for unknown subscription"
                    ),
                }
            }
            Err(err) => tracing::warn!(?err, %text, "failed to decode socket message"),
        }
    }

    fn complete(&mut self, completion: Completion, response: RpcResponse) {
        match completion {
            Completion::Call(responder) => {
                let _ = responder.send(Ok(response));
            }
            Completion::Subscribe { responder, handler } => {
                match &response {
                    RpcResponse::Success {
                        result: Some(Value::String(subscription)),
                        ..
                    } => {
                        self.subscriptions.insert(subscription.clone(), handler);
                    }
                    _ if responder.is_none() => {
                        tracing::warn!(?response, "subscription rejected");
                    }
                    _ => (),
                }
                if let Some(responder) = responder {
                    let _ = responder.send(Ok(response));
                }
            }
        }
    }

    fn update_gauge(&self) {
        self.metrics
            .socket_pending_requests
            .set(i64::try_from(self.pending.len()).unwrap_or(i64::MAX));
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{jsonrpc::methods, mock::TestSocket, transport::TransportExt},
        alloy::{eips::BlockNumberOrTag, primitives::Address},
        serde_json::json,
        tokio_util::sync::CancellationToken,
    };

    #[test]
    fn transition_table() {
        let stopped = SyncerState::NotReady(SyncError::NotStarted);
        let lost = SyncerState::NotReady(SyncError::Disconnected("eof".into()));

        let start = transition(&stopped, Input::Start);
        assert_eq!(start.state, SyncerState::Preparing);
        assert_eq!(start.after, vec![Effect::OpenSocket]);
        assert!(transition(&SyncerState::Ready, Input::Start).after.is_empty());

        let connected = transition(&SyncerState::Preparing, Input::Connected);
        assert_eq!(connected.state, SyncerState::Ready);
        assert_eq!(connected.after, vec![Effect::SubscribeNewHeads]);

        let disconnected = transition(&SyncerState::Ready, Input::Disconnected("eof".into()));
        assert_eq!(disconnected.state, lost);
        assert_eq!(
            disconnected.before,
            vec![Effect::FailPending(Error::TransportClosed("eof".into()))]
        );

        assert_eq!(transition(&lost, Input::Connecting).state, SyncerState::Preparing);

        for input in [
            Input::Connecting,
            Input::Connected,
            Input::Disconnected("late".into()),
        ] {
            let ignored = transition(&stopped, input);
            assert_eq!(ignored.state, stopped);
            assert!(ignored.before.is_empty() && ignored.after.is_empty());
        }

        let stop = transition(&SyncerState::Ready, Input::Stop);
        assert_eq!(stop.state, stopped);
        assert!(stop.before.contains(&Effect::CloseSocket));
    }

    /// Starts the syncer, connects it and confirms the head subscription.
    async fn connected() -> (TestSocket, Arc<SocketSyncer>) {
        let socket = TestSocket::new();
        let syncer = Arc::new(SocketSyncer::new(socket.clone()));
        syncer.start();
        syncer.pending_requests().await;
        socket.emit(SocketEvent::Connected);
        assert_eq!(syncer.pending_requests().await, 1);
        let id = socket.last_id("eth_subscribe").unwrap();
        socket.respond(id, json!("0xheads"));
        assert_eq!(syncer.pending_requests().await, 0);
        (socket, syncer)
    }

    async fn wait_for_pending(syncer: &SocketSyncer, count: usize) {
        while syncer.pending_requests().await < count {
            tokio::task::yield_now().await;
        }
    }

    fn address(index: u8) -> Address {
        Address::repeat_byte(index)
    }

    #[tokio::test]
    async fn subscribes_to_new_heads_once_connected() {
        let socket = TestSocket::new();
        let syncer = SocketSyncer::new(socket.clone());
        let mut events = syncer.events();

        syncer.start();
        assert_eq!(
            events.recv().await,
            Some(SyncerEvent::State(SyncerState::Preparing))
        );
        assert_eq!(socket.starts(), 1);

        socket.emit(SocketEvent::Connected);
        assert_eq!(
            events.recv().await,
            Some(SyncerEvent::State(SyncerState::Ready))
        );
        syncer.pending_requests().await;
        let subscribe = socket.sent().pop().unwrap();
        assert_eq!(subscribe["method"], "eth_subscribe");
        assert_eq!(subscribe["params"], json!(["newHeads"]));

        socket.respond(subscribe["id"].as_u64().unwrap(), json!("0xheads"));
        socket.receive(json!({
            "jsonrpc": "2.0",
            "method": "eth_subscription",
            "params": { "subscription": "0xheads", "result": { "number": "0x10" } },
        }));
        assert_eq!(events.recv().await, Some(SyncerEvent::BlockHeight(16)));
    }

    #[tokio::test]
    async fn concurrent_requests_get_their_own_responses() {
        let (socket, syncer) = connected().await;
        let count = 8u8;
        let callers: Vec<_> = (0..count)
            .map(|index| {
                let syncer = syncer.clone();
                tokio::spawn(async move {
                    let balance = syncer
                        .fetch(methods::get_balance(address(index), BlockNumberOrTag::Latest))
                        .await;
                    (index, balance)
                })
            })
            .collect();
        wait_for_pending(&syncer, count.into()).await;

        // Answer in reverse order, each with the index of the queried address.
        for frame in socket.sent().iter().rev() {
            if frame["method"] != "eth_getBalance" {
                continue;
            }
            let queried: Address = serde_json::from_value(frame["params"][0].clone()).unwrap();
            let index = (0..count).find(|index| address(*index) == queried).unwrap();
            socket.respond(frame["id"].as_u64().unwrap(), json!(format!("0x{index:x}")));
        }

        for caller in callers {
            let (index, balance) = caller.await.unwrap();
            assert_eq!(balance.unwrap(), alloy::primitives::U256::from(index));
        }
        assert_eq!(syncer.pending_requests().await, 0);
    }

    #[tokio::test]
    async fn disconnect_fails_every_pending_request() {
        let (socket, syncer) = connected().await;
        let callers: Vec<_> = (0..3)
            .map(|_| {
                let syncer = syncer.clone();
                tokio::spawn(async move { syncer.fetch(methods::block_number()).await })
            })
            .collect();
        wait_for_pending(&syncer, 3).await;

        socket.emit(SocketEvent::Disconnected("connection reset".into()));
        for caller in callers {
            assert_eq!(
                caller.await.unwrap(),
                Err(Error::TransportClosed("connection reset".into()))
            );
        }
        assert_eq!(syncer.pending_requests().await, 0);
        assert_eq!(
            syncer.state(),
            SyncerState::NotReady(SyncError::Disconnected("connection reset".into()))
        );
    }

    #[tokio::test]
    async fn cancelling_removes_only_that_request() {
        let (socket, syncer) = connected().await;
        let token = CancellationToken::new();
        let cancelled = tokio::spawn({
            let syncer = syncer.clone();
            let token = token.clone();
            async move {
                syncer
                    .fetch_cancellable(methods::block_number(), token)
                    .await
            }
        });
        wait_for_pending(&syncer, 1).await;
        let survivor = tokio::spawn({
            let syncer = syncer.clone();
            async move { syncer.fetch(methods::chain_id()).await }
        });
        wait_for_pending(&syncer, 2).await;

        token.cancel();
        assert_eq!(cancelled.await.unwrap(), Err(Error::Cancelled));
        assert_eq!(syncer.pending_requests().await, 1);

        socket.respond(socket.last_id("eth_chainId").unwrap(), json!("0x1"));
        assert_eq!(survivor.await.unwrap(), Ok(1));
        // A late response for the cancelled request is ignored.
        socket.respond(socket.last_id("eth_blockNumber").unwrap(), json!("0x1"));
        assert_eq!(syncer.pending_requests().await, 0);
    }

    #[tokio::test]
    async fn requests_fail_fast_when_not_connected() {
        let socket = TestSocket::new();
        let syncer = SocketSyncer::new(socket.clone());
        assert_eq!(
            syncer.fetch(methods::block_number()).await,
            Err(Error::NotConnected)
        );

        syncer.start();
        assert_eq!(
            syncer.fetch(methods::block_number()).await,
            Err(Error::NotConnected)
        );
        assert!(socket.sent().is_empty());
    }

    #[tokio::test]
    async fn stop_wins_over_late_socket_events() {
        let (socket, syncer) = connected().await;
        let pending = tokio::spawn({
            let syncer = syncer.clone();
            async move { syncer.fetch(methods::block_number()).await }
        });
        wait_for_pending(&syncer, 1).await;

        syncer.stop();
        assert_eq!(
            pending.await.unwrap(),
            Err(Error::TransportClosed("syncer stopped".into()))
        );
        assert_eq!(socket.stops(), 1);

        socket.emit(SocketEvent::Disconnected("closed".into()));
        socket.emit(SocketEvent::Connected);
        syncer.pending_requests().await;
        assert_eq!(syncer.state(), SyncerState::NotReady(SyncError::NotStarted));
    }

    #[tokio::test]
    async fn subscription_stream_ends_on_disconnect() {
        let (socket, syncer) = connected().await;
        let subscribing = tokio::spawn({
            let syncer = syncer.clone();
            async move {
                syncer
                    .subscribe(RpcSubscription::new(vec![json!("logs"), json!({})], Ok))
                    .await
            }
        });
        wait_for_pending(&syncer, 1).await;
        socket.respond(socket.last_id("eth_subscribe").unwrap(), json!("0xlogs"));
        let mut notifications = subscribing.await.unwrap().unwrap();

        socket.receive(json!({
            "jsonrpc": "2.0",
            "method": "eth_subscription",
            "params": { "subscription": "0xlogs", "result": { "removed": false } },
        }));
        assert_eq!(
            notifications.recv().await,
            Some(Ok(json!({ "removed": false })))
        );

        socket.emit(SocketEvent::Disconnected("gone".into()));
        assert_eq!(notifications.recv().await, None);
    }

    #[tokio::test]
    async fn describes_source() {
        let syncer = SocketSyncer::new(TestSocket::new());
        assert_eq!(syncer.source(), "WebSocket test socket");
    }
}
