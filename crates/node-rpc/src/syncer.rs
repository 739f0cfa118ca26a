//! What every syncer has in common: the transport level state machine, the
//! events it reports upwards and the single delegate slot they go to.

use {
    crate::{error::Error, instrumentation::Metrics, transport::Transport},
    std::sync::Mutex,
    tokio::sync::mpsc,
};

/// Structured cause of a syncer or façade not being ready.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum SyncError {
    #[error("not started")]
    NotStarted,
    #[error("no network connection")]
    NoNetworkConnection,
    #[error("disconnected: {0}")]
    Disconnected(String),
    #[error(transparent)]
    Request(#[from] Error),
}

#[derive(Clone, Debug, PartialEq)]
pub enum SyncerState {
    Preparing,
    Ready,
    NotReady(SyncError),
}

impl SyncerState {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Metric label of the state, without the cause.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Preparing => "preparing",
            Self::Ready => "ready",
            Self::NotReady(_) => "not_ready",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum SyncerEvent {
    State(SyncerState),
    BlockHeight(u64),
}

/// A single delegate slot. Registering a new receiver replaces the previous
/// one; events emitted while nobody listens are dropped.
pub struct Delegate<E> {
    sender: Mutex<Option<mpsc::UnboundedSender<E>>>,
}

impl<E> Default for Delegate<E> {
    fn default() -> Self {
        Self {
            sender: Mutex::new(None),
        }
    }
}

impl<E> Delegate<E> {
    pub fn register(&self) -> mpsc::UnboundedReceiver<E> {
        let (sender, receiver) = mpsc::unbounded_channel();
        *self.sender.lock().unwrap() = Some(sender);
        receiver
    }

    pub fn emit(&self, event: E) {
        let mut sender = self.sender.lock().unwrap();
        if let Some(channel) = sender.as_ref()
            && channel.send(event).is_err()
        {
            *sender = None;
        }
    }
}

/// A transport that also tracks connectivity and reports it.
pub trait RpcSyncer: Transport {
    fn state(&self) -> SyncerState;

    /// Registers the delegate. Only the most recently returned receiver gets
    /// events.
    fn events(&self) -> mpsc::UnboundedReceiver<SyncerEvent>;

    fn start(&self);

    fn stop(&self);
}

/// Owned state plus the delegate it is reported to. Changes are emitted in
/// the order they are applied and only when the state actually changed.
pub(crate) struct StateCell {
    syncer: &'static str,
    state: Mutex<SyncerState>,
    delegate: Delegate<SyncerEvent>,
    metrics: &'static Metrics,
}

impl StateCell {
    pub fn new(syncer: &'static str) -> Self {
        Self {
            syncer,
            state: Mutex::new(SyncerState::NotReady(SyncError::NotStarted)),
            delegate: Default::default(),
            metrics: Metrics::get(),
        }
    }

    pub fn get(&self) -> SyncerState {
        self.state.lock().unwrap().clone()
    }

    pub fn set(&self, state: SyncerState) {
        let mut current = self.state.lock().unwrap();
        if *current == state {
            return;
        }
        tracing::debug!(syncer = self.syncer, from = ?*current, to = ?state, "syncer state changed");
        self.metrics.on_transition(self.syncer, &state);
        *current = state.clone();
        self.delegate.emit(SyncerEvent::State(state));
    }

    pub fn emit(&self, event: SyncerEvent) {
        self.delegate.emit(event);
    }

    pub fn register(&self) -> mpsc::UnboundedReceiver<SyncerEvent> {
        self.delegate.register()
    }
}
