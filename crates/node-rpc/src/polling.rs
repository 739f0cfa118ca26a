//! Syncer over a request/response transport: polls the block height on a
//! timer and derives readiness from a reachability signal.

use {
    crate::{
        error::Error,
        jsonrpc::{RpcCall, RpcResponse, methods},
        syncer::{RpcSyncer, StateCell, SyncError, SyncerEvent, SyncerState},
        transport::{Transport, TransportExt},
    },
    std::{
        sync::{Arc, Mutex, Weak},
        time::Duration,
    },
    tokio::{
        sync::{mpsc, watch},
        task::JoinHandle,
        time::{Instant, MissedTickBehavior},
    },
    tokio_util::sync::CancellationToken,
    tracing::Instrument,
};

/// A reachability signal that never goes down.
pub fn always_reachable() -> watch::Receiver<bool> {
    watch::channel(true).1
}

/// Inputs of the polling state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Input {
    Start { reachable: bool },
    Stop,
    Reachability(bool),
}

/// Side effects requested by a transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Effect {
    ArmTimer,
    DisarmTimer,
    WatchReachability,
    UnwatchReachability,
    CancelFetches,
}

#[derive(Clone, Debug, PartialEq)]
pub struct PollingState {
    pub started: bool,
    pub state: SyncerState,
}

impl Default for PollingState {
    fn default() -> Self {
        Self {
            started: false,
            state: SyncerState::NotReady(SyncError::NotStarted),
        }
    }
}

impl PollingState {
    pub fn apply(&self, input: Input) -> (Self, Vec<Effect>) {
        match input {
            Input::Start { reachable } => {
                let mut effects = Vec::new();
                if !self.started {
                    effects.push(Effect::WatchReachability);
                }
                let started = Self {
                    started: true,
                    state: self.state.clone(),
                };
                let (next, more) = started.reachability(reachable);
                effects.extend(more);
                (next, effects)
            }
            Input::Stop => (
                Self::default(),
                vec![
                    Effect::DisarmTimer,
                    Effect::UnwatchReachability,
                    Effect::CancelFetches,
                ],
            ),
            Input::Reachability(_) if !self.started => (self.clone(), vec![]),
            Input::Reachability(reachable) => self.reachability(reachable),
        }
    }

    fn reachability(&self, reachable: bool) -> (Self, Vec<Effect>) {
        match (reachable, &self.state) {
            (true, SyncerState::Ready) => (self.clone(), vec![]),
            (true, _) => (
                Self {
                    started: true,
                    state: SyncerState::Ready,
                },
                vec![Effect::ArmTimer],
            ),
            (false, _) => (
                Self {
                    started: true,
                    state: SyncerState::NotReady(SyncError::NoNetworkConnection),
                },
                vec![Effect::DisarmTimer],
            ),
        }
    }
}

pub struct PollingSyncer {
    inner: Arc<Inner>,
}

struct Inner {
    transport: Arc<dyn Transport>,
    reachability: watch::Receiver<bool>,
    interval: Duration,
    cell: StateCell,
    control: Mutex<Control>,
}

struct Control {
    machine: PollingState,
    background: bool,
    timer: Option<JoinHandle<()>>,
    watcher: Option<JoinHandle<()>>,
    fetches: CancellationToken,
}

impl PollingSyncer {
    pub fn new(
        transport: Arc<dyn Transport>,
        reachability: watch::Receiver<bool>,
        interval: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                reachability,
                interval,
                cell: StateCell::new("polling"),
                control: Mutex::new(Control {
                    machine: Default::default(),
                    background: false,
                    timer: None,
                    watcher: None,
                    fetches: CancellationToken::new(),
                }),
            }),
        }
    }

    /// Pauses the timer while the host process is in the background. The
    /// syncer state is untouched.
    pub fn enter_background(&self) {
        let mut control = self.inner.control.lock().unwrap();
        control.background = true;
        if let Some(timer) = control.timer.take() {
            timer.abort();
        }
    }

    pub fn enter_foreground(&self) {
        let mut control = self.inner.control.lock().unwrap();
        control.background = false;
        if control.machine.state.is_ready() && control.timer.is_none() {
            control.timer = Some(self.inner.spawn_timer());
        }
    }

    #[cfg(test)]
    fn is_polling(&self) -> bool {
        self.inner.control.lock().unwrap().timer.is_some()
    }
}

impl Inner {
    fn apply(self: &Arc<Self>, input: Input) {
        let mut control = self.control.lock().unwrap();
        let (next, effects) = control.machine.apply(input);
        for effect in effects {
            match effect {
                Effect::ArmTimer => {
                    if let Some(timer) = control.timer.take() {
                        timer.abort();
                    }
                    if !control.background {
                        control.timer = Some(self.spawn_timer());
                    }
                }
                Effect::DisarmTimer => {
                    if let Some(timer) = control.timer.take() {
                        timer.abort();
                    }
                }
                Effect::WatchReachability => {
                    control.watcher = Some(self.spawn_watcher());
                }
                Effect::UnwatchReachability => {
                    if let Some(watcher) = control.watcher.take() {
                        watcher.abort();
                    }
                }
                Effect::CancelFetches => {
                    control.fetches.cancel();
                    control.fetches = CancellationToken::new();
                }
            }
        }
        self.cell.set(next.state.clone());
        control.machine = next;
    }

    /// Fetches the block height every `interval`, first tick one interval
    /// after arming. A failed tick is logged and the next one retries.
    fn spawn_timer(self: &Arc<Self>) -> JoinHandle<()> {
        let inner = Arc::downgrade(self);
        let transport = self.transport.clone();
        let period = self.interval;
        let task = async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                match transport.fetch(methods::block_number()).await {
                    Ok(height) => {
                        let Some(inner) = inner.upgrade() else {
                            break;
                        };
                        tracing::trace!(height, "polled block height");
                        inner.cell.emit(SyncerEvent::BlockHeight(height));
                    }
                    Err(err) => tracing::warn!(?err, "failed to poll block height"),
                }
            }
        };
        tokio::spawn(task.instrument(tracing::info_span!("polling_timer")))
    }

    fn spawn_watcher(self: &Arc<Self>) -> JoinHandle<()> {
        let inner: Weak<Self> = Arc::downgrade(self);
        let mut reachability = self.reachability.clone();
        let task = async move {
            while reachability.changed().await.is_ok() {
                let reachable = *reachability.borrow_and_update();
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                tracing::debug!(reachable, "reachability changed");
                inner.apply(Input::Reachability(reachable));
            }
        };
        tokio::spawn(task.instrument(tracing::info_span!("reachability_watcher")))
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Ok(control) = self.control.get_mut() {
            control.fetches.cancel();
            for task in [control.timer.take(), control.watcher.take()]
                .into_iter()
                .flatten()
            {
                task.abort();
            }
        }
    }
}

#[async_trait::async_trait]
impl Transport for PollingSyncer {
    fn source(&self) -> String {
        format!("API {}", self.inner.transport.source())
    }

    /// Available whatever the syncer state; only `stop` cancels it.
    async fn send(&self, call: RpcCall) -> Result<RpcResponse, Error> {
        let token = self.inner.control.lock().unwrap().fetches.clone();
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(Error::Cancelled),
            response = self.inner.transport.send(call) => response,
        }
    }
}

impl RpcSyncer for PollingSyncer {
    fn state(&self) -> SyncerState {
        self.inner.cell.get()
    }

    fn events(&self) -> mpsc::UnboundedReceiver<SyncerEvent> {
        self.inner.cell.register()
    }

    fn start(&self) {
        let reachable = *self.inner.reachability.borrow();
        self.inner.apply(Input::Start { reachable });
    }

    fn stop(&self) {
        self.inner.apply(Input::Stop);
    }
}
