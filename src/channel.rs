//! Connection lifecycle manager.
//!
//! One driver task per channel owns the single live transport and runs the
//! state machine: debounced connect, outbound flush on Connected, batched
//! inbound delivery, close classification, and backoff or health-gated
//! reconnection. Callers only ever see the [`ChannelHandle`] surface:
//! `send`, `close`, and the observable [`ConnectionState`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;

use crate::close_code::CloseInfo;
use crate::config::ChannelConfig;
use crate::error::ChannelError;
use crate::health::poll_until_healthy;
use crate::inbound::{deliver_batch, InboundBuffer};
use crate::outbound::OutboundQueue;
use crate::retry::{next_decision, GiveUpReason, RetryAttempt, RetryCounts, RetryDecision};
use crate::transport::{Connect, Transport, TransportEvent};
use crate::url::{health_check_url, resolve_channel_url};

/// Observable state of a channel. Exactly one state at any instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
    Error,
}

/// Why the channel permanently failed; handed to the fallback callback so
/// the caller can degrade to non-real-time polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    Rejected { close_code: u16 },
    RetryBudgetExhausted,
}

/// Consumer callback for inbound payloads. A returned error drops that one
/// payload with a diagnostic; delivery of the rest of the batch continues.
pub type MessageHandler = dyn Fn(String) -> Result<(), ChannelError> + Send + Sync;

/// Invoked once when the channel reaches the terminal Error state.
pub type FallbackHandler = dyn Fn(FallbackReason, RetryCounts) + Send + Sync;

/// Per-open options.
#[derive(Clone, Default)]
pub struct ChannelOptions {
    pub subprotocols: Vec<String>,
    pub on_fallback: Option<Arc<FallbackHandler>>,
}

enum Command {
    Send(String),
    Close,
}

/// State shared between a handle and its driver task.
///
/// The closed flag is the teardown guard: the driver checks it after every
/// suspension point, so a stale timer can never revive a closed channel.
struct ChannelShared {
    closed: AtomicBool,
    stability_dwell: Duration,
    connected_at: Mutex<Option<Instant>>,
    handler: Mutex<Arc<MessageHandler>>,
    on_fallback: Mutex<Option<Arc<FallbackHandler>>>,
}

impl ChannelShared {
    fn new(
        stability_dwell: Duration,
        handler: Arc<MessageHandler>,
        on_fallback: Option<Arc<FallbackHandler>>,
    ) -> Self {
        Self {
            closed: AtomicBool::new(false),
            stability_dwell,
            connected_at: Mutex::new(None),
            handler: Mutex::new(handler),
            on_fallback: Mutex::new(on_fallback),
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn set_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }

    fn handler(&self) -> Arc<MessageHandler> {
        Arc::clone(&self.handler.lock().expect("handler lock poisoned"))
    }

    fn on_fallback(&self) -> Option<Arc<FallbackHandler>> {
        self.on_fallback
            .lock()
            .expect("fallback lock poisoned")
            .clone()
    }

    fn replace_consumer(
        &self,
        handler: Arc<MessageHandler>,
        on_fallback: Option<Arc<FallbackHandler>>,
    ) {
        *self.handler.lock().expect("handler lock poisoned") = handler;
        *self.on_fallback.lock().expect("fallback lock poisoned") = on_fallback;
    }

    fn set_connected_at(&self, at: Option<Instant>) {
        *self.connected_at.lock().expect("connected_at lock poisoned") = at;
    }

    fn connected_for(&self) -> Option<Duration> {
        self.connected_at
            .lock()
            .expect("connected_at lock poisoned")
            .map(|at| at.elapsed())
    }
}

/// Caller-facing surface of one logical channel.
///
/// The transport itself is never exposed; it is owned exclusively by the
/// driver task behind this handle.
pub struct ChannelHandle {
    logical_path: String,
    cmd_tx: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<ConnectionState>,
    shared: Arc<ChannelShared>,
}

impl ChannelHandle {
    /// Spawn a driver for `logical_path`. An unresolvable origin or path
    /// yields an inert handle pinned to Disconnected, with no network action.
    pub(crate) fn spawn<C: Connect>(
        config: ChannelConfig,
        connector: Arc<C>,
        logical_path: &str,
        on_message: Arc<MessageHandler>,
        options: ChannelOptions,
        generation: u64,
    ) -> Self {
        let url = match resolve_channel_url(&config.origin, logical_path) {
            Ok(url) => url,
            Err(err) => {
                tracing::warn!(logical_path, "cannot resolve channel address: {err}");
                return Self::inert(logical_path.to_string());
            }
        };
        let health_url = match health_check_url(&config.origin) {
            Ok(url) => url,
            Err(err) => {
                tracing::warn!(logical_path, "cannot resolve health-check address: {err}");
                return Self::inert(logical_path.to_string());
            }
        };

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        let shared = Arc::new(ChannelShared::new(
            config.stability_dwell,
            on_message,
            options.on_fallback,
        ));

        let driver = Driver {
            config,
            connector,
            logical_path: logical_path.to_string(),
            url,
            health_url,
            subprotocols: options.subprotocols,
            cmd_rx,
            state_tx,
            shared: Arc::clone(&shared),
            outbound: OutboundQueue::new(),
            retry: RetryAttempt::new(),
            generation,
        };
        tokio::spawn(driver.run());

        Self {
            logical_path: logical_path.to_string(),
            cmd_tx,
            state_rx,
            shared,
        }
    }

    /// Handle with no driver and no transport, permanently Disconnected.
    pub(crate) fn inert(logical_path: String) -> Self {
        let (cmd_tx, _cmd_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        drop(state_tx);
        let shared = Arc::new(ChannelShared::new(Duration::ZERO, Arc::new(|_| Ok(())), None));
        shared.set_closed();
        Self {
            logical_path,
            cmd_tx,
            state_rx,
            shared,
        }
    }

    pub fn logical_path(&self) -> &str {
        &self.logical_path
    }

    /// Queue or transmit a payload. Never fails from the caller's point of
    /// view: while not Connected the payload is held for the next flush.
    pub fn send(&self, payload: impl Into<String>) {
        if self.shared.is_closed() {
            return;
        }
        let _ = self.cmd_tx.send(Command::Send(payload.into()));
    }

    /// Terminal teardown: suppresses all further reconnects and callbacks.
    pub fn close(&self) {
        self.shared.set_closed();
        let _ = self.cmd_tx.send(Command::Close);
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Watch receiver for connection-status UI.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// True once the channel has stayed Connected for the stability dwell.
    /// A stable channel may be reused by a repeated `open` for its path.
    pub fn is_stable(&self) -> bool {
        self.state() == ConnectionState::Connected
            && self
                .shared
                .connected_for()
                .is_some_and(|connected| connected >= self.shared.stability_dwell)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    pub(crate) fn replace_consumer(
        &self,
        on_message: Arc<MessageHandler>,
        on_fallback: Option<Arc<FallbackHandler>>,
    ) {
        self.shared.replace_consumer(on_message, on_fallback);
    }
}

enum Dial<T> {
    Connected(T),
    Failed(CloseInfo),
    Closed,
}

enum CloseOutcome {
    CallerClosed,
    Lost(CloseInfo),
}

struct Driver<C: Connect> {
    config: ChannelConfig,
    connector: Arc<C>,
    logical_path: String,
    url: String,
    health_url: String,
    subprotocols: Vec<String>,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    state_tx: watch::Sender<ConnectionState>,
    shared: Arc<ChannelShared>,
    outbound: OutboundQueue,
    retry: RetryAttempt,
    generation: u64,
}

impl<C: Connect> Driver<C> {
    async fn run(mut self) {
        tracing::debug!(
            path = %self.logical_path,
            generation = self.generation,
            url = %self.url,
            "channel driver started"
        );

        loop {
            self.set_state(ConnectionState::Connecting);
            // Debounce window: open/close bursts in the same tick collapse
            // into a single connection attempt.
            if !self.wait_interruptible(self.config.connect_debounce).await {
                break;
            }

            let close = match self.dial().await {
                Dial::Closed => break,
                Dial::Failed(info) => {
                    tracing::debug!(path = %self.logical_path, reason = %info.reason, "connect attempt failed");
                    info
                }
                Dial::Connected(mut transport) => {
                    self.retry.mark_connected();
                    self.shared.set_connected_at(Some(Instant::now()));
                    self.set_state(ConnectionState::Connected);
                    tracing::debug!(path = %self.logical_path, "channel connected");

                    let outcome = self.session(&mut transport).await;
                    self.shared.set_connected_at(None);
                    match outcome {
                        CloseOutcome::CallerClosed => break,
                        CloseOutcome::Lost(info) => info,
                    }
                }
            };

            if self.shared.is_closed() {
                break;
            }
            self.set_state(ConnectionState::Disconnected);
            tracing::debug!(
                path = %self.logical_path,
                code = close.code,
                reason = %close.reason,
                "channel closed"
            );

            match next_decision(&self.config, &close, &mut self.retry) {
                RetryDecision::RetryNow(delay) => {
                    tracing::debug!(
                        path = %self.logical_path,
                        ?delay,
                        cycle = self.retry.cycle,
                        lifetime = self.retry.lifetime,
                        "scheduling reconnect"
                    );
                    if !self.wait_interruptible(delay).await {
                        break;
                    }
                }
                RetryDecision::RetryViaHealthCheck => {
                    tracing::debug!(
                        path = %self.logical_path,
                        "suspected backend restart, gating reconnect on health check"
                    );
                    if !self.wait_healthy().await {
                        break;
                    }
                }
                RetryDecision::GiveUp(GiveUpReason::NormalClosure) => {
                    tracing::debug!(path = %self.logical_path, "normal closure, not retrying");
                    break;
                }
                RetryDecision::GiveUp(GiveUpReason::Rejected { close_code }) => {
                    self.give_up(FallbackReason::Rejected { close_code });
                    break;
                }
                RetryDecision::GiveUp(GiveUpReason::BudgetExhausted) => {
                    self.give_up(FallbackReason::RetryBudgetExhausted);
                    break;
                }
            }
        }

        self.shared.set_closed();
        if *self.state_tx.borrow() != ConnectionState::Error {
            self.set_state(ConnectionState::Disconnected);
        }
        tracing::debug!(path = %self.logical_path, generation = self.generation, "channel driver ended");
    }

    fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    fn give_up(&self, reason: FallbackReason) {
        tracing::warn!(
            path = %self.logical_path,
            ?reason,
            cycle = self.retry.cycle,
            lifetime = self.retry.lifetime,
            "channel giving up"
        );
        self.set_state(ConnectionState::Error);
        if let Some(on_fallback) = self.shared.on_fallback() {
            on_fallback(reason, self.retry.counts());
        }
    }

    /// Absorb Send commands until Close arrives or every handle is dropped.
    /// Used as the cancel branch of every wait.
    async fn pump_commands_until_close(&mut self) {
        loop {
            match self.cmd_rx.recv().await {
                Some(Command::Send(payload)) => self.outbound.enqueue(payload),
                Some(Command::Close) | None => return,
            }
        }
    }

    /// Sleep that a Close command interrupts. Returns false on teardown.
    async fn wait_interruptible(&mut self, delay: Duration) -> bool {
        if !delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.pump_commands_until_close() => return false,
            }
        }
        !self.shared.is_closed()
    }

    /// Park on the health-check poller. Returns false on teardown.
    async fn wait_healthy(&mut self) -> bool {
        let connector = Arc::clone(&self.connector);
        let health_url = self.health_url.clone();
        let config = self.config.clone();
        tokio::select! {
            _ = poll_until_healthy(connector.as_ref(), &health_url, &config) => !self.shared.is_closed(),
            _ = self.pump_commands_until_close() => false,
        }
    }

    async fn dial(&mut self) -> Dial<C::Transport> {
        let connector = Arc::clone(&self.connector);
        let url = self.url.clone();
        let subprotocols = self.subprotocols.clone();
        tokio::select! {
            result = connector.connect(&url, &subprotocols) => match result {
                Ok(transport) => Dial::Connected(transport),
                Err(err) => Dial::Failed(CloseInfo::abnormal(err.to_string())),
            },
            _ = self.pump_commands_until_close() => Dial::Closed,
        }
    }

    async fn session<T: Transport>(&mut self, transport: &mut T) -> CloseOutcome {
        if let Some(outcome) = self.flush_outbound(transport).await {
            return outcome;
        }

        let mut inbound = InboundBuffer::new();
        let mut flush_tick = tokio::time::interval(self.config.batch_interval);
        flush_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = self.cmd_rx.recv() => match command {
                    Some(Command::Send(payload)) => {
                        if let Err(err) = transport.send_text(&payload).await {
                            tracing::warn!(path = %self.logical_path, "send failed: {err}");
                            self.outbound.enqueue(payload);
                            self.deliver(&mut inbound);
                            return CloseOutcome::Lost(CloseInfo::abnormal(err.to_string()));
                        }
                    }
                    Some(Command::Close) | None => {
                        transport.close().await;
                        return CloseOutcome::CallerClosed;
                    }
                },
                event = transport.next_event() => match event {
                    TransportEvent::Message(payload) => inbound.push(payload),
                    TransportEvent::Closed(info) => {
                        self.deliver(&mut inbound);
                        return CloseOutcome::Lost(info);
                    }
                },
                _ = flush_tick.tick() => self.deliver(&mut inbound),
            }
        }
    }

    /// Drain the outbound queue in order, then re-check for payloads that
    /// raced the flush; done only when the queue is observed empty.
    async fn flush_outbound<T: Transport>(&mut self, transport: &mut T) -> Option<CloseOutcome> {
        loop {
            while let Some(item) = self.outbound.pop_front() {
                if let Err(err) = transport.send_text(&item.payload).await {
                    tracing::warn!(path = %self.logical_path, "flush failed: {err}");
                    self.outbound.requeue_front(item);
                    return Some(CloseOutcome::Lost(CloseInfo::abnormal(err.to_string())));
                }
            }

            let mut raced = false;
            loop {
                match self.cmd_rx.try_recv() {
                    Ok(Command::Send(payload)) => {
                        self.outbound.enqueue(payload);
                        raced = true;
                    }
                    Ok(Command::Close) => {
                        transport.close().await;
                        return Some(CloseOutcome::CallerClosed);
                    }
                    Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
                }
            }
            if !raced {
                return None;
            }
        }
    }

    fn deliver(&self, inbound: &mut InboundBuffer) {
        if inbound.is_empty() {
            return;
        }
        let handler = self.shared.handler();
        let batch = inbound.take_batch();
        let total = batch.len();
        let delivered = deliver_batch(handler.as_ref(), batch);
        if delivered < total {
            tracing::debug!(
                path = %self.logical_path,
                delivered,
                total,
                "inbound batch delivered with drops"
            );
        }
    }
}
