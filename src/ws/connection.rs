#![expect(
    clippy::module_name_repetitions,
    reason = "Connection types expose their domain in the name for clarity"
)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use backoff::ExponentialBackoff;
use backoff::backoff::Backoff as _;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt as _, StreamExt as _};
use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard, mpsc, watch};
use tokio::time::{MissedTickBehavior, interval_at, sleep, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::{CancellationToken, DropGuard};

use super::config::Config;
use super::connect::{self, WsStream};
use super::error::WsError;
use super::subscription::{SubscriptionEntry, SubscriptionRegistry};
use super::{heartbeat, receive};
use crate::Result;
use crate::error::Error;
use crate::types::Frame;

type WsSink = SplitSink<WsStream, Message>;
pub(crate) type WsSource = SplitStream<WsStream>;

/// Upper bound on closing a connection that is being replaced or shut down.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Connection state tracking.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Initial dial in progress
    Connecting,
    /// Successfully connected
    Connected {
        /// When the connection was established
        since: Instant,
    },
    /// Reconnecting after failure
    Reconnecting {
        /// Current reconnection attempt number
        attempt: u32,
    },
    /// Shut down, either by the caller, by the peer, or after exhausting reconnects
    Disconnected,
}

impl ConnectionState {
    /// Check if the connection is currently active.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected { .. })
    }
}

/// What asked for a reconnect.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectReason {
    /// The caller invoked [`ConnectionManager::reconnect`]
    Requested,
    /// No inbound activity within twice the heartbeat interval
    Stale,
    /// The forced-reconnect timer fired
    Scheduled,
}

/// Hand-off of reader halves from the reconnect procedure to the receive loop.
pub(crate) enum ReaderHandoff {
    /// Stop reading the current connection, it is being replaced
    Detach,
    /// Start reading a freshly established connection
    Attach(WsSource),
}

/// Manages a single self-healing WebSocket session.
///
/// The manager owns one live connection at a time and runs four background tasks
/// against it:
/// - a heartbeat emitter writing the configured heartbeat frame
/// - a liveness monitor reconnecting when nothing was received for two heartbeat periods
/// - an optional timer forcing a reconnect every `reconnect_interval`
/// - the receive loop, dispatching payloads to the configured
///   [`MessageHandler`](super::MessageHandler)
///
/// Every write goes through a single-slot gate so frames never interleave. Every
/// successful [`subscribe`](Self::subscribe) is recorded and replayed, in order, after
/// each reconnect.
///
/// Handles are cheap to clone. Dropping the last one stops the background tasks.
///
/// # Example
///
/// ```ignore
/// let config = Config::new("wss://stream.example.com/ws", |payload: &[u8]| -> exchange_ws::Result<()> {
///     println!("{}", String::from_utf8_lossy(payload));
///     Ok(())
/// })
/// .with_heartbeat(Duration::from_secs(5), Frame::from("ping"));
///
/// let connection = ConnectionManager::start(config).await?;
/// connection.subscribe(&json!({ "op": "subscribe", "args": ["trades.BTCUSDT"] })).await?;
/// ```
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
    _guard: Arc<DropGuard>,
}

pub(crate) struct Inner {
    pub(crate) config: Config,
    /// Send gate: the single write slot, `None` while a reconnect is rebuilding it
    gate: Mutex<Option<WsSink>>,
    /// Held for the whole reconnect procedure
    reconnect: Mutex<ReconnectState>,
    last_activity: watch::Sender<Instant>,
    subscriptions: SubscriptionRegistry,
    state_tx: watch::Sender<ConnectionState>,
    readers: mpsc::UnboundedSender<ReaderHandoff>,
    pub(crate) shutdown: CancellationToken,
    closed: AtomicBool,
}

struct ReconnectState {
    backoff: ExponentialBackoff,
    /// Consecutive failed reconnects
    failures: u32,
}

impl ConnectionManager {
    /// Validate `config`, connect, and start the background tasks.
    ///
    /// A failed initial handshake is returned to the caller; nothing is retried and
    /// no task is started.
    pub async fn start(config: Config) -> Result<Self> {
        config.validate()?;

        let stream = connect::establish(&config).await?;
        let (sink, source) = stream.split();

        let (readers_tx, readers_rx) = mpsc::unbounded_channel();
        _ = readers_tx.send(ReaderHandoff::Attach(source));

        let shutdown = CancellationToken::new();
        let backoff = config.reconnect.clone().into();
        let inner = Arc::new(Inner {
            gate: Mutex::new(Some(sink)),
            reconnect: Mutex::new(ReconnectState {
                backoff,
                failures: 0,
            }),
            last_activity: watch::Sender::new(Instant::now()),
            subscriptions: SubscriptionRegistry::new(),
            state_tx: watch::Sender::new(ConnectionState::Connected {
                since: Instant::now(),
            }),
            readers: readers_tx,
            shutdown: shutdown.clone(),
            closed: AtomicBool::new(false),
            config,
        });

        tokio::spawn(receive::receive_loop(Arc::clone(&inner), readers_rx));
        if let Some(frame) = inner.config.heartbeat_frame() {
            tokio::spawn(heartbeat::emit(Arc::clone(&inner), frame));
            tokio::spawn(heartbeat::monitor(Arc::clone(&inner)));
        }
        if !inner.config.reconnect_interval.is_zero() {
            tokio::spawn(reconnect_timer(Arc::clone(&inner)));
        }

        {
            let mut gate = inner.gate.lock().await;
            inner.send_on_connect(&mut gate).await;
        }

        Ok(Self {
            inner,
            _guard: Arc::new(shutdown.drop_guard()),
        })
    }

    /// Write one frame through the send gate.
    ///
    /// Concurrent callers are served one at a time. A write error is returned and
    /// does not trigger a reconnect.
    pub async fn send(&self, frame: Frame) -> Result<()> {
        self.inner.send(frame).await
    }

    /// Serialize `request` as JSON and write it as a text frame.
    pub async fn send_json<R: Serialize + ?Sized>(&self, request: &R) -> Result<()> {
        let json = serde_json::to_string(request)?;
        self.send(Frame::Text(json)).await
    }

    /// Send a subscribe request serialized as JSON and record it for replay.
    pub async fn subscribe<R: Serialize + ?Sized>(&self, request: &R) -> Result<()> {
        let json = serde_json::to_string(request)?;
        self.subscribe_frame(Frame::Text(json)).await
    }

    /// Send a subscribe request and, only if the write succeeded, record it for replay.
    ///
    /// The gate is held until the request is recorded, so registry order always
    /// matches the order requests reached the wire.
    pub async fn subscribe_frame(&self, frame: Frame) -> Result<()> {
        let mut gate = self.inner.lock_gate().await?;
        write(&mut gate, frame.clone()).await?;
        self.inner.subscriptions.push(frame);

        tracing::debug!(
            count = self.inner.subscriptions.len(),
            "Subscription recorded"
        );
        Ok(())
    }

    /// Tear down the current connection, dial a new one and replay subscriptions.
    ///
    /// After shutdown this touches nothing and returns [`WsError::ConnectionClosed`].
    pub async fn reconnect(&self) -> Result<()> {
        self.inner.reconnect(ReconnectReason::Requested).await
    }

    /// Stop every background task and close the connection.
    ///
    /// Calling this more than once, or concurrently, is harmless.
    pub async fn shutdown(&self) {
        self.inner.shutdown().await;
    }

    /// Get the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    /// Subscribe to connection state changes.
    ///
    /// Useful for observing reconnects and the final `Disconnected` transition.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Recorded subscriptions, in the order they will be replayed.
    #[must_use]
    pub fn subscriptions(&self) -> Vec<SubscriptionEntry> {
        self.inner.subscriptions.snapshot()
    }

    /// When a frame was last received (or the connection last established).
    #[must_use]
    pub fn last_activity(&self) -> Instant {
        self.inner.last_activity()
    }

    /// Whether the manager has shut down, by request, peer close or exhausted reconnects.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.inner.is_shutdown()
    }

    /// The configuration the manager was started with.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }
}

impl Inner {
    pub(crate) fn report(&self, error: &Error) {
        self.config.error_handler.on_error(error);
    }

    pub(crate) fn touch(&self) {
        self.last_activity.send_replace(Instant::now());
    }

    pub(crate) fn last_activity(&self) -> Instant {
        *self.last_activity.borrow()
    }

    /// Idle time after which the connection is presumed dead.
    pub(crate) fn liveness_threshold(&self) -> Duration {
        self.config.heartbeat_interval.saturating_mul(2)
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.shutdown.is_cancelled()
    }

    async fn lock_gate(&self) -> Result<MutexGuard<'_, Option<WsSink>>> {
        if self.is_shutdown() {
            return Err(WsError::ConnectionClosed.into());
        }
        let gate = self.gate.lock().await;
        if self.is_shutdown() {
            return Err(WsError::ConnectionClosed.into());
        }
        Ok(gate)
    }

    pub(crate) async fn send(&self, frame: Frame) -> Result<()> {
        let mut gate = self.lock_gate().await?;
        write(&mut gate, frame).await
    }

    /// The reconnect procedure.
    ///
    /// Runs under the reconnect lock with the send gate held throughout, so at most
    /// one reconnect proceeds at a time and no writer sees a half-built connection.
    pub(crate) async fn reconnect(&self, reason: ReconnectReason) -> Result<()> {
        let mut state = self.reconnect.lock().await;
        if self.is_shutdown() {
            return Err(WsError::ConnectionClosed.into());
        }
        // Another reconnect may have finished while this one waited for the lock.
        if reason == ReconnectReason::Stale
            && self.last_activity().elapsed() <= self.liveness_threshold()
        {
            tracing::debug!("Connection was refreshed while waiting, skipping stale reconnect");
            return Ok(());
        }

        let attempt = state.failures.saturating_add(1);
        tracing::info!(?reason, attempt, endpoint = %self.config.endpoint, "Reconnecting");
        self.state_tx
            .send_replace(ConnectionState::Reconnecting { attempt });

        let mut gate = self.gate.lock().await;

        // Detach the reader before closing so the receive loop never sees the close
        // handshake of a connection that is being replaced.
        _ = self.readers.send(ReaderHandoff::Detach);
        if let Some(sink) = gate.take() {
            close(sink).await;
        }

        let pause = state
            .backoff
            .next_backoff()
            .unwrap_or(self.config.reconnect.max_backoff);
        tracing::debug!(?pause, "Waiting before redial");

        let dialed = tokio::select! {
            biased;
            () = self.shutdown.cancelled() => return Err(WsError::ConnectionClosed.into()),
            dialed = async {
                sleep(pause).await;
                connect::establish(&self.config).await
            } => dialed,
        };

        match dialed {
            Ok(stream) => {
                let (sink, source) = stream.split();
                *gate = Some(sink);
                _ = self.readers.send(ReaderHandoff::Attach(source));

                state.failures = 0;
                state.backoff.reset();
                self.touch();
                self.state_tx.send_replace(ConnectionState::Connected {
                    since: Instant::now(),
                });

                self.send_on_connect(&mut gate).await;
                self.replay(&mut gate).await;
                Ok(())
            }
            Err(e) => {
                state.failures = attempt;
                tracing::warn!(error = %e, attempt, "Reconnect attempt failed");

                if let Some(max) = self.config.reconnect.max_attempts
                    && attempt >= max
                {
                    self.report(&WsError::ReconnectExhausted { attempts: attempt }.into());
                    self.begin_shutdown();
                }
                Err(e)
            }
        }
    }

    async fn send_on_connect(&self, gate: &mut Option<WsSink>) {
        let Some(on_connect) = &self.config.on_connect else {
            return;
        };
        for frame in on_connect() {
            if let Err(e) = write(gate, frame).await {
                self.report(&e);
            }
        }
    }

    /// Resend every recorded subscription, in order, continuing past failures.
    async fn replay(&self, gate: &mut Option<WsSink>) {
        let entries = self.subscriptions.snapshot();
        if entries.is_empty() {
            return;
        }

        tracing::debug!(count = entries.len(), "Replaying subscriptions");
        for entry in entries {
            if let Err(e) = write(gate, entry.frame).await {
                tracing::warn!(error = %e, "Failed to replay subscription");
                self.report(&e);
            }
        }
    }

    /// Flip the manager into its terminal state. Returns `false` if it already was.
    fn begin_shutdown(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.shutdown.cancel();
        self.state_tx.send_replace(ConnectionState::Disconnected);
        true
    }

    pub(crate) async fn shutdown(&self) {
        if !self.begin_shutdown() {
            return;
        }
        tracing::info!(endpoint = %self.config.endpoint, "Shutting down connection");

        let mut gate = self.gate.lock().await;
        if let Some(sink) = gate.take() {
            close(sink).await;
        }
    }
}

async fn write(gate: &mut Option<WsSink>, frame: Frame) -> Result<()> {
    let Some(sink) = gate.as_mut() else {
        return Err(WsError::NotConnected.into());
    };
    sink.send(Message::from(frame)).await?;
    Ok(())
}

/// Close a sink, only logging failures.
async fn close(mut sink: WsSink) {
    match timeout(CLOSE_TIMEOUT, sink.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::debug!(error = %e, "Error while closing connection"),
        Err(_) => tracing::debug!("Timed out closing connection"),
    }
}

/// Unconditionally reconnects every `reconnect_interval`.
async fn reconnect_timer(inner: Arc<Inner>) {
    let period = inner.config.reconnect_interval;
    let mut ticker = interval_at(tokio::time::Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = inner.shutdown.cancelled() => break,
            _ = ticker.tick() => {
                if let Err(e) = inner.reconnect(ReconnectReason::Scheduled).await {
                    if inner.is_shutdown() {
                        break;
                    }
                    inner.report(&e);
                }
            }
        }
    }

    tracing::debug!("Reconnect timer terminated");
}
