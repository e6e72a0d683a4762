//! Event channel adapter for the Overtime lobby protocol.
//!
//! [`Connection`] is a thin handle that communicates with a background
//! channel loop task via an unbounded MPSC channel. Inbound events are
//! emitted on a bounded channel ([`tokio::sync::mpsc::Receiver<ServerEvent>`])
//! returned from [`Connection::open`].
//!
//! Unlike a plain socket wrapper, the loop owns a [`Connector`] rather than
//! a transport: when the transport drops, the loop re-dials a fresh
//! connection with bounded attempts and capped exponential backoff,
//! emitting synthetic [`Reconnecting`](ServerEvent::Reconnecting) /
//! [`Connected`](ServerEvent::Connected) events so the UI can show a
//! "reconnecting" state instead of failing hard. Credential rejection and
//! a server-initiated forced disconnect both stop reconnection for good.
//!
//! # Example
//!
//! ```rust,ignore
//! let connector = WebSocketConnector::new("ws://localhost:4000/ws", token);
//! let (connection, mut events) = Connection::open(connector, ConnectionConfig::default());
//!
//! connection.emit(ClientCommand::JoinRoom { room_id, password: None })?;
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         ServerEvent::JoinedRoom(payload) => { /* … */ }
//!         ServerEvent::Disconnected { .. } => break,
//!         _ => {}
//!     }
//! }
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, warn};

use crate::error::{OvertimeError, Result};
use crate::protocol::{ClientCommand, EventKind, ServerEvent};
use crate::transport::{Connector, Transport};

/// Default capacity of the bounded event channel.
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default timeout for the graceful shutdown.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Default maximum number of consecutive reconnect attempts.
const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Default first reconnect delay; doubled per attempt up to the cap.
const DEFAULT_RECONNECT_BASE_DELAY: Duration = Duration::from_millis(500);

/// Default reconnect delay cap.
const DEFAULT_RECONNECT_MAX_DELAY: Duration = Duration::from_secs(8);

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for a [`Connection`].
///
/// All fields have sensible defaults.
///
/// # Example
///
/// ```
/// use overtime_client::connection::ConnectionConfig;
/// use std::time::Duration;
///
/// let config = ConnectionConfig::default()
///     .with_event_channel_capacity(512)
///     .with_max_reconnect_attempts(3)
///     .with_shutdown_timeout(Duration::from_secs(5));
/// ```
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Capacity of the bounded event channel.
    ///
    /// When the consumer cannot keep up with inbound events, events are
    /// dropped (with a warning logged) to avoid blocking the channel loop.
    /// The final `Disconnected` event is always delivered regardless of
    /// capacity. Defaults to **256**; values below 1 are clamped to 1.
    pub event_channel_capacity: usize,
    /// Maximum consecutive reconnect attempts before giving up.
    pub max_reconnect_attempts: u32,
    /// Delay before the first reconnect attempt; doubled per attempt.
    pub reconnect_base_delay: Duration,
    /// Upper bound on the reconnect delay.
    pub reconnect_max_delay: Duration,
    /// Timeout for the graceful shutdown before the loop task is aborted.
    pub shutdown_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            reconnect_base_delay: DEFAULT_RECONNECT_BASE_DELAY,
            reconnect_max_delay: DEFAULT_RECONNECT_MAX_DELAY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

impl ConnectionConfig {
    /// Set the capacity of the bounded event channel (clamped to ≥ 1).
    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    /// Set the maximum consecutive reconnect attempts.
    #[must_use]
    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.max_reconnect_attempts = attempts;
        self
    }

    /// Set the first reconnect delay (doubled per attempt up to the cap).
    #[must_use]
    pub fn with_reconnect_base_delay(mut self, delay: Duration) -> Self {
        self.reconnect_base_delay = delay;
        self
    }

    /// Set the reconnect delay cap.
    #[must_use]
    pub fn with_reconnect_max_delay(mut self, delay: Duration) -> Self {
        self.reconnect_max_delay = delay;
        self
    }

    /// Set the graceful-shutdown timeout.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

// ── Status ──────────────────────────────────────────────────────────

/// Observable lifecycle state of the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

const STATUS_DISCONNECTED: u8 = 0;
const STATUS_CONNECTING: u8 = 1;
const STATUS_CONNECTED: u8 = 2;

fn status_from_u8(raw: u8) -> ConnectionStatus {
    match raw {
        STATUS_CONNECTED => ConnectionStatus::Connected,
        STATUS_CONNECTING => ConnectionStatus::Connecting,
        _ => ConnectionStatus::Disconnected,
    }
}

// ── Raw listeners ───────────────────────────────────────────────────

/// Handle returned by [`Connection::on`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type RawHandler = Arc<dyn Fn(&ServerEvent) + Send + Sync>;

#[derive(Default)]
struct ListenerTable {
    by_kind: HashMap<EventKind, Vec<(ListenerId, RawHandler)>>,
}

// ── Shared state ────────────────────────────────────────────────────

/// State shared between the handle, command senders, and the channel loop.
struct ConnState {
    status: AtomicU8,
    next_listener_id: AtomicU64,
    listeners: StdMutex<ListenerTable>,
}

impl ConnState {
    fn new() -> Self {
        Self {
            status: AtomicU8::new(STATUS_CONNECTING),
            next_listener_id: AtomicU64::new(1),
            listeners: StdMutex::new(ListenerTable::default()),
        }
    }

    fn status(&self) -> ConnectionStatus {
        status_from_u8(self.status.load(Ordering::Acquire))
    }

    fn set_status(&self, status: ConnectionStatus) {
        let raw = match status {
            ConnectionStatus::Disconnected => STATUS_DISCONNECTED,
            ConnectionStatus::Connecting => STATUS_CONNECTING,
            ConnectionStatus::Connected => STATUS_CONNECTED,
        };
        self.status.store(raw, Ordering::Release);
    }

    /// Invoke raw listeners for this event over a stable snapshot, so a
    /// listener unsubscribing mid-dispatch cannot corrupt the iteration.
    fn notify_listeners(&self, event: &ServerEvent) {
        let snapshot: Vec<RawHandler> = {
            let table = match self.listeners.lock() {
                Ok(t) => t,
                Err(poisoned) => poisoned.into_inner(),
            };
            table
                .by_kind
                .get(&event.kind())
                .map(|entries| entries.iter().map(|(_, h)| Arc::clone(h)).collect())
                .unwrap_or_default()
        };
        for handler in snapshot {
            handler(event);
        }
    }
}

// ── Command sender ──────────────────────────────────────────────────

/// Cheaply cloneable handle for emitting commands, handed to feature
/// controllers so they can send without owning the [`Connection`].
#[derive(Clone)]
pub struct CommandSender {
    cmd_tx: mpsc::UnboundedSender<ClientCommand>,
    state: Arc<ConnState>,
}

impl CommandSender {
    /// Queue a command for transmission.
    ///
    /// # Errors
    ///
    /// Returns [`OvertimeError::NotConnected`] if the channel is not open.
    /// There is no outbound queue across disconnects — the caller owns any
    /// retry policy.
    pub fn emit(&self, command: ClientCommand) -> Result<()> {
        if self.state.status() != ConnectionStatus::Connected {
            return Err(OvertimeError::NotConnected);
        }
        self.cmd_tx
            .send(command)
            .map_err(|_| OvertimeError::NotConnected)
    }

    /// Returns `true` if the channel is believed to be open.
    pub fn is_connected(&self) -> bool {
        self.state.status() == ConnectionStatus::Connected
    }
}

impl std::fmt::Debug for CommandSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandSender")
            .field("status", &self.state.status())
            .finish()
    }
}

// ── Connection handle ───────────────────────────────────────────────

/// Handle to the single live channel connection.
///
/// Created via [`Connection::open`], which spawns the background channel
/// loop and returns this handle together with the event receiver. Exactly
/// one physical connection exists per handle; the session layer enforces
/// at most one handle per process.
pub struct Connection {
    sender: CommandSender,
    state: Arc<ConnState>,
    task: Option<tokio::task::JoinHandle<()>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    shutdown_timeout: Duration,
}

impl Connection {
    /// Open the channel and return a handle plus event receiver.
    ///
    /// The loop dials the first connection immediately via `connector` and
    /// emits a synthetic [`ServerEvent::Connected`] once the transport is
    /// up.
    #[must_use = "the event receiver must be consumed to receive events"]
    pub fn open(
        connector: impl Connector,
        config: ConnectionConfig,
    ) -> (Self, mpsc::Receiver<ServerEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<ClientCommand>();
        // Clamp capacity to at least 1 (tokio panics on 0).
        let capacity = config.event_channel_capacity.max(1);
        let (event_tx, event_rx) = mpsc::channel::<ServerEvent>(capacity);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let state = Arc::new(ConnState::new());
        let loop_state = Arc::clone(&state);
        let shutdown_timeout = config.shutdown_timeout;

        let task = tokio::spawn(channel_loop(
            connector,
            config,
            cmd_rx,
            event_tx,
            loop_state,
            shutdown_rx,
        ));

        let sender = CommandSender {
            cmd_tx,
            state: Arc::clone(&state),
        };

        let connection = Self {
            sender,
            state,
            task: Some(task),
            shutdown_tx: Some(shutdown_tx),
            shutdown_timeout,
        };

        (connection, event_rx)
    }

    /// Queue a command for transmission.
    ///
    /// # Errors
    ///
    /// Returns [`OvertimeError::NotConnected`] if the channel is not open.
    pub fn emit(&self, command: ClientCommand) -> Result<()> {
        self.sender.emit(command)
    }

    /// A cheaply cloneable sender for feature controllers.
    pub fn sender(&self) -> CommandSender {
        self.sender.clone()
    }

    /// Current lifecycle state of the channel.
    pub fn status(&self) -> ConnectionStatus {
        self.state.status()
    }

    /// Returns `true` if the channel is believed to be open.
    pub fn is_connected(&self) -> bool {
        self.state.status() == ConnectionStatus::Connected
    }

    /// Subscribe a raw listener for one event kind, independent of the
    /// interceptor registry. Listeners run on the channel loop task and
    /// must not panic or block.
    pub fn on(&self, kind: EventKind, handler: impl Fn(&ServerEvent) + Send + Sync + 'static) -> ListenerId {
        let id = ListenerId(self.state.next_listener_id.fetch_add(1, Ordering::Relaxed));
        let mut table = match self.state.listeners.lock() {
            Ok(t) => t,
            Err(poisoned) => poisoned.into_inner(),
        };
        table
            .by_kind
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove a raw listener. Removing an unknown listener is a no-op.
    pub fn off(&self, kind: EventKind, id: ListenerId) {
        let mut table = match self.state.listeners.lock() {
            Ok(t) => t,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(entries) = table.by_kind.get_mut(&kind) {
            entries.retain(|(entry_id, _)| *entry_id != id);
        }
    }

    /// Close the channel and stop the background loop.
    ///
    /// Safe to call when already disconnected (no-op beyond state
    /// bookkeeping). After this returns, the event receiver yields `None`
    /// once the final `Disconnected` event is drained.
    pub async fn disconnect(&mut self) {
        debug!("connection: disconnect requested");

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        // Await the loop with a timeout. If it doesn't exit in time, abort
        // it so the task cannot detach and run indefinitely.
        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("channel loop terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("channel loop did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("channel loop aborted: {join_err}");
                    }
                }
            }
        }

        self.state.set_status(ConnectionStatus::Disconnected);
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("status", &self.status())
            .field("has_task", &self.task.is_some())
            .finish()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        // `Drop` is synchronous so a graceful shutdown cannot be awaited.
        // Abort the spawned task, which drops the channel loop future
        // immediately. The `shutdown_tx` oneshot is intentionally not sent
        // here: the graceful path calls async `transport.close()`, and
        // there is no executor context to drive it inside `Drop`.
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ── Channel loop ────────────────────────────────────────────────────

/// Why the inner pump stopped.
enum PumpExit {
    /// Shutdown was requested; stop for good.
    Shutdown,
    /// The command channel closed (handle dropped); stop for good.
    HandleDropped,
    /// Credential rejected or server forced the disconnect; stop for good.
    Terminal(String),
    /// Transport failed or closed; eligible for reconnection.
    TransportLost(Option<String>),
}

/// Background loop that dials connections and multiplexes send/receive.
///
/// Outer loop: one iteration per physical connection attempt, with capped
/// exponential backoff between attempts. Inner pump: `tokio::select!` over
/// outgoing commands, the shutdown signal, and inbound frames.
async fn channel_loop(
    connector: impl Connector,
    config: ConnectionConfig,
    mut cmd_rx: mpsc::UnboundedReceiver<ClientCommand>,
    event_tx: mpsc::Sender<ServerEvent>,
    state: Arc<ConnState>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    debug!("channel loop started");
    let mut attempt: u32 = 0;

    loop {
        state.set_status(ConnectionStatus::Connecting);

        let transport = tokio::select! {
            connected = connector.connect() => connected,
            _ = &mut shutdown_rx => {
                debug!("shutdown signal received while connecting");
                finish(&event_tx, &state, Some("client shut down".into())).await;
                return;
            }
        };

        match transport {
            Ok(mut transport) => {
                attempt = 0;
                state.set_status(ConnectionStatus::Connected);
                dispatch(&state, &event_tx, ServerEvent::Connected).await;

                let exit = pump(
                    &mut *transport,
                    &mut cmd_rx,
                    &event_tx,
                    &state,
                    &mut shutdown_rx,
                )
                .await;

                match exit {
                    PumpExit::Shutdown | PumpExit::HandleDropped => {
                        let _ = transport.close().await;
                        finish(&event_tx, &state, Some("client shut down".into())).await;
                        return;
                    }
                    PumpExit::Terminal(reason) => {
                        let _ = transport.close().await;
                        finish(&event_tx, &state, Some(reason)).await;
                        return;
                    }
                    PumpExit::TransportLost(reason) => {
                        debug!(?reason, "transport lost, scheduling reconnect");
                    }
                }
            }
            Err(e) => {
                warn!("connection attempt failed: {e}");
            }
        }

        // Transport lost or dial failed: spend one reconnect attempt.
        attempt += 1;
        if attempt > config.max_reconnect_attempts {
            error!(
                "giving up after {} reconnect attempts",
                config.max_reconnect_attempts
            );
            finish(&event_tx, &state, Some("reconnect attempts exhausted".into())).await;
            return;
        }

        state.set_status(ConnectionStatus::Connecting);
        dispatch(&state, &event_tx, ServerEvent::Reconnecting { attempt }).await;

        let delay = backoff_delay(
            config.reconnect_base_delay,
            config.reconnect_max_delay,
            attempt,
        );
        debug!(?delay, attempt, "backing off before reconnect");

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = &mut shutdown_rx => {
                debug!("shutdown signal received during backoff");
                finish(&event_tx, &state, Some("client shut down".into())).await;
                return;
            }
        }
    }
}

/// Pump one live transport until it drops or the loop must stop.
async fn pump(
    transport: &mut dyn Transport,
    cmd_rx: &mut mpsc::UnboundedReceiver<ClientCommand>,
    event_tx: &mpsc::Sender<ServerEvent>,
    state: &Arc<ConnState>,
    shutdown_rx: &mut oneshot::Receiver<()>,
) -> PumpExit {
    loop {
        tokio::select! {
            // Branch 1: outgoing command from a handle or controller
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(command) => {
                        debug!("sending command: {:?}", std::mem::discriminant(&command));
                        match serde_json::to_string(&command) {
                            Ok(json) => {
                                if let Err(e) = transport.send(json).await {
                                    error!("transport send error: {e}");
                                    return PumpExit::TransportLost(
                                        Some(format!("transport send error: {e}")),
                                    );
                                }
                            }
                            Err(e) => {
                                // Serialization failures are programming
                                // bugs; don't kill the channel over one.
                                error!("failed to serialize command: {e}");
                            }
                        }
                    }
                    None => {
                        debug!("command channel closed, stopping channel loop");
                        return PumpExit::HandleDropped;
                    }
                }
            }

            // Branch 2: shutdown signal
            _ = &mut *shutdown_rx => {
                debug!("shutdown signal received");
                return PumpExit::Shutdown;
            }

            // Branch 3: inbound frame from the server
            incoming = transport.recv() => {
                match incoming {
                    Some(Ok(text)) => {
                        match serde_json::from_str::<ServerEvent>(&text) {
                            Ok(event) => {
                                let terminal = terminal_reason(&event);
                                dispatch(state, event_tx, event).await;
                                if let Some(reason) = terminal {
                                    return PumpExit::Terminal(reason);
                                }
                            }
                            Err(e) => {
                                warn!("failed to deserialize server event: {e} — raw: {text}");
                            }
                        }
                    }
                    Some(Err(e)) => {
                        error!("transport receive error: {e}");
                        return PumpExit::TransportLost(
                            Some(format!("transport receive error: {e}")),
                        );
                    }
                    None => {
                        debug!("transport closed by server");
                        return PumpExit::TransportLost(None);
                    }
                }
            }
        }
    }
}

/// Events after which the adapter must stop reconnecting: credential
/// rejection and a deliberate server-side disconnect.
fn terminal_reason(event: &ServerEvent) -> Option<String> {
    match event {
        ServerEvent::ConnectionRejected { message, .. } => {
            Some(format!("credential rejected: {message}"))
        }
        ServerEvent::ForceDisconnect { reason } => Some(format!("forced disconnect: {reason}")),
        _ => None,
    }
}

/// Run raw listeners, then forward to the event channel. If the channel is
/// full, log and drop the event to avoid blocking the loop.
async fn dispatch(state: &Arc<ConnState>, event_tx: &mpsc::Sender<ServerEvent>, event: ServerEvent) {
    state.notify_listeners(&event);
    match event_tx.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(dropped)) => {
            warn!(
                "event channel full, dropping event: {:?}",
                std::mem::discriminant(&dropped)
            );
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!("event channel closed, receiver dropped");
        }
    }
}

/// Emit the final [`Disconnected`](ServerEvent::Disconnected) event and mark
/// the channel closed.
///
/// Uses `send().await` instead of `try_send` because `Disconnected` is
/// always the last event on the channel and must never be silently dropped.
async fn finish(
    event_tx: &mpsc::Sender<ServerEvent>,
    state: &Arc<ConnState>,
    reason: Option<String>,
) {
    state.set_status(ConnectionStatus::Disconnected);
    let event = ServerEvent::Disconnected { reason };
    state.notify_listeners(&event);
    if event_tx.send(event).await.is_err() {
        debug!("event channel closed, receiver dropped");
    }
}

/// Capped exponential backoff: `base * 2^(attempt-1)`, bounded by `max`.
fn backoff_delay(base: Duration, max: Duration, attempt: u32) -> Duration {
    let shift = attempt.saturating_sub(1).min(16);
    base.saturating_mul(1u32 << shift).min(max)
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicBool;
    use uuid::Uuid;

    // ── Mock transport & connector ──────────────────────────────────

    type Incoming = Option<std::result::Result<String, OvertimeError>>;

    /// A mock transport that records sent frames and replays a script.
    struct MockTransport {
        incoming: VecDeque<Incoming>,
        sent: Arc<StdMutex<Vec<String>>>,
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send(&mut self, frame: String) -> std::result::Result<(), OvertimeError> {
            self.sent.lock().unwrap().push(frame);
            Ok(())
        }

        async fn recv(&mut self) -> Option<std::result::Result<String, OvertimeError>> {
            if let Some(item) = self.incoming.pop_front() {
                // An explicit `None` entry scripts a clean transport close.
                item
            } else {
                // Script exhausted — hang so the loop stays alive until
                // shutdown.
                std::future::pending().await
            }
        }

        async fn close(&mut self) -> std::result::Result<(), OvertimeError> {
            self.closed.store(true, Ordering::Relaxed);
            Ok(())
        }
    }

    /// A connector that hands out scripted transports, one per attempt.
    struct MockConnector {
        scripts: StdMutex<VecDeque<Vec<Incoming>>>,
        sent: Arc<StdMutex<Vec<String>>>,
        closed: Arc<AtomicBool>,
    }

    impl MockConnector {
        fn new(scripts: Vec<Vec<Incoming>>) -> (Self, Arc<StdMutex<Vec<String>>>, Arc<AtomicBool>) {
            let sent = Arc::new(StdMutex::new(Vec::new()));
            let closed = Arc::new(AtomicBool::new(false));
            let connector = Self {
                scripts: StdMutex::new(VecDeque::from(scripts)),
                sent: Arc::clone(&sent),
                closed: Arc::clone(&closed),
            };
            (connector, sent, closed)
        }
    }

    #[async_trait]
    impl Connector for MockConnector {
        async fn connect(&self) -> std::result::Result<Box<dyn Transport>, OvertimeError> {
            let script = self.scripts.lock().unwrap().pop_front();
            match script {
                Some(incoming) => Ok(Box::new(MockTransport {
                    incoming: VecDeque::from(incoming),
                    sent: Arc::clone(&self.sent),
                    closed: Arc::clone(&self.closed),
                })),
                None => Err(OvertimeError::TransportReceive("dial refused".into())),
            }
        }
    }

    fn ready_json() -> String {
        serde_json::to_string(&ServerEvent::ConnectionReady {
            player_id: Uuid::from_u128(7),
        })
        .unwrap()
    }

    fn fast_config() -> ConnectionConfig {
        ConnectionConfig::default()
            .with_reconnect_base_delay(Duration::from_millis(5))
            .with_reconnect_max_delay(Duration::from_millis(10))
    }

    // ── Tests ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn connected_is_first_event() {
        let (connector, _sent, _closed) = MockConnector::new(vec![vec![Some(Ok(ready_json()))]]);
        let (mut connection, mut events) = Connection::open(connector, fast_config());

        let first = events.recv().await.unwrap();
        assert!(matches!(first, ServerEvent::Connected));

        let second = events.recv().await.unwrap();
        assert!(matches!(second, ServerEvent::ConnectionReady { .. }));

        assert!(connection.is_connected());
        connection.disconnect().await;
    }

    #[tokio::test]
    async fn emit_sends_serialized_command() {
        let (connector, sent, _closed) = MockConnector::new(vec![vec![Some(Ok(ready_json()))]]);
        let (mut connection, mut events) = Connection::open(connector, fast_config());

        let _ = events.recv().await; // Connected
        let _ = events.recv().await; // ConnectionReady

        let room_id = Uuid::from_u128(1);
        connection
            .emit(ClientCommand::JoinRoom {
                room_id,
                password: None,
            })
            .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;

        {
            let frames = sent.lock().unwrap();
            assert_eq!(frames.len(), 1);
            let parsed: ClientCommand = serde_json::from_str(&frames[0]).unwrap();
            assert!(matches!(parsed, ClientCommand::JoinRoom { .. }));
        }

        connection.disconnect().await;
    }

    #[tokio::test]
    async fn emit_after_disconnect_fails_not_connected() {
        let (connector, _sent, _closed) = MockConnector::new(vec![vec![Some(Ok(ready_json()))]]);
        let (mut connection, mut events) = Connection::open(connector, fast_config());

        let _ = events.recv().await; // Connected
        connection.disconnect().await;

        let result = connection.emit(ClientCommand::LeaveRoom {
            room_id: Uuid::from_u128(1),
        });
        assert!(matches!(result, Err(OvertimeError::NotConnected)));
    }

    #[tokio::test]
    async fn reconnects_after_transport_loss() {
        // First transport closes cleanly; second stays up.
        let (connector, _sent, _closed) = MockConnector::new(vec![
            vec![Some(Ok(ready_json())), None],
            vec![Some(Ok(ready_json()))],
        ]);
        let (mut connection, mut events) = Connection::open(connector, fast_config());

        let _ = events.recv().await; // Connected (first transport)
        let _ = events.recv().await; // ConnectionReady

        let ev = events.recv().await.unwrap();
        assert!(matches!(ev, ServerEvent::Reconnecting { attempt: 1 }));

        let ev = events.recv().await.unwrap();
        assert!(matches!(ev, ServerEvent::Connected));

        let ev = events.recv().await.unwrap();
        assert!(matches!(ev, ServerEvent::ConnectionReady { .. }));
        assert!(connection.is_connected());

        connection.disconnect().await;
    }

    #[tokio::test]
    async fn gives_up_after_bounded_attempts() {
        // One good transport, then every dial refused.
        let (connector, _sent, _closed) = MockConnector::new(vec![vec![None]]);
        let config = fast_config().with_max_reconnect_attempts(2);
        let (_connection, mut events) = Connection::open(connector, config);

        let _ = events.recv().await; // Connected

        let mut reconnecting = 0;
        loop {
            match events.recv().await.unwrap() {
                ServerEvent::Reconnecting { .. } => reconnecting += 1,
                ServerEvent::Disconnected { reason } => {
                    assert_eq!(reason.as_deref(), Some("reconnect attempts exhausted"));
                    break;
                }
                other => panic!("unexpected event: {other:?}"),
            }
        }
        assert_eq!(reconnecting, 2);
    }

    #[tokio::test]
    async fn credential_rejection_stops_reconnection() {
        let rejected = serde_json::to_string(&ServerEvent::ConnectionRejected {
            message: "bad token".into(),
            error_code: crate::error_codes::ErrorCode::InvalidToken,
        })
        .unwrap();
        // A second script is available; it must never be dialed.
        let (connector, _sent, closed) = MockConnector::new(vec![
            vec![Some(Ok(rejected))],
            vec![Some(Ok(ready_json()))],
        ]);
        let (_connection, mut events) = Connection::open(connector, fast_config());

        let _ = events.recv().await; // Connected
        let ev = events.recv().await.unwrap();
        assert!(matches!(ev, ServerEvent::ConnectionRejected { .. }));

        let ev = events.recv().await.unwrap();
        if let ServerEvent::Disconnected { reason } = ev {
            assert!(reason.unwrap().contains("credential rejected"));
        } else {
            panic!("expected Disconnected, got {ev:?}");
        }
        assert!(closed.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn force_disconnect_stops_reconnection() {
        let forced = serde_json::to_string(&ServerEvent::ForceDisconnect {
            reason: "session superseded".into(),
        })
        .unwrap();
        let (connector, _sent, _closed) =
            MockConnector::new(vec![vec![Some(Ok(forced))], vec![Some(Ok(ready_json()))]]);
        let (_connection, mut events) = Connection::open(connector, fast_config());

        let _ = events.recv().await; // Connected
        let _ = events.recv().await; // ForceDisconnect

        let ev = events.recv().await.unwrap();
        assert!(matches!(ev, ServerEvent::Disconnected { .. }));
    }

    #[tokio::test]
    async fn raw_listener_runs_and_unsubscribes() {
        let (connector, _sent, _closed) = MockConnector::new(vec![vec![
            Some(Ok(ready_json())),
            Some(Ok(ready_json())),
        ]]);
        let (mut connection, mut events) = Connection::open(connector, fast_config());

        let hits = Arc::new(AtomicU64::new(0));
        let hits_in_handler = Arc::clone(&hits);
        let id = connection.on(EventKind::ConnectionReady, move |_event| {
            hits_in_handler.fetch_add(1, Ordering::Relaxed);
        });

        let _ = events.recv().await; // Connected
        let _ = events.recv().await; // ConnectionReady #1
        assert_eq!(hits.load(Ordering::Relaxed), 1);

        connection.off(EventKind::ConnectionReady, id);
        // Unknown id removal is a no-op.
        connection.off(EventKind::ConnectionReady, id);

        let _ = events.recv().await; // ConnectionReady #2
        assert_eq!(hits.load(Ordering::Relaxed), 1);

        connection.disconnect().await;
    }

    #[tokio::test]
    async fn double_disconnect_does_not_panic() {
        let (connector, _sent, _closed) = MockConnector::new(vec![vec![Some(Ok(ready_json()))]]);
        let (mut connection, mut events) = Connection::open(connector, fast_config());

        let _ = events.recv().await; // Connected
        connection.disconnect().await;
        connection.disconnect().await;
    }

    #[tokio::test]
    async fn disconnect_emits_final_disconnected() {
        let (connector, _sent, closed) = MockConnector::new(vec![vec![Some(Ok(ready_json()))]]);
        let (mut connection, mut events) = Connection::open(connector, fast_config());

        let _ = events.recv().await; // Connected
        let _ = events.recv().await; // ConnectionReady

        connection.disconnect().await;

        let ev = events.recv().await.unwrap();
        if let ServerEvent::Disconnected { reason } = ev {
            assert_eq!(reason.as_deref(), Some("client shut down"));
        } else {
            panic!("expected Disconnected, got {ev:?}");
        }
        assert!(closed.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn malformed_frame_is_skipped() {
        let (connector, _sent, _closed) = MockConnector::new(vec![vec![
            Some(Ok("{not json".into())),
            Some(Ok(ready_json())),
        ]]);
        let (mut connection, mut events) = Connection::open(connector, fast_config());

        let _ = events.recv().await; // Connected
        let ev = events.recv().await.unwrap();
        assert!(matches!(ev, ServerEvent::ConnectionReady { .. }));

        connection.disconnect().await;
    }

    #[test]
    fn backoff_is_capped() {
        let base = Duration::from_millis(500);
        let max = Duration::from_secs(8);
        assert_eq!(backoff_delay(base, max, 1), Duration::from_millis(500));
        assert_eq!(backoff_delay(base, max, 2), Duration::from_secs(1));
        assert_eq!(backoff_delay(base, max, 5), Duration::from_secs(8));
        assert_eq!(backoff_delay(base, max, 30), Duration::from_secs(8));
    }

    #[test]
    fn config_defaults() {
        let config = ConnectionConfig::default();
        assert_eq!(config.event_channel_capacity, 256);
        assert_eq!(config.max_reconnect_attempts, 5);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(1));
    }

    #[test]
    fn event_channel_capacity_is_clamped_to_one() {
        let config = ConnectionConfig::default().with_event_channel_capacity(0);
        assert_eq!(config.event_channel_capacity, 1);
    }
}
