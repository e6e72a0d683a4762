//! Session controller: owns the at-most-one live channel connection.
//!
//! The channel connection is process-wide shared state with an explicit
//! lifecycle — created when the session authenticates, destroyed on
//! logout, re-created when the credential changes. [`Session`] is the
//! lifecycle-managed owner: all access goes through it, and it enforces
//! the single-instance invariant (opening a connection for a new
//! credential first tears the old one down, so a credential can never
//! leak across logins).
//!
//! The session also runs the fan-in dispatcher: every inbound event is
//! handed to the [`InterceptorRegistry`], and the handful of
//! session-global events (credential rejection, forced disconnect,
//! reconnection progress) are translated into [`SessionSignal`]s for the
//! embedding application to act on (e.g. route to the login screen).
//! Authentication failures are global and fatal: a rejected channel
//! credential or any REST 401 ends in [`SessionSignal::LoggedOut`],
//! regardless of which feature triggered the call.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::api::UnauthorizedHook;
use crate::connection::{CommandSender, Connection, ConnectionConfig};
use crate::error::Result;
use crate::interceptor::InterceptorRegistry;
use crate::protocol::{RoomId, ServerEvent};
use crate::transport::Connector;

// ── Signals ─────────────────────────────────────────────────────────

/// Session-level outcomes the embedding application must react to.
/// These are the "navigate away" surface: the library never routes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionSignal {
    /// The session is over. Clear credentials and show the login entry
    /// point.
    LoggedOut { reason: String },
    /// A room this session was in no longer exists. Navigate away from
    /// any room-scoped view.
    RoomClosed { room_id: RoomId },
    /// The channel is attempting to reconnect; show a transient
    /// "reconnecting" state, not an error.
    Reconnecting { attempt: u32 },
    /// The channel closed for good without a logout.
    ConnectionLost { reason: Option<String> },
}

/// Cheaply cloneable sender half for [`SessionSignal`]s, handed to
/// feature controllers.
#[derive(Clone)]
pub struct SignalSink {
    tx: mpsc::UnboundedSender<SessionSignal>,
}

impl SignalSink {
    /// Emit a signal. Dropped silently if the receiver is gone.
    pub fn send(&self, signal: SessionSignal) {
        let _ = self.tx.send(signal);
    }
}

impl std::fmt::Debug for SignalSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalSink").finish()
    }
}

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for a [`Session`].
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Tuning for the underlying channel connection.
    pub connection: ConnectionConfig,
}

impl SessionConfig {
    /// Override the channel connection tuning.
    #[must_use]
    pub fn with_connection(mut self, connection: ConnectionConfig) -> Self {
        self.connection = connection;
        self
    }
}

// ── Session ─────────────────────────────────────────────────────────

struct ActiveConnection {
    credential: String,
    connection: Connection,
    dispatcher: tokio::task::JoinHandle<()>,
}

struct SessionInner {
    config: SessionConfig,
    registry: InterceptorRegistry,
    signal_tx: mpsc::UnboundedSender<SessionSignal>,
    active: Mutex<Option<ActiveConnection>>,
}

/// Lifecycle-managed owner of the single channel connection.
///
/// Cheaply cloneable; clones share the same underlying session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Create a session and the receiver for its [`SessionSignal`]s.
    pub fn new(config: SessionConfig) -> (Self, mpsc::UnboundedReceiver<SessionSignal>) {
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let session = Self {
            inner: Arc::new(SessionInner {
                config,
                registry: InterceptorRegistry::new(),
                signal_tx,
                active: Mutex::new(None),
            }),
        };
        (session, signal_rx)
    }

    /// The shared interceptor registry all features register with.
    pub fn registry(&self) -> InterceptorRegistry {
        self.inner.registry.clone()
    }

    /// A sender for session signals, for feature controllers.
    pub fn signals(&self) -> SignalSink {
        SignalSink {
            tx: self.inner.signal_tx.clone(),
        }
    }

    /// Open (or reuse) the channel connection for `credential`.
    ///
    /// Idempotent: if a connection for the same credential is already
    /// live, it is reused and `connector` is never dialed. A different
    /// credential tears the prior connection down first.
    ///
    /// # Errors
    ///
    /// Currently infallible in practice (dialing happens in the
    /// background loop), but kept fallible for forward compatibility.
    pub async fn connect(
        &self,
        credential: &str,
        connector: impl Connector,
    ) -> Result<CommandSender> {
        let mut active = self.inner.active.lock().await;

        if let Some(existing) = active.as_ref() {
            if existing.credential == credential
                && existing.connection.status() != crate::connection::ConnectionStatus::Disconnected
            {
                debug!("session: reusing live connection");
                return Ok(existing.connection.sender());
            }
        }

        // Tear down any prior connection before dialing with a (possibly
        // different) credential.
        if let Some(mut old) = active.take() {
            info!("session: replacing prior connection");
            old.connection.disconnect().await;
            old.dispatcher.abort();
        }

        let (connection, event_rx) =
            Connection::open(connector, self.inner.config.connection.clone());
        let sender = connection.sender();

        let dispatcher = tokio::spawn(dispatch_loop(
            event_rx,
            self.inner.registry.clone(),
            self.inner.signal_tx.clone(),
        ));

        *active = Some(ActiveConnection {
            credential: credential.to_string(),
            connection,
            dispatcher,
        });

        Ok(sender)
    }

    /// Returns `true` if a connection exists and its transport is up.
    pub async fn is_connected(&self) -> bool {
        let active = self.inner.active.lock().await;
        active
            .as_ref()
            .map(|a| a.connection.is_connected())
            .unwrap_or(false)
    }

    /// A [`CommandSender`] for the live connection, if any.
    pub async fn sender(&self) -> Option<CommandSender> {
        let active = self.inner.active.lock().await;
        active.as_ref().map(|a| a.connection.sender())
    }

    /// Close the connection without ending the session. Safe to call when
    /// already disconnected.
    pub async fn disconnect(&self) {
        self.teardown().await;
    }

    /// End the session: tear the connection down and signal
    /// [`SessionSignal::LoggedOut`].
    pub async fn logout(&self, reason: &str) {
        self.teardown().await;
        let _ = self.inner.signal_tx.send(SessionSignal::LoggedOut {
            reason: reason.to_string(),
        });
    }

    /// The hook REST collaborators must install: any 401 tears the whole
    /// session down and routes to login, regardless of call site.
    pub fn unauthorized_hook(&self) -> UnauthorizedHook {
        let session = self.clone();
        Arc::new(move || {
            warn!("REST collaborator returned 401; ending session");
            let session = session.clone();
            tokio::spawn(async move {
                session.logout("unauthorized").await;
            });
        })
    }

    async fn teardown(&self) {
        let mut active = self.inner.active.lock().await;
        if let Some(mut old) = active.take() {
            old.connection.disconnect().await;
            old.dispatcher.abort();
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("registrations", &self.inner.registry.len())
            .finish()
    }
}

// ── Dispatcher ──────────────────────────────────────────────────────

/// Fan every inbound event into the registry, then translate the
/// session-global ones into signals.
async fn dispatch_loop(
    mut event_rx: mpsc::Receiver<ServerEvent>,
    registry: InterceptorRegistry,
    signal_tx: mpsc::UnboundedSender<SessionSignal>,
) {
    while let Some(event) = event_rx.recv().await {
        registry.dispatch(&event);

        match &event {
            ServerEvent::ConnectionRejected { message, .. } => {
                warn!("channel credential rejected: {message}");
                let _ = signal_tx.send(SessionSignal::LoggedOut {
                    reason: message.clone(),
                });
            }
            ServerEvent::ForceDisconnect { reason } => {
                let _ = signal_tx.send(SessionSignal::ConnectionLost {
                    reason: Some(reason.clone()),
                });
            }
            ServerEvent::Reconnecting { attempt } => {
                let _ = signal_tx.send(SessionSignal::Reconnecting { attempt: *attempt });
            }
            ServerEvent::Disconnected { reason } => {
                let _ = signal_tx.send(SessionSignal::ConnectionLost {
                    reason: reason.clone(),
                });
            }
            _ => {}
        }
    }
    debug!("session dispatcher exited");
}

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
    use crate::error::OvertimeError;
    use crate::transport::Transport;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// A transport that stays silent until dropped.
    struct IdleTransport;

    #[async_trait]
    impl Transport for IdleTransport {
        async fn send(&mut self, _frame: String) -> std::result::Result<(), OvertimeError> {
            Ok(())
        }
        async fn recv(&mut self) -> Option<std::result::Result<String, OvertimeError>> {
            std::future::pending().await
        }
        async fn close(&mut self) -> std::result::Result<(), OvertimeError> {
            Ok(())
        }
    }

    /// Counts dials; every dial succeeds with an [`IdleTransport`].
    struct CountingConnector {
        dials: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Connector for CountingConnector {
        async fn connect(&self) -> std::result::Result<Box<dyn Transport>, OvertimeError> {
            self.dials.fetch_add(1, Ordering::Relaxed);
            Ok(Box::new(IdleTransport))
        }
    }

    fn counting() -> (CountingConnector, Arc<AtomicU32>) {
        let dials = Arc::new(AtomicU32::new(0));
        (
            CountingConnector {
                dials: Arc::clone(&dials),
            },
            dials,
        )
    }

    async fn settle() {
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
    }

    #[tokio::test]
    async fn same_credential_reuses_connection() {
        let (session, _signals) = Session::new(SessionConfig::default());

        let (connector_a, dials) = counting();
        session.connect("token-1", connector_a).await.unwrap();
        settle().await;

        let (connector_b, dials_b) = counting();
        session.connect("token-1", connector_b).await.unwrap();
        settle().await;

        assert_eq!(dials.load(Ordering::Relaxed), 1);
        assert_eq!(dials_b.load(Ordering::Relaxed), 0);
        assert!(session.is_connected().await);

        session.disconnect().await;
    }

    #[tokio::test]
    async fn new_credential_replaces_connection() {
        let (session, _signals) = Session::new(SessionConfig::default());

        let (connector_a, dials_a) = counting();
        session.connect("token-1", connector_a).await.unwrap();
        settle().await;

        let (connector_b, dials_b) = counting();
        session.connect("token-2", connector_b).await.unwrap();
        settle().await;

        assert_eq!(dials_a.load(Ordering::Relaxed), 1);
        assert_eq!(dials_b.load(Ordering::Relaxed), 1);
        assert!(session.is_connected().await);

        session.disconnect().await;
    }

    #[tokio::test]
    async fn logout_clears_connection_and_signals() {
        let (session, mut signals) = Session::new(SessionConfig::default());

        let (connector, _dials) = counting();
        session.connect("token-1", connector).await.unwrap();
        settle().await;

        session.logout("done for the day").await;

        assert!(!session.is_connected().await);
        // ConnectionLost (from teardown) may precede the LoggedOut signal.
        loop {
            match signals.recv().await.unwrap() {
                SessionSignal::LoggedOut { reason } => {
                    assert_eq!(reason, "done for the day");
                    break;
                }
                SessionSignal::ConnectionLost { .. } => {}
                other => panic!("unexpected signal: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn unauthorized_hook_ends_session() {
        let (session, mut signals) = Session::new(SessionConfig::default());

        let (connector, _dials) = counting();
        session.connect("token-1", connector).await.unwrap();
        settle().await;

        let hook = session.unauthorized_hook();
        hook();

        loop {
            match signals.recv().await.unwrap() {
                SessionSignal::LoggedOut { reason } => {
                    assert_eq!(reason, "unauthorized");
                    break;
                }
                SessionSignal::ConnectionLost { .. } => {}
                other => panic!("unexpected signal: {other:?}"),
            }
        }
        assert!(!session.is_connected().await);
    }

    #[tokio::test]
    async fn disconnect_when_never_connected_is_noop() {
        let (session, _signals) = Session::new(SessionConfig::default());
        session.disconnect().await;
        assert!(!session.is_connected().await);
    }
}
