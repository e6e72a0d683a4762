#![allow(dead_code)]
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Shared test utilities for Overtime client integration tests.
//!
//! Provides a channel-driven [`StreamingTransport`] (tests inject server
//! frames at any time and observe every frame the client sends), fakes
//! for the REST collaborator ports, and small wait/builder helpers.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use overtime_client::api::{ChatHistoryApi, RoomDirectory};
use overtime_client::connection::{CommandSender, ConnectionConfig};
use overtime_client::error::OvertimeError;
use overtime_client::protocol::{
    ChatChannel, ChatMessage, ClientCommand, Player, PlayerId, RoomId, RoomSnapshot, ServerEvent,
};
use overtime_client::session::{Session, SessionConfig, SessionSignal};
use overtime_client::transport::{Connector, Transport};

// ── Streaming transport & connector ─────────────────────────────────

/// A transport driven by the test: frames pushed through `inject` come out
/// of `recv`, and every frame the client sends is recorded.
pub struct StreamingTransport {
    incoming: mpsc::UnboundedReceiver<String>,
    sent: Arc<StdMutex<Vec<String>>>,
}

#[async_trait]
impl Transport for StreamingTransport {
    async fn send(&mut self, frame: String) -> Result<(), OvertimeError> {
        self.sent.lock().unwrap().push(frame);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String, OvertimeError>> {
        // Sender dropped = clean close.
        self.incoming.recv().await.map(Ok)
    }

    async fn close(&mut self) -> Result<(), OvertimeError> {
        Ok(())
    }
}

/// Hands out exactly one [`StreamingTransport`]; any redial fails.
pub struct StreamingConnector {
    transport: StdMutex<Option<StreamingTransport>>,
}

impl StreamingConnector {
    pub fn new() -> (Self, mpsc::UnboundedSender<String>, Arc<StdMutex<Vec<String>>>) {
        let (inject_tx, inject_rx) = mpsc::unbounded_channel();
        let sent = Arc::new(StdMutex::new(Vec::new()));
        let connector = Self {
            transport: StdMutex::new(Some(StreamingTransport {
                incoming: inject_rx,
                sent: Arc::clone(&sent),
            })),
        };
        (connector, inject_tx, sent)
    }
}

#[async_trait]
impl Connector for StreamingConnector {
    async fn connect(&self) -> Result<Box<dyn Transport>, OvertimeError> {
        match self.transport.lock().unwrap().take() {
            Some(transport) => Ok(Box::new(transport)),
            None => Err(OvertimeError::TransportReceive("redial refused".into())),
        }
    }
}

// ── Session harness ─────────────────────────────────────────────────

/// A live session over a streaming transport, ready for controllers.
pub struct TestLobby {
    pub session: Session,
    pub signals: mpsc::UnboundedReceiver<SessionSignal>,
    pub sender: CommandSender,
    pub inject: mpsc::UnboundedSender<String>,
    pub sent: Arc<StdMutex<Vec<String>>>,
}

impl TestLobby {
    /// Push a server event into the inbound stream.
    pub fn push_event(&self, event: &ServerEvent) {
        let frame = serde_json::to_string(event).unwrap();
        self.inject.send(frame).unwrap();
    }

    /// Every command the client has sent so far, deserialized.
    pub fn sent_commands(&self) -> Vec<ClientCommand> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|frame| serde_json::from_str(frame).unwrap())
            .collect()
    }
}

/// Start a session over a fresh streaming transport and wait for the
/// channel to come up.
pub async fn start_lobby() -> TestLobby {
    let config = SessionConfig::default().with_connection(
        ConnectionConfig::default()
            .with_reconnect_base_delay(Duration::from_millis(5))
            .with_max_reconnect_attempts(1),
    );
    let (session, signals) = Session::new(config);
    let (connector, inject, sent) = StreamingConnector::new();
    let sender = session.connect("test-token", connector).await.unwrap();

    let probe = sender.clone();
    wait_until(Duration::from_secs(2), move || probe.is_connected()).await;

    TestLobby {
        session,
        signals,
        sender,
        inject,
        sent,
    }
}

// ── Wait helpers ────────────────────────────────────────────────────

/// Poll `cond` every 10 ms until it holds or `timeout` elapses (panics).
pub async fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if cond() {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("condition not met within {timeout:?}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Give spawned tasks a moment to run.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

// ── Builders ────────────────────────────────────────────────────────

pub fn pid(n: u128) -> PlayerId {
    uuid::Uuid::from_u128(n)
}

pub fn player(n: u128, name: &str) -> Player {
    Player {
        id: pid(n),
        name: name.into(),
        ready: false,
    }
}

pub fn snapshot_with(room_id: RoomId, host: u128, players: Vec<Player>) -> RoomSnapshot {
    RoomSnapshot {
        id: room_id,
        name: "test room".into(),
        host_id: pid(host),
        max_players: 8,
        players,
    }
}

pub fn chat_message(n: u128, room_id: RoomId, channel: ChatChannel, body: &str) -> ChatMessage {
    ChatMessage {
        id: uuid::Uuid::from_u128(n),
        room_id,
        sender_id: pid(1),
        sender_name: "mina".into(),
        channel,
        body: body.into(),
        sent_at: "2025-11-02T09:30:00Z".into(),
        encrypted: false,
    }
}

// ── REST collaborator fakes ─────────────────────────────────────────

/// In-memory [`RoomDirectory`] that counts fetches.
pub struct FakeRoomDirectory {
    snapshot: StdMutex<RoomSnapshot>,
    fetches: AtomicU32,
}

impl FakeRoomDirectory {
    pub fn new(snapshot: RoomSnapshot) -> Arc<Self> {
        Arc::new(Self {
            snapshot: StdMutex::new(snapshot),
            fetches: AtomicU32::new(0),
        })
    }

    pub fn set_snapshot(&self, snapshot: RoomSnapshot) {
        *self.snapshot.lock().unwrap() = snapshot;
    }

    pub fn fetch_count(&self) -> u32 {
        self.fetches.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl RoomDirectory for FakeRoomDirectory {
    async fn fetch_room(&self, _room_id: RoomId) -> Result<RoomSnapshot, OvertimeError> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        Ok(self.snapshot.lock().unwrap().clone())
    }
}

/// In-memory [`ChatHistoryApi`] that counts fetches.
pub struct FakeChatHistory {
    page: StdMutex<Vec<ChatMessage>>,
    fetches: AtomicU32,
}

impl FakeChatHistory {
    pub fn new(page: Vec<ChatMessage>) -> Arc<Self> {
        Arc::new(Self {
            page: StdMutex::new(page),
            fetches: AtomicU32::new(0),
        })
    }

    pub fn fetch_count(&self) -> u32 {
        self.fetches.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ChatHistoryApi for FakeChatHistory {
    async fn fetch_page(
        &self,
        _room_id: RoomId,
        _page: u32,
        _per_page: u32,
    ) -> Result<Vec<ChatMessage>, OvertimeError> {
        self.fetches.fetch_add(1, Ordering::Relaxed);
        Ok(self.page.lock().unwrap().clone())
    }
}
