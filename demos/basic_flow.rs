//! # Basic Flow Example
//!
//! Demonstrates a complete Overtime client lifecycle:
//!
//! 1. Open the authenticated event channel
//! 2. Join a room and mark ourselves ready
//! 3. Watch membership, chat, and game-phase events stream in
//! 4. Shut down gracefully on Ctrl+C or logout
//!
//! ## Running
//!
//! ```sh
//! # Start an Overtime lobby server, then:
//! OVERTIME_TOKEN=dev-token OVERTIME_ROOM=<uuid> cargo run --example basic_flow
//!
//! # Override the endpoints:
//! OVERTIME_WS_URL=ws://my-server:4000/ws \
//! OVERTIME_REST_URL=http://my-server:4000/api \
//! cargo run --example basic_flow
//! ```

use std::sync::Arc;

use overtime_client::{
    ChatChannel, ChatHistoryApi, ChatMerger, EventFilter, HttpApi, RoomController, RoomDirectory,
    ServerEvent, Session, SessionConfig, SessionSignal, WebSocketConnector,
};

/// Default endpoints when the environment does not override them.
const DEFAULT_WS_URL: &str = "ws://localhost:4000/ws";
const DEFAULT_REST_URL: &str = "http://localhost:4000/api";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Logging ─────────────────────────────────────────────────────
    // Set `RUST_LOG=debug` for verbose output.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    // ── Configuration ───────────────────────────────────────────────
    let ws_url = std::env::var("OVERTIME_WS_URL").unwrap_or_else(|_| DEFAULT_WS_URL.to_string());
    let rest_url =
        std::env::var("OVERTIME_REST_URL").unwrap_or_else(|_| DEFAULT_REST_URL.to_string());
    let token = std::env::var("OVERTIME_TOKEN").unwrap_or_else(|_| "dev-token".to_string());
    let room_id: overtime_client::protocol::RoomId = std::env::var("OVERTIME_ROOM")
        .unwrap_or_else(|_| uuid::Uuid::nil().to_string())
        .parse()?;

    // ── Session ─────────────────────────────────────────────────────
    let (session, mut signals) = Session::new(SessionConfig::default());

    let connector = WebSocketConnector::new(ws_url.clone(), token.clone());
    session.connect(&token, connector).await?;
    tracing::info!("Channel opening against {ws_url}");

    // REST collaborators share the session's global 401 handling.
    let api = Arc::new(
        HttpApi::new(rest_url, &token).with_unauthorized_hook(session.unauthorized_hook()),
    );

    // ── Observe the raw stream ──────────────────────────────────────
    // A wildcard interceptor makes a handy event logger; the local
    // player id arrives on the first `connection_ready`.
    let registry = session.registry();
    let (me_tx, me_rx) = tokio::sync::oneshot::channel();
    let me_tx = std::sync::Mutex::new(Some(me_tx));
    registry.register(EventFilter::Any, 100, move |event| {
        tracing::debug!("event: {event:?}");
        if let ServerEvent::ConnectionReady { player_id } = event {
            if let Ok(mut slot) = me_tx.lock() {
                if let Some(tx) = slot.take() {
                    let _ = tx.send(*player_id);
                }
            }
        }
    });

    let me = me_rx.await?;
    tracing::info!("Authenticated as player {me}");

    // ── Room & chat ─────────────────────────────────────────────────
    let sender = session
        .sender()
        .await
        .ok_or("channel closed before setup")?;

    let room = RoomController::attach(
        &registry,
        sender.clone(),
        api.clone() as Arc<dyn RoomDirectory>,
        session.signals(),
        me,
    );
    let chat = ChatMerger::attach(
        &registry,
        sender.clone(),
        api.clone() as Arc<dyn ChatHistoryApi>,
        room_id,
        ChatChannel::Lobby,
    );

    room.join_room(room_id, None)?;
    tracing::info!("Join requested for room {room_id}");

    chat.seed().await?;
    chat.send_message("hello from the rust client")?;

    // React to the join acknowledgment by readying up.
    let ready_room = room_id;
    let ready_sender = sender.clone();
    registry.register(
        EventFilter::Kind(overtime_client::protocol::EventKind::JoinedRoom),
        50,
        move |_| {
            let _ = ready_sender.emit(overtime_client::ClientCommand::ToggleReady {
                room_id: ready_room,
                ready: true,
            });
        },
    );

    // ── Signal loop ─────────────────────────────────────────────────
    loop {
        tokio::select! {
            signal = signals.recv() => {
                let Some(signal) = signal else {
                    tracing::info!("Signal channel closed, exiting");
                    break;
                };
                match signal {
                    SessionSignal::LoggedOut { reason } => {
                        tracing::warn!("Logged out: {reason}");
                        break;
                    }
                    SessionSignal::RoomClosed { room_id } => {
                        tracing::warn!("Room {room_id} is gone; navigating away");
                        break;
                    }
                    SessionSignal::Reconnecting { attempt } => {
                        tracing::info!("Reconnecting (attempt {attempt})…");
                    }
                    SessionSignal::ConnectionLost { reason } => {
                        tracing::warn!(
                            "Connection lost: {}",
                            reason.as_deref().unwrap_or("unknown")
                        );
                        break;
                    }
                }
            }

            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Ctrl+C received, shutting down…");
                break;
            }
        }
    }

    // ── Cleanup ─────────────────────────────────────────────────────
    let _ = room.leave_room();
    session.disconnect().await;
    tracing::info!("Session closed. Goodbye!");
    Ok(())
}
