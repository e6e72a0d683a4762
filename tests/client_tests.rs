#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Integration tests for the session layer and event fan-out.

mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use overtime_client::error_codes::ErrorCode;
use overtime_client::interceptor::EventFilter;
use overtime_client::protocol::{ChatChannel, EventKind, GamePhase, JoinedRoomPayload, ServerEvent};
use overtime_client::room::{MembershipPhase, RoomController};
use overtime_client::session::SessionSignal;

use common::{
    chat_message, pid, player, snapshot_with, start_lobby, wait_until, FakeChatHistory,
    FakeRoomDirectory,
};

// ════════════════════════════════════════════════════════════════════
// Global authentication teardown
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn any_rest_401_tears_the_session_down() {
    let mut lobby = start_lobby().await;
    assert!(lobby.session.is_connected().await);

    // Any REST collaborator wires this hook; simulate a 401 arriving from
    // an arbitrary, unrelated call site.
    let hook = lobby.session.unauthorized_hook();
    hook();

    loop {
        match lobby.signals.recv().await.unwrap() {
            SessionSignal::LoggedOut { reason } => {
                assert_eq!(reason, "unauthorized");
                break;
            }
            SessionSignal::ConnectionLost { .. } => {}
            other => panic!("unexpected signal: {other:?}"),
        }
    }
    assert!(!lobby.session.is_connected().await);
}

#[tokio::test]
async fn channel_credential_rejection_forces_logout() {
    let mut lobby = start_lobby().await;

    lobby.push_event(&ServerEvent::ConnectionRejected {
        message: "token expired".into(),
        error_code: ErrorCode::TokenExpired,
    });

    loop {
        match lobby.signals.recv().await.unwrap() {
            SessionSignal::LoggedOut { reason } => {
                assert_eq!(reason, "token expired");
                break;
            }
            SessionSignal::ConnectionLost { .. } => {}
            other => panic!("unexpected signal: {other:?}"),
        }
    }
}

// ════════════════════════════════════════════════════════════════════
// Interceptor behavior over the live stream
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn panicking_interceptor_does_not_starve_lower_priority() {
    let lobby = start_lobby().await;
    let registry = lobby.session.registry();

    let survivor_hits = Arc::new(AtomicU32::new(0));
    registry.register(EventFilter::Kind(EventKind::ReadyReset), 0, |_| {
        panic!("interceptor bug");
    });
    let hits = Arc::clone(&survivor_hits);
    registry.register(EventFilter::Kind(EventKind::ReadyReset), 1, move |_| {
        hits.fetch_add(1, Ordering::Relaxed);
    });

    lobby.push_event(&ServerEvent::ReadyReset {
        room_id: uuid::Uuid::from_u128(5),
    });
    wait_until(Duration::from_secs(1), || {
        survivor_hits.load(Ordering::Relaxed) == 1
    })
    .await;
}

#[tokio::test]
async fn wildcard_observes_the_whole_stream_after_exact_handlers() {
    let lobby = start_lobby().await;
    let registry = lobby.session.registry();

    let order: Arc<StdMutex<Vec<&'static str>>> = Arc::new(StdMutex::new(Vec::new()));

    let log = Arc::clone(&order);
    registry.register(EventFilter::Any, 0, move |event| {
        if matches!(event, ServerEvent::ReadyReset { .. }) {
            log.lock().unwrap().push("wildcard");
        }
    });
    let log = Arc::clone(&order);
    registry.register(EventFilter::Kind(EventKind::ReadyReset), 0, move |_| {
        log.lock().unwrap().push("exact");
    });

    lobby.push_event(&ServerEvent::ReadyReset {
        room_id: uuid::Uuid::from_u128(5),
    });
    wait_until(Duration::from_secs(1), || order.lock().unwrap().len() == 2).await;
    assert_eq!(*order.lock().unwrap(), vec!["exact", "wildcard"]);
}

// ════════════════════════════════════════════════════════════════════
// End-to-end lobby → game flow
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn lobby_to_game_walkthrough() {
    let mut lobby = start_lobby().await;
    let room_id = uuid::Uuid::from_u128(0xF10);
    let me = pid(1);

    let directory = FakeRoomDirectory::new(snapshot_with(
        room_id,
        1,
        vec![player(1, "mina"), player(2, "joon")],
    ));
    let room = RoomController::attach(
        &lobby.session.registry(),
        lobby.sender.clone(),
        directory.clone() as Arc<dyn overtime_client::RoomDirectory>,
        lobby.session.signals(),
        me,
    );

    // Join and get acknowledged.
    room.join_room(room_id, Some("hunter2".into())).unwrap();
    lobby.push_event(&ServerEvent::JoinedRoom(Box::new(JoinedRoomPayload {
        room_id,
        players: vec![player(1, "mina"), player(2, "joon")],
    })));
    wait_until(Duration::from_secs(1), || {
        room.membership_phase() == MembershipPhase::Joined
    })
    .await;

    // Lobby chat works while waiting.
    let history = FakeChatHistory::new(Vec::new());
    let chat = overtime_client::chat::ChatMerger::attach(
        &lobby.session.registry(),
        lobby.sender.clone(),
        history.clone() as Arc<dyn overtime_client::ChatHistoryApi>,
        room_id,
        ChatChannel::Lobby,
    );
    lobby.push_event(&ServerEvent::LobbyMessage {
        message: chat_message(70, room_id, ChatChannel::Lobby, "ready when you are"),
    });
    wait_until(Duration::from_secs(1), || chat.messages().len() == 1).await;

    // Game starts; the projector mirrors the server's phase progression.
    let projector = overtime_client::game::GameProjector::attach(
        &lobby.session.registry(),
        lobby.sender.clone(),
        room_id,
        vec![pid(1), pid(2)],
    );
    lobby.push_event(&ServerEvent::GameCreated { room_id });
    wait_until(Duration::from_secs(1), || {
        matches!(projector.phase(), Some(GamePhase::Waiting))
    })
    .await;

    // Chat flips to the game channel.
    chat.set_channel(ChatChannel::Game);
    assert!(chat.messages().is_empty());

    lobby.push_event(&ServerEvent::GameFinished { room_id });
    wait_until(Duration::from_secs(1), || {
        matches!(projector.phase(), Some(GamePhase::Finished))
    })
    .await;

    let _ = lobby.signals.try_recv();
}
