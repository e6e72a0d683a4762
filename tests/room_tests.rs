#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Integration tests for the room membership controller.
//!
//! Uses the shared streaming transport from `tests/common` so server
//! events can be injected at arbitrary points in the join handshake.

mod common;

use std::time::Duration;

use overtime_client::error::OvertimeError;
use overtime_client::error_codes::ErrorCode;
use overtime_client::protocol::{ClientCommand, JoinedRoomPayload, ServerEvent};
use overtime_client::room::{MembershipPhase, RoomController};
use overtime_client::session::SessionSignal;

use common::{
    pid, player, settle, snapshot_with, start_lobby, wait_until, FakeRoomDirectory, TestLobby,
};

const ME: u128 = 1;

fn room_id() -> overtime_client::protocol::RoomId {
    uuid::Uuid::from_u128(0xA11CE)
}

fn attach_controller(
    lobby: &TestLobby,
    directory: &std::sync::Arc<FakeRoomDirectory>,
) -> RoomController {
    RoomController::attach(
        &lobby.session.registry(),
        lobby.sender.clone(),
        directory.clone() as std::sync::Arc<dyn overtime_client::RoomDirectory>,
        lobby.session.signals(),
        pid(ME),
    )
}

fn joined_room_event() -> ServerEvent {
    ServerEvent::JoinedRoom(Box::new(JoinedRoomPayload {
        room_id: room_id(),
        players: vec![player(ME, "mina"), player(2, "joon")],
    }))
}

fn join_failed_event(code: ErrorCode) -> ServerEvent {
    ServerEvent::JoinFailed {
        room_id: room_id(),
        reason: code.description().to_string(),
        error_code: Some(code),
    }
}

fn join_count(lobby: &TestLobby) -> usize {
    lobby
        .sent_commands()
        .iter()
        .filter(|c| matches!(c, ClientCommand::JoinRoom { .. }))
        .count()
}

// ════════════════════════════════════════════════════════════════════
// Join deduplication
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn join_is_idempotent_once_joined() {
    let mut lobby = start_lobby().await;
    let directory = FakeRoomDirectory::new(snapshot_with(
        room_id(),
        ME,
        vec![player(ME, "mina"), player(2, "joon")],
    ));
    let controller = attach_controller(&lobby, &directory);

    controller.join_room(room_id(), None).unwrap();
    wait_until(Duration::from_secs(1), || join_count(&lobby) == 1).await;

    lobby.push_event(&joined_room_event());
    wait_until(Duration::from_secs(1), || {
        controller.membership_phase() == MembershipPhase::Joined
    })
    .await;

    // Joining the same room again resolves without a duplicate command.
    controller.join_room(room_id(), None).unwrap();
    settle().await;
    assert_eq!(join_count(&lobby), 1);

    let _ = lobby.signals.try_recv();
}

#[tokio::test]
async fn concurrent_join_fails_immediately() {
    let lobby = start_lobby().await;
    let directory = FakeRoomDirectory::new(snapshot_with(room_id(), ME, vec![player(ME, "mina")]));
    let controller = attach_controller(&lobby, &directory);

    controller.join_room(room_id(), None).unwrap();

    let other_room = uuid::Uuid::from_u128(0xB0B);
    let second = controller.join_room(other_room, None);
    assert!(matches!(second, Err(OvertimeError::AlreadyJoining(r)) if r == room_id()));

    // A third attempt at the same room while joining also fails.
    let third = controller.join_room(room_id(), None);
    assert!(matches!(third, Err(OvertimeError::AlreadyJoining(_))));

    settle().await;
    assert_eq!(join_count(&lobby), 1);
}

// ════════════════════════════════════════════════════════════════════
// Retry policy
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn recoverable_rejection_retries_until_detached() {
    let mut lobby = start_lobby().await;
    let directory = FakeRoomDirectory::new(snapshot_with(room_id(), ME, vec![player(ME, "mina")]));
    let mut controller = attach_controller(&lobby, &directory);

    controller.join_room(room_id(), None).unwrap();
    wait_until(Duration::from_secs(1), || join_count(&lobby) == 1).await;

    // First rejection: silent retry after the short delay.
    lobby.push_event(&join_failed_event(ErrorCode::RejoinCooldown));
    wait_until(Duration::from_secs(2), || join_count(&lobby) == 2).await;

    // Identical rejection: retried again — bounded only by lifetime.
    lobby.push_event(&join_failed_event(ErrorCode::RejoinCooldown));
    wait_until(Duration::from_secs(2), || join_count(&lobby) == 3).await;

    // A third rejection, then unmount before the timer fires: the retry
    // must be cancelled.
    lobby.push_event(&join_failed_event(ErrorCode::RejoinCooldown));
    settle().await;
    controller.detach();
    tokio::time::sleep(Duration::from_millis(1300)).await;
    assert_eq!(join_count(&lobby), 3);

    // No user-facing error was surfaced along the way.
    assert!(lobby.signals.try_recv().is_err());
}

#[tokio::test]
async fn rejoin_as_existing_player_is_silently_retried() {
    let lobby = start_lobby().await;
    let directory = FakeRoomDirectory::new(snapshot_with(room_id(), ME, vec![player(ME, "mina")]));
    let controller = attach_controller(&lobby, &directory);

    controller.join_room(room_id(), None).unwrap();
    wait_until(Duration::from_secs(1), || join_count(&lobby) == 1).await;

    lobby.push_event(&join_failed_event(ErrorCode::RejoinAsExistingPlayer));
    wait_until(Duration::from_secs(2), || join_count(&lobby) == 2).await;
}

#[tokio::test]
async fn room_gone_is_terminal_and_signals_navigation() {
    let mut lobby = start_lobby().await;
    let directory = FakeRoomDirectory::new(snapshot_with(room_id(), ME, vec![player(ME, "mina")]));
    let controller = attach_controller(&lobby, &directory);

    controller.join_room(room_id(), None).unwrap();
    wait_until(Duration::from_secs(1), || join_count(&lobby) == 1).await;

    lobby.push_event(&join_failed_event(ErrorCode::RoomNotFound));
    settle().await;

    assert_eq!(controller.membership_phase(), MembershipPhase::Idle);
    match lobby.signals.recv().await.unwrap() {
        SessionSignal::RoomClosed { room_id: closed } => assert_eq!(closed, room_id()),
        other => panic!("expected RoomClosed, got {other:?}"),
    }

    // No retry fires afterwards.
    tokio::time::sleep(Duration::from_millis(1300)).await;
    assert_eq!(join_count(&lobby), 1);
}

#[tokio::test]
async fn duplicate_pending_join_is_never_retried() {
    let lobby = start_lobby().await;
    let directory = FakeRoomDirectory::new(snapshot_with(room_id(), ME, vec![player(ME, "mina")]));
    let controller = attach_controller(&lobby, &directory);

    controller.join_room(room_id(), None).unwrap();
    wait_until(Duration::from_secs(1), || join_count(&lobby) == 1).await;

    lobby.push_event(&join_failed_event(ErrorCode::JoinAlreadyPending));
    settle().await;
    assert_eq!(controller.membership_phase(), MembershipPhase::Idle);

    tokio::time::sleep(Duration::from_millis(1300)).await;
    assert_eq!(join_count(&lobby), 1);
}

#[tokio::test]
async fn unclassified_rejection_retries_exactly_once() {
    let lobby = start_lobby().await;
    let directory = FakeRoomDirectory::new(snapshot_with(room_id(), ME, vec![player(ME, "mina")]));
    let controller = attach_controller(&lobby, &directory);

    controller.join_room(room_id(), None).unwrap();
    wait_until(Duration::from_secs(1), || join_count(&lobby) == 1).await;

    lobby.push_event(&join_failed_event(ErrorCode::RoomFull));
    // One retry after the longer delay.
    wait_until(Duration::from_secs(4), || join_count(&lobby) == 2).await;

    // Failing identically again gives up for good.
    lobby.push_event(&join_failed_event(ErrorCode::RoomFull));
    tokio::time::sleep(Duration::from_millis(3500)).await;
    assert_eq!(join_count(&lobby), 2);
    assert_eq!(controller.membership_phase(), MembershipPhase::Idle);
}

// ════════════════════════════════════════════════════════════════════
// Roster reconciliation
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn membership_deltas_coalesce_into_one_refresh() {
    let mut lobby = start_lobby().await;
    let directory = FakeRoomDirectory::new(snapshot_with(
        room_id(),
        ME,
        vec![player(ME, "mina"), player(2, "joon")],
    ));
    let controller = attach_controller(&lobby, &directory);

    controller.join_room(room_id(), None).unwrap();
    lobby.push_event(&joined_room_event());

    // The join acknowledgment schedules the first authoritative fetch.
    wait_until(Duration::from_secs(2), || directory.fetch_count() == 1).await;
    settle().await;

    directory.set_snapshot(snapshot_with(
        room_id(),
        ME,
        vec![
            player(ME, "mina"),
            player(2, "joon"),
            player(3, "sol"),
            player(4, "hana"),
        ],
    ));

    // A burst of deltas coalesces into a single debounced re-fetch.
    lobby.push_event(&ServerEvent::UserJoined {
        room_id: room_id(),
        player: player(3, "sol"),
    });
    lobby.push_event(&ServerEvent::UserJoined {
        room_id: room_id(),
        player: player(4, "hana"),
    });
    lobby.push_event(&ServerEvent::UserLeft {
        room_id: room_id(),
        player_id: pid(4),
    });

    wait_until(Duration::from_secs(2), || directory.fetch_count() == 2).await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(directory.fetch_count(), 2);

    // The fetched snapshot replaced the roster wholesale.
    assert_eq!(controller.roster().len(), 4);
    assert_eq!(controller.host(), Some(pid(ME)));

    let _ = lobby.signals.try_recv();
}

#[tokio::test]
async fn ready_is_optimistic_until_server_overwrites() {
    let mut lobby = start_lobby().await;
    let directory = FakeRoomDirectory::new(snapshot_with(
        room_id(),
        ME,
        vec![player(ME, "mina"), player(2, "joon")],
    ));
    let controller = attach_controller(&lobby, &directory);

    controller.join_room(room_id(), None).unwrap();
    lobby.push_event(&joined_room_event());
    wait_until(Duration::from_secs(1), || {
        controller.membership_phase() == MembershipPhase::Joined
    })
    .await;

    controller.toggle_ready(true).unwrap();
    assert!(controller.is_ready());
    wait_until(Duration::from_secs(1), || {
        lobby
            .sent_commands()
            .iter()
            .any(|c| matches!(c, ClientCommand::ToggleReady { ready: true, .. }))
    })
    .await;

    // The server disagrees; its value wins.
    lobby.push_event(&ServerEvent::ReadyChanged {
        room_id: room_id(),
        player_id: pid(ME),
        ready: false,
    });
    wait_until(Duration::from_secs(1), || !controller.is_ready()).await;

    // Ready reset clears everyone.
    lobby.push_event(&ServerEvent::ReadyChanged {
        room_id: room_id(),
        player_id: pid(2),
        ready: true,
    });
    lobby.push_event(&ServerEvent::ReadyReset { room_id: room_id() });
    settle().await;
    assert!(controller.roster().iter().all(|p| !p.ready));

    let _ = lobby.signals.try_recv();
}

#[tokio::test]
async fn toggle_ready_requires_membership() {
    let lobby = start_lobby().await;
    let directory = FakeRoomDirectory::new(snapshot_with(room_id(), ME, vec![player(ME, "mina")]));
    let controller = attach_controller(&lobby, &directory);

    let result = controller.toggle_ready(true);
    assert!(matches!(result, Err(OvertimeError::NotJoined)));
}

// ════════════════════════════════════════════════════════════════════
// Leave & terminal room deletion
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn leave_clears_projections_without_waiting_for_ack() {
    let lobby = start_lobby().await;
    let directory = FakeRoomDirectory::new(snapshot_with(room_id(), ME, vec![player(ME, "mina")]));
    let controller = attach_controller(&lobby, &directory);

    controller.join_room(room_id(), None).unwrap();
    lobby.push_event(&joined_room_event());
    wait_until(Duration::from_secs(1), || {
        controller.membership_phase() == MembershipPhase::Joined
    })
    .await;

    controller.leave_room().unwrap();

    // Cleared immediately — no server acknowledgment involved.
    assert_eq!(controller.membership_phase(), MembershipPhase::Idle);
    assert!(controller.roster().is_empty());
    assert_eq!(controller.current_room(), None);

    wait_until(Duration::from_secs(1), || {
        lobby
            .sent_commands()
            .iter()
            .any(|c| matches!(c, ClientCommand::LeaveRoom { .. }))
    })
    .await;
}

#[tokio::test]
async fn room_deleted_cancels_pending_retry() {
    let mut lobby = start_lobby().await;
    let directory = FakeRoomDirectory::new(snapshot_with(room_id(), ME, vec![player(ME, "mina")]));
    let controller = attach_controller(&lobby, &directory);

    controller.join_room(room_id(), None).unwrap();
    wait_until(Duration::from_secs(1), || join_count(&lobby) == 1).await;

    // Rejection arms the short retry timer…
    lobby.push_event(&join_failed_event(ErrorCode::RejoinCooldown));
    settle().await;

    // …but the room is deleted before it fires.
    lobby.push_event(&ServerEvent::RoomDeleted { room_id: room_id() });
    settle().await;

    match lobby.signals.recv().await.unwrap() {
        SessionSignal::RoomClosed { room_id: closed } => assert_eq!(closed, room_id()),
        other => panic!("expected RoomClosed, got {other:?}"),
    }

    tokio::time::sleep(Duration::from_millis(1300)).await;
    assert_eq!(join_count(&lobby), 1);
    assert_eq!(controller.membership_phase(), MembershipPhase::Idle);
}

#[tokio::test]
async fn deltas_for_other_rooms_are_ignored() {
    let lobby = start_lobby().await;
    let directory = FakeRoomDirectory::new(snapshot_with(room_id(), ME, vec![player(ME, "mina")]));
    let controller = attach_controller(&lobby, &directory);

    controller.join_room(room_id(), None).unwrap();
    lobby.push_event(&joined_room_event());
    wait_until(Duration::from_secs(1), || {
        controller.membership_phase() == MembershipPhase::Joined
    })
    .await;
    let baseline = controller.roster().len();

    let other_room = uuid::Uuid::from_u128(0xB0B);
    lobby.push_event(&ServerEvent::UserJoined {
        room_id: other_room,
        player: player(9, "stranger"),
    });
    lobby.push_event(&ServerEvent::RoomDeleted { room_id: other_room });
    settle().await;

    assert_eq!(controller.roster().len(), baseline);
    assert_eq!(controller.membership_phase(), MembershipPhase::Joined);
}
