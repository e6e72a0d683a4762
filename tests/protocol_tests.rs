#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Wire-format tests for the Overtime protocol types.
//!
//! These pin the JSON shapes the server speaks: `{"type": ..., "data": ...}`
//! tagged frames with `snake_case` tags, `SCREAMING_SNAKE_CASE` error
//! codes, and the phase union's `{"phase": ..., "payload": ...}` shape.

use std::collections::HashMap;

use overtime_client::error_codes::ErrorCode;
use overtime_client::protocol::{
    AgendaItem, ChatChannel, ChatMessage, ClientCommand, ContextCreatedPayload, EventKind,
    GamePhase, GameSnapshot, JoinedRoomPayload, Player, RankingEntry, SelectionSubmission,
    ServerEvent, TaskChoice,
};
use serde_json::{json, Value};
use uuid::Uuid;

// ════════════════════════════════════════════════════════════════════
// Outbound command shapes
// ════════════════════════════════════════════════════════════════════

#[test]
fn join_room_command_shape() {
    let room_id = Uuid::from_u128(1);
    let command = ClientCommand::JoinRoom {
        room_id,
        password: Some("hunter2".into()),
    };
    let value: Value = serde_json::to_value(&command).unwrap();
    assert_eq!(
        value,
        json!({
            "type": "join_room",
            "data": { "room_id": room_id, "password": "hunter2" }
        })
    );
}

#[test]
fn join_room_omits_absent_password() {
    let command = ClientCommand::JoinRoom {
        room_id: Uuid::from_u128(1),
        password: None,
    };
    let value: Value = serde_json::to_value(&command).unwrap();
    assert!(value["data"].get("password").is_none());
}

#[test]
fn toggle_ready_command_shape() {
    let room_id = Uuid::from_u128(2);
    let command = ClientCommand::ToggleReady {
        room_id,
        ready: true,
    };
    let value: Value = serde_json::to_value(&command).unwrap();
    assert_eq!(value["type"], "toggle_ready");
    assert_eq!(value["data"]["ready"], true);
}

#[test]
fn update_context_carries_selection_maps() {
    let player = Uuid::from_u128(3);
    let mut selections = SelectionSubmission::default();
    selections.agenda.insert(player, Uuid::from_u128(10));
    selections.tasks.insert(
        player,
        vec![TaskChoice {
            task_id: Uuid::from_u128(20),
            option_id: Uuid::from_u128(21),
        }],
    );
    selections.overtime.insert(
        player,
        vec![TaskChoice {
            task_id: Uuid::from_u128(30),
            option_id: Uuid::from_u128(31),
        }],
    );

    let command = ClientCommand::UpdateContext {
        room_id: Uuid::from_u128(2),
        selections,
    };
    let value: Value = serde_json::to_value(&command).unwrap();
    assert_eq!(value["type"], "update_context");
    let agenda = &value["data"]["selections"]["agenda"];
    assert_eq!(agenda[player.to_string()], json!(Uuid::from_u128(10)));
}

#[test]
fn command_round_trips() {
    let commands = vec![
        ClientCommand::LeaveRoom {
            room_id: Uuid::from_u128(1),
        },
        ClientCommand::StartGame {
            room_id: Uuid::from_u128(1),
        },
        ClientCommand::CreateContext {
            room_id: Uuid::from_u128(1),
            max_turn: 5,
            story: "crunch week".into(),
        },
        ClientCommand::GetGameProgress {
            room_id: Uuid::from_u128(1),
        },
        ClientCommand::SendLobbyMessage {
            room_id: Uuid::from_u128(1),
            body: "hello".into(),
        },
    ];
    for command in commands {
        let json = serde_json::to_string(&command).unwrap();
        let back: ClientCommand = serde_json::from_str(&json).unwrap();
        assert_eq!(
            std::mem::discriminant(&command),
            std::mem::discriminant(&back)
        );
    }
}

// ════════════════════════════════════════════════════════════════════
// Inbound event shapes
// ════════════════════════════════════════════════════════════════════

#[test]
fn joined_room_event_parses_from_wire_json() {
    let room_id = Uuid::from_u128(7);
    let player_id = Uuid::from_u128(8);
    let wire = json!({
        "type": "joined_room",
        "data": {
            "room_id": room_id,
            "players": [
                { "id": player_id, "name": "mina", "ready": false }
            ]
        }
    })
    .to_string();

    let event: ServerEvent = serde_json::from_str(&wire).unwrap();
    match event {
        ServerEvent::JoinedRoom(payload) => {
            assert_eq!(payload.room_id, room_id);
            assert_eq!(payload.players.len(), 1);
            assert_eq!(payload.players[0].name, "mina");
        }
        other => panic!("expected JoinedRoom, got {other:?}"),
    }
}

#[test]
fn join_failed_event_carries_structured_code() {
    let wire = json!({
        "type": "join_failed",
        "data": {
            "room_id": Uuid::from_u128(7),
            "reason": "wait before rejoining",
            "error_code": "REJOIN_COOLDOWN"
        }
    })
    .to_string();

    let event: ServerEvent = serde_json::from_str(&wire).unwrap();
    match event {
        ServerEvent::JoinFailed { error_code, .. } => {
            assert_eq!(error_code, Some(ErrorCode::RejoinCooldown));
        }
        other => panic!("expected JoinFailed, got {other:?}"),
    }
}

#[test]
fn error_event_code_is_optional() {
    let wire = json!({
        "type": "error",
        "data": { "message": "something odd" }
    })
    .to_string();

    let event: ServerEvent = serde_json::from_str(&wire).unwrap();
    match event {
        ServerEvent::Error {
            message,
            error_code,
            room_id,
        } => {
            assert_eq!(message, "something odd");
            assert!(error_code.is_none());
            assert!(room_id.is_none());
        }
        other => panic!("expected Error, got {other:?}"),
    }
}

#[test]
fn chat_message_round_trips_with_encryption_passthrough() {
    let message = ChatMessage {
        id: Uuid::from_u128(1),
        room_id: Uuid::from_u128(2),
        sender_id: Uuid::from_u128(3),
        sender_name: "joon".into(),
        channel: ChatChannel::Game,
        body: "gg".into(),
        sent_at: "2025-11-02T09:30:00Z".into(),
        encrypted: true,
    };
    let json = serde_json::to_string(&ServerEvent::GameMessage { message }).unwrap();
    let back: ServerEvent = serde_json::from_str(&json).unwrap();
    match back {
        ServerEvent::GameMessage { message } => {
            assert!(message.encrypted);
            assert_eq!(message.channel, ChatChannel::Game);
        }
        other => panic!("expected GameMessage, got {other:?}"),
    }
}

#[test]
fn chat_channel_tags_are_snake_case() {
    assert_eq!(serde_json::to_string(&ChatChannel::Lobby).unwrap(), "\"lobby\"");
    assert_eq!(serde_json::to_string(&ChatChannel::Game).unwrap(), "\"game\"");
}

#[test]
fn event_kinds_are_total() {
    let room_id = Uuid::from_u128(1);
    let events = vec![
        ServerEvent::ConnectionReady {
            player_id: Uuid::from_u128(1),
        },
        ServerEvent::JoinedRoom(Box::new(JoinedRoomPayload {
            room_id,
            players: Vec::new(),
        })),
        ServerEvent::RoomDeleted { room_id },
        ServerEvent::GameFinished { room_id },
        ServerEvent::Connected,
        ServerEvent::Disconnected { reason: None },
    ];
    let kinds: Vec<EventKind> = events.iter().map(ServerEvent::kind).collect();
    assert_eq!(
        kinds,
        vec![
            EventKind::ConnectionReady,
            EventKind::JoinedRoom,
            EventKind::RoomDeleted,
            EventKind::GameFinished,
            EventKind::Connected,
            EventKind::Disconnected,
        ]
    );
}

// ════════════════════════════════════════════════════════════════════
// Phase union shapes
// ════════════════════════════════════════════════════════════════════

#[test]
fn phase_tags_match_the_progression_names() {
    let cases: Vec<(GamePhase, &str)> = vec![
        (GamePhase::Waiting, "waiting"),
        (
            GamePhase::AgendaCreation {
                agenda_list: vec![AgendaItem {
                    id: Uuid::from_u128(1),
                    title: "merge freeze".into(),
                }],
            },
            "agenda_creation",
        ),
        (
            GamePhase::TaskCreation {
                task_lists: HashMap::new(),
            },
            "task_creation",
        ),
        (
            GamePhase::OvertimeCreation {
                overtime_lists: HashMap::new(),
            },
            "overtime_creation",
        ),
        (
            GamePhase::Explanation {
                explanation: "it shipped".into(),
            },
            "explanation",
        ),
        (GamePhase::Finished, "finished"),
    ];

    for (phase, tag) in cases {
        let value: Value = serde_json::to_value(&phase).unwrap();
        assert_eq!(value["phase"], tag, "phase {phase:?}");
    }
}

#[test]
fn phase_union_carries_only_its_own_payload() {
    let phase = GamePhase::AgendaCreation {
        agenda_list: vec![AgendaItem {
            id: Uuid::from_u128(1),
            title: "hiring plan".into(),
        }],
    };
    let value: Value = serde_json::to_value(&phase).unwrap();
    assert!(value["payload"].get("agenda_list").is_some());
    assert!(value["payload"].get("task_lists").is_none());
    assert!(value["payload"].get("explanation").is_none());
}

#[test]
fn game_snapshot_flattens_phase_beside_turn_counters() {
    let snapshot = GameSnapshot {
        room_id: Uuid::from_u128(5),
        current_turn: 2,
        max_turn: 3,
        phase: GamePhase::Result {
            summary: "the company survived".into(),
            rankings: vec![RankingEntry {
                player_id: Uuid::from_u128(1),
                rank: 1,
                score: 42,
            }],
        },
    };
    let value: Value = serde_json::to_value(&snapshot).unwrap();
    assert_eq!(value["current_turn"], 2);
    assert_eq!(value["phase"], "result");
    assert_eq!(value["payload"]["rankings"][0]["score"], 42);

    let back: GameSnapshot = serde_json::from_value(value).unwrap();
    assert_eq!(back, snapshot);
}

#[test]
fn context_created_payload_round_trips() {
    let payload = ContextCreatedPayload {
        room_id: Uuid::from_u128(9),
        current_turn: 1,
        max_turn: 4,
        story: "seed round closed".into(),
        company_context: "14 employees".into(),
        player_contexts: [(Uuid::from_u128(1), "cto, sleep-deprived".to_string())]
            .into_iter()
            .collect(),
    };
    let json = serde_json::to_string(&ServerEvent::ContextCreated(Box::new(payload))).unwrap();
    let back: ServerEvent = serde_json::from_str(&json).unwrap();
    match back {
        ServerEvent::ContextCreated(payload) => {
            assert_eq!(payload.max_turn, 4);
            assert_eq!(payload.player_contexts.len(), 1);
        }
        other => panic!("expected ContextCreated, got {other:?}"),
    }
}

#[test]
fn player_roster_preserves_order() {
    let players = vec![
        Player {
            id: Uuid::from_u128(3),
            name: "third-but-first".into(),
            ready: true,
        },
        Player {
            id: Uuid::from_u128(1),
            name: "second".into(),
            ready: false,
        },
    ];
    let json = serde_json::to_string(&players).unwrap();
    let back: Vec<Player> = serde_json::from_str(&json).unwrap();
    assert_eq!(back[0].name, "third-but-first");
    assert_eq!(back[1].name, "second");
}

// ════════════════════════════════════════════════════════════════════
// Error codes
// ════════════════════════════════════════════════════════════════════

#[test]
fn error_codes_round_trip() {
    for code in [
        ErrorCode::RoomNotFound,
        ErrorCode::RejoinCooldown,
        ErrorCode::RejoinAsExistingPlayer,
        ErrorCode::JoinAlreadyPending,
        ErrorCode::GameStateNotFound,
        ErrorCode::TokenExpired,
    ] {
        let json = serde_json::to_string(&code).unwrap();
        let back: ErrorCode = serde_json::from_str(&json).unwrap();
        assert_eq!(code, back);
    }
}

#[test]
fn unknown_error_code_fails_to_parse() {
    // The server adding codes is a breaking change by design: better a
    // loud parse failure on the whole frame than silently misclassifying
    // a rejection.
    let result: Result<ErrorCode, _> = serde_json::from_str("\"SOMETHING_NEW\"");
    assert!(result.is_err());
}
