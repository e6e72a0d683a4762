//! Wire types for the Overtime lobby protocol.
//!
//! Every type in this module produces the JSON the server speaks: tagged
//! frames of the shape `{"type": "...", "data": {...}}` with `snake_case`
//! type tags. Key adaptations from the server's internal representation:
//!
//! - Timestamps ride as `String` (ISO 8601), never as a datetime type
//! - Game state is a tagged union ([`GamePhase`]) with one variant per
//!   phase, carrying only the fields that phase produces — there is no flat
//!   object whose optional fields might be stale leftovers of an earlier
//!   phase
//! - Rejections carry a structured [`ErrorCode`], never a matchable sentence

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error_codes::ErrorCode;

// ── Type aliases ────────────────────────────────────────────────────

/// Unique identifier for players.
pub type PlayerId = Uuid;

/// Unique identifier for rooms.
pub type RoomId = Uuid;

/// Unique identifier for chat messages.
pub type MessageId = Uuid;

/// Unique identifier for agenda items.
pub type AgendaId = Uuid;

/// Unique identifier for tasks (regular and overtime).
pub type TaskId = Uuid;

/// Unique identifier for task options.
pub type OptionId = Uuid;

// ── Room & player types ─────────────────────────────────────────────

/// A player as seen in a room roster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    pub ready: bool,
}

/// Authoritative room snapshot fetched from the room-metadata collaborator.
///
/// Roster is ordered by join time. The host is exempt from the ready check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoomSnapshot {
    pub id: RoomId,
    pub name: String,
    pub host_id: PlayerId,
    pub max_players: u8,
    /// Current roster, ordered by join time.
    pub players: Vec<Player>,
}

// ── Chat types ──────────────────────────────────────────────────────

/// One of the two logically separate chat streams multiplexed per room.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChatChannel {
    #[default]
    Lobby,
    Game,
}

/// A chat message on either channel of a room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub room_id: RoomId,
    pub sender_id: PlayerId,
    pub sender_name: String,
    pub channel: ChatChannel,
    pub body: String,
    /// ISO 8601 timestamp assigned by the server.
    pub sent_at: String,
    /// Opaque passthrough; the client never processes message encryption.
    #[serde(default)]
    pub encrypted: bool,
}

// ── Game content types ──────────────────────────────────────────────

/// One agenda item generated for the current turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AgendaItem {
    pub id: AgendaId,
    pub title: String,
}

/// A selectable option on a task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskOption {
    pub id: OptionId,
    pub label: String,
}

/// A task (regular or overtime) generated for one player.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskItem {
    pub id: TaskId,
    pub title: String,
    pub options: Vec<TaskOption>,
}

/// A player's chosen option for one task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskChoice {
    pub task_id: TaskId,
    pub option_id: OptionId,
}

/// The full set of per-player selections submitted at the end of the
/// interactive phase.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SelectionSubmission {
    /// Exactly one agenda choice per player.
    pub agenda: HashMap<PlayerId, AgendaId>,
    /// Task→option pairs per player.
    pub tasks: HashMap<PlayerId, Vec<TaskChoice>>,
    /// Overtime task→option pairs per player.
    pub overtime: HashMap<PlayerId, Vec<TaskChoice>>,
}

/// One row of the final standings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RankingEntry {
    pub player_id: PlayerId,
    pub rank: u32,
    pub score: i64,
}

// ── Game phase union ────────────────────────────────────────────────

/// One stage of the server-authoritative game progression.
///
/// Each variant carries only the payload that phase produces. Receiving a
/// new phase replaces the whole value; nothing from an earlier phase
/// survives unless the server re-sends it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "phase", content = "payload", rename_all = "snake_case")]
pub enum GamePhase {
    /// Game created, waiting for the host to start.
    Waiting,
    /// Story and generated contexts are being presented.
    ContextCreation {
        story: String,
        company_context: String,
        player_contexts: HashMap<PlayerId, String>,
    },
    /// Agenda list generated; players pick one agenda each.
    AgendaCreation { agenda_list: Vec<AgendaItem> },
    /// Per-player task lists generated.
    TaskCreation {
        task_lists: HashMap<PlayerId, Vec<TaskItem>>,
    },
    /// Per-player overtime-task lists generated. Selections are gathered
    /// and submitted while this phase is current.
    OvertimeCreation {
        overtime_lists: HashMap<PlayerId, Vec<TaskItem>>,
    },
    /// Selections applied; the turn is playing out.
    Playing {
        player_contexts: HashMap<PlayerId, String>,
    },
    /// Free-text explanation of the turn's outcome.
    Explanation { explanation: String },
    /// Final result and standings.
    Result {
        summary: String,
        rankings: Vec<RankingEntry>,
    },
    /// Game over; no further transitions.
    Finished,
}

impl GamePhase {
    /// Returns `true` for the phase during which selections are gathered.
    pub fn is_interactive(&self) -> bool {
        matches!(self, Self::OvertimeCreation { .. })
    }

    /// Returns `true` once the game can no longer transition.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished)
    }
}

/// Full phase-state snapshot for one room, as reported by the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GameSnapshot {
    pub room_id: RoomId,
    pub current_turn: u32,
    pub max_turn: u32,
    #[serde(flatten)]
    pub phase: GamePhase,
}

// ── Payload structs ─────────────────────────────────────────────────

/// Payload for the `joined_room` acknowledgment.
/// Boxed in [`ServerEvent`] to reduce enum size.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinedRoomPayload {
    pub room_id: RoomId,
    /// Roster at acknowledgment time. Treated as provisional: the
    /// controller re-fetches the authoritative snapshot because this ack
    /// can race with concurrent membership deltas.
    pub players: Vec<Player>,
}

/// Payload for the `context_created` phase event.
/// Boxed in [`ServerEvent`] to reduce enum size.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextCreatedPayload {
    pub room_id: RoomId,
    pub current_turn: u32,
    pub max_turn: u32,
    pub story: String,
    pub company_context: String,
    pub player_contexts: HashMap<PlayerId, String>,
}

// ── Outbound commands ───────────────────────────────────────────────

/// Commands sent from client to server.
///
/// All commands are fire-and-forget: outcomes arrive asynchronously as
/// [`ServerEvent`]s, never as a correlated response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientCommand {
    /// Join a room, optionally with a password.
    JoinRoom {
        room_id: RoomId,
        #[serde(skip_serializing_if = "Option::is_none")]
        password: Option<String>,
    },
    /// Leave the current room.
    LeaveRoom { room_id: RoomId },
    /// Toggle the local player's ready flag.
    ToggleReady { room_id: RoomId, ready: bool },
    /// Host: start the game.
    StartGame { room_id: RoomId },
    /// Host: finish the game.
    FinishGame { room_id: RoomId },
    /// Send a message on the lobby channel.
    SendLobbyMessage { room_id: RoomId, body: String },
    /// Send a message on the game channel.
    SendGameMessage { room_id: RoomId, body: String },
    /// Create the (lazily-created) game state for a room.
    CreateGame {
        room_id: RoomId,
        players: Vec<PlayerId>,
    },
    /// Create the story context for the game.
    CreateContext {
        room_id: RoomId,
        max_turn: u32,
        story: String,
    },
    /// Generate the agenda list for the current turn.
    CreateAgenda { room_id: RoomId },
    /// Generate per-player task lists.
    CreateTask { room_id: RoomId },
    /// Generate per-player overtime-task lists.
    CreateOvertime { room_id: RoomId },
    /// Submit gathered selections, advancing into the playing phase.
    UpdateContext {
        room_id: RoomId,
        selections: SelectionSubmission,
    },
    /// Generate the turn explanation.
    CreateExplanation { room_id: RoomId },
    /// Calculate the final result and standings.
    CalculateResult { room_id: RoomId },
    /// Request a fresh phase-state snapshot.
    GetGameProgress { room_id: RoomId },
}

// ── Inbound events ──────────────────────────────────────────────────

/// Events received from the server, plus the three synthetic variants the
/// channel adapter emits itself ([`Connected`](ServerEvent::Connected),
/// [`Reconnecting`](ServerEvent::Reconnecting),
/// [`Disconnected`](ServerEvent::Disconnected) — never parsed off the wire).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// The server accepted the connection credential.
    ConnectionReady { player_id: PlayerId },
    /// The server rejected the connection credential. Fatal to the
    /// session; the adapter disconnects and the owner must log out.
    ConnectionRejected {
        message: String,
        error_code: ErrorCode,
    },
    /// Acknowledgment of the local player's join (boxed to reduce enum size).
    JoinedRoom(Box<JoinedRoomPayload>),
    /// The local player's join was rejected.
    JoinFailed {
        room_id: RoomId,
        reason: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_code: Option<ErrorCode>,
    },
    /// Acknowledgment of the local player's leave.
    LeftRoom { room_id: RoomId },
    /// Another player joined the room.
    UserJoined { room_id: RoomId, player: Player },
    /// Another player left the room.
    UserLeft {
        room_id: RoomId,
        player_id: PlayerId,
    },
    /// A player's ready flag changed.
    ReadyChanged {
        room_id: RoomId,
        player_id: PlayerId,
        ready: bool,
    },
    /// All ready flags were reset.
    ReadyReset { room_id: RoomId },
    /// The room was deleted. Terminal for any in-flight join or leave.
    RoomDeleted { room_id: RoomId },
    /// The server is closing this connection deliberately.
    ForceDisconnect { reason: String },

    // ── Game phase events (one per transition edge) ─────────────────
    /// Game state created; phase is `waiting`.
    GameCreated { room_id: RoomId },
    /// Context created (boxed to reduce enum size).
    ContextCreated(Box<ContextCreatedPayload>),
    /// Agenda list generated.
    AgendaCreated {
        room_id: RoomId,
        current_turn: u32,
        max_turn: u32,
        agenda_list: Vec<AgendaItem>,
    },
    /// Task lists generated.
    TaskCreated {
        room_id: RoomId,
        current_turn: u32,
        max_turn: u32,
        task_lists: HashMap<PlayerId, Vec<TaskItem>>,
    },
    /// Overtime-task lists generated.
    OvertimeCreated {
        room_id: RoomId,
        current_turn: u32,
        max_turn: u32,
        overtime_lists: HashMap<PlayerId, Vec<TaskItem>>,
    },
    /// Selections applied; phase is `playing`.
    ContextUpdated {
        room_id: RoomId,
        current_turn: u32,
        max_turn: u32,
        player_contexts: HashMap<PlayerId, String>,
    },
    /// Turn explanation generated.
    ExplanationCreated {
        room_id: RoomId,
        current_turn: u32,
        max_turn: u32,
        explanation: String,
    },
    /// Final result calculated.
    ResultCalculated {
        room_id: RoomId,
        summary: String,
        rankings: Vec<RankingEntry>,
    },
    /// Game finished.
    GameFinished { room_id: RoomId },
    /// Response to [`ClientCommand::GetGameProgress`] (boxed to reduce
    /// enum size).
    GameProgress(Box<GameSnapshot>),

    // ── Chat ────────────────────────────────────────────────────────
    /// A lobby-channel chat message.
    LobbyMessage { message: ChatMessage },
    /// A game-channel chat message.
    GameMessage { message: ChatMessage },

    /// Generic server error.
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_code: Option<ErrorCode>,
        #[serde(skip_serializing_if = "Option::is_none")]
        room_id: Option<RoomId>,
    },

    // ── Synthetic (adapter-emitted, never on the wire) ──────────────
    /// Transport established.
    Connected,
    /// Transport lost; the adapter is attempting to reconnect.
    Reconnecting { attempt: u32 },
    /// Channel closed for good (shutdown, give-up, or forced).
    Disconnected { reason: Option<String> },
}

/// Discriminant-only tag for [`ServerEvent`], used as the interceptor
/// registry key so handlers can subscribe to one event kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ConnectionReady,
    ConnectionRejected,
    JoinedRoom,
    JoinFailed,
    LeftRoom,
    UserJoined,
    UserLeft,
    ReadyChanged,
    ReadyReset,
    RoomDeleted,
    ForceDisconnect,
    GameCreated,
    ContextCreated,
    AgendaCreated,
    TaskCreated,
    OvertimeCreated,
    ContextUpdated,
    ExplanationCreated,
    ResultCalculated,
    GameFinished,
    GameProgress,
    LobbyMessage,
    GameMessage,
    Error,
    Connected,
    Reconnecting,
    Disconnected,
}

impl ServerEvent {
    /// The kind tag of this event. Total over all variants.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::ConnectionReady { .. } => EventKind::ConnectionReady,
            Self::ConnectionRejected { .. } => EventKind::ConnectionRejected,
            Self::JoinedRoom(_) => EventKind::JoinedRoom,
            Self::JoinFailed { .. } => EventKind::JoinFailed,
            Self::LeftRoom { .. } => EventKind::LeftRoom,
            Self::UserJoined { .. } => EventKind::UserJoined,
            Self::UserLeft { .. } => EventKind::UserLeft,
            Self::ReadyChanged { .. } => EventKind::ReadyChanged,
            Self::ReadyReset { .. } => EventKind::ReadyReset,
            Self::RoomDeleted { .. } => EventKind::RoomDeleted,
            Self::ForceDisconnect { .. } => EventKind::ForceDisconnect,
            Self::GameCreated { .. } => EventKind::GameCreated,
            Self::ContextCreated(_) => EventKind::ContextCreated,
            Self::AgendaCreated { .. } => EventKind::AgendaCreated,
            Self::TaskCreated { .. } => EventKind::TaskCreated,
            Self::OvertimeCreated { .. } => EventKind::OvertimeCreated,
            Self::ContextUpdated { .. } => EventKind::ContextUpdated,
            Self::ExplanationCreated { .. } => EventKind::ExplanationCreated,
            Self::ResultCalculated { .. } => EventKind::ResultCalculated,
            Self::GameFinished { .. } => EventKind::GameFinished,
            Self::GameProgress(_) => EventKind::GameProgress,
            Self::LobbyMessage { .. } => EventKind::LobbyMessage,
            Self::GameMessage { .. } => EventKind::GameMessage,
            Self::Error { .. } => EventKind::Error,
            Self::Connected => EventKind::Connected,
            Self::Reconnecting { .. } => EventKind::Reconnecting,
            Self::Disconnected { .. } => EventKind::Disconnected,
        }
    }
}
