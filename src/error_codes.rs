//! Structured error codes for the Overtime lobby protocol.
//!
//! The server sends these as `"SCREAMING_SNAKE_CASE"` strings (e.g.,
//! `"ROOM_NOT_FOUND"`). They replace message-text matching everywhere the
//! client classifies a rejection: join retry policy, lazy game creation, and
//! forced logout all key off these codes, never off human-readable sentences.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Structured error codes returned by the Overtime server.
///
/// Use [`description()`](ErrorCode::description) for a human-readable
/// explanation and [`join_retry()`](ErrorCode::join_retry) for the retry
/// class a join rejection falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Authentication errors
    Unauthorized,
    InvalidToken,
    TokenExpired,

    // Validation errors
    InvalidInput,
    InvalidRoomPassword,
    MessageTooLarge,

    // Room errors
    RoomNotFound,
    RoomFull,
    RoomDeleted,
    AlreadyInRoom,
    NotInRoom,
    /// A join for this exact player/room pair is already outstanding.
    JoinAlreadyPending,
    /// The player left recently and must wait before rejoining.
    RejoinCooldown,
    /// The game already started; the server is re-admitting the player
    /// as an existing participant. The join should simply be re-issued.
    RejoinAsExistingPlayer,

    // Game errors
    /// No game state exists yet for this room (game creation is lazy).
    GameStateNotFound,
    /// The requested transition is not valid from the current phase.
    InvalidPhase,
    NotEnoughPlayers,
    PlayersNotReady,

    // Chat errors
    ChatSendFailed,

    // Server errors
    InternalError,
    ServiceUnavailable,
}

/// How the membership controller should treat a join rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinRetryClass {
    /// Retry silently after a short delay; never surfaced to the user.
    RetryShort,
    /// The room is gone. No retry; signal the caller to navigate away.
    Terminal,
    /// A duplicate of an outstanding join. Never retry.
    Suppress,
    /// Unknown rejection. Allow exactly one retry after a longer delay.
    RetryOnce,
}

impl ErrorCode {
    /// Classify this code for the join retry policy.
    pub fn join_retry(&self) -> JoinRetryClass {
        match self {
            Self::RejoinCooldown | Self::RejoinAsExistingPlayer => JoinRetryClass::RetryShort,
            Self::RoomNotFound | Self::RoomDeleted => JoinRetryClass::Terminal,
            Self::JoinAlreadyPending | Self::AlreadyInRoom => JoinRetryClass::Suppress,
            _ => JoinRetryClass::RetryOnce,
        }
    }

    /// Returns `true` for codes that end the session regardless of call site.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            Self::Unauthorized | Self::InvalidToken | Self::TokenExpired
        )
    }

    /// Returns a human-readable description of this error code.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Unauthorized => "Access denied. Credentials are missing or invalid.",
            Self::InvalidToken => "The session token is invalid or malformed. Sign in again.",
            Self::TokenExpired => "The session token has expired. Sign in again.",

            Self::InvalidInput => "The provided input is invalid or malformed.",
            Self::InvalidRoomPassword => "The room password is incorrect.",
            Self::MessageTooLarge => "The message exceeds the maximum allowed size.",

            Self::RoomNotFound => {
                "The requested room could not be found. It may have been closed."
            }
            Self::RoomFull => "The room has reached its maximum player capacity.",
            Self::RoomDeleted => "The room has been deleted by its host.",
            Self::AlreadyInRoom => "You are already a member of this room.",
            Self::NotInRoom => "You are not currently in this room.",
            Self::JoinAlreadyPending => {
                "A join request for this room is already being processed."
            }
            Self::RejoinCooldown => {
                "You left this room recently. Wait a moment before rejoining."
            }
            Self::RejoinAsExistingPlayer => {
                "The game is in progress; rejoining as an existing player."
            }

            Self::GameStateNotFound => "No game state exists yet for this room.",
            Self::InvalidPhase => "The game is not in a phase that allows this action.",
            Self::NotEnoughPlayers => "Not enough players to start the game.",
            Self::PlayersNotReady => "All players must be ready before the game can start.",

            Self::ChatSendFailed => "The chat message could not be delivered.",

            Self::InternalError => "An internal server error occurred. Please try again.",
            Self::ServiceUnavailable => "The service is temporarily unavailable.",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}
