//! Error types for the Overtime client.

use thiserror::Error;

use crate::error_codes::ErrorCode;
use crate::protocol::RoomId;

/// Errors that can occur when using the Overtime client.
#[derive(Debug, Error)]
pub enum OvertimeError {
    /// Failed to send a frame through the transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a frame from the transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The transport connection was closed unexpectedly.
    #[error("transport connection closed")]
    TransportClosed,

    /// Failed to serialize or deserialize a protocol frame.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Attempted an operation that requires an open channel, but none exists.
    #[error("not connected to server")]
    NotConnected,

    /// A join is already in flight for this or another room.
    #[error("a join is already in flight for room {0}")]
    AlreadyJoining(RoomId),

    /// Attempted a room operation without being joined to a room.
    #[error("not joined to a room")]
    NotJoined,

    /// Tried to submit selections before every player had a complete set.
    /// Validation-only: nothing is sent to the network.
    #[error("selections are incomplete")]
    IncompleteSelections,

    /// The channel credential was rejected or a REST call returned 401.
    /// Fatal to the session: the caller must tear down and re-authenticate.
    #[error("session credential rejected")]
    Unauthorized,

    /// The server rejected a command.
    #[error("server rejection: {message}")]
    Rejected {
        /// Human-readable message from the server.
        message: String,
        /// Structured code, if the server provided one.
        error_code: Option<ErrorCode>,
    },

    /// A REST collaborator returned a non-success envelope or status.
    #[error("api error (status {status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Message from the response envelope, if any.
        message: String,
    },

    /// An operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized [`Result`] type for Overtime client operations.
pub type Result<T> = std::result::Result<T, OvertimeError>;
