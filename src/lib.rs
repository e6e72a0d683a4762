//! # Overtime Client
//!
//! Transport-agnostic Rust client for the Overtime party-game lobby
//! protocol.
//!
//! This crate provides the real-time half of an Overtime client: a
//! reconnecting event channel, a priority-ordered interceptor registry
//! for fanning inbound events out to independent features, and the three
//! feature controllers that project server state locally — room
//! membership, game phase, and chat. Rendering, routing, and credential
//! storage are the embedding application's concern.
//!
//! ## Features
//!
//! - **Transport-agnostic** — implement the [`Transport`] and
//!   [`Connector`] traits for any backend
//! - **WebSocket built-in** — the default `transport-websocket` feature
//!   provides `WebSocketTransport`/`WebSocketConnector`
//! - **Event-driven** — typed [`ServerEvent`]s via a channel, plus
//!   registry fan-out for cross-cutting observers
//! - **Server-authoritative** — controllers only project; every
//!   divergence is reconciled in the server's favor
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! let (session, mut signals) = Session::new(SessionConfig::default());
//! let connector = WebSocketConnector::new("ws://localhost:4000/ws", &token);
//! session.connect(&token, connector).await?;
//!
//! let sender = session.sender().await.ok_or(OvertimeError::NotConnected)?;
//! let rooms = Arc::new(HttpApi::new(rest_url, &token)
//!     .with_unauthorized_hook(session.unauthorized_hook()));
//! let room = RoomController::attach(
//!     &session.registry(), sender, rooms, session.signals(), my_id);
//! room.join_room(room_id, None)?;
//! ```

pub mod api;
pub mod chat;
pub mod connection;
pub mod error;
pub mod error_codes;
pub mod game;
pub mod interceptor;
pub mod protocol;
pub mod room;
pub mod session;
pub mod transport;
pub mod transports;

// Re-export primary types for ergonomic imports.
pub use api::{ApiEnvelope, ChatHistoryApi, RoomDirectory};
pub use chat::ChatMerger;
pub use connection::{CommandSender, Connection, ConnectionConfig, ConnectionStatus};
pub use error::OvertimeError;
pub use error_codes::ErrorCode;
pub use game::GameProjector;
pub use interceptor::{EventFilter, InterceptorId, InterceptorRegistry};
pub use protocol::{ChatChannel, ClientCommand, GamePhase, GameSnapshot, ServerEvent};
pub use room::{MembershipPhase, RoomController};
pub use session::{Session, SessionConfig, SessionSignal};
pub use transport::{Connector, Transport};

#[cfg(feature = "http-api")]
pub use api::HttpApi;

#[cfg(feature = "transport-websocket")]
pub use transports::{WebSocketConnector, WebSocketTransport};
