//! Transport abstraction for the Overtime lobby protocol.
//!
//! The [`Transport`] trait defines a bidirectional text frame channel
//! between the client and server. The protocol uses JSON text frames, so
//! every transport implementation must handle framing internally (e.g.,
//! WebSocket frames, length-prefixed TCP).
//!
//! Because the channel adapter reconnects on failure, it does not hold a
//! transport directly — it holds a [`Connector`] that can mint a **fresh**
//! transport for every attempt. A half-closed prior connection is never
//! reused; each attempt gets a brand-new transport carrying the session
//! credential at establishment time.

use async_trait::async_trait;

use crate::error::OvertimeError;

/// A bidirectional text frame transport for the Overtime lobby protocol.
///
/// Implementors shuttle serialized JSON strings between client and server.
/// Each call to [`send`](Transport::send) transmits one complete frame;
/// each call to [`recv`](Transport::recv) yields one complete frame.
///
/// # Object Safety
///
/// This trait is object-safe; the channel adapter works with
/// `Box<dyn Transport>` so a [`Connector`] can produce any implementation.
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) **MUST** be cancel-safe because it is polled
/// inside `tokio::select!`. If `recv` is cancelled before completion,
/// calling it again must not lose frames. Channel-based implementations
/// are naturally cancel-safe.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send a JSON text frame to the server.
    ///
    /// # Errors
    ///
    /// Returns [`OvertimeError::TransportSend`] if the frame could not be
    /// sent (connection broken, write buffer full).
    async fn send(&mut self, frame: String) -> Result<(), OvertimeError>;

    /// Receive the next JSON text frame from the server.
    ///
    /// Returns:
    /// - `Some(Ok(text))` — a complete frame was received
    /// - `Some(Err(e))` — a transport error occurred
    /// - `None` — the connection was closed cleanly by the server
    ///
    /// # Cancel Safety
    ///
    /// This method **MUST** be cancel-safe (see [trait documentation](Transport)).
    async fn recv(&mut self) -> Option<Result<String, OvertimeError>>;

    /// Close the transport connection gracefully.
    ///
    /// # Errors
    ///
    /// Returns an error if the graceful shutdown fails. Implementations
    /// should still release resources even if the close handshake fails.
    async fn close(&mut self) -> Result<(), OvertimeError>;
}

/// Factory for fresh [`Transport`] connections.
///
/// Called once per connection attempt by the channel adapter's reconnect
/// loop. Implementations carry whatever the backend needs to establish an
/// authenticated connection (URL, credential) and must authenticate at
/// establishment time — the protocol never re-authenticates per frame.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Establish a new, authenticated transport connection.
    ///
    /// # Errors
    ///
    /// Returns any transport-level error; the adapter treats a failure as
    /// one spent reconnect attempt.
    async fn connect(&self) -> Result<Box<dyn Transport>, OvertimeError>;
}
