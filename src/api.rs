//! REST collaborator ports consumed by the feature controllers.
//!
//! The lobby backend exposes its resource reads over plain HTTP with a
//! uniform envelope `{ data, message, success }`. The client consumes
//! exactly two reads: the authoritative room snapshot (membership
//! reconciliation) and one page of chat history (lobby seeding). Both are
//! modeled as ports so tests substitute in-memory fakes; [`HttpApi`] is
//! the `reqwest`-backed implementation.
//!
//! One cross-cutting contract lives here: **any** 401 from **any** call
//! invokes the shared unauthorized hook, which tears down the session.
//! Call sites never get to opt out of it.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;

use crate::error::{OvertimeError, Result};
use crate::protocol::{ChatMessage, RoomId, RoomSnapshot};

/// Uniform response envelope returned by every REST endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiEnvelope<T> {
    pub data: Option<T>,
    pub message: Option<String>,
    pub success: bool,
}

/// Callback invoked on any 401 response, regardless of call site.
pub type UnauthorizedHook = Arc<dyn Fn() + Send + Sync>;

// ── Ports ───────────────────────────────────────────────────────────

/// Room-metadata collaborator: authoritative room snapshots.
#[async_trait]
pub trait RoomDirectory: Send + Sync + 'static {
    /// Fetch the authoritative snapshot for one room.
    ///
    /// # Errors
    ///
    /// [`OvertimeError::Unauthorized`] on a 401 (after the hook has run),
    /// [`OvertimeError::Api`] on any other failure envelope.
    async fn fetch_room(&self, room_id: RoomId) -> Result<RoomSnapshot>;
}

/// Chat-history collaborator: paginated past messages.
#[async_trait]
pub trait ChatHistoryApi: Send + Sync + 'static {
    /// Fetch one page of chat history for a room, newest last.
    ///
    /// # Errors
    ///
    /// Same classification as [`RoomDirectory::fetch_room`].
    async fn fetch_page(
        &self,
        room_id: RoomId,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<ChatMessage>>;
}

// ── Envelope handling ───────────────────────────────────────────────

/// Decode a response body against the envelope contract.
///
/// - 401 → [`OvertimeError::Unauthorized`] (the caller must have already
///   run the unauthorized hook)
/// - other non-2xx → [`OvertimeError::Api`] carrying the envelope message
///   when one can be parsed
/// - 2xx with `success: false` or missing `data` → [`OvertimeError::Api`]
pub(crate) fn unwrap_envelope<T: DeserializeOwned>(status: u16, body: &str) -> Result<T> {
    if status == 401 {
        return Err(OvertimeError::Unauthorized);
    }
    if !(200..300).contains(&status) {
        let message = serde_json::from_str::<ApiEnvelope<serde_json::Value>>(body)
            .ok()
            .and_then(|env| env.message)
            .unwrap_or_else(|| "request failed".to_string());
        return Err(OvertimeError::Api { status, message });
    }

    let envelope: ApiEnvelope<T> = serde_json::from_str(body)?;
    if !envelope.success {
        return Err(OvertimeError::Api {
            status,
            message: envelope
                .message
                .unwrap_or_else(|| "request failed".to_string()),
        });
    }
    envelope.data.ok_or(OvertimeError::Api {
        status,
        message: "response envelope carried no data".to_string(),
    })
}

// ── HTTP implementation ─────────────────────────────────────────────

/// `reqwest`-backed implementation of the REST collaborator ports.
#[cfg(feature = "http-api")]
pub struct HttpApi {
    client: reqwest::Client,
    base_url: String,
    token: String,
    unauthorized_hook: Option<UnauthorizedHook>,
}

#[cfg(feature = "http-api")]
impl HttpApi {
    /// Create an API client for the given REST base URL and credential.
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            token: token.into(),
            unauthorized_hook: None,
        }
    }

    /// Install the hook invoked on any 401 response.
    #[must_use]
    pub fn with_unauthorized_hook(mut self, hook: UnauthorizedHook) -> Self {
        self.unauthorized_hook = Some(hook);
        self
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| OvertimeError::Api {
                status: 0,
                message: e.to_string(),
            })?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| OvertimeError::Api {
            status,
            message: e.to_string(),
        })?;

        if status == 401 {
            if let Some(hook) = &self.unauthorized_hook {
                hook();
            }
        }
        unwrap_envelope(status, &body)
    }
}

#[cfg(feature = "http-api")]
impl std::fmt::Debug for HttpApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The token is a credential; keep it out of logs.
        f.debug_struct("HttpApi")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

#[cfg(feature = "http-api")]
#[async_trait]
impl RoomDirectory for HttpApi {
    async fn fetch_room(&self, room_id: RoomId) -> Result<RoomSnapshot> {
        self.get_json(&format!("/rooms/{room_id}")).await
    }
}

#[cfg(feature = "http-api")]
#[async_trait]
impl ChatHistoryApi for HttpApi {
    async fn fetch_page(
        &self,
        room_id: RoomId,
        page: u32,
        per_page: u32,
    ) -> Result<Vec<ChatMessage>> {
        self.get_json(&format!(
            "/rooms/{room_id}/chats?page={page}&per_page={per_page}"
        ))
        .await
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::protocol::Player;
    use uuid::Uuid;

    #[test]
    fn unwraps_successful_envelope() {
        let snapshot = RoomSnapshot {
            id: Uuid::from_u128(1),
            name: "friday standup".into(),
            host_id: Uuid::from_u128(2),
            max_players: 6,
            players: vec![Player {
                id: Uuid::from_u128(2),
                name: "mina".into(),
                ready: false,
            }],
        };
        let body = serde_json::json!({
            "data": snapshot,
            "message": null,
            "success": true
        })
        .to_string();

        let decoded: RoomSnapshot = unwrap_envelope(200, &body).unwrap();
        assert_eq!(decoded.name, "friday standup");
        assert_eq!(decoded.players.len(), 1);
    }

    #[test]
    fn four_oh_one_maps_to_unauthorized() {
        let result: Result<RoomSnapshot> = unwrap_envelope(401, "{}");
        assert!(matches!(result, Err(OvertimeError::Unauthorized)));
    }

    #[test]
    fn failure_envelope_carries_message() {
        let body = r#"{"data": null, "message": "room is archived", "success": false}"#;
        let result: Result<RoomSnapshot> = unwrap_envelope(200, body);
        match result {
            Err(OvertimeError::Api { status, message }) => {
                assert_eq!(status, 200);
                assert_eq!(message, "room is archived");
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[test]
    fn non_2xx_uses_envelope_message_when_parsable() {
        let body = r#"{"data": null, "message": "no such room", "success": false}"#;
        let result: Result<RoomSnapshot> = unwrap_envelope(404, body);
        match result {
            Err(OvertimeError::Api { status, message }) => {
                assert_eq!(status, 404);
                assert_eq!(message, "no such room");
            }
            other => panic!("expected Api error, got {other:?}"),
        }
    }

    #[test]
    fn non_2xx_with_garbage_body_still_errors() {
        let result: Result<RoomSnapshot> = unwrap_envelope(500, "<html>oops</html>");
        assert!(matches!(result, Err(OvertimeError::Api { status: 500, .. })));
    }

    #[test]
    fn success_without_data_is_an_error() {
        let body = r#"{"data": null, "message": null, "success": true}"#;
        let result: Result<RoomSnapshot> = unwrap_envelope(200, body);
        assert!(matches!(result, Err(OvertimeError::Api { .. })));
    }
}
