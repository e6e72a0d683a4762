//! Chat stream merger.
//!
//! Each room carries two logically separate chat streams — `lobby` and
//! `game` — multiplexed over the same connection and distinguished by a
//! channel tag on every message. [`ChatMerger`] merges one page of
//! fetched history with live arrivals for its configured channel:
//!
//! - history is fetched only for the lobby channel; game chat is scoped
//!   to the current play session and always starts fresh
//! - a live message is accepted only if its channel tag matches and its
//!   id has not been seen (the channel is at-least-once; identifier
//!   de-duplication is the only idempotence applied)
//! - sending is optimistic about the input but pessimistic about the
//!   echo: blank input is dropped locally, and a sent message is *not*
//!   appended locally — it renders when the server echoes it back

use std::collections::HashSet;
use std::sync::{Arc, Mutex as StdMutex};

use crate::api::ChatHistoryApi;
use crate::connection::CommandSender;
use crate::error::Result;
use crate::interceptor::{EventFilter, InterceptorId, InterceptorRegistry};
use crate::protocol::{ChatChannel, ChatMessage, ClientCommand, EventKind, MessageId, RoomId, ServerEvent};

/// Page size used when seeding lobby history.
const HISTORY_PAGE_SIZE: u32 = 50;

#[derive(Default)]
struct ChatState {
    channel: ChatChannel,
    messages: Vec<ChatMessage>,
    seen: HashSet<MessageId>,
    seeded: bool,
}

struct ChatInner {
    room_id: RoomId,
    sender: CommandSender,
    history: Arc<dyn ChatHistoryApi>,
    state: StdMutex<ChatState>,
}

impl ChatInner {
    fn lock(&self) -> std::sync::MutexGuard<'_, ChatState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn accept(&self, message: &ChatMessage) {
        let mut state = self.lock();
        if message.room_id != self.room_id
            || message.channel != state.channel
            || state.seen.contains(&message.id)
        {
            return;
        }
        state.seen.insert(message.id);
        state.messages.push(message.clone());
    }

    fn handle_event(inner: &Arc<Self>, event: &ServerEvent) {
        match event {
            ServerEvent::LobbyMessage { message } | ServerEvent::GameMessage { message } => {
                inner.accept(message);
            }
            _ => {}
        }
    }
}

/// Merges historical and live chat for one channel of one room.
///
/// Created via [`ChatMerger::attach`]; [`detach`](ChatMerger::detach)
/// (or drop) unregisters its interceptors.
pub struct ChatMerger {
    inner: Arc<ChatInner>,
    registry: InterceptorRegistry,
    interceptors: Vec<InterceptorId>,
}

impl ChatMerger {
    /// Attach a merger for `room_id` on `channel` to the event stream.
    ///
    /// Call [`seed`](Self::seed) afterwards to load lobby history.
    pub fn attach(
        registry: &InterceptorRegistry,
        sender: CommandSender,
        history: Arc<dyn ChatHistoryApi>,
        room_id: RoomId,
        channel: ChatChannel,
    ) -> Self {
        let inner = Arc::new(ChatInner {
            room_id,
            sender,
            history,
            state: StdMutex::new(ChatState {
                channel,
                ..ChatState::default()
            }),
        });

        let interceptors = [EventKind::LobbyMessage, EventKind::GameMessage]
            .into_iter()
            .map(|kind| {
                let inner = Arc::clone(&inner);
                registry.register(EventFilter::Kind(kind), 0, move |event| {
                    ChatInner::handle_event(&inner, event);
                })
            })
            .collect();

        Self {
            inner,
            registry: registry.clone(),
            interceptors,
        }
    }

    /// Seed local state with one page of history.
    ///
    /// Lobby channel only: the game channel always starts fresh, since
    /// game chat is scoped to the current play session. Seeding twice is
    /// a no-op.
    pub async fn seed(&self) -> Result<()> {
        {
            let state = self.inner.lock();
            if state.seeded || state.channel != ChatChannel::Lobby {
                return Ok(());
            }
        }

        let fetched = self
            .inner
            .history
            .fetch_page(self.inner.room_id, 1, HISTORY_PAGE_SIZE)
            .await?;

        let mut state = self.inner.lock();
        if state.seeded {
            // A live arrival may have seeded concurrently; keep it.
            return Ok(());
        }
        state.seeded = true;

        // Prepend history before anything that streamed in while the
        // fetch was outstanding, keeping both de-duplicated by id.
        let live = std::mem::take(&mut state.messages);
        for message in fetched {
            if message.channel == ChatChannel::Lobby && state.seen.insert(message.id) {
                state.messages.push(message);
            }
        }
        for message in live {
            if !state.messages.iter().any(|m| m.id == message.id) {
                state.messages.push(message);
            }
        }
        Ok(())
    }

    /// Switch the configured channel, immediately re-filtering retained
    /// messages to the new tag. Discarded messages are only recoverable
    /// by a history re-fetch, which is never done for the game channel.
    pub fn set_channel(&self, channel: ChatChannel) {
        let mut state = self.inner.lock();
        if state.channel == channel {
            return;
        }
        state.channel = channel;
        state.messages.retain(|m| m.channel == channel);
        state.seen = state.messages.iter().map(|m| m.id).collect();
    }

    /// Send a message on the configured channel.
    ///
    /// Blank or whitespace-only input is a local no-op. The message is
    /// not appended locally; it renders via the echoed inbound event.
    pub fn send_message(&self, text: &str) -> Result<()> {
        let body = text.trim();
        if body.is_empty() {
            return Ok(());
        }
        let channel = self.inner.lock().channel;
        let command = match channel {
            ChatChannel::Lobby => ClientCommand::SendLobbyMessage {
                room_id: self.inner.room_id,
                body: body.to_string(),
            },
            ChatChannel::Game => ClientCommand::SendGameMessage {
                room_id: self.inner.room_id,
                body: body.to_string(),
            },
        };
        self.inner.sender.emit(command)
    }

    /// The merged message sequence, in arrival order.
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.inner.lock().messages.clone()
    }

    /// The currently configured channel.
    pub fn channel(&self) -> ChatChannel {
        self.inner.lock().channel
    }

    /// Unregister interceptors. Local state is dropped with the merger.
    pub fn detach(&mut self) {
        for id in self.interceptors.drain(..) {
            self.registry.unregister(id);
        }
    }
}

impl Drop for ChatMerger {
    fn drop(&mut self) {
        self.detach();
    }
}

impl std::fmt::Debug for ChatMerger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("ChatMerger")
            .field("room_id", &self.inner.room_id)
            .field("channel", &state.channel)
            .field("messages", &state.messages.len())
            .finish()
    }
}
