//! Room membership controller.
//!
//! Drives the join/leave handshake for one room at a time and keeps the
//! local roster projection honest against the race conditions that come
//! with overlapping membership broadcasts:
//!
//! - joins are deduplicated (one in flight per session, idempotent when
//!   already joined) and transient rejections retry silently
//! - the roster is never patched from UI state — every membership delta
//!   schedules a debounced, coalesced re-fetch of the authoritative
//!   snapshot from the room-metadata collaborator, and the fetched roster
//!   replaces the local one wholesale
//! - the local ready flag is optimistic with server-confirmed overwrite:
//!   the server's value always wins when they disagree
//!
//! All timers are stored as abortable task handles and cancelled
//! deterministically on [`detach`](RoomController::detach), drop, or a
//! terminal `room_deleted` event — a stray timer can never mutate state
//! after the owning view is gone.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::api::RoomDirectory;
use crate::connection::CommandSender;
use crate::error::{OvertimeError, Result};
use crate::error_codes::JoinRetryClass;
use crate::interceptor::{EventFilter, InterceptorId, InterceptorRegistry};
use crate::protocol::{ClientCommand, EventKind, Player, PlayerId, RoomId, ServerEvent};
use crate::session::{SessionSignal, SignalSink};

/// Delay before retrying a join rejected for a recoverable timing reason.
const RETRY_SHORT: Duration = Duration::from_secs(1);

/// Delay before the single retry of an unclassified rejection.
const RETRY_LONG: Duration = Duration::from_secs(3);

/// Debounce window for authoritative roster re-fetches.
const ROSTER_REFRESH_DEBOUNCE: Duration = Duration::from_millis(400);

// ── State machine ───────────────────────────────────────────────────

/// Where the controller is in the join/leave handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MembershipPhase {
    #[default]
    Idle,
    Joining,
    Joined,
    Leaving,
}

/// Local ready flag: optimistic value layered over the last
/// server-confirmed one. The server always wins on disagreement.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadyFlag {
    optimistic: Option<bool>,
    confirmed: bool,
}

impl ReadyFlag {
    /// The value the UI should display right now.
    pub fn effective(&self) -> bool {
        self.optimistic.unwrap_or(self.confirmed)
    }

    fn set_optimistic(&mut self, value: bool) {
        self.optimistic = Some(value);
    }

    fn confirm(&mut self, value: bool) {
        self.confirmed = value;
        self.optimistic = None;
    }

    fn reset(&mut self) {
        self.optimistic = None;
        self.confirmed = false;
    }
}

#[derive(Debug, Clone)]
struct JoinTarget {
    room_id: RoomId,
    password: Option<String>,
}

#[derive(Default)]
struct RoomState {
    phase: MembershipPhase,
    target: Option<JoinTarget>,
    roster: Vec<Player>,
    host: Option<PlayerId>,
    ready: ReadyFlag,
    /// Set once the single long-delay retry has been consumed.
    long_retry_used: bool,
    refresh_in_flight: bool,
    retry_timer: Option<JoinHandle<()>>,
    refresh_task: Option<JoinHandle<()>>,
}

impl RoomState {
    fn current_room(&self) -> Option<RoomId> {
        match self.phase {
            MembershipPhase::Idle => None,
            _ => self.target.as_ref().map(|t| t.room_id),
        }
    }

    fn cancel_timers(&mut self) {
        if let Some(timer) = self.retry_timer.take() {
            timer.abort();
        }
        if let Some(task) = self.refresh_task.take() {
            task.abort();
        }
        self.refresh_in_flight = false;
    }

    fn clear_room_scope(&mut self) {
        self.cancel_timers();
        self.phase = MembershipPhase::Idle;
        self.target = None;
        self.roster.clear();
        self.host = None;
        self.ready.reset();
        self.long_retry_used = false;
    }
}

struct RoomInner {
    local_player: PlayerId,
    sender: CommandSender,
    directory: Arc<dyn RoomDirectory>,
    signals: SignalSink,
    state: StdMutex<RoomState>,
}

// ── Controller ──────────────────────────────────────────────────────

/// Membership controller for the room the local player is in (or joining).
///
/// Created via [`RoomController::attach`], which registers its event
/// interceptors; [`detach`](RoomController::detach) (or drop) unregisters
/// them and cancels every pending timer.
pub struct RoomController {
    inner: Arc<RoomInner>,
    registry: InterceptorRegistry,
    interceptors: Vec<InterceptorId>,
}

impl RoomController {
    /// Attach a controller to the event stream.
    ///
    /// `local_player` is the session's own player id, used to reconcile
    /// the local ready flag against server broadcasts.
    pub fn attach(
        registry: &InterceptorRegistry,
        sender: CommandSender,
        directory: Arc<dyn RoomDirectory>,
        signals: SignalSink,
        local_player: PlayerId,
    ) -> Self {
        let inner = Arc::new(RoomInner {
            local_player,
            sender,
            directory,
            signals,
            state: StdMutex::new(RoomState::default()),
        });

        let kinds = [
            EventKind::JoinedRoom,
            EventKind::JoinFailed,
            EventKind::LeftRoom,
            EventKind::UserJoined,
            EventKind::UserLeft,
            EventKind::ReadyChanged,
            EventKind::ReadyReset,
            EventKind::RoomDeleted,
        ];
        let interceptors = kinds
            .into_iter()
            .map(|kind| {
                let inner = Arc::clone(&inner);
                registry.register(EventFilter::Kind(kind), 0, move |event| {
                    RoomInner::handle_event(&inner, event);
                })
            })
            .collect();

        Self {
            inner,
            registry: registry.clone(),
            interceptors,
        }
    }

    /// Join a room, optionally with a password.
    ///
    /// Idempotent when already joined to this exact room (resolves without
    /// emitting a duplicate join command).
    ///
    /// # Errors
    ///
    /// [`OvertimeError::AlreadyJoining`] if a join is already in flight
    /// (for this or any other room); [`OvertimeError::NotConnected`] if
    /// the channel is closed.
    pub fn join_room(&self, room_id: RoomId, password: Option<String>) -> Result<()> {
        {
            let mut state = self.inner.lock();
            match state.phase {
                MembershipPhase::Joined if state.current_room() == Some(room_id) => {
                    return Ok(());
                }
                MembershipPhase::Joining => {
                    let in_flight = state.current_room().unwrap_or(room_id);
                    return Err(OvertimeError::AlreadyJoining(in_flight));
                }
                _ => {}
            }
            state.cancel_timers();
            state.phase = MembershipPhase::Joining;
            state.target = Some(JoinTarget {
                room_id,
                password: password.clone(),
            });
            state.long_retry_used = false;
        }

        let result = self.inner.sender.emit(ClientCommand::JoinRoom { room_id, password });
        if result.is_err() {
            self.inner.lock().clear_room_scope();
        }
        result
    }

    /// Leave the current room.
    ///
    /// Fire-and-forget: local room-scoped projections are cleared
    /// immediately, and the caller may navigate away before (or without)
    /// any server acknowledgment.
    pub fn leave_room(&self) -> Result<()> {
        let room_id = {
            let mut state = self.inner.lock();
            let Some(room_id) = state.current_room() else {
                return Ok(());
            };
            state.clear_room_scope();
            room_id
        };
        self.inner.sender.emit(ClientCommand::LeaveRoom { room_id })
    }

    /// Toggle the local player's ready flag.
    ///
    /// Optimistic: the local value flips immediately; a server-pushed
    /// ready delta overwrites it.
    ///
    /// # Errors
    ///
    /// [`OvertimeError::NotJoined`] if not joined to a room.
    pub fn toggle_ready(&self, ready: bool) -> Result<()> {
        let room_id = {
            let mut state = self.inner.lock();
            if state.phase != MembershipPhase::Joined {
                return Err(OvertimeError::NotJoined);
            }
            state.ready.set_optimistic(ready);
            if let Some(entry) = state
                .roster
                .iter_mut()
                .find(|p| p.id == self.inner.local_player)
            {
                entry.ready = ready;
            }
            state.current_room().ok_or(OvertimeError::NotJoined)?
        };
        self.inner
            .sender
            .emit(ClientCommand::ToggleReady { room_id, ready })
    }

    /// Current phase of the join/leave state machine.
    pub fn membership_phase(&self) -> MembershipPhase {
        self.inner.lock().phase
    }

    /// The room currently joined or being joined.
    pub fn current_room(&self) -> Option<RoomId> {
        self.inner.lock().current_room()
    }

    /// Current roster projection, ordered by join time.
    pub fn roster(&self) -> Vec<Player> {
        self.inner.lock().roster.clone()
    }

    /// The room's host, if known from the authoritative snapshot.
    pub fn host(&self) -> Option<PlayerId> {
        self.inner.lock().host
    }

    /// The local player's effective ready value.
    pub fn is_ready(&self) -> bool {
        self.inner.lock().ready.effective()
    }

    /// Unregister interceptors and cancel all pending timers.
    ///
    /// After this returns, no retry or re-fetch can mutate state.
    pub fn detach(&mut self) {
        for id in self.interceptors.drain(..) {
            self.registry.unregister(id);
        }
        self.inner.lock().cancel_timers();
    }
}

impl Drop for RoomController {
    fn drop(&mut self) {
        self.detach();
    }
}

impl std::fmt::Debug for RoomController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("RoomController")
            .field("phase", &state.phase)
            .field("room", &state.current_room())
            .field("roster_len", &state.roster.len())
            .finish()
    }
}

// ── Event handling ──────────────────────────────────────────────────

impl RoomInner {
    fn lock(&self) -> std::sync::MutexGuard<'_, RoomState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn handle_event(inner: &Arc<Self>, event: &ServerEvent) {
        match event {
            ServerEvent::JoinedRoom(payload) => {
                {
                    let mut state = inner.lock();
                    if state.phase != MembershipPhase::Joining
                        || state.current_room() != Some(payload.room_id)
                    {
                        return;
                    }
                    state.phase = MembershipPhase::Joined;
                    state.roster = payload.players.clone();
                    state.long_retry_used = false;
                    if let Some(timer) = state.retry_timer.take() {
                        timer.abort();
                    }
                }
                // The ack roster can race concurrent deltas; reconcile
                // against the authoritative snapshot.
                Self::schedule_roster_refresh(inner);
            }
            ServerEvent::JoinFailed {
                room_id,
                reason,
                error_code,
            } => {
                Self::handle_join_failed(inner, *room_id, reason, error_code.as_ref());
            }
            ServerEvent::LeftRoom { room_id } => {
                let mut state = inner.lock();
                if state.current_room() == Some(*room_id) {
                    state.clear_room_scope();
                }
            }
            ServerEvent::UserJoined { room_id, player } => {
                let refresh = {
                    let mut state = inner.lock();
                    if state.current_room() != Some(*room_id) {
                        false
                    } else {
                        // Set semantics on identity: replace, never duplicate.
                        if let Some(existing) =
                            state.roster.iter_mut().find(|p| p.id == player.id)
                        {
                            *existing = player.clone();
                        } else {
                            state.roster.push(player.clone());
                        }
                        true
                    }
                };
                if refresh {
                    Self::schedule_roster_refresh(inner);
                }
            }
            ServerEvent::UserLeft { room_id, player_id } => {
                let refresh = {
                    let mut state = inner.lock();
                    if state.current_room() != Some(*room_id) {
                        false
                    } else {
                        state.roster.retain(|p| p.id != *player_id);
                        true
                    }
                };
                if refresh {
                    Self::schedule_roster_refresh(inner);
                }
            }
            ServerEvent::ReadyChanged {
                room_id,
                player_id,
                ready,
            } => {
                let mut state = inner.lock();
                if state.current_room() != Some(*room_id) {
                    return;
                }
                if let Some(entry) = state.roster.iter_mut().find(|p| p.id == *player_id) {
                    entry.ready = *ready;
                }
                if *player_id == inner.local_player {
                    state.ready.confirm(*ready);
                }
            }
            ServerEvent::ReadyReset { room_id } => {
                let mut state = inner.lock();
                if state.current_room() != Some(*room_id) {
                    return;
                }
                for player in &mut state.roster {
                    player.ready = false;
                }
                state.ready.confirm(false);
            }
            ServerEvent::RoomDeleted { room_id } => {
                let relevant = {
                    let mut state = inner.lock();
                    let relevant = state.current_room() == Some(*room_id);
                    if relevant {
                        state.clear_room_scope();
                    }
                    relevant
                };
                if relevant {
                    inner
                        .signals
                        .send(SessionSignal::RoomClosed { room_id: *room_id });
                }
            }
            _ => {}
        }
    }

    fn handle_join_failed(
        inner: &Arc<Self>,
        room_id: RoomId,
        reason: &str,
        error_code: Option<&crate::error_codes::ErrorCode>,
    ) {
        let mut state = inner.lock();
        if state.phase != MembershipPhase::Joining || state.current_room() != Some(room_id) {
            return;
        }

        let class = error_code
            .map(|code| code.join_retry())
            .unwrap_or(JoinRetryClass::RetryOnce);

        match class {
            JoinRetryClass::RetryShort => {
                debug!(%room_id, reason, "join deferred by server; retrying shortly");
                state.phase = MembershipPhase::Idle;
                Self::schedule_join_retry(inner, &mut state, RETRY_SHORT);
            }
            JoinRetryClass::Terminal => {
                warn!(%room_id, reason, "room is gone; abandoning join");
                state.clear_room_scope();
                drop(state);
                inner.signals.send(SessionSignal::RoomClosed { room_id });
            }
            JoinRetryClass::Suppress => {
                debug!(%room_id, reason, "join already outstanding server-side; not retrying");
                state.phase = MembershipPhase::Idle;
            }
            JoinRetryClass::RetryOnce => {
                state.phase = MembershipPhase::Idle;
                if state.long_retry_used {
                    warn!(%room_id, reason, "join failed twice; giving up");
                    state.clear_room_scope();
                } else {
                    debug!(%room_id, reason, "join failed; retrying once");
                    state.long_retry_used = true;
                    Self::schedule_join_retry(inner, &mut state, RETRY_LONG);
                }
            }
        }
    }

    /// Arm the join retry timer. The previous timer, if any, is replaced.
    fn schedule_join_retry(inner: &Arc<Self>, state: &mut RoomState, delay: Duration) {
        if let Some(previous) = state.retry_timer.take() {
            previous.abort();
        }
        let task_inner = Arc::clone(inner);
        state.retry_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let command = {
                let mut state = task_inner.lock();
                state.retry_timer = None;
                if state.phase != MembershipPhase::Idle {
                    return;
                }
                let Some(target) = state.target.clone() else {
                    return;
                };
                state.phase = MembershipPhase::Joining;
                ClientCommand::JoinRoom {
                    room_id: target.room_id,
                    password: target.password,
                }
            };
            if let Err(e) = task_inner.sender.emit(command) {
                debug!("join retry emit failed: {e}");
                task_inner.lock().phase = MembershipPhase::Idle;
            }
        }));
    }

    /// Schedule a debounced authoritative roster re-fetch. A re-fetch
    /// already pending or in flight suppresses the new one.
    fn schedule_roster_refresh(inner: &Arc<Self>) {
        let mut state = inner.lock();
        if state.refresh_in_flight {
            return;
        }
        let Some(room_id) = state.current_room() else {
            return;
        };
        state.refresh_in_flight = true;

        let task_inner = Arc::clone(inner);
        state.refresh_task = Some(tokio::spawn(async move {
            tokio::time::sleep(ROSTER_REFRESH_DEBOUNCE).await;
            let fetched = task_inner.directory.fetch_room(room_id).await;
            let mut state = task_inner.lock();
            state.refresh_in_flight = false;
            state.refresh_task = None;
            match fetched {
                Ok(snapshot) => {
                    if state.current_room() == Some(room_id) {
                        // Wholesale replacement; never patched field-by-field.
                        state.roster = snapshot.players;
                        state.host = Some(snapshot.host_id);
                        let confirmed = state
                            .roster
                            .iter()
                            .find(|p| p.id == task_inner.local_player)
                            .map(|p| p.ready);
                        if let Some(confirmed) = confirmed {
                            state.ready.confirm(confirmed);
                        }
                    }
                }
                Err(e) => {
                    warn!(%room_id, "roster refresh failed: {e}");
                }
            }
        }));
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

    #[test]
    fn ready_flag_optimistic_then_confirmed() {
        let mut flag = ReadyFlag::default();
        assert!(!flag.effective());

        flag.set_optimistic(true);
        assert!(flag.effective());

        // Server disagrees; its value wins.
        flag.confirm(false);
        assert!(!flag.effective());

        flag.confirm(true);
        assert!(flag.effective());

        flag.reset();
        assert!(!flag.effective());
    }

    #[test]
    fn current_room_is_none_when_idle() {
        let mut state = RoomState::default();
        state.target = Some(JoinTarget {
            room_id: uuid::Uuid::from_u128(9),
            password: None,
        });
        state.phase = MembershipPhase::Idle;
        assert_eq!(state.current_room(), None);

        state.phase = MembershipPhase::Joining;
        assert_eq!(state.current_room(), Some(uuid::Uuid::from_u128(9)));
    }
}
