//! Game phase projector.
//!
//! The game state machine lives server-side; this module maintains a
//! read-only local mirror of it and the commands that request phase
//! transitions. Three rules keep the mirror honest:
//!
//! - every inbound phase event replaces the snapshot **wholesale** — the
//!   projector never merges partial updates, so a field from an earlier
//!   phase can never linger as stale data
//! - the client never transitions phases on its own; completing all
//!   selections merely *enables* the submit command
//! - missed push events are tolerated by polling the full snapshot on a
//!   timer while a game is in progress, with an in-flight guard so polls
//!   never pile up
//!
//! The one piece of client-owned state is the selection scratch: the
//! per-player agenda/task/overtime choices gathered during the
//! interactive phase. It is created empty when that phase is entered,
//! cleared on any transition out of it, and never persisted.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::connection::CommandSender;
use crate::error::{OvertimeError, Result};
use crate::error_codes::ErrorCode;
use crate::interceptor::{EventFilter, InterceptorId, InterceptorRegistry};
use crate::protocol::{
    AgendaId, ClientCommand, EventKind, GamePhase, GameSnapshot, PlayerId, RoomId,
    SelectionSubmission, ServerEvent, TaskChoice,
};

/// Interval of the progress poll while a game is in progress.
const PROGRESS_POLL_INTERVAL: Duration = Duration::from_secs(5);

// ── Selection scratch ───────────────────────────────────────────────

/// Client-side scratch for the interactive phase. Keyed by player id.
#[derive(Debug, Clone, Default)]
pub struct SelectionState {
    agenda: HashMap<PlayerId, AgendaId>,
    tasks: HashMap<PlayerId, Vec<TaskChoice>>,
    overtime: HashMap<PlayerId, Vec<TaskChoice>>,
}

impl SelectionState {
    /// A player's set is complete with exactly one agenda, at least one
    /// task, and at least one overtime choice.
    fn is_complete_for(&self, player: &PlayerId) -> bool {
        self.agenda.contains_key(player)
            && self.tasks.get(player).is_some_and(|t| !t.is_empty())
            && self.overtime.get(player).is_some_and(|t| !t.is_empty())
    }

    fn into_submission(self) -> SelectionSubmission {
        SelectionSubmission {
            agenda: self.agenda,
            tasks: self.tasks,
            overtime: self.overtime,
        }
    }
}

// ── Projector state ─────────────────────────────────────────────────

#[derive(Default)]
struct GameState {
    snapshot: Option<GameSnapshot>,
    selections: SelectionState,
    /// Players named by the most recent player-context map. Kept apart
    /// from the snapshot so wholesale payload replacement cannot silently
    /// change the completeness denominator.
    context_roster: Vec<PlayerId>,
    /// Roster used for the lazy create-game command.
    players: Vec<PlayerId>,
    /// Latch: the create-game bootstrap fires once per "no game state"
    /// condition, not on every poll.
    bootstrap_requested: bool,
    /// In-flight guard for the progress poll.
    progress_pending: bool,
    poll_task: Option<JoinHandle<()>>,
}

struct GameInner {
    room_id: RoomId,
    sender: CommandSender,
    state: StdMutex<GameState>,
}

impl GameInner {
    fn lock(&self) -> std::sync::MutexGuard<'_, GameState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

// ── Projector ───────────────────────────────────────────────────────

/// Read-only projection of one room's server-authoritative game state,
/// plus the transition commands.
///
/// Created via [`GameProjector::attach`]; [`detach`](GameProjector::detach)
/// (or drop) unregisters its interceptors and stops the poll timer.
pub struct GameProjector {
    inner: Arc<GameInner>,
    registry: InterceptorRegistry,
    interceptors: Vec<InterceptorId>,
}

impl GameProjector {
    /// Attach a projector for `room_id` to the event stream.
    ///
    /// `players` is the roster used when the lazily-created game state
    /// must be bootstrapped; keep it current via
    /// [`set_players`](Self::set_players).
    pub fn attach(
        registry: &InterceptorRegistry,
        sender: CommandSender,
        room_id: RoomId,
        players: Vec<PlayerId>,
    ) -> Self {
        let inner = Arc::new(GameInner {
            room_id,
            sender,
            state: StdMutex::new(GameState {
                players,
                ..GameState::default()
            }),
        });

        let kinds = [
            EventKind::GameCreated,
            EventKind::ContextCreated,
            EventKind::AgendaCreated,
            EventKind::TaskCreated,
            EventKind::OvertimeCreated,
            EventKind::ContextUpdated,
            EventKind::ExplanationCreated,
            EventKind::ResultCalculated,
            EventKind::GameFinished,
            EventKind::GameProgress,
            EventKind::Error,
        ];
        let interceptors = kinds
            .into_iter()
            .map(|kind| {
                let inner = Arc::clone(&inner);
                registry.register(EventFilter::Kind(kind), 0, move |event| {
                    GameInner::handle_event(&inner, event);
                })
            })
            .collect();

        let projector = Self {
            inner,
            registry: registry.clone(),
            interceptors,
        };

        // Mount: ask for the current snapshot (best-effort; the poll will
        // catch up if the channel is still connecting) and start polling.
        let _ = projector.request_progress();
        projector.start_poll();

        projector
    }

    // ── Transition commands (fire-and-forget) ───────────────────────

    /// Host: start the game.
    pub fn start_game(&self) -> Result<()> {
        self.emit(ClientCommand::StartGame {
            room_id: self.inner.room_id,
        })
    }

    /// Host: finish the game.
    pub fn finish_game(&self) -> Result<()> {
        self.emit(ClientCommand::FinishGame {
            room_id: self.inner.room_id,
        })
    }

    /// Create the game state explicitly (normally the bootstrap does this).
    pub fn create_game(&self) -> Result<()> {
        let players = self.inner.lock().players.clone();
        self.emit(ClientCommand::CreateGame {
            room_id: self.inner.room_id,
            players,
        })
    }

    /// Create the story context, entering `context_creation`.
    pub fn create_context(&self, max_turn: u32, story: impl Into<String>) -> Result<()> {
        self.emit(ClientCommand::CreateContext {
            room_id: self.inner.room_id,
            max_turn,
            story: story.into(),
        })
    }

    /// Generate the agenda list, entering `agenda_creation`.
    pub fn create_agenda(&self) -> Result<()> {
        self.emit(ClientCommand::CreateAgenda {
            room_id: self.inner.room_id,
        })
    }

    /// Generate task lists, entering `task_creation`.
    pub fn create_task(&self) -> Result<()> {
        self.emit(ClientCommand::CreateTask {
            room_id: self.inner.room_id,
        })
    }

    /// Generate overtime-task lists, entering `overtime_creation`.
    pub fn create_overtime(&self) -> Result<()> {
        self.emit(ClientCommand::CreateOvertime {
            room_id: self.inner.room_id,
        })
    }

    /// Submit the gathered selections, requesting the `playing` phase.
    ///
    /// # Errors
    ///
    /// [`OvertimeError::IncompleteSelections`] if any player in the
    /// context roster is missing a selection; nothing is emitted in that
    /// case.
    pub fn submit_selections(&self) -> Result<()> {
        let selections = {
            let state = self.inner.lock();
            if !Self::complete(&state) {
                return Err(OvertimeError::IncompleteSelections);
            }
            state.selections.clone()
        };
        self.emit(ClientCommand::UpdateContext {
            room_id: self.inner.room_id,
            selections: selections.into_submission(),
        })
    }

    /// Generate the turn explanation, entering `explanation`.
    pub fn create_explanation(&self) -> Result<()> {
        self.emit(ClientCommand::CreateExplanation {
            room_id: self.inner.room_id,
        })
    }

    /// Calculate the final result, entering `result`.
    pub fn calculate_result(&self) -> Result<()> {
        self.emit(ClientCommand::CalculateResult {
            room_id: self.inner.room_id,
        })
    }

    /// Request a fresh snapshot of the full phase state.
    pub fn request_progress(&self) -> Result<()> {
        {
            let mut state = self.inner.lock();
            if state.progress_pending {
                return Ok(());
            }
            state.progress_pending = true;
        }
        let result = self.emit(ClientCommand::GetGameProgress {
            room_id: self.inner.room_id,
        });
        if result.is_err() {
            self.inner.lock().progress_pending = false;
        }
        result
    }

    // ── Selection scratch ───────────────────────────────────────────

    /// Record a player's single agenda choice (replacing any previous one).
    pub fn record_agenda_selection(&self, player: PlayerId, agenda: AgendaId) {
        self.inner.lock().selections.agenda.insert(player, agenda);
    }

    /// Record a task→option choice for a player.
    pub fn record_task_selection(&self, player: PlayerId, choice: TaskChoice) {
        self.inner
            .lock()
            .selections
            .tasks
            .entry(player)
            .or_default()
            .push(choice);
    }

    /// Record an overtime task→option choice for a player.
    pub fn record_overtime_selection(&self, player: PlayerId, choice: TaskChoice) {
        self.inner
            .lock()
            .selections
            .overtime
            .entry(player)
            .or_default()
            .push(choice);
    }

    /// `true` iff every player in the context roster has exactly one
    /// agenda, at least one task, and at least one overtime selection.
    /// The submit control must stay disabled until this holds.
    pub fn is_selection_complete(&self) -> bool {
        Self::complete(&self.inner.lock())
    }

    fn complete(state: &GameState) -> bool {
        !state.context_roster.is_empty()
            && state
                .context_roster
                .iter()
                .all(|player| state.selections.is_complete_for(player))
    }

    // ── Accessors ───────────────────────────────────────────────────

    /// The current snapshot, if a game exists for this room.
    pub fn snapshot(&self) -> Option<GameSnapshot> {
        self.inner.lock().snapshot.clone()
    }

    /// The current phase, if a game exists.
    pub fn phase(&self) -> Option<GamePhase> {
        self.inner.lock().snapshot.as_ref().map(|s| s.phase.clone())
    }

    /// Players named by the most recent player-context map.
    pub fn context_roster(&self) -> Vec<PlayerId> {
        self.inner.lock().context_roster.clone()
    }

    /// Update the roster used by the create-game bootstrap.
    pub fn set_players(&self, players: Vec<PlayerId>) {
        self.inner.lock().players = players;
    }

    /// Unregister interceptors and stop the progress poll.
    pub fn detach(&mut self) {
        for id in self.interceptors.drain(..) {
            self.registry.unregister(id);
        }
        let mut state = self.inner.lock();
        if let Some(task) = state.poll_task.take() {
            task.abort();
        }
        state.progress_pending = false;
        // Scratch is never persisted beyond the owning view.
        state.selections = SelectionState::default();
    }

    // ── Internals ───────────────────────────────────────────────────

    fn emit(&self, command: ClientCommand) -> Result<()> {
        self.inner.sender.emit(command)
    }

    fn start_poll(&self) {
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(async move {
            loop {
                tokio::time::sleep(PROGRESS_POLL_INTERVAL).await;
                let command = {
                    let mut state = inner.lock();
                    let pollable = match &state.snapshot {
                        // No game yet: keep asking so the "no game state"
                        // condition (and its bootstrap) can surface.
                        None => true,
                        Some(snapshot) => !matches!(
                            snapshot.phase,
                            GamePhase::Waiting | GamePhase::Finished
                        ),
                    };
                    if !pollable || state.progress_pending {
                        None
                    } else {
                        state.progress_pending = true;
                        Some(ClientCommand::GetGameProgress {
                            room_id: inner.room_id,
                        })
                    }
                };
                if let Some(command) = command {
                    if let Err(e) = inner.sender.emit(command) {
                        debug!("progress poll emit failed: {e}");
                        inner.lock().progress_pending = false;
                    }
                }
            }
        });
        self.inner.lock().poll_task = Some(task);
    }
}

impl Drop for GameProjector {
    fn drop(&mut self) {
        self.detach();
    }
}

impl std::fmt::Debug for GameProjector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("GameProjector")
            .field("room_id", &self.inner.room_id)
            .field("has_snapshot", &state.snapshot.is_some())
            .finish()
    }
}

// ── Event handling ──────────────────────────────────────────────────

impl GameInner {
    fn handle_event(inner: &Arc<Self>, event: &ServerEvent) {
        match event {
            ServerEvent::GameCreated { room_id } if *room_id == inner.room_id => {
                inner.apply(GameSnapshot {
                    room_id: *room_id,
                    current_turn: 0,
                    max_turn: 0,
                    phase: GamePhase::Waiting,
                });
            }
            ServerEvent::ContextCreated(payload) if payload.room_id == inner.room_id => {
                inner.apply(GameSnapshot {
                    room_id: payload.room_id,
                    current_turn: payload.current_turn,
                    max_turn: payload.max_turn,
                    phase: GamePhase::ContextCreation {
                        story: payload.story.clone(),
                        company_context: payload.company_context.clone(),
                        player_contexts: payload.player_contexts.clone(),
                    },
                });
            }
            ServerEvent::AgendaCreated {
                room_id,
                current_turn,
                max_turn,
                agenda_list,
            } if *room_id == inner.room_id => {
                inner.apply(GameSnapshot {
                    room_id: *room_id,
                    current_turn: *current_turn,
                    max_turn: *max_turn,
                    phase: GamePhase::AgendaCreation {
                        agenda_list: agenda_list.clone(),
                    },
                });
            }
            ServerEvent::TaskCreated {
                room_id,
                current_turn,
                max_turn,
                task_lists,
            } if *room_id == inner.room_id => {
                inner.apply(GameSnapshot {
                    room_id: *room_id,
                    current_turn: *current_turn,
                    max_turn: *max_turn,
                    phase: GamePhase::TaskCreation {
                        task_lists: task_lists.clone(),
                    },
                });
            }
            ServerEvent::OvertimeCreated {
                room_id,
                current_turn,
                max_turn,
                overtime_lists,
            } if *room_id == inner.room_id => {
                inner.apply(GameSnapshot {
                    room_id: *room_id,
                    current_turn: *current_turn,
                    max_turn: *max_turn,
                    phase: GamePhase::OvertimeCreation {
                        overtime_lists: overtime_lists.clone(),
                    },
                });
            }
            ServerEvent::ContextUpdated {
                room_id,
                current_turn,
                max_turn,
                player_contexts,
            } if *room_id == inner.room_id => {
                inner.apply(GameSnapshot {
                    room_id: *room_id,
                    current_turn: *current_turn,
                    max_turn: *max_turn,
                    phase: GamePhase::Playing {
                        player_contexts: player_contexts.clone(),
                    },
                });
            }
            ServerEvent::ExplanationCreated {
                room_id,
                current_turn,
                max_turn,
                explanation,
            } if *room_id == inner.room_id => {
                inner.apply(GameSnapshot {
                    room_id: *room_id,
                    current_turn: *current_turn,
                    max_turn: *max_turn,
                    phase: GamePhase::Explanation {
                        explanation: explanation.clone(),
                    },
                });
            }
            ServerEvent::ResultCalculated {
                room_id,
                summary,
                rankings,
            } if *room_id == inner.room_id => {
                let (current_turn, max_turn) = {
                    let state = inner.lock();
                    state
                        .snapshot
                        .as_ref()
                        .map(|s| (s.current_turn, s.max_turn))
                        .unwrap_or((0, 0))
                };
                inner.apply(GameSnapshot {
                    room_id: *room_id,
                    current_turn,
                    max_turn,
                    phase: GamePhase::Result {
                        summary: summary.clone(),
                        rankings: rankings.clone(),
                    },
                });
            }
            ServerEvent::GameFinished { room_id } if *room_id == inner.room_id => {
                let (current_turn, max_turn) = {
                    let state = inner.lock();
                    state
                        .snapshot
                        .as_ref()
                        .map(|s| (s.current_turn, s.max_turn))
                        .unwrap_or((0, 0))
                };
                inner.apply(GameSnapshot {
                    room_id: *room_id,
                    current_turn,
                    max_turn,
                    phase: GamePhase::Finished,
                });
            }
            ServerEvent::GameProgress(snapshot) if snapshot.room_id == inner.room_id => {
                inner.lock().progress_pending = false;
                inner.apply((**snapshot).clone());
            }
            ServerEvent::Error {
                error_code: Some(ErrorCode::GameStateNotFound),
                room_id: Some(room_id),
                ..
            } if *room_id == inner.room_id => {
                // The server creates game state lazily; the first progress
                // request for a fresh room reports "not found". Issue the
                // create-game command once for this condition.
                let command = {
                    let mut state = inner.lock();
                    state.progress_pending = false;
                    if state.bootstrap_requested {
                        None
                    } else {
                        state.bootstrap_requested = true;
                        Some(ClientCommand::CreateGame {
                            room_id: *room_id,
                            players: state.players.clone(),
                        })
                    }
                };
                if let Some(command) = command {
                    debug!(%room_id, "no game state found; bootstrapping create-game");
                    if let Err(e) = inner.sender.emit(command) {
                        warn!("create-game bootstrap emit failed: {e}");
                        // Allow a later condition to try again.
                        inner.lock().bootstrap_requested = false;
                    }
                }
            }
            _ => {}
        }
    }

    /// Replace the snapshot wholesale and reconcile client-owned state.
    fn apply(&self, snapshot: GameSnapshot) {
        let mut state = self.lock();

        // A game event arriving at all means state exists server-side.
        state.bootstrap_requested = false;

        let was_interactive = state
            .snapshot
            .as_ref()
            .is_some_and(|s| s.phase.is_interactive());
        let now_interactive = snapshot.phase.is_interactive();

        // The completeness denominator follows the latest player-context
        // map the server sent.
        match &snapshot.phase {
            GamePhase::ContextCreation {
                player_contexts, ..
            }
            | GamePhase::Playing { player_contexts } => {
                let mut roster: Vec<PlayerId> = player_contexts.keys().copied().collect();
                roster.sort();
                state.context_roster = roster;
            }
            _ => {}
        }

        // Scratch lives only inside the interactive phase: created empty
        // on entry, dropped on exit, kept only while staying within it.
        if !(was_interactive && now_interactive) {
            state.selections = SelectionState::default();
        }

        state.snapshot = Some(snapshot);
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
    use uuid::Uuid;

    #[test]
    fn selection_completeness_per_player() {
        let player = Uuid::from_u128(1);
        let mut selections = SelectionState::default();
        assert!(!selections.is_complete_for(&player));

        selections.agenda.insert(player, Uuid::from_u128(10));
        assert!(!selections.is_complete_for(&player));

        selections.tasks.entry(player).or_default().push(TaskChoice {
            task_id: Uuid::from_u128(20),
            option_id: Uuid::from_u128(21),
        });
        assert!(!selections.is_complete_for(&player));

        selections
            .overtime
            .entry(player)
            .or_default()
            .push(TaskChoice {
                task_id: Uuid::from_u128(30),
                option_id: Uuid::from_u128(31),
            });
        assert!(selections.is_complete_for(&player));
    }

    #[test]
    fn empty_task_list_is_not_complete() {
        let player = Uuid::from_u128(1);
        let mut selections = SelectionState::default();
        selections.agenda.insert(player, Uuid::from_u128(10));
        selections.tasks.insert(player, Vec::new());
        selections.overtime.insert(
            player,
            vec![TaskChoice {
                task_id: Uuid::from_u128(30),
                option_id: Uuid::from_u128(31),
            }],
        );
        assert!(!selections.is_complete_for(&player));
    }
}
