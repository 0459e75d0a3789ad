//! Apply remote snapshots to the local view and derive one-time side effects from the diff.

use std::{
    collections::BTreeSet,
    sync::{Arc, Mutex},
};

use tracing::{debug, info, warn};

use crate::{
    dao::lock,
    services::{
        collaborators::{Collaborators, ModalButton, ModalKind, ModalSpec},
        events::{EventHub, SyncEvent},
        timer_gate::{PauseReason, TimerGate},
    },
    state::{
        consensus::{VoteTally, finish_majority, tally},
        game::{GameOverResult, MoveRecord, NoMovesClaim, Position, SyncableGameState, Vote},
        settings::{Settings, SettingsPatch},
    },
};

/// Result of offering one snapshot to the reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The snapshot was not newer than the last one applied and changed nothing.
    Stale,
    Applied { version: u64 },
}

/// Everything one client derives from the shared document.
#[derive(Debug, Clone, Default)]
pub struct LocalView {
    /// Last applied snapshot, `None` until the first one arrives.
    pub game: Option<SyncableGameState>,
    pub settings: Settings,
    pub legal_moves: Vec<Position>,
    /// Moves queued for animation since the last reset.
    pub animation_queue: Vec<MoveRecord>,
    pub game_over_shown: bool,
    pub claim_modal_open: bool,
    /// Timestamp of the newest claim already processed.
    pub last_claim_timestamp: Option<i64>,
    pub last_tally: Option<VoteTally>,
    announced: BTreeSet<(String, i64)>,
}

impl LocalView {
    pub fn last_version(&self) -> Option<u64> {
        self.game.as_ref().map(|game| game.version)
    }
}

/// Applies incoming snapshots for one client. Thread-safe; calls are serialized internally.
pub struct Reconciler {
    local_player_id: String,
    collaborators: Collaborators,
    gate: Arc<TimerGate>,
    events: Arc<EventHub>,
    view: Mutex<LocalView>,
}

impl Reconciler {
    pub fn new(
        local_player_id: impl Into<String>,
        settings: Settings,
        collaborators: Collaborators,
        gate: Arc<TimerGate>,
        events: Arc<EventHub>,
    ) -> Self {
        Self {
            local_player_id: local_player_id.into(),
            collaborators,
            gate,
            events,
            view: Mutex::new(LocalView {
                settings,
                ..LocalView::default()
            }),
        }
    }

    /// Copy of the current local view.
    pub fn view(&self) -> LocalView {
        lock(&self.view).clone()
    }

    /// Last applied snapshot.
    pub fn snapshot(&self) -> Option<SyncableGameState> {
        lock(&self.view).game.clone()
    }

    pub fn settings(&self) -> Settings {
        lock(&self.view).settings.clone()
    }

    /// Change purely local preferences or rules before the next snapshot arrives.
    pub fn update_settings(&self, update: impl FnOnce(&mut Settings)) {
        let mut view = lock(&self.view);
        update(&mut view.settings);
    }

    /// Apply `incoming` unless it is stale.
    pub fn apply(&self, incoming: SyncableGameState) -> ApplyOutcome {
        let mut view = lock(&self.view);
        if let Some(last) = view.last_version()
            && incoming.version <= last
        {
            debug!(
                version = incoming.version,
                last_applied = last,
                "discarding stale snapshot"
            );
            return ApplyOutcome::Stale;
        }

        let mut incoming = incoming;
        let version = incoming.version;
        let baseline = view.game.is_none();
        let previous = view.game.take().unwrap_or_default();

        // A dropped grid decodes as empty; keep what we had rather than blanking the board.
        if incoming.board_state.board.is_empty() && !previous.board_state.board.is_empty() {
            warn!(version, "incoming snapshot has no board grid; keeping the local one");
            incoming.board_state.board = previous.board_state.board.clone();
        }

        self.apply_history(&mut view, &previous, &incoming, baseline);
        self.apply_settings(&mut view, incoming.settings.as_ref());
        self.apply_game_over(&mut view, &incoming);
        self.apply_claim(&mut view, &incoming);

        view.legal_moves = self
            .collaborators
            .board
            .legal_moves(&incoming.board_state, &view.settings);
        view.game = Some(incoming);
        drop(view);

        self.events.broadcast(SyncEvent::StateApplied { version });
        ApplyOutcome::Applied { version }
    }

    /// Steps 1 and 2: detect resets and announce newly queued moves.
    fn apply_history(
        &self,
        view: &mut LocalView,
        previous: &SyncableGameState,
        incoming: &SyncableGameState,
        baseline: bool,
    ) {
        let history_shrank =
            incoming.board_state.move_history.len() < previous.board_state.move_history.len();
        if history_shrank && !baseline {
            info!(version = incoming.version, "move history shrank; treating as reset");
            view.animation_queue.clear();
            view.announced.clear();
            self.events.broadcast(SyncEvent::GameReset);
        }

        let known = if history_shrank {
            0
        } else {
            previous.board_state.pending_moves.len()
        };
        let fresh = incoming
            .board_state
            .pending_moves
            .iter()
            .skip(known)
            .cloned()
            .collect::<Vec<_>>();

        for record in fresh {
            let key = (record.player_id.clone(), record.timestamp);
            if baseline {
                view.announced.insert(key);
                continue;
            }
            if !view.announced.insert(key) {
                continue;
            }
            view.animation_queue.push(record.clone());
            let announce = record.player_id != self.local_player_id
                && view.settings.voice_enabled
                && view.settings.announce_opponent_moves;
            if announce {
                self.collaborators.speech.speak(
                    &record,
                    &view.settings.language,
                    view.settings.voice_id.as_deref(),
                );
            }
            self.events.broadcast(SyncEvent::MoveAdded(record));
        }
    }

    /// Step 4: only the fields present in the shared patch touch local settings.
    fn apply_settings(&self, view: &mut LocalView, patch: Option<&SettingsPatch>) {
        let Some(patch) = patch else {
            return;
        };
        if view.settings.apply_patch(patch) {
            debug!(?patch, "applied shared settings");
            self.events
                .broadcast(SyncEvent::SettingsChanged(view.settings.clone()));
        }
    }

    /// Step 5.
    fn apply_game_over(&self, view: &mut LocalView, incoming: &SyncableGameState) {
        match &incoming.game_over {
            Some(result) if !view.game_over_shown => {
                view.game_over_shown = true;
                info!(reason = ?result.reason, winner = ?result.winner_id, "game over");
                self.gate.stop();
                self.collaborators.modals.show_modal(game_over_modal(result));
                self.events
                    .broadcast(SyncEvent::GameOver(Box::new(result.clone())));
            }
            Some(_) => {}
            None if view.game_over_shown && finish_majority(incoming) => {
                debug!(
                    version = incoming.version,
                    "finish majority recorded without a result yet; keeping game over"
                );
            }
            None if view.game_over_shown => {
                view.game_over_shown = false;
                self.collaborators.modals.close_modal(ModalKind::GameOver);
                self.gate.restart();
                self.events.broadcast(SyncEvent::GameOverCleared);
            }
            None => {}
        }
    }

    /// Step 6.
    fn apply_claim(&self, view: &mut LocalView, incoming: &SyncableGameState) {
        let modals = &self.collaborators.modals;
        let claim = incoming
            .no_moves_claim
            .as_ref()
            .filter(|_| incoming.game_over.is_none());

        let Some(claim) = claim else {
            if view.claim_modal_open {
                view.claim_modal_open = false;
                view.last_tally = None;
                modals.close_modal(ModalKind::NoMovesVote);
                self.gate.release(PauseReason::Claim);
                self.events.broadcast(SyncEvent::ClaimClosed);
            }
            return;
        };

        let unseen = view
            .last_claim_timestamp
            .is_none_or(|seen| claim.timestamp > seen);
        if unseen {
            view.last_claim_timestamp = Some(claim.timestamp);
            if !view.claim_modal_open {
                view.claim_modal_open = true;
                modals.show_modal(claim_modal(claim, &self.claimant_name(incoming, claim)));
                self.gate.hold(PauseReason::Claim);
            }
            self.events.broadcast(SyncEvent::ClaimOpened(claim.clone()));
        }
        if !view.claim_modal_open {
            return;
        }

        let votes = tally(incoming);
        if view.last_tally != Some(votes) {
            view.last_tally = Some(votes);
            modals.set_button_text(
                ModalKind::NoMovesVote,
                ModalButton::Continue,
                format!("Continue ({}/{})", votes.continue_votes, votes.threshold),
            );
            modals.set_button_text(
                ModalKind::NoMovesVote,
                ModalButton::Finish,
                format!("Finish ({}/{})", votes.finish_votes, votes.threshold),
            );
            self.events.broadcast(SyncEvent::VotesUpdated(votes));
        }

        let mine = incoming.no_moves_votes.get(&self.local_player_id);
        for (button, vote) in [
            (ModalButton::Continue, Vote::Continue),
            (ModalButton::Finish, Vote::Finish),
        ] {
            modals.set_button_disabled(ModalKind::NoMovesVote, button, mine == Some(&vote));
        }
    }

    fn claimant_name(&self, state: &SyncableGameState, claim: &NoMovesClaim) -> String {
        state
            .player_state
            .find(&claim.player_id)
            .map(|player| player.name.clone())
            .unwrap_or_else(|| claim.player_id.clone())
    }
}

fn claim_modal(claim: &NoMovesClaim, claimant: &str) -> ModalSpec {
    ModalSpec::new(
        ModalKind::NoMovesVote,
        "No legal moves",
        format!(
            "{claimant} has no legal moves left. Finish now with {} points, or keep playing?",
            claim.score_preview
        ),
    )
    .button(ModalButton::Continue, "Continue")
    .button(ModalButton::Finish, "Finish")
    .blocking()
}

fn game_over_modal(result: &GameOverResult) -> ModalSpec {
    let standings = result
        .standings
        .iter()
        .map(|standing| format!("{}: {}", standing.name, standing.score))
        .collect::<Vec<_>>()
        .join(", ");
    ModalSpec::new(ModalKind::GameOver, "Game over", standings)
        .button(ModalButton::Dismiss, "Back to lobby")
}
