//! Turn local game events into shared-state writes, and modal visibility into timer pauses.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::{
    clock::now_ms,
    dao::state_store::StateStore,
    error::SyncError,
    services::{
        collaborators::{BoardOps, ModalKind},
        reconciler::Reconciler,
        timer_gate::{PauseReason, TimerGate},
    },
    state::{
        game::{GameOverResult, MoveRecord, NoMovesClaim, ScoreState, SyncableGameState},
        settings::SettingsPatch,
    },
};

/// Something that happened in the local UI or rules engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalGameEvent {
    /// Shared rules changed; only the fields set in the patch are shared.
    SettingsChanged(SettingsPatch),
    ReplayRequested,
    /// The local player found no legal move and opens a vote.
    NoLegalMovesClaimed { score_preview: i64 },
    /// The local rules engine reached a natural end.
    GameOverReached(GameOverResult),
    MovePlayed(MoveRecord),
    ModalOpened(ModalKind),
    ModalClosed(ModalKind),
}

/// Routes [`LocalGameEvent`]s to the state store and the timer gate.
pub struct EventManager {
    local_player_id: String,
    store: Arc<dyn StateStore>,
    board: Arc<dyn BoardOps>,
    reconciler: Arc<Reconciler>,
    gate: Arc<TimerGate>,
}

impl EventManager {
    pub fn new(
        local_player_id: impl Into<String>,
        store: Arc<dyn StateStore>,
        board: Arc<dyn BoardOps>,
        reconciler: Arc<Reconciler>,
        gate: Arc<TimerGate>,
    ) -> Self {
        Self {
            local_player_id: local_player_id.into(),
            store,
            board,
            reconciler,
            gate,
        }
    }

    /// Handle one event. Returns the version written, or `None` when nothing was pushed.
    pub async fn handle(&self, event: LocalGameEvent) -> Result<Option<u64>, SyncError> {
        match event {
            LocalGameEvent::ModalOpened(kind) => {
                self.gate.hold(PauseReason::Modal(kind));
                Ok(None)
            }
            LocalGameEvent::ModalClosed(kind) => {
                self.gate.release(PauseReason::Modal(kind));
                Ok(None)
            }
            LocalGameEvent::SettingsChanged(patch) => self.settings_changed(patch).await,
            LocalGameEvent::ReplayRequested => self.replay().await,
            LocalGameEvent::NoLegalMovesClaimed { score_preview } => {
                self.claim_no_moves(score_preview).await
            }
            LocalGameEvent::GameOverReached(result) => self.game_over(result).await,
            LocalGameEvent::MovePlayed(record) => self.move_played(record).await,
        }
    }

    async fn settings_changed(&self, patch: SettingsPatch) -> Result<Option<u64>, SyncError> {
        if patch.is_empty() {
            return Ok(None);
        }
        self.reconciler.update_settings(|settings| {
            settings.apply_patch(&patch);
        });
        let mut state = self.base_state().await?;
        state.settings = Some(match &state.settings {
            Some(shared) => shared.merged(&patch),
            None => patch,
        });
        self.push(state, "settings").await.map(Some)
    }

    async fn replay(&self) -> Result<Option<u64>, SyncError> {
        let mut state = self.base_state().await?;
        let settings = self.reconciler.settings();
        state.board_state = self.board.reset_board(&settings);
        state.score_state = ScoreState::default();
        state.player_state.current_player_index = 0;
        state.game_over = None;
        state.clear_claim();
        state.finish_requests.clear();
        self.push(state, "replay").await.map(Some)
    }

    async fn claim_no_moves(&self, score_preview: i64) -> Result<Option<u64>, SyncError> {
        let mut state = self.base_state().await?;
        if state.game_over.is_some() || state.no_moves_claim.is_some() {
            debug!(
                player_id = %self.local_player_id,
                "claim ignored: match over or a claim is already open"
            );
            return Ok(None);
        }
        state.no_moves_votes.clear();
        state.continue_requests.clear();
        state.no_moves_claim = Some(NoMovesClaim {
            player_id: self.local_player_id.clone(),
            score_preview,
            timestamp: now_ms(),
            board_size: state.board_state.size(),
        });
        self.push(state, "no-moves claim").await.map(Some)
    }

    async fn game_over(&self, result: GameOverResult) -> Result<Option<u64>, SyncError> {
        let mut state = self.base_state().await?;
        if state.game_over.is_some() {
            debug!("game over already recorded; keeping the first result");
            return Ok(None);
        }
        state.finish_with(result);
        self.push(state, "game over").await.map(Some)
    }

    async fn move_played(&self, record: MoveRecord) -> Result<Option<u64>, SyncError> {
        let mut state = self.base_state().await?;
        if state.game_over.is_some() {
            return Err(SyncError::InvalidState("match is already over".into()));
        }
        let current = state
            .player_state
            .current_player()
            .map(|player| player.id.clone());
        if current.as_deref() != Some(record.player_id.as_str()) {
            return Err(SyncError::InvalidState(format!(
                "it is not `{}`'s turn",
                record.player_id
            )));
        }

        let points = self.board.score_for(&state.board_state, record.to);
        state.board_state.record_move(record.clone());
        *state
            .score_state
            .scores
            .entry(record.player_id.clone())
            .or_default() += points;
        state.score_state.total_moves += 1;
        state.player_state = self.board.advance_turn(&state.player_state);

        let version = self.push(state, "move").await?;
        if let Err(err) = self.store.push_move(record).await {
            warn!(error = %err, "failed to append move record");
        }
        Ok(Some(version))
    }

    /// Freshest shared snapshot, falling back to the last one applied locally.
    async fn base_state(&self) -> Result<SyncableGameState, SyncError> {
        match self.store.pull_state().await? {
            Some(state) => Ok(state),
            None => self
                .reconciler
                .snapshot()
                .ok_or_else(|| SyncError::InvalidState("no shared state yet".into())),
        }
    }

    async fn push(&self, state: SyncableGameState, what: &'static str) -> Result<u64, SyncError> {
        match self.store.push_state(state).await {
            Ok(version) => {
                info!(what, version, "pushed local change");
                Ok(version)
            }
            Err(err) => {
                warn!(error = %err, what, "failed to push local change");
                Err(err.into())
            }
        }
    }
}
