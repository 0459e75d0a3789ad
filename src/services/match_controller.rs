//! Votes, cash-out requests and the host-only resolution writes.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{
    clock::now_ms,
    dao::state_store::StateStore,
    error::SyncError,
    services::{
        collaborators::BoardOps,
        events::{EventHub, SyncEvent},
    },
    state::{
        consensus::{Resolution, apply_resolution, evaluate, tally},
        game::{RequestFlag, SyncableGameState, Vote},
    },
};

/// Owns the transitions out of ambiguous endings for one client.
///
/// Every client evaluates consensus; only the host turns a resolution into a write.
pub struct MatchController {
    local_player_id: String,
    is_host: bool,
    store: Arc<dyn StateStore>,
    board: Arc<dyn BoardOps>,
    events: Arc<EventHub>,
    /// Newest snapshot version the host already wrote a resolution for.
    resolved_through: Mutex<Option<u64>>,
}

impl MatchController {
    pub fn new(
        local_player_id: impl Into<String>,
        is_host: bool,
        store: Arc<dyn StateStore>,
        board: Arc<dyn BoardOps>,
        events: Arc<EventHub>,
    ) -> Self {
        Self {
            local_player_id: local_player_id.into(),
            is_host,
            store,
            board,
            events,
            resolved_through: Mutex::new(None),
        }
    }

    pub fn is_host(&self) -> bool {
        self.is_host
    }

    /// Cast the local player's vote, then decide on an optimistic projection of the result.
    pub async fn handle_vote(&self, vote: Vote) -> Result<Resolution, SyncError> {
        let current = self.current_state().await?;
        if current.game_over.is_some() || current.no_moves_claim.is_none() {
            warn!(
                player_id = %self.local_player_id,
                vote = vote.as_str(),
                "vote without an open claim"
            );
            return Err(SyncError::InvalidState("no claim is outstanding".into()));
        }

        self.store
            .update_vote(self.local_player_id.clone(), vote)
            .await?;
        debug!(player_id = %self.local_player_id, vote = vote.as_str(), "vote written");

        let mut projected = self.store.pull_state().await?.ok_or_else(|| {
            SyncError::InvalidState("no shared state to vote on".into())
        })?;
        // The pull may predate our own write; the projection must include it either way.
        projected
            .no_moves_votes
            .insert(self.local_player_id.clone(), vote);
        self.events.broadcast(SyncEvent::VotesUpdated(tally(&projected)));

        self.check_consensus(&projected).await
    }

    /// Evaluate `state` and, on the host, write whatever the resolution calls for.
    ///
    /// Pure with respect to its input, so calling it again with a stale or repeated snapshot
    /// is harmless.
    pub async fn check_consensus(
        &self,
        state: &SyncableGameState,
    ) -> Result<Resolution, SyncError> {
        let resolution = evaluate(state);
        if !self.is_host || !resolution.requires_write() {
            return Ok(resolution);
        }

        let mut resolved_through = self.resolved_through.lock().await;
        if resolved_through.is_some_and(|done| state.version <= done) {
            debug!(
                version = state.version,
                ?resolution,
                "resolution already written for this version"
            );
            return Ok(resolution);
        }

        // Decide on the freshest snapshot so a resolution never overwrites a newer write.
        let latest = match self.store.pull_state().await? {
            Some(latest) if latest.version > state.version => latest,
            _ => state.clone(),
        };
        let resolution = evaluate(&latest);
        let Some(mut next) = apply_resolution(&latest, &resolution, now_ms()) else {
            return Ok(resolution);
        };
        if resolution == Resolution::ContinueResolved {
            next.player_state = self.board.advance_turn(&next.player_state);
        }

        let version = self.store.push_state(next).await?;
        *resolved_through = Some(version);
        info!(?resolution, version, "host wrote resolution");
        Ok(resolution)
    }

    /// End the match for everyone with the local player as initiator, bypassing the vote.
    pub async fn request_cash_out(&self) -> Result<Resolution, SyncError> {
        let mut state = self.current_state().await?;
        if state.game_over.is_some() {
            return Err(SyncError::InvalidState("match is already over".into()));
        }
        state
            .finish_requests
            .insert(self.local_player_id.clone(), RequestFlag::At(now_ms()));
        state.version = self.store.push_state(state.clone()).await?;
        info!(player_id = %self.local_player_id, "cash-out requested");
        self.check_consensus(&state).await
    }

    /// Let the claimant of the outstanding no-moves claim take it back.
    pub async fn withdraw_claim(&self) -> Result<Resolution, SyncError> {
        let mut state = self.current_state().await?;
        let claimant = state
            .no_moves_claim
            .as_ref()
            .map(|claim| claim.player_id.clone());
        match claimant {
            Some(claimant) if claimant == self.local_player_id => {}
            Some(claimant) => {
                warn!(
                    player_id = %self.local_player_id,
                    claimant = %claimant,
                    "only the claimant can withdraw a claim"
                );
                return Err(SyncError::InvalidState(
                    "claim belongs to another player".into(),
                ));
            }
            None => return Err(SyncError::InvalidState("no claim is outstanding".into())),
        }

        state
            .continue_requests
            .insert(self.local_player_id.clone(), RequestFlag::At(now_ms()));
        state.version = self.store.push_state(state.clone()).await?;
        self.check_consensus(&state).await
    }

    async fn current_state(&self) -> Result<SyncableGameState, SyncError> {
        self.store
            .pull_state()
            .await?
            .ok_or_else(|| SyncError::InvalidState("no shared state yet".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dao::state_store::LocalDocumentHub,
        services::headless::PlainGridBoard,
        state::game::{GameOverReason, NoMovesClaim, Player},
    };

    fn three_players() -> SyncableGameState {
        let mut state = SyncableGameState::default();
        state.player_state.players = ["a", "b", "c"]
            .iter()
            .map(|id| Player {
                id: (*id).into(),
                name: id.to_uppercase(),
            })
            .collect();
        state.board_state.board = vec![vec![2; 5]; 5];
        state.no_moves_claim = Some(NoMovesClaim {
            player_id: "a".into(),
            score_preview: 7,
            timestamp: 100,
            board_size: 5,
        });
        state
    }

    async fn controllers(
        hub: &LocalDocumentHub,
        ids: &[(&str, bool)],
    ) -> Vec<(MatchController, Arc<dyn StateStore>)> {
        let host_store = hub.store();
        let session = host_store.initialize(None).await.unwrap();
        host_store.push_state(three_players()).await.unwrap();

        let mut out = Vec::new();
        for (index, (id, is_host)) in ids.iter().enumerate() {
            let store: Arc<dyn StateStore> = if index == 0 {
                Arc::new(host_store.clone())
            } else {
                let store = hub.store();
                store.initialize(Some(session.clone())).await.unwrap();
                Arc::new(store)
            };
            let controller = MatchController::new(
                *id,
                *is_host,
                store.clone(),
                Arc::new(PlainGridBoard::seeded(3)),
                Arc::new(EventHub::default()),
            );
            out.push((controller, store));
        }
        out
    }

    #[tokio::test]
    async fn guest_votes_never_write_resolutions() {
        let hub = LocalDocumentHub::new();
        let clients = controllers(&hub, &[("a", true), ("b", false), ("c", false)]).await;

        clients[1].0.handle_vote(Vote::Finish).await.unwrap();
        let resolution = clients[2].0.handle_vote(Vote::Finish).await.unwrap();
        assert_eq!(resolution, Resolution::FinishResolved);

        let state = clients[2].1.pull_state().await.unwrap().unwrap();
        assert!(state.game_over.is_none());
        assert_eq!(state.no_moves_votes.len(), 2);
    }

    #[tokio::test]
    async fn host_finalizes_finish_majority_with_bonus() {
        let hub = LocalDocumentHub::new();
        let clients = controllers(&hub, &[("a", true), ("b", false), ("c", false)]).await;

        clients[1].0.handle_vote(Vote::Finish).await.unwrap();
        clients[2].0.handle_vote(Vote::Finish).await.unwrap();
        let state = clients[0].1.pull_state().await.unwrap().unwrap();
        let resolution = clients[0].0.check_consensus(&state).await.unwrap();
        assert_eq!(resolution, Resolution::FinishResolved);

        let after = clients[0].1.pull_state().await.unwrap().unwrap();
        let result = after.game_over.unwrap();
        assert_eq!(result.reason, GameOverReason::Bonus);
        assert_eq!(result.initiator.as_deref(), Some("a"));
        assert!(after.no_moves_votes.is_empty());

        // Re-checking the same snapshot must not write again.
        let version = after.version;
        clients[0].0.check_consensus(&state).await.unwrap();
        let again = clients[0].1.pull_state().await.unwrap().unwrap();
        assert_eq!(again.version, version);
    }

    #[tokio::test]
    async fn continue_majority_advances_the_turn() {
        let hub = LocalDocumentHub::new();
        let clients = controllers(&hub, &[("a", true), ("b", false)]).await;

        clients[1].0.handle_vote(Vote::Continue).await.unwrap();
        let resolution = clients[0].0.handle_vote(Vote::Continue).await.unwrap();
        assert_eq!(resolution, Resolution::ContinueResolved);

        let state = clients[0].1.pull_state().await.unwrap().unwrap();
        assert!(state.no_moves_claim.is_none());
        assert_eq!(state.player_state.current_player_index, 1);
    }

    #[tokio::test]
    async fn cash_out_ends_match_without_votes() {
        let hub = LocalDocumentHub::new();
        let clients = controllers(&hub, &[("a", true), ("b", false)]).await;

        clients[1].0.request_cash_out().await.unwrap();
        let state = clients[0].1.pull_state().await.unwrap().unwrap();
        let resolution = clients[0].0.check_consensus(&state).await.unwrap();
        assert_eq!(
            resolution,
            Resolution::CashOut {
                initiator: "b".into()
            }
        );
        let after = clients[0].1.pull_state().await.unwrap().unwrap();
        assert_eq!(after.game_over.unwrap().reason, GameOverReason::CashOut);

        let err = clients[1].0.request_cash_out().await.unwrap_err();
        assert!(matches!(err, SyncError::InvalidState(_)));
    }

    #[tokio::test]
    async fn only_the_claimant_can_withdraw() {
        let hub = LocalDocumentHub::new();
        let clients = controllers(&hub, &[("a", true), ("b", false)]).await;

        let err = clients[1].0.withdraw_claim().await.unwrap_err();
        assert!(matches!(err, SyncError::InvalidState(_)));

        let resolution = clients[0].0.withdraw_claim().await.unwrap();
        assert_eq!(
            resolution,
            Resolution::ClaimWithdrawn {
                claimant: "a".into()
            }
        );
        let state = clients[0].1.pull_state().await.unwrap().unwrap();
        assert!(state.no_moves_claim.is_none());
        assert!(state.continue_requests.is_empty());
    }

    #[tokio::test]
    async fn late_votes_after_resolution_are_rejected() {
        let hub = LocalDocumentHub::new();
        let clients = controllers(&hub, &[("a", true), ("b", false), ("c", false)]).await;

        clients[1].0.handle_vote(Vote::Continue).await.unwrap();
        clients[0].0.handle_vote(Vote::Continue).await.unwrap();
        let resolved = clients[0].1.pull_state().await.unwrap().unwrap();
        assert!(resolved.no_moves_claim.is_none());
        let history = resolved.board_state.move_history.clone();

        let err = clients[2].0.handle_vote(Vote::Continue).await.unwrap_err();
        assert!(matches!(err, SyncError::InvalidState(_)));
        let after = clients[0].1.pull_state().await.unwrap().unwrap();
        assert_eq!(after.version, resolved.version);
        assert!(after.no_moves_votes.is_empty());
        assert_eq!(after.board_state.move_history, history);
    }
}
