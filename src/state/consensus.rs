//! Pure decision logic for ambiguous endings: majority votes and single-actor requests.
//!
//! Every client evaluates [`evaluate`] on every update; only the host turns the result into a
//! write via [`apply_resolution`]. Both are pure functions of the snapshot, so recomputing on a
//! stale or repeated input is always safe.

use std::collections::BTreeMap;

use crate::state::game::{
    GameOverReason, GameOverResult, RequestFlag, SyncableGameState, Vote,
};

/// Votes needed for a majority among `player_count` players.
pub const fn majority_threshold(player_count: usize) -> usize {
    player_count / 2 + 1
}

/// Vote counts for the outstanding claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VoteTally {
    pub continue_votes: usize,
    pub finish_votes: usize,
    pub threshold: usize,
}

impl VoteTally {
    pub fn reached(&self, vote: Vote) -> bool {
        let count = match vote {
            Vote::Continue => self.continue_votes,
            Vote::Finish => self.finish_votes,
        };
        count >= self.threshold
    }
}

/// Count the recorded votes against the current roster size.
pub fn tally(state: &SyncableGameState) -> VoteTally {
    let (continue_votes, finish_votes) =
        state
            .no_moves_votes
            .values()
            .fold((0, 0), |(cont, fin), vote| match vote {
                Vote::Continue => (cont + 1, fin),
                Vote::Finish => (cont, fin + 1),
            });

    VoteTally {
        continue_votes,
        finish_votes,
        threshold: majority_threshold(state.player_state.player_count()),
    }
}

/// Whether recorded votes already favor finishing.
pub fn finish_majority(state: &SyncableGameState) -> bool {
    tally(state).reached(Vote::Finish)
}

/// Pick the request that wins when several players asked at once.
///
/// Earliest timestamp first; untimestamped legacy entries sort last; player id breaks ties.
pub fn earliest_request(requests: &BTreeMap<String, RequestFlag>) -> Option<&str> {
    requests
        .iter()
        .filter(|(_, flag)| flag.is_active())
        .min_by_key(|(player_id, flag)| (flag.requested_at().unwrap_or(i64::MAX), *player_id))
        .map(|(player_id, _)| player_id.as_str())
}

/// What the table has decided, given one snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Nothing to resolve: no claim, no request, or the match is already over.
    Idle,
    /// A claim is outstanding and neither side has a majority yet.
    VotingInProgress(VoteTally),
    /// A single player cashed out; overrides any vote.
    CashOut { initiator: String },
    /// The claimant withdrew their own claim.
    ClaimWithdrawn { claimant: String },
    /// Majority chose to keep playing.
    ContinueResolved,
    /// Majority chose to end the match.
    FinishResolved,
}

impl Resolution {
    /// Whether the host has a write to perform for this resolution.
    pub fn requires_write(&self) -> bool {
        !matches!(self, Resolution::Idle | Resolution::VotingInProgress(_))
    }
}

/// Decide what the snapshot calls for.
pub fn evaluate(state: &SyncableGameState) -> Resolution {
    if state.game_over.is_some() {
        return Resolution::Idle;
    }

    if let Some(initiator) = earliest_request(&state.finish_requests) {
        return Resolution::CashOut {
            initiator: initiator.to_string(),
        };
    }

    // Votes only count toward an outstanding claim; stray ones are never resolved.
    let Some(claim) = &state.no_moves_claim else {
        return Resolution::Idle;
    };
    let withdrawn = state
        .continue_requests
        .get(&claim.player_id)
        .is_some_and(RequestFlag::is_active);
    if withdrawn {
        return Resolution::ClaimWithdrawn {
            claimant: claim.player_id.clone(),
        };
    }

    let votes = tally(state);
    if votes.reached(Vote::Continue) {
        Resolution::ContinueResolved
    } else if votes.reached(Vote::Finish) {
        Resolution::FinishResolved
    } else {
        Resolution::VotingInProgress(votes)
    }
}

/// Build the snapshot the host writes for `resolution`, or `None` when nothing changes.
///
/// Turn advancement after a continue is left to the board collaborator.
pub fn apply_resolution(
    state: &SyncableGameState,
    resolution: &Resolution,
    now: i64,
) -> Option<SyncableGameState> {
    let mut next = state.clone();
    match resolution {
        Resolution::Idle | Resolution::VotingInProgress(_) => return None,
        Resolution::CashOut { initiator } => {
            let result = GameOverResult::from_state(
                state,
                GameOverReason::CashOut,
                Some(initiator.clone()),
                0,
                now,
            );
            next.finish_with(result);
        }
        Resolution::ClaimWithdrawn { .. } => {
            next.clear_claim();
        }
        Resolution::ContinueResolved => {
            next.board_state.reset_transient();
            next.clear_claim();
        }
        Resolution::FinishResolved => {
            let (initiator, bonus) = state
                .no_moves_claim
                .as_ref()
                .map(|claim| (Some(claim.player_id.clone()), claim.score_preview))
                .unwrap_or((None, 0));
            let result =
                GameOverResult::from_state(state, GameOverReason::Bonus, initiator, bonus, now);
            next.finish_with(result);
        }
    }
    Some(next)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::game::{MoveRecord, NoMovesClaim, Player, Position, Direction};

    fn room(players: &[&str]) -> SyncableGameState {
        let mut state = SyncableGameState::default();
        state.player_state.players = players
            .iter()
            .map(|id| Player {
                id: (*id).into(),
                name: id.to_uppercase(),
            })
            .collect();
        state.board_state.board = vec![vec![0; 5]; 5];
        state.board_state.piece_position = Position::new(2, 2);
        state.board_state.move_history = vec![Position::new(2, 2)];
        state
    }

    fn claim(state: &mut SyncableGameState, player: &str) {
        state.no_moves_claim = Some(NoMovesClaim {
            player_id: player.into(),
            score_preview: 12,
            timestamp: 1_000,
            board_size: 5,
        });
    }

    #[test]
    fn threshold_is_floor_half_plus_one() {
        assert_eq!(majority_threshold(1), 1);
        assert_eq!(majority_threshold(2), 2);
        assert_eq!(majority_threshold(3), 2);
        assert_eq!(majority_threshold(4), 3);
        assert_eq!(majority_threshold(5), 3);
    }

    #[test]
    fn finish_request_wins_with_zero_votes() {
        let mut state = room(&["a", "b", "c"]);
        state.finish_requests.insert("b".into(), RequestFlag::At(10));

        assert_eq!(
            evaluate(&state),
            Resolution::CashOut {
                initiator: "b".into()
            }
        );
    }

    #[test]
    fn finish_request_overrides_continue_majority() {
        let mut state = room(&["a", "b", "c"]);
        claim(&mut state, "a");
        state.no_moves_votes.insert("a".into(), Vote::Continue);
        state.no_moves_votes.insert("b".into(), Vote::Continue);
        state.finish_requests.insert("c".into(), RequestFlag::Flag(true));

        assert_eq!(
            evaluate(&state),
            Resolution::CashOut {
                initiator: "c".into()
            }
        );
    }

    #[test]
    fn earliest_request_breaks_ties() {
        let mut requests = BTreeMap::new();
        requests.insert("zed".to_string(), RequestFlag::At(5));
        requests.insert("amy".to_string(), RequestFlag::Flag(true));
        requests.insert("bob".to_string(), RequestFlag::At(9));
        requests.insert("cat".to_string(), RequestFlag::Flag(false));
        assert_eq!(earliest_request(&requests), Some("zed"));

        requests.insert("ada".to_string(), RequestFlag::At(5));
        assert_eq!(earliest_request(&requests), Some("ada"));
    }

    #[test]
    fn two_of_three_finish_votes_finalize_with_bonus() {
        let mut state = room(&["a", "b", "c"]);
        state.score_state.scores.insert("a".into(), 3);
        claim(&mut state, "a");
        state.no_moves_votes.insert("a".into(), Vote::Finish);
        state.no_moves_votes.insert("c".into(), Vote::Finish);

        let resolution = evaluate(&state);
        assert_eq!(resolution, Resolution::FinishResolved);

        let next = apply_resolution(&state, &resolution, 77).unwrap();
        let result = next.game_over.as_ref().unwrap();
        assert_eq!(result.reason, GameOverReason::Bonus);
        assert_eq!(result.initiator.as_deref(), Some("a"));
        assert_eq!(result.bonus, 12);
        assert!(next.no_moves_votes.is_empty());
        assert!(next.no_moves_claim.is_none());
    }

    #[test]
    fn continue_majority_resets_transient_board_state() {
        let mut state = room(&["a", "b"]);
        state.board_state.record_move(MoveRecord {
            player_id: "a".into(),
            from: Position::new(2, 2),
            to: Position::new(2, 4),
            direction: Direction::Right,
            distance: 2,
            timestamp: 3,
        });
        claim(&mut state, "b");
        state.no_moves_votes.insert("a".into(), Vote::Continue);
        state.no_moves_votes.insert("b".into(), Vote::Continue);

        let resolution = evaluate(&state);
        assert_eq!(resolution, Resolution::ContinueResolved);

        let next = apply_resolution(&state, &resolution, 0).unwrap();
        assert_eq!(next.board_state.move_history, vec![Position::new(2, 4)]);
        assert!(next.board_state.pending_moves.is_empty());
        assert!(next.board_state.visit_counts.is_empty());
        assert!(next.no_moves_claim.is_none());
        assert!(next.no_moves_votes.is_empty());
        assert!(next.game_over.is_none());
    }

    #[test]
    fn split_vote_stays_in_progress() {
        let mut state = room(&["a", "b", "c", "d"]);
        claim(&mut state, "a");
        state.no_moves_votes.insert("a".into(), Vote::Finish);
        state.no_moves_votes.insert("b".into(), Vote::Finish);
        state.no_moves_votes.insert("c".into(), Vote::Continue);

        let resolution = evaluate(&state);
        assert_eq!(
            resolution,
            Resolution::VotingInProgress(VoteTally {
                continue_votes: 1,
                finish_votes: 2,
                threshold: 3,
            })
        );
        assert!(!resolution.requires_write());
        assert!(apply_resolution(&state, &resolution, 0).is_none());
    }

    #[test]
    fn claimant_continue_request_withdraws_claim() {
        let mut state = room(&["a", "b", "c"]);
        claim(&mut state, "b");
        state.no_moves_votes.insert("a".into(), Vote::Finish);
        state.continue_requests.insert("b".into(), RequestFlag::At(4));

        let resolution = evaluate(&state);
        assert_eq!(
            resolution,
            Resolution::ClaimWithdrawn {
                claimant: "b".into()
            }
        );
        let next = apply_resolution(&state, &resolution, 0).unwrap();
        assert!(next.no_moves_claim.is_none());
        assert!(next.no_moves_votes.is_empty());
        assert!(next.continue_requests.is_empty());
    }

    #[test]
    fn finished_match_is_idle_even_with_requests() {
        let mut state = room(&["a", "b"]);
        state.finish_requests.insert("a".into(), RequestFlag::At(1));
        let resolution = evaluate(&state);
        let finished = apply_resolution(&state, &resolution, 2).unwrap();

        assert!(finished.finish_requests.is_empty());
        assert_eq!(evaluate(&finished), Resolution::Idle);
    }

    #[test]
    fn votes_without_a_claim_resolve_nothing() {
        let mut state = room(&["a", "b", "c"]);
        state.no_moves_votes.insert("a".into(), Vote::Continue);
        state.no_moves_votes.insert("b".into(), Vote::Continue);

        let resolution = evaluate(&state);
        assert_eq!(resolution, Resolution::Idle);
        assert!(apply_resolution(&state, &resolution, 0).is_none());
    }
}
