use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::state::settings::SettingsPatch;

/// Cell coordinate on the square board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub row: u32,
    pub col: u32,
}

impl Position {
    pub const fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }

    /// Key used for per-cell maps; backing stores only accept string keys.
    pub fn cell_key(&self) -> String {
        format!("{}-{}", self.row, self.col)
    }
}

/// One of the eight compass directions a piece can travel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
    UpLeft,
    UpRight,
    DownLeft,
    DownRight,
}

impl Direction {
    /// Human readable label used in announcements and logs.
    pub fn label(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Left => "left",
            Direction::Right => "right",
            Direction::UpLeft => "up-left",
            Direction::UpRight => "up-right",
            Direction::DownLeft => "down-left",
            Direction::DownRight => "down-right",
        }
    }
}

/// A move played by one player, queued for every client to animate and announce.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveRecord {
    pub player_id: String,
    pub from: Position,
    pub to: Position,
    pub direction: Direction,
    pub distance: u32,
    pub timestamp: i64,
}

/// Board portion of the shared document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardState {
    /// Where the shared piece currently stands.
    pub piece_position: Position,
    /// Square grid of cell values; rows first.
    pub board: Vec<Vec<u32>>,
    /// Every position the piece occupied, oldest first.
    pub move_history: Vec<Position>,
    /// Moves not yet consumed by every client's animation queue.
    pub pending_moves: Vec<MoveRecord>,
    /// How many times each cell was visited, keyed by [`Position::cell_key`].
    pub visit_counts: BTreeMap<String, u32>,
}

impl Default for Position {
    fn default() -> Self {
        Self::new(0, 0)
    }
}

impl BoardState {
    /// Side length of the (square) grid.
    pub fn size(&self) -> u32 {
        self.board.len() as u32
    }

    /// Record a move: queue it, advance the piece and bump the visit counter of its target cell.
    pub fn record_move(&mut self, record: MoveRecord) {
        let target = record.to;
        *self.visit_counts.entry(target.cell_key()).or_insert(0) += 1;
        self.move_history.push(target);
        self.piece_position = target;
        self.pending_moves.push(record);
    }

    /// Drop transient bookkeeping while keeping the piece where it stands.
    pub fn reset_transient(&mut self) {
        self.visit_counts.clear();
        self.move_history = vec![self.piece_position];
        self.pending_moves.clear();
    }
}

/// Participant of a match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub id: String,
    pub name: String,
}

/// Ordered roster plus whose turn it is.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerState {
    pub players: Vec<Player>,
    pub current_player_index: usize,
}

impl PlayerState {
    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn current_player(&self) -> Option<&Player> {
        self.players.get(self.current_player_index)
    }

    pub fn find(&self, player_id: &str) -> Option<&Player> {
        self.players.iter().find(|player| player.id == player_id)
    }
}

/// Running scores keyed by player id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreState {
    pub scores: BTreeMap<String, i64>,
    pub total_moves: u32,
}

/// Ballot cast while a "no legal moves" claim is outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Vote {
    Continue,
    Finish,
}

impl Vote {
    pub fn as_str(&self) -> &'static str {
        match self {
            Vote::Continue => "continue",
            Vote::Finish => "finish",
        }
    }
}

/// Entry of a single-actor request map.
///
/// Current clients write the request timestamp; older documents carry a bare boolean.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestFlag {
    At(i64),
    Flag(bool),
}

impl RequestFlag {
    pub fn is_active(&self) -> bool {
        match self {
            RequestFlag::At(_) => true,
            RequestFlag::Flag(flag) => *flag,
        }
    }

    pub fn requested_at(&self) -> Option<i64> {
        match self {
            RequestFlag::At(at) => Some(*at),
            RequestFlag::Flag(_) => None,
        }
    }
}

/// A player's claim that the current position has no legal moves left.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoMovesClaim {
    pub player_id: String,
    /// Score the claimant would bank if the table agrees to finish.
    pub score_preview: i64,
    pub timestamp: i64,
    pub board_size: u32,
}

/// Why a match ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GameOverReason {
    /// Majority agreed to finish after a no-legal-moves claim.
    Bonus,
    /// A single player cashed out.
    CashOut,
    /// The local rules engine reached a natural end.
    Completed,
}

/// Final placement of one player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Standing {
    pub player_id: String,
    pub name: String,
    pub score: i64,
}

/// Terminal result shown to every client. Carries nested arrays, so it is string-encoded in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameOverResult {
    pub reason: GameOverReason,
    /// Player whose request or claim produced this result.
    pub initiator: Option<String>,
    pub winner_id: Option<String>,
    pub standings: Vec<Standing>,
    pub final_board: Vec<Vec<u32>>,
    pub visited_path: Vec<Position>,
    pub bonus: i64,
    pub finished_at: i64,
}

impl GameOverResult {
    /// Build a result from the current scores, highest score first.
    pub fn from_state(
        state: &SyncableGameState,
        reason: GameOverReason,
        initiator: Option<String>,
        bonus: i64,
        finished_at: i64,
    ) -> Self {
        let mut standings = state
            .player_state
            .players
            .iter()
            .map(|player| {
                let mut score = state
                    .score_state
                    .scores
                    .get(&player.id)
                    .copied()
                    .unwrap_or_default();
                if initiator.as_deref() == Some(player.id.as_str()) {
                    score += bonus;
                }
                Standing {
                    player_id: player.id.clone(),
                    name: player.name.clone(),
                    score,
                }
            })
            .collect::<Vec<_>>();
        standings.sort_by(|a, b| b.score.cmp(&a.score));

        Self {
            reason,
            winner_id: standings.first().map(|standing| standing.player_id.clone()),
            initiator,
            standings,
            final_board: state.board_state.board.clone(),
            visited_path: state.board_state.move_history.clone(),
            bonus,
            finished_at,
        }
    }
}

/// The shared match document every client converges on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncableGameState {
    pub board_state: BoardState,
    pub player_state: PlayerState,
    pub score_state: ScoreState,
    /// Shared settings override; fields absent here never touch a client's settings.
    pub settings: Option<SettingsPatch>,
    /// Strictly increasing on every successful write.
    pub version: u64,
    pub updated_at: i64,
    pub game_over: Option<GameOverResult>,
    pub no_moves_claim: Option<NoMovesClaim>,
    pub no_moves_votes: BTreeMap<String, Vote>,
    pub finish_requests: BTreeMap<String, RequestFlag>,
    pub continue_requests: BTreeMap<String, RequestFlag>,
}

impl SyncableGameState {
    /// Clear everything gated on an outstanding claim.
    pub fn clear_claim(&mut self) {
        self.no_moves_claim = None;
        self.no_moves_votes.clear();
        self.continue_requests.clear();
    }

    /// Record a terminal result and drop every vote and request it supersedes.
    pub fn finish_with(&mut self, result: GameOverResult) {
        self.game_over = Some(result);
        self.clear_claim();
        self.finish_requests.clear();
    }

    /// Keep votes already stored for the same claim that this snapshot has not seen.
    /// Returns how many were carried over.
    pub fn carry_votes_from(&mut self, stored: &SyncableGameState) -> usize {
        if self.no_moves_claim.is_none() || self.no_moves_claim != stored.no_moves_claim {
            return 0;
        }
        let mut carried = 0;
        for (player_id, vote) in &stored.no_moves_votes {
            if !self.no_moves_votes.contains_key(player_id) {
                self.no_moves_votes.insert(player_id.clone(), *vote);
                carried += 1;
            }
        }
        carried
    }
}
