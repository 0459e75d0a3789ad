use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::state::{
    game::{
        MoveRecord, NoMovesClaim, PlayerState, Position, RequestFlag, ScoreState, Vote,
    },
    settings::SettingsPatch,
};

/// Board portion of the stored document; the grid is string-encoded because the backing store
/// rejects arrays of arrays.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredBoardState {
    pub piece_position: Position,
    pub board: String,
    #[serde(default)]
    pub move_history: Vec<Position>,
    #[serde(default)]
    pub pending_moves: Vec<MoveRecord>,
    #[serde(default)]
    pub visit_counts: BTreeMap<String, u32>,
}

/// Shared game document in its backing-store-safe representation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameDocument {
    pub board_state: StoredBoardState,
    pub player_state: PlayerState,
    pub score_state: ScoreState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings: Option<SettingsPatch>,
    pub version: u64,
    pub updated_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_over_serialized: Option<String>,
    #[serde(default)]
    pub no_moves_claim: Option<NoMovesClaim>,
    #[serde(default)]
    pub no_moves_votes: BTreeMap<String, Vote>,
    #[serde(default)]
    pub finish_requests: BTreeMap<String, RequestFlag>,
    #[serde(default)]
    pub continue_requests: BTreeMap<String, RequestFlag>,
}
