//! Conversion between [`SyncableGameState`] and the store-safe [`GameDocument`].
//!
//! The backing stores reject arrays nested in arrays at any depth, so the board grid and the
//! whole game-over payload travel as JSON strings. A field that fails to encode or decode is
//! dropped with a warning; the rest of the document still goes through.

use thiserror::Error;
use tracing::warn;

use crate::{
    dto::document::{GameDocument, StoredBoardState},
    state::game::{BoardState, GameOverResult, SyncableGameState},
};

/// A single field could not be converted.
#[derive(Debug, Error)]
pub enum SerializeError {
    #[error("failed to encode `{field}`")]
    Encode {
        field: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to decode `{field}`")]
    Decode {
        field: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

const BOARD_FIELD: &str = "boardState.board";
const GAME_OVER_FIELD: &str = "gameOverSerialized";

/// Encode a 2-D grid into its string form.
pub fn encode_board(board: &[Vec<u32>]) -> Result<String, SerializeError> {
    serde_json::to_string(board).map_err(|source| SerializeError::Encode {
        field: BOARD_FIELD,
        source,
    })
}

/// Decode a grid previously produced by [`encode_board`].
pub fn decode_board(raw: &str) -> Result<Vec<Vec<u32>>, SerializeError> {
    serde_json::from_str(raw).map_err(|source| SerializeError::Decode {
        field: BOARD_FIELD,
        source,
    })
}

/// Encode the full game-over payload.
pub fn encode_game_over(result: &GameOverResult) -> Result<String, SerializeError> {
    serde_json::to_string(result).map_err(|source| SerializeError::Encode {
        field: GAME_OVER_FIELD,
        source,
    })
}

/// Decode a payload previously produced by [`encode_game_over`].
pub fn decode_game_over(raw: &str) -> Result<GameOverResult, SerializeError> {
    serde_json::from_str(raw).map_err(|source| SerializeError::Decode {
        field: GAME_OVER_FIELD,
        source,
    })
}

/// Produce the store-safe document for `state`.
pub fn serialize(state: &SyncableGameState) -> GameDocument {
    let state = state.clone();

    let board = encode_board(&state.board_state.board).unwrap_or_else(|err| {
        warn!(error = %err, version = state.version, "dropping unencodable board grid");
        String::new()
    });

    let game_over_serialized = state.game_over.as_ref().and_then(|result| {
        encode_game_over(result)
            .map_err(|err| {
                warn!(error = %err, version = state.version, "dropping unencodable game-over payload")
            })
            .ok()
    });

    let BoardState {
        piece_position,
        move_history,
        pending_moves,
        visit_counts,
        ..
    } = state.board_state;

    GameDocument {
        board_state: StoredBoardState {
            piece_position,
            board,
            move_history,
            pending_moves,
            visit_counts,
        },
        player_state: state.player_state,
        score_state: state.score_state,
        settings: state.settings,
        version: state.version,
        updated_at: state.updated_at,
        game_over_serialized,
        no_moves_claim: state.no_moves_claim,
        no_moves_votes: state.no_moves_votes,
        finish_requests: state.finish_requests,
        continue_requests: state.continue_requests,
    }
}

/// Rebuild the in-memory state from a stored document.
///
/// An undecodable grid comes back empty and an undecodable game-over payload comes back absent.
pub fn deserialize(document: GameDocument) -> SyncableGameState {
    let version = document.version;
    let StoredBoardState {
        piece_position,
        board,
        move_history,
        pending_moves,
        visit_counts,
    } = document.board_state;

    let board = if board.is_empty() {
        Vec::new()
    } else {
        decode_board(&board).unwrap_or_else(|err| {
            warn!(error = %err, version, "dropping corrupt board grid");
            Vec::new()
        })
    };

    let game_over = document
        .game_over_serialized
        .as_deref()
        .filter(|raw| !raw.is_empty())
        .and_then(|raw| match decode_game_over(raw) {
            Ok(result) => Some(result),
            Err(err) => {
                warn!(error = %err, version, "dropping corrupt game-over payload");
                None
            }
        });

    SyncableGameState {
        board_state: BoardState {
            piece_position,
            board,
            move_history,
            pending_moves,
            visit_counts,
        },
        player_state: document.player_state,
        score_state: document.score_state,
        settings: document.settings,
        version,
        updated_at: document.updated_at,
        game_over,
        no_moves_claim: document.no_moves_claim,
        no_moves_votes: document.no_moves_votes,
        finish_requests: document.finish_requests,
        continue_requests: document.continue_requests,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{
        game::{
            Direction, GameOverReason, MoveRecord, NoMovesClaim, Player, Position, RequestFlag,
            Vote,
        },
        settings::SettingsPatch,
    };

    fn populated_state() -> SyncableGameState {
        let mut state = SyncableGameState {
            version: 4,
            updated_at: 1_700_000_000_000,
            settings: Some(SettingsPatch {
                board_size: Some(3),
                ..SettingsPatch::default()
            }),
            ..SyncableGameState::default()
        };
        state.board_state.board = vec![vec![1, 2, 3], vec![4, 5, 6], vec![7, 8, 9]];
        state.board_state.piece_position = Position::new(1, 1);
        state.board_state.move_history = vec![Position::new(1, 1)];
        state.board_state.record_move(MoveRecord {
            player_id: "p1".into(),
            from: Position::new(1, 1),
            to: Position::new(0, 0),
            direction: Direction::UpLeft,
            distance: 1,
            timestamp: 12,
        });
        state.player_state.players = vec![
            Player {
                id: "p1".into(),
                name: "One".into(),
            },
            Player {
                id: "p2".into(),
                name: "Two".into(),
            },
        ];
        state.player_state.current_player_index = 1;
        state.score_state.scores.insert("p1".into(), 9);
        state.no_moves_claim = Some(NoMovesClaim {
            player_id: "p2".into(),
            score_preview: 4,
            timestamp: 20,
            board_size: 3,
        });
        state.no_moves_votes.insert("p1".into(), Vote::Finish);
        state.finish_requests.insert("p2".into(), RequestFlag::Flag(true));
        state.continue_requests.insert("p1".into(), RequestFlag::At(33));
        state.game_over = Some(GameOverResult::from_state(
            &state,
            GameOverReason::CashOut,
            Some("p2".into()),
            0,
            40,
        ));
        state
    }

    #[test]
    fn round_trip_preserves_every_field() {
        let state = populated_state();
        let document = serialize(&state);

        assert_eq!(document.board_state.board, "[[1,2,3],[4,5,6],[7,8,9]]");
        assert!(document.game_over_serialized.is_some());
        assert_eq!(deserialize(document), state);
    }

    #[test]
    fn stored_document_has_no_nested_arrays() {
        let document = serialize(&populated_state());
        let value = serde_json::to_value(&document).unwrap();

        fn nested(value: &serde_json::Value, inside_array: bool) -> bool {
            match value {
                serde_json::Value::Array(items) => {
                    inside_array || items.iter().any(|item| nested(item, true))
                }
                serde_json::Value::Object(map) => map.values().any(|item| nested(item, false)),
                _ => false,
            }
        }

        assert!(!nested(&value, false));
    }

    #[test]
    fn corrupt_fields_are_dropped_not_fatal() {
        let mut document = serialize(&populated_state());
        document.board_state.board = "[[1,2".into();
        document.game_over_serialized = Some("{not json".into());

        let decoded = deserialize(document);
        assert!(decoded.board_state.board.is_empty());
        assert!(decoded.game_over.is_none());
        assert_eq!(decoded.version, 4);
        assert_eq!(decoded.no_moves_votes.get("p1"), Some(&Vote::Finish));
    }
}
