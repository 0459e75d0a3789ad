//! Collaborators for running a session without a UI: a plain grid board and log-only
//! modal, speech, navigation and timer services.

use std::sync::Mutex;

use rand::{Rng, SeedableRng, rngs::StdRng};
use tracing::info;

use crate::{
    dao::lock,
    services::collaborators::{
        BoardOps, ModalButton, ModalKind, ModalService, ModalSpec, Navigator, Route,
        SpeechService, TurnTimer,
    },
    state::{
        game::{BoardState, MoveRecord, PlayerState, Position},
        settings::Settings,
    },
};

/// Square grid of random cell values; a move slides the piece in a straight line onto a
/// cell that has not been visited yet.
pub struct PlainGridBoard {
    rng: Mutex<StdRng>,
}

impl PlainGridBoard {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    /// Deterministic boards, for tests and replays.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Default for PlainGridBoard {
    fn default() -> Self {
        Self::new()
    }
}

const STEPS: [(i64, i64); 8] = [
    (-1, 0),
    (1, 0),
    (0, -1),
    (0, 1),
    (-1, -1),
    (-1, 1),
    (1, -1),
    (1, 1),
];

impl BoardOps for PlainGridBoard {
    fn reset_board(&self, settings: &Settings) -> BoardState {
        let size = settings.board_size.max(1);
        let mut rng = lock(&self.rng);
        let board = (0..size)
            .map(|_| (0..size).map(|_| rng.random_range(1..=9)).collect())
            .collect();
        let start = Position::new(size / 2, size / 2);
        BoardState {
            piece_position: start,
            board,
            move_history: vec![start],
            ..BoardState::default()
        }
    }

    fn advance_turn(&self, players: &PlayerState) -> PlayerState {
        let mut next = players.clone();
        if next.player_count() > 0 {
            next.current_player_index = (next.current_player_index + 1) % next.player_count();
        }
        next
    }

    fn legal_moves(&self, board: &BoardState, settings: &Settings) -> Vec<Position> {
        let size = i64::from(board.size());
        let from = board.piece_position;
        let directions = if settings.allow_diagonals { 8 } else { 4 };

        let mut moves = Vec::new();
        for (dr, dc) in STEPS.iter().take(directions) {
            for distance in 1..=i64::from(settings.max_distance) {
                let row = i64::from(from.row) + dr * distance;
                let col = i64::from(from.col) + dc * distance;
                if !(0..size).contains(&row) || !(0..size).contains(&col) {
                    break;
                }
                let target = Position::new(row as u32, col as u32);
                if !board.visit_counts.contains_key(&target.cell_key())
                    && !board.move_history.contains(&target)
                {
                    moves.push(target);
                }
            }
        }
        moves
    }
}

/// Modal service that only logs.
pub struct LoggingModals;

impl ModalService for LoggingModals {
    fn show_modal(&self, spec: ModalSpec) {
        info!(kind = ?spec.kind, title = %spec.title, body = %spec.body, "modal shown");
    }

    fn close_modal(&self, kind: ModalKind) {
        info!(?kind, "modal closed");
    }

    fn close_all_modals(&self) {
        info!("all modals closed");
    }

    fn set_button_text(&self, kind: ModalKind, button: ModalButton, text: String) {
        info!(?kind, ?button, %text, "modal button relabelled");
    }

    fn set_button_disabled(&self, _kind: ModalKind, _button: ModalButton, _disabled: bool) {}
}

pub struct LoggingSpeech;

impl SpeechService for LoggingSpeech {
    fn speak(&self, record: &MoveRecord, language: &str, _voice_id: Option<&str>) {
        info!(
            player_id = %record.player_id,
            direction = record.direction.label(),
            distance = record.distance,
            language,
            "announcing move"
        );
    }
}

pub struct LoggingNavigator;

impl Navigator for LoggingNavigator {
    fn go_to(&self, route: Route) {
        info!(?route, "navigating");
    }
}

pub struct LoggingTimer;

impl TurnTimer for LoggingTimer {
    fn pause(&self) {
        info!("turn timer paused");
    }

    fn resume(&self) {
        info!("turn timer resumed");
    }

    fn stop(&self) {
        info!("turn timer stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_board_starts_in_the_centre() {
        let board = PlainGridBoard::seeded(1).reset_board(&Settings::default());
        assert_eq!(board.size(), 7);
        assert_eq!(board.piece_position, Position::new(3, 3));
        assert!(board.board.iter().flatten().all(|cell| (1..=9).contains(cell)));
    }

    #[test]
    fn legal_moves_respect_bounds_and_visits() {
        let grid = PlainGridBoard::seeded(1);
        let settings = Settings {
            max_distance: 2,
            allow_diagonals: false,
            ..Settings::default()
        };
        let mut board = BoardState {
            board: vec![vec![1; 3]; 3],
            piece_position: Position::new(0, 0),
            move_history: vec![Position::new(0, 0)],
            ..BoardState::default()
        };
        board.visit_counts.insert(Position::new(0, 1).cell_key(), 1);

        let moves = grid.legal_moves(&board, &settings);
        assert_eq!(
            moves,
            vec![Position::new(1, 0), Position::new(2, 0), Position::new(0, 2)]
        );
    }

    #[test]
    fn turn_wraps_around() {
        let players = PlayerState {
            players: vec![
                crate::state::game::Player {
                    id: "a".into(),
                    name: "A".into(),
                },
                crate::state::game::Player {
                    id: "b".into(),
                    name: "B".into(),
                },
            ],
            current_player_index: 1,
        };
        let next = PlainGridBoard::seeded(1).advance_turn(&players);
        assert_eq!(next.current_player_index, 0);
    }
}
