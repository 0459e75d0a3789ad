//! Interfaces of the out-of-core services the sync layer drives.
//!
//! Board rules, modals, speech, navigation and the turn timer live elsewhere; the sync core
//! only ever talks to them through these traits. Calls are synchronous and must not call
//! back into the sync services on the same stack.

use std::sync::Arc;

use crate::state::{
    game::{BoardState, MoveRecord, PlayerState, Position},
    settings::Settings,
};

/// Board-mutation primitives supplied by the rules engine.
pub trait BoardOps: Send + Sync {
    /// Fresh board for a new round.
    fn reset_board(&self, settings: &Settings) -> BoardState;
    /// Player state with the turn handed to the next player.
    fn advance_turn(&self, players: &PlayerState) -> PlayerState;
    /// Cells the current player may move the piece to.
    fn legal_moves(&self, board: &BoardState, settings: &Settings) -> Vec<Position>;
    /// Points earned by landing on `to`.
    fn score_for(&self, board: &BoardState, to: Position) -> i64 {
        board
            .board
            .get(to.row as usize)
            .and_then(|row| row.get(to.col as usize))
            .map(|value| i64::from(*value))
            .unwrap_or_default()
    }
}

/// Which modal a call refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ModalKind {
    NoMovesVote,
    GameOver,
    Reconnecting,
    RoomClosed,
    PlayerLeft,
}

/// Buttons whose label or state the core updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModalButton {
    Continue,
    Finish,
    Dismiss,
}

/// Content of a modal to show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModalSpec {
    pub kind: ModalKind,
    pub title: String,
    pub body: String,
    pub buttons: Vec<(ModalButton, String)>,
    /// Blocking modals cannot be dismissed by the user.
    pub blocking: bool,
}

impl ModalSpec {
    pub fn new(kind: ModalKind, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            kind,
            title: title.into(),
            body: body.into(),
            buttons: Vec::new(),
            blocking: false,
        }
    }

    pub fn button(mut self, button: ModalButton, label: impl Into<String>) -> Self {
        self.buttons.push((button, label.into()));
        self
    }

    pub fn blocking(mut self) -> Self {
        self.blocking = true;
        self
    }
}

pub trait ModalService: Send + Sync {
    /// Show `spec`, replacing any open modal of the same kind.
    fn show_modal(&self, spec: ModalSpec);
    fn close_modal(&self, kind: ModalKind);
    fn close_all_modals(&self);
    fn set_button_text(&self, kind: ModalKind, button: ModalButton, text: String);
    fn set_button_disabled(&self, kind: ModalKind, button: ModalButton, disabled: bool);
}

pub trait SpeechService: Send + Sync {
    fn speak(&self, record: &MoveRecord, language: &str, voice_id: Option<&str>);
}

/// Screens the core can send the user to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Home,
    Lobby { room_id: String },
    Game { room_id: String },
}

pub trait Navigator: Send + Sync {
    fn go_to(&self, route: Route);
}

pub trait TurnTimer: Send + Sync {
    fn pause(&self);
    fn resume(&self);
    fn stop(&self);
}

/// Every collaborator a session needs, constructed by the caller and shared by reference.
#[derive(Clone)]
pub struct Collaborators {
    pub board: Arc<dyn BoardOps>,
    pub modals: Arc<dyn ModalService>,
    pub speech: Arc<dyn SpeechService>,
    pub navigator: Arc<dyn Navigator>,
    pub timer: Arc<dyn TurnTimer>,
}
