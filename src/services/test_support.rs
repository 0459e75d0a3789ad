//! Recording collaborator doubles for service tests.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use crate::{
    dao::lock,
    services::{
        collaborators::{
            Collaborators, ModalButton, ModalKind, ModalService, ModalSpec, Navigator, Route,
            SpeechService, TurnTimer,
        },
        headless::PlainGridBoard,
    },
    state::game::MoveRecord,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModalCall {
    Show(ModalSpec),
    Close(ModalKind),
    CloseAll,
    Text(ModalKind, ModalButton, String),
    Disabled(ModalKind, ModalButton, bool),
}

#[derive(Default)]
pub struct RecordingModals {
    calls: Mutex<Vec<ModalCall>>,
}

impl RecordingModals {
    pub fn calls(&self) -> Vec<ModalCall> {
        lock(&self.calls).clone()
    }

    /// Whether `kind` is currently showing, judging by the last show/close call.
    pub fn is_open(&self, kind: ModalKind) -> bool {
        lock(&self.calls)
            .iter()
            .rev()
            .find_map(|call| match call {
                ModalCall::Show(spec) if spec.kind == kind => Some(true),
                ModalCall::Close(closed) if *closed == kind => Some(false),
                ModalCall::CloseAll => Some(false),
                _ => None,
            })
            .unwrap_or(false)
    }

    pub fn shown(&self, kind: ModalKind) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|call| matches!(call, ModalCall::Show(spec) if spec.kind == kind))
            .count()
    }

    pub fn last_text(&self, button: ModalButton) -> Option<String> {
        lock(&self.calls).iter().rev().find_map(|call| match call {
            ModalCall::Text(_, target, text) if *target == button => Some(text.clone()),
            _ => None,
        })
    }
}

impl ModalService for RecordingModals {
    fn show_modal(&self, spec: ModalSpec) {
        lock(&self.calls).push(ModalCall::Show(spec));
    }

    fn close_modal(&self, kind: ModalKind) {
        lock(&self.calls).push(ModalCall::Close(kind));
    }

    fn close_all_modals(&self) {
        lock(&self.calls).push(ModalCall::CloseAll);
    }

    fn set_button_text(&self, kind: ModalKind, button: ModalButton, text: String) {
        lock(&self.calls).push(ModalCall::Text(kind, button, text));
    }

    fn set_button_disabled(&self, kind: ModalKind, button: ModalButton, disabled: bool) {
        lock(&self.calls)
            .push(ModalCall::Disabled(kind, button, disabled));
    }
}

#[derive(Default)]
pub struct RecordingSpeech {
    spoken: Mutex<Vec<MoveRecord>>,
}

impl RecordingSpeech {
    pub fn spoken(&self) -> Vec<MoveRecord> {
        lock(&self.spoken).clone()
    }
}

impl SpeechService for RecordingSpeech {
    fn speak(&self, record: &MoveRecord, _language: &str, _voice_id: Option<&str>) {
        lock(&self.spoken).push(record.clone());
    }
}

#[derive(Default)]
pub struct RecordingNavigator {
    routes: Mutex<Vec<Route>>,
}

impl RecordingNavigator {
    pub fn routes(&self) -> Vec<Route> {
        lock(&self.routes).clone()
    }
}

impl Navigator for RecordingNavigator {
    fn go_to(&self, route: Route) {
        lock(&self.routes).push(route);
    }
}

#[derive(Default)]
pub struct RecordingTimer {
    calls: Mutex<Vec<&'static str>>,
}

impl RecordingTimer {
    pub fn calls(&self) -> Vec<&'static str> {
        lock(&self.calls).clone()
    }

    pub fn is_paused(&self) -> bool {
        lock(&self.calls)
            .iter()
            .rev()
            .find(|call| matches!(**call, "pause" | "resume"))
            .is_some_and(|call| *call == "pause")
    }
}

impl TurnTimer for RecordingTimer {
    fn pause(&self) {
        lock(&self.calls).push("pause");
    }

    fn resume(&self) {
        lock(&self.calls).push("resume");
    }

    fn stop(&self) {
        lock(&self.calls).push("stop");
    }
}

/// Recording doubles plus the bundle wired to them.
pub struct Recorders {
    pub modals: Arc<RecordingModals>,
    pub speech: Arc<RecordingSpeech>,
    pub navigator: Arc<RecordingNavigator>,
    pub timer: Arc<RecordingTimer>,
    pub collaborators: Collaborators,
}

pub fn recorders() -> Recorders {
    let modals = Arc::new(RecordingModals::default());
    let speech = Arc::new(RecordingSpeech::default());
    let navigator = Arc::new(RecordingNavigator::default());
    let timer = Arc::new(RecordingTimer::default());
    let collaborators = Collaborators {
        board: Arc::new(PlainGridBoard::seeded(7)),
        modals: modals.clone(),
        speech: speech.clone(),
        navigator: navigator.clone(),
        timer: timer.clone(),
    };
    Recorders {
        modals,
        speech,
        navigator,
        timer,
        collaborators,
    }
}

/// Poll `condition` while letting spawned tasks run; panics after about a second.
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}
