use std::{collections::BTreeSet, sync::Arc, sync::Mutex};

use tracing::debug;

use crate::{
    dao::lock,
    services::collaborators::{ModalKind, TurnTimer},
};

/// Why the turn timer is held.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PauseReason {
    /// A no-legal-moves vote is open.
    Claim,
    /// At least one player is waited for.
    Reconnect,
    /// A modal opened by the local UI.
    Modal(ModalKind),
}

#[derive(Debug, Default)]
struct GateState {
    reasons: BTreeSet<PauseReason>,
    stopped: bool,
}

/// Reference-counted pause of the turn timer.
///
/// The timer pauses when the first reason appears and resumes only once every reason is gone,
/// so independent services never resume a timer another one still needs paused.
pub struct TimerGate {
    timer: Arc<dyn TurnTimer>,
    state: Mutex<GateState>,
}

impl TimerGate {
    pub fn new(timer: Arc<dyn TurnTimer>) -> Self {
        Self {
            timer,
            state: Mutex::new(GateState::default()),
        }
    }

    pub fn hold(&self, reason: PauseReason) {
        let pause = {
            let mut state = lock(&self.state);
            let first = state.reasons.is_empty();
            state.reasons.insert(reason) && first && !state.stopped
        };
        if pause {
            debug!(?reason, "pausing turn timer");
            self.timer.pause();
        }
    }

    pub fn release(&self, reason: PauseReason) {
        let resume = {
            let mut state = lock(&self.state);
            state.reasons.remove(&reason) && state.reasons.is_empty() && !state.stopped
        };
        if resume {
            debug!(?reason, "resuming turn timer");
            self.timer.resume();
        }
    }

    pub fn is_paused(&self) -> bool {
        !lock(&self.state).reasons.is_empty()
    }

    /// Stop the timer for good, as at game over. Holds and releases become no-ops.
    pub fn stop(&self) {
        let stop = {
            let mut state = lock(&self.state);
            !std::mem::replace(&mut state.stopped, true)
        };
        if stop {
            self.timer.stop();
        }
    }

    /// Re-arm after a replay; resumes straight away when nothing holds the timer.
    pub fn restart(&self) {
        let resume = {
            let mut state = lock(&self.state);
            std::mem::replace(&mut state.stopped, false) && state.reasons.is_empty()
        };
        if resume {
            self.timer.resume();
        }
    }
}
