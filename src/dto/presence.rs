use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Connectivity as reported by the realtime channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceState {
    Online,
    Offline,
}

/// One player's entry on the presence channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceRecord {
    pub state: PresenceState,
    pub last_changed: i64,
}

impl PresenceRecord {
    pub fn online(at: i64) -> Self {
        Self {
            state: PresenceState::Online,
            last_changed: at,
        }
    }

    pub fn offline(at: i64) -> Self {
        Self {
            state: PresenceState::Offline,
            last_changed: at,
        }
    }
}

/// Whole presence channel of one room: `{ playerId: { state, last_changed } }`.
pub type PresenceMap = BTreeMap<String, PresenceRecord>;

/// Notification delivered to presence subscribers when one entry flips.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceUpdate {
    pub room_id: String,
    pub player_id: String,
    pub record: PresenceRecord,
}
