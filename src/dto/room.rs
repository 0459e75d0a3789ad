use serde::{Deserialize, Serialize};

/// A seat in the room as the host's monitor sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomPlayer {
    pub id: String,
    pub name: String,
    /// Last heartbeat, epoch milliseconds.
    pub last_seen: i64,
    #[serde(default)]
    pub is_disconnected: bool,
    /// When the host marked the player disconnected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disconnected_at: Option<i64>,
}

impl RoomPlayer {
    pub fn new(id: impl Into<String>, name: impl Into<String>, last_seen: i64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            last_seen,
            is_disconnected: false,
            disconnected_at: None,
        }
    }
}

/// Authoritative room record; only the host removes players or flags them disconnected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomRecord {
    pub room_id: String,
    pub host_id: String,
    pub players: Vec<RoomPlayer>,
    /// Shared game document attached by the host once the match starts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
    pub created_at: i64,
}

impl RoomRecord {
    pub fn player(&self, player_id: &str) -> Option<&RoomPlayer> {
        self.players.iter().find(|player| player.id == player_id)
    }

    pub fn player_mut(&mut self, player_id: &str) -> Option<&mut RoomPlayer> {
        self.players.iter_mut().find(|player| player.id == player_id)
    }
}
