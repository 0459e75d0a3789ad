use serde::{Deserialize, Serialize};

/// Full settings as seen by one client: shared rules plus purely local preferences.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub board_size: u32,
    pub max_distance: u32,
    pub allow_diagonals: bool,
    pub turn_time_limit_secs: Option<u32>,
    /// Local: language used for spoken announcements.
    pub language: String,
    /// Local: whether speech is enabled at all.
    pub voice_enabled: bool,
    /// Local: announce moves made by other players.
    pub announce_opponent_moves: bool,
    /// Local: selected synthesizer voice.
    pub voice_id: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            board_size: 7,
            max_distance: 3,
            allow_diagonals: true,
            turn_time_limit_secs: None,
            language: "en".into(),
            voice_enabled: true,
            announce_opponent_moves: true,
            voice_id: None,
        }
    }
}

impl Settings {
    /// Apply only the fields present in `patch`. Returns whether anything changed.
    pub fn apply_patch(&mut self, patch: &SettingsPatch) -> bool {
        let before = self.clone();
        if let Some(board_size) = patch.board_size {
            self.board_size = board_size;
        }
        if let Some(max_distance) = patch.max_distance {
            self.max_distance = max_distance;
        }
        if let Some(allow_diagonals) = patch.allow_diagonals {
            self.allow_diagonals = allow_diagonals;
        }
        if let Some(limit) = patch.turn_time_limit_secs {
            self.turn_time_limit_secs = (limit > 0).then_some(limit);
        }
        *self != before
    }
}

/// Partial override of the shared rules carried in the game document.
///
/// Local preferences (language, voice) have no field here, so a peer can never overwrite them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub board_size: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_distance: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allow_diagonals: Option<bool>,
    /// Zero clears the limit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_time_limit_secs: Option<u32>,
}

impl From<&Settings> for SettingsPatch {
    /// The shared rules of `settings`, with every field set.
    fn from(settings: &Settings) -> Self {
        Self {
            board_size: Some(settings.board_size),
            max_distance: Some(settings.max_distance),
            allow_diagonals: Some(settings.allow_diagonals),
            turn_time_limit_secs: Some(settings.turn_time_limit_secs.unwrap_or(0)),
        }
    }
}

impl SettingsPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Overlay `newer` on top of `self`, keeping fields `newer` leaves unset.
    pub fn merged(&self, newer: &SettingsPatch) -> SettingsPatch {
        SettingsPatch {
            board_size: newer.board_size.or(self.board_size),
            max_distance: newer.max_distance.or(self.max_distance),
            allow_diagonals: newer.allow_diagonals.or(self.allow_diagonals),
            turn_time_limit_secs: newer.turn_time_limit_secs.or(self.turn_time_limit_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_leaves_local_preferences_alone() {
        let mut settings = Settings {
            voice_id: Some("alto".into()),
            language: "fr".into(),
            ..Settings::default()
        };
        let patch = SettingsPatch {
            board_size: Some(9),
            ..SettingsPatch::default()
        };

        assert!(settings.apply_patch(&patch));
        assert_eq!(settings.board_size, 9);
        assert_eq!(settings.max_distance, 3);
        assert_eq!(settings.voice_id.as_deref(), Some("alto"));
        assert_eq!(settings.language, "fr");
        assert!(!settings.apply_patch(&patch));
    }

    #[test]
    fn merged_prefers_newer_fields() {
        let base = SettingsPatch {
            board_size: Some(7),
            max_distance: Some(2),
            ..SettingsPatch::default()
        };
        let newer = SettingsPatch {
            max_distance: Some(4),
            ..SettingsPatch::default()
        };
        let merged = base.merged(&newer);
        assert_eq!(merged.board_size, Some(7));
        assert_eq!(merged.max_distance, Some(4));
    }

    #[test]
    fn absent_fields_are_not_serialized() {
        let patch = SettingsPatch {
            allow_diagonals: Some(false),
            ..SettingsPatch::default()
        };
        let json = serde_json::to_string(&patch).unwrap();
        assert_eq!(json, r#"{"allowDiagonals":false}"#);
    }
}
