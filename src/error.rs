use thiserror::Error;

use crate::dao::storage::StorageError;

/// Errors surfaced by the synchronization services.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The backing store failed or is unreachable.
    #[error("storage unavailable")]
    Storage(#[source] StorageError),
    /// The shared game document the caller tried to join does not exist.
    #[error("session not found: {0}")]
    SessionNotFound(String),
    /// The session is not attached to a shared game document.
    #[error("session is not attached to a shared game document")]
    NotInitialized,
    /// Operation cannot be performed in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// The room was closed while the session was running.
    #[error("room `{0}` is gone")]
    RoomGone(String),
}

impl From<StorageError> for SyncError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { what } => SyncError::SessionNotFound(what),
            StorageError::RoomGone { room_id } => SyncError::RoomGone(room_id),
            StorageError::NotInitialized => SyncError::NotInitialized,
            other => SyncError::Storage(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_errors_map_to_service_errors() {
        let err: SyncError = StorageError::not_found("session `x`").into();
        assert!(matches!(err, SyncError::SessionNotFound(what) if what == "session `x`"));

        let err: SyncError = StorageError::RoomGone {
            room_id: "r".into(),
        }
        .into();
        assert!(matches!(err, SyncError::RoomGone(room) if room == "r"));

        let err: SyncError = StorageError::Conflict {
            what: "game::s".into(),
        }
        .into();
        assert!(matches!(err, SyncError::Storage(_)));
    }
}
