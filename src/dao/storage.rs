use std::error::Error;
use thiserror::Error;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Error raised by storage backends regardless of the underlying document store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage unavailable: {message}")]
    Unavailable {
        message: String,
        #[source]
        source: Box<dyn Error + Send + Sync>,
    },
    /// The addressed document does not exist.
    #[error("document not found: {what}")]
    NotFound { what: String },
    /// The room record was deleted while the session was still using it.
    #[error("room `{room_id}` no longer exists")]
    RoomGone { room_id: String },
    /// The backend rejected a write because the document changed underneath it.
    #[error("write conflict on {what}")]
    Conflict { what: String },
    /// An operation needed a shared document before `initialize` attached one.
    #[error("state store is not attached to a session")]
    NotInitialized,
}

impl StorageError {
    /// Construct an unavailable error from any backend failure.
    pub fn unavailable(message: String, source: impl Error + Send + Sync + 'static) -> Self {
        StorageError::Unavailable {
            message,
            source: Box::new(source),
        }
    }

    /// Construct a not-found error for the given document description.
    pub fn not_found(what: impl Into<String>) -> Self {
        StorageError::NotFound { what: what.into() }
    }
}
