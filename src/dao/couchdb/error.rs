//! Error types shared by the CouchDB storage implementation.

use reqwest::StatusCode;
use thiserror::Error;

use crate::dao::storage::StorageError;

/// Convenient result alias returning [`CouchDaoError`] failures.
pub type CouchResult<T> = Result<T, CouchDaoError>;

/// Failures that can occur while interacting with CouchDB.
#[derive(Debug, Error)]
pub enum CouchDaoError {
    /// Required environment variable is missing.
    #[error("missing CouchDB environment variable `{var}`")]
    MissingEnvVar { var: &'static str },
    /// Building the HTTP client failed (invalid TLS setup, etc).
    #[error("failed to build CouchDB client")]
    ClientBuilder {
        #[source]
        source: reqwest::Error,
    },
    /// CouchDB rejected a GET against the target database.
    #[error("failed to query CouchDB database `{database}`")]
    DatabaseQuery {
        database: String,
        #[source]
        source: reqwest::Error,
    },
    /// CouchDB rejected a database creation request.
    #[error("failed to create CouchDB database `{database}`")]
    DatabaseCreate {
        database: String,
        #[source]
        source: reqwest::Error,
    },
    /// CouchDB returned an unexpected status code for a database operation.
    #[error("unexpected CouchDB database response status {status} for `{database}`")]
    DatabaseStatus {
        database: String,
        status: StatusCode,
    },
    /// A request to a document endpoint could not be sent.
    #[error("failed to send CouchDB request to `{path}`")]
    RequestSend {
        path: String,
        #[source]
        source: reqwest::Error,
    },
    /// CouchDB returned an unexpected status code for a document endpoint.
    #[error("unexpected CouchDB response status {status} for `{path}`")]
    RequestStatus { path: String, status: StatusCode },
    /// Response payload could not be parsed into JSON.
    #[error("failed to decode CouchDB response for `{path}`")]
    DecodeResponse {
        path: String,
        #[source]
        source: reqwest::Error,
    },
    /// Decoding a JSON value into the expected model failed.
    #[error("failed to deserialize CouchDB value for `{path}`")]
    DeserializeValue {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    /// The addressed document does not exist.
    #[error("CouchDB document `{doc_id}` does not exist")]
    MissingDocument { doc_id: String },
    /// The document exists but the addressed entry inside it does not.
    #[error("CouchDB document `{doc_id}` has no such entry")]
    MissingEntry { doc_id: String },
    /// An update handler kept losing the revision race.
    #[error("CouchDB update on `{doc_id}` still conflicted after {attempts} attempts")]
    Conflict { doc_id: String, attempts: u32 },
    /// The room document is gone.
    #[error("room `{room_id}` no longer exists")]
    RoomGone { room_id: String },
}

impl From<CouchDaoError> for StorageError {
    fn from(err: CouchDaoError) -> Self {
        match err {
            CouchDaoError::MissingDocument { doc_id } | CouchDaoError::MissingEntry { doc_id } => {
                StorageError::not_found(doc_id)
            }
            CouchDaoError::Conflict { doc_id, .. } => StorageError::Conflict { what: doc_id },
            CouchDaoError::RoomGone { room_id } => StorageError::RoomGone { room_id },
            other => StorageError::unavailable(other.to_string(), other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_documents_map_to_domain_errors() {
        let err: StorageError = CouchDaoError::MissingDocument {
            doc_id: "game::x".into(),
        }
        .into();
        assert!(matches!(err, StorageError::NotFound { .. }));

        let err: StorageError = CouchDaoError::RoomGone {
            room_id: "r".into(),
        }
        .into();
        assert!(matches!(err, StorageError::RoomGone { room_id } if room_id == "r"));

        let err: StorageError = CouchDaoError::RequestStatus {
            path: "p".into(),
            status: StatusCode::INTERNAL_SERVER_ERROR,
        }
        .into();
        assert!(matches!(err, StorageError::Unavailable { .. }));
    }
}
