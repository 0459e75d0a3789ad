use futures::future::BoxFuture;
use serde_json::{Value, json};

use super::{
    client::{CouchClient, RevisionStub},
    error::CouchDaoError,
    models::{CouchRoomDocument, room_doc_id},
};
use crate::{
    dao::{
        room_store::RoomStore,
        storage::{StorageError, StorageResult},
    },
    dto::room::RoomRecord,
};

/// Room records stored as `room::<id>` documents, mutated through update handlers.
#[derive(Clone)]
pub struct CouchRoomStore {
    client: CouchClient,
}

impl CouchRoomStore {
    pub fn new(client: CouchClient) -> Self {
        Self { client }
    }

    async fn update(&self, handler: &str, room_id: &str, body: Value) -> StorageResult<()> {
        self.client
            .call_update(handler, &room_doc_id(room_id), &body)
            .await
            .map(|_| ())
            .map_err(|err| room_error(room_id, err))
    }
}

/// A missing room document means the room was closed.
fn room_error(room_id: &str, err: CouchDaoError) -> StorageError {
    match err {
        CouchDaoError::MissingDocument { .. } => StorageError::RoomGone {
            room_id: room_id.to_string(),
        },
        other => other.into(),
    }
}

impl RoomStore for CouchRoomStore {
    fn create_room(&self, record: RoomRecord) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let doc_id = room_doc_id(&record.room_id);
            let rev = store
                .client
                .get_document::<RevisionStub>(&doc_id)
                .await?
                .map(|existing| existing.rev);
            let doc = CouchRoomDocument::from((record, rev));
            store
                .client
                .put_document(&doc_id, &doc)
                .await
                .map_err(Into::into)
        })
    }

    fn fetch_room(&self, room_id: String) -> BoxFuture<'static, StorageResult<RoomRecord>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .client
                .get_document::<CouchRoomDocument>(&room_doc_id(&room_id))
                .await?
                .map(|doc| doc.room)
                .ok_or(StorageError::RoomGone { room_id })
        })
    }

    fn attach_session(
        &self,
        room_id: String,
        session_id: String,
        started_at: i64,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let body = json!({ "sessionId": session_id, "startedAt": started_at });
            store.update("attach_session", &room_id, body).await
        })
    }

    fn write_heartbeat(
        &self,
        room_id: String,
        player_id: String,
        at: i64,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let body = json!({ "playerId": player_id, "at": at });
            store.update("heartbeat", &room_id, body).await
        })
    }

    fn set_disconnected(
        &self,
        room_id: String,
        player_id: String,
        disconnected: bool,
        at: i64,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let body = json!({ "playerId": player_id, "disconnected": disconnected, "at": at });
            store.update("player_flag", &room_id, body).await
        })
    }

    fn remove_player(
        &self,
        room_id: String,
        player_id: String,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let body = json!({ "playerId": player_id });
            store.update("remove_player", &room_id, body).await
        })
    }

    fn delete_room(&self, room_id: String) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .client
                .delete_document(&room_doc_id(&room_id))
                .await
                .map_err(Into::into)
        })
    }
}
