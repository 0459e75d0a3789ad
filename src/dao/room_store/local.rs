use std::sync::Arc;

use dashmap::DashMap;
use futures::future::BoxFuture;

use super::RoomStore;
use crate::{
    dao::storage::{StorageError, StorageResult},
    dto::room::{RoomPlayer, RoomRecord},
};

/// In-process room records; clones share the same rooms.
#[derive(Clone, Default)]
pub struct LocalRoomStore {
    rooms: Arc<DashMap<String, RoomRecord>>,
}

impl LocalRoomStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_player<T>(
        &self,
        room_id: &str,
        player_id: &str,
        apply: impl FnOnce(&mut RoomPlayer) -> T,
    ) -> StorageResult<T> {
        let mut room = self.rooms.get_mut(room_id).ok_or_else(|| StorageError::RoomGone {
            room_id: room_id.to_string(),
        })?;
        let player = room
            .player_mut(player_id)
            .ok_or_else(|| StorageError::not_found(format!("player `{player_id}`")))?;
        Ok(apply(player))
    }

    fn gone(room_id: &str) -> StorageError {
        StorageError::RoomGone {
            room_id: room_id.to_string(),
        }
    }
}

impl RoomStore for LocalRoomStore {
    fn create_room(&self, record: RoomRecord) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.rooms.insert(record.room_id.clone(), record);
            Ok(())
        })
    }

    fn fetch_room(&self, room_id: String) -> BoxFuture<'static, StorageResult<RoomRecord>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .rooms
                .get(&room_id)
                .map(|room| room.clone())
                .ok_or_else(|| Self::gone(&room_id))
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
            let mut room = store
                .rooms
                .get_mut(&room_id)
                .ok_or_else(|| Self::gone(&room_id))?;
            room.session_id = Some(session_id);
            room.started_at = Some(started_at);
            Ok(())
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
            store.with_player(&room_id, &player_id, |player| {
                player.last_seen = player.last_seen.max(at);
            })
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
            store.with_player(&room_id, &player_id, |player| {
                player.is_disconnected = disconnected;
                player.disconnected_at = disconnected.then_some(at);
            })
        })
    }

    fn remove_player(
        &self,
        room_id: String,
        player_id: String,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let mut room = store
                .rooms
                .get_mut(&room_id)
                .ok_or_else(|| Self::gone(&room_id))?;
            room.players.retain(|player| player.id != player_id);
            Ok(())
        })
    }

    fn delete_room(&self, room_id: String) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.rooms.remove(&room_id);
            Ok(())
        })
    }
}
