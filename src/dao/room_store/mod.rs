mod local;

pub use local::LocalRoomStore;

use futures::future::BoxFuture;

use crate::{dao::storage::StorageResult, dto::room::RoomRecord};

/// Storage for the authoritative room record.
///
/// Every mutation targets one player's fields; none rewrites the roster from a client-side read.
/// Operations on a deleted room fail with `StorageError::RoomGone`.
pub trait RoomStore: Send + Sync {
    fn create_room(&self, record: RoomRecord) -> BoxFuture<'static, StorageResult<()>>;
    fn fetch_room(&self, room_id: String) -> BoxFuture<'static, StorageResult<RoomRecord>>;
    /// Attach the shared game document and start time once the host opens the match.
    fn attach_session(
        &self,
        room_id: String,
        session_id: String,
        started_at: i64,
    ) -> BoxFuture<'static, StorageResult<()>>;
    /// Refresh `lastSeen` for one player. Fails with `NotFound` if the player was removed.
    fn write_heartbeat(
        &self,
        room_id: String,
        player_id: String,
        at: i64,
    ) -> BoxFuture<'static, StorageResult<()>>;
    /// Set or clear the host's disconnected flag for one player.
    fn set_disconnected(
        &self,
        room_id: String,
        player_id: String,
        disconnected: bool,
        at: i64,
    ) -> BoxFuture<'static, StorageResult<()>>;
    fn remove_player(
        &self,
        room_id: String,
        player_id: String,
    ) -> BoxFuture<'static, StorageResult<()>>;
    fn delete_room(&self, room_id: String) -> BoxFuture<'static, StorageResult<()>>;
}
