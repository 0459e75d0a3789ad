mod local;

pub use local::{LocalPresenceChannel, LocalPresenceHub};

use futures::future::BoxFuture;

use crate::{
    dao::{
        listeners::{Listener, SubscriptionId},
        storage::StorageResult,
    },
    dto::presence::{PresenceMap, PresenceUpdate},
};

/// Callback invoked when one player's realtime presence changes.
pub type PresenceListener = Listener<PresenceUpdate>;

/// Realtime connectivity channel, separate from the room record.
///
/// Registering marks the local player online; the backend is expected to flip the entry to
/// offline on its own when the connection drops.
pub trait PresenceChannel: Send + Sync {
    /// Mark `player_id` online in `room_id` and arm the drop-to-offline hook.
    fn register(&self, room_id: String, player_id: String)
    -> BoxFuture<'static, StorageResult<()>>;
    /// Explicitly mark `player_id` offline, as on a voluntary leave.
    fn set_offline(
        &self,
        room_id: String,
        player_id: String,
    ) -> BoxFuture<'static, StorageResult<()>>;
    /// Delete `player_id`'s entry once they have left the room for good.
    fn remove(&self, room_id: String, player_id: String)
    -> BoxFuture<'static, StorageResult<()>>;
    /// Current presence entries of a room.
    fn snapshot(&self, room_id: String) -> BoxFuture<'static, StorageResult<PresenceMap>>;
    /// Watch every entry of `room_id`.
    fn subscribe(&self, room_id: String, listener: PresenceListener)
    -> StorageResult<SubscriptionId>;
    /// Detach all listeners registered through this handle. Idempotent.
    fn cleanup(&self);
}
