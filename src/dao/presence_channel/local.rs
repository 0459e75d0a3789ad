use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use futures::future::BoxFuture;
use tracing::debug;

use super::{PresenceChannel, PresenceListener};
use crate::{
    clock::now_ms,
    dao::{
        listeners::{ListenerSet, SubscriptionId},
        lock,
        storage::StorageResult,
    },
    dto::presence::{PresenceMap, PresenceRecord, PresenceUpdate},
};

#[derive(Default)]
struct LocalRoomPresence {
    entries: Mutex<PresenceMap>,
    listeners: ListenerSet<PresenceUpdate>,
}

/// Process-wide presence registry shared by every [`LocalPresenceChannel`].
#[derive(Clone, Default)]
pub struct LocalPresenceHub {
    rooms: Arc<DashMap<String, Arc<LocalRoomPresence>>>,
}

impl LocalPresenceHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn channel(&self) -> LocalPresenceChannel {
        LocalPresenceChannel {
            hub: self.clone(),
            subscriptions: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Simulate the backend noticing a dropped connection.
    pub fn drop_connection(&self, room_id: &str, player_id: &str) {
        self.write(room_id, player_id, PresenceRecord::offline(now_ms()));
    }

    /// Overwrite one entry and notify watchers, unless nothing changed.
    pub fn write(&self, room_id: &str, player_id: &str, record: PresenceRecord) {
        let room = self.room(room_id);
        {
            let mut entries = lock(&room.entries);
            if entries
                .get(player_id)
                .is_some_and(|existing| existing.state == record.state)
            {
                return;
            }
            entries.insert(player_id.to_string(), record);
        }
        debug!(room_id, player_id, state = ?record.state, "presence changed");
        room.listeners.dispatch(&PresenceUpdate {
            room_id: room_id.to_string(),
            player_id: player_id.to_string(),
            record,
        });
    }

    /// Drop one entry without notifying watchers.
    pub fn remove(&self, room_id: &str, player_id: &str) {
        if lock(&self.room(room_id).entries).remove(player_id).is_some() {
            debug!(room_id, player_id, "presence entry pruned");
        }
    }

    fn room(&self, room_id: &str) -> Arc<LocalRoomPresence> {
        self.rooms
            .entry(room_id.to_string())
            .or_default()
            .value()
            .clone()
    }
}

/// One client's handle on a [`LocalPresenceHub`].
#[derive(Clone)]
pub struct LocalPresenceChannel {
    hub: LocalPresenceHub,
    subscriptions: Arc<Mutex<Vec<(String, SubscriptionId)>>>,
}

impl PresenceChannel for LocalPresenceChannel {
    fn register(
        &self,
        room_id: String,
        player_id: String,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let hub = self.hub.clone();
        Box::pin(async move {
            hub.write(&room_id, &player_id, PresenceRecord::online(now_ms()));
            Ok(())
        })
    }

    fn set_offline(
        &self,
        room_id: String,
        player_id: String,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let hub = self.hub.clone();
        Box::pin(async move {
            hub.write(&room_id, &player_id, PresenceRecord::offline(now_ms()));
            Ok(())
        })
    }

    fn remove(&self, room_id: String, player_id: String) -> BoxFuture<'static, StorageResult<()>> {
        let hub = self.hub.clone();
        Box::pin(async move {
            hub.remove(&room_id, &player_id);
            Ok(())
        })
    }

    fn snapshot(&self, room_id: String) -> BoxFuture<'static, StorageResult<PresenceMap>> {
        let hub = self.hub.clone();
        Box::pin(async move { Ok(lock(&hub.room(&room_id).entries).clone()) })
    }

    fn subscribe(
        &self,
        room_id: String,
        listener: PresenceListener,
    ) -> StorageResult<SubscriptionId> {
        let id = self.hub.room(&room_id).listeners.add(listener);
        lock(&self.subscriptions).push((room_id, id));
        Ok(id)
    }

    fn cleanup(&self) {
        let subscriptions = std::mem::take(&mut *lock(&self.subscriptions));
        for (room_id, id) in subscriptions {
            if let Some(room) = self.hub.rooms.get(&room_id) {
                room.listeners.remove(&id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dto::presence::PresenceState;

    #[tokio::test]
    async fn dropped_connection_reaches_watchers_once() {
        let hub = LocalPresenceHub::new();
        let host = hub.channel();
        let guest = hub.channel();
        guest.register("r".into(), "g".into()).await.unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        host.subscribe(
            "r".into(),
            Arc::new(move |update: &PresenceUpdate| {
                lock(&sink).push((update.player_id.clone(), update.record.state));
            }),
        )
        .unwrap();

        hub.drop_connection("r", "g");
        hub.drop_connection("r", "g");
        assert_eq!(
            lock(&seen).clone(),
            vec![("g".to_string(), PresenceState::Offline)]
        );

        let snapshot = host.snapshot("r".into()).await.unwrap();
        assert_eq!(snapshot["g"].state, PresenceState::Offline);
    }

    #[tokio::test]
    async fn removed_entry_leaves_the_snapshot() {
        let hub = LocalPresenceHub::new();
        let channel = hub.channel();
        channel.register("r".into(), "a".into()).await.unwrap();
        hub.drop_connection("r", "b");

        channel.remove("r".into(), "b".into()).await.unwrap();
        channel.remove("r".into(), "b".into()).await.unwrap();

        let snapshot = channel.snapshot("r".into()).await.unwrap();
        assert!(snapshot.contains_key("a"));
        assert!(!snapshot.contains_key("b"));
    }

    #[tokio::test]
    async fn cleanup_detaches_listeners() {
        let hub = LocalPresenceHub::new();
        let channel = hub.channel();
        let seen = Arc::new(Mutex::new(0usize));
        let sink = seen.clone();
        channel
            .subscribe("r".into(), Arc::new(move |_: &PresenceUpdate| *lock(&sink) += 1))
            .unwrap();

        channel.register("r".into(), "a".into()).await.unwrap();
        channel.cleanup();
        channel.cleanup();
        channel.set_offline("r".into(), "a".into()).await.unwrap();
        assert_eq!(*lock(&seen), 1);
    }
}
