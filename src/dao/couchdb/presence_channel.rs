use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use dashmap::DashMap;
use futures::future::BoxFuture;
use serde_json::{from_value, json};
use tokio::task::JoinHandle;
use tracing::warn;

use super::{
    changes::{FeedStart, spawn_feed},
    client::CouchClient,
    models::{ChangeRow, CouchPresenceDocument, presence_doc_id},
};
use crate::{
    clock::now_ms,
    dao::{
        listeners::{ListenerSet, SubscriptionId},
        lock,
        presence_channel::{PresenceChannel, PresenceListener},
        storage::StorageResult,
    },
    dto::presence::{PresenceMap, PresenceState, PresenceUpdate},
};

#[derive(Default)]
struct RoomWatch {
    listeners: ListenerSet<PresenceUpdate>,
    known: Mutex<PresenceMap>,
    feed: Mutex<Option<JoinHandle<()>>>,
}

impl RoomWatch {
    /// Report every entry whose state differs from the last document seen.
    fn on_change(&self, room_id: &str, row: ChangeRow) {
        let Some(doc) = row.doc else {
            return;
        };
        let doc = match from_value::<CouchPresenceDocument>(doc) {
            Ok(doc) => doc,
            Err(err) => {
                warn!(room_id, error = %err, "skipping undecodable presence change");
                return;
            }
        };

        let flipped = {
            let mut known = lock(&self.known);
            let flipped = doc
                .entries
                .iter()
                .filter(|(player_id, record)| {
                    known
                        .get(*player_id)
                        .is_none_or(|previous| previous.state != record.state)
                })
                .map(|(player_id, record)| PresenceUpdate {
                    room_id: room_id.to_string(),
                    player_id: player_id.clone(),
                    record: *record,
                })
                .collect::<Vec<_>>();
            *known = doc.entries;
            flipped
        };

        for update in flipped {
            self.listeners.dispatch(&update);
        }
    }
}

/// Presence entries kept in one `presence::<room>` document per room.
///
/// CouchDB cannot flip an entry when a client vanishes, so in this backend a dropped
/// connection is only noticed through the heartbeat fallback.
#[derive(Clone)]
pub struct CouchPresenceChannel {
    client: CouchClient,
    retry: Duration,
    rooms: Arc<DashMap<String, Arc<RoomWatch>>>,
}

impl CouchPresenceChannel {
    pub fn new(client: CouchClient, retry: Duration) -> Self {
        Self {
            client,
            retry,
            rooms: Arc::new(DashMap::new()),
        }
    }

    fn write(
        &self,
        room_id: String,
        player_id: String,
        state: PresenceState,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let client = self.client.clone();
        Box::pin(async move {
            let body = json!({ "playerId": player_id, "state": state, "at": now_ms() });
            client
                .call_update("presence", &presence_doc_id(&room_id), &body)
                .await
                .map(|_| ())
                .map_err(Into::into)
        })
    }
}

impl PresenceChannel for CouchPresenceChannel {
    fn register(
        &self,
        room_id: String,
        player_id: String,
    ) -> BoxFuture<'static, StorageResult<()>> {
        self.write(room_id, player_id, PresenceState::Online)
    }

    fn set_offline(
        &self,
        room_id: String,
        player_id: String,
    ) -> BoxFuture<'static, StorageResult<()>> {
        self.write(room_id, player_id, PresenceState::Offline)
    }

    fn remove(&self, room_id: String, player_id: String) -> BoxFuture<'static, StorageResult<()>> {
        let client = self.client.clone();
        Box::pin(async move {
            let body = json!({ "playerId": player_id, "remove": true });
            client
                .call_update("presence", &presence_doc_id(&room_id), &body)
                .await
                .map(|_| ())
                .map_err(Into::into)
        })
    }

    fn snapshot(&self, room_id: String) -> BoxFuture<'static, StorageResult<PresenceMap>> {
        let client = self.client.clone();
        Box::pin(async move {
            let doc = client
                .get_document::<CouchPresenceDocument>(&presence_doc_id(&room_id))
                .await?;
            Ok(doc.map(|doc| doc.entries).unwrap_or_default())
        })
    }

    fn subscribe(
        &self,
        room_id: String,
        listener: PresenceListener,
    ) -> StorageResult<SubscriptionId> {
        let watch = self
            .rooms
            .entry(room_id.clone())
            .or_default()
            .value()
            .clone();
        let id = watch.listeners.add(listener);

        let mut feed = lock(&watch.feed);
        if feed.is_none() {
            let weak = Arc::downgrade(&watch);
            let feed_room = room_id.clone();
            // Start from the beginning so the current entries seed the diff cache.
            *feed = Some(spawn_feed(
                self.client.clone(),
                vec![presence_doc_id(&room_id)],
                FeedStart::Beginning,
                self.retry,
                move |row| {
                    if let Some(watch) = weak.upgrade() {
                        watch.on_change(&feed_room, row);
                    }
                },
            ));
        }
        Ok(id)
    }

    fn cleanup(&self) {
        let watches = self
            .rooms
            .iter()
            .map(|entry| entry.value().clone())
            .collect::<Vec<_>>();
        self.rooms.clear();
        for watch in watches {
            if let Some(feed) = lock(&watch.feed).take() {
                feed.abort();
            }
            watch.listeners.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dto::presence::PresenceRecord;

    fn row(entries: &[(&str, PresenceRecord)]) -> ChangeRow {
        let doc = CouchPresenceDocument {
            id: presence_doc_id("r"),
            rev: Some("1-x".into()),
            entries: entries
                .iter()
                .map(|(id, record)| (id.to_string(), *record))
                .collect(),
        };
        ChangeRow {
            id: doc.id.clone(),
            deleted: false,
            doc: Some(serde_json::to_value(doc).unwrap()),
        }
    }

    #[test]
    fn only_flipped_entries_are_reported() {
        let watch = RoomWatch::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        watch.listeners.add(Arc::new(move |update: &PresenceUpdate| {
            lock(&sink).push((update.player_id.clone(), update.record.state));
        }));

        watch.on_change("r", row(&[("a", PresenceRecord::online(1))]));
        watch.on_change(
            "r",
            row(&[("a", PresenceRecord::online(1)), ("b", PresenceRecord::online(2))]),
        );
        watch.on_change(
            "r",
            row(&[("a", PresenceRecord::offline(3)), ("b", PresenceRecord::online(2))]),
        );

        assert_eq!(
            lock(&seen).clone(),
            vec![
                ("a".to_string(), PresenceState::Online),
                ("b".to_string(), PresenceState::Online),
                ("a".to_string(), PresenceState::Offline),
            ]
        );
    }
}
