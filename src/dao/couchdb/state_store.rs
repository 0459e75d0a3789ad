use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use futures::future::BoxFuture;
use serde_json::{from_value, json};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{
    changes::{FeedStart, spawn_feed},
    client::{CouchClient, RevisionStub, WRITE_ATTEMPTS},
    error::CouchDaoError,
    models::{ChangeRow, CouchGameDocument, CouchMoveDocument, game_doc_id, move_doc_id},
};
use crate::{
    clock::now_ms,
    dao::{
        listeners::{ListenerSet, SubscriptionId},
        lock,
        serializer::{deserialize, serialize},
        state_store::{StateChange, StateListener, StateStore, VersionCounter},
        storage::{StorageError, StorageResult},
    },
    state::game::{MoveRecord, SyncableGameState, Vote},
};

#[derive(Default)]
struct CouchStateInner {
    session: Mutex<Option<String>>,
    versions: VersionCounter,
    listeners: ListenerSet<StateChange>,
    feed: Mutex<Option<JoinHandle<()>>>,
}

impl CouchStateInner {
    fn on_change(&self, row: ChangeRow) {
        if row.deleted {
            debug!(doc_id = %row.id, "shared game document deleted");
            self.listeners.dispatch(&StateChange::Removed);
            return;
        }
        let Some(doc) = row.doc else {
            return;
        };
        match from_value::<CouchGameDocument>(doc) {
            Ok(doc) => {
                self.versions.observe(doc.game.version);
                self.listeners
                    .dispatch(&StateChange::Updated(deserialize(doc.game)));
            }
            Err(err) => warn!(doc_id = %row.id, error = %err, "skipping undecodable game change"),
        }
    }
}

/// Shared game document stored in CouchDB, followed through the `_changes` feed.
#[derive(Clone)]
pub struct CouchStateStore {
    client: CouchClient,
    retry: Duration,
    inner: Arc<CouchStateInner>,
}

impl CouchStateStore {
    pub fn new(client: CouchClient, retry: Duration) -> Self {
        Self {
            client,
            retry,
            inner: Arc::new(CouchStateInner::default()),
        }
    }

    fn session(&self) -> StorageResult<String> {
        lock(&self.inner.session)
            .clone()
            .ok_or(StorageError::NotInitialized)
    }

    fn ensure_feed(&self, session_id: &str) {
        let mut feed = lock(&self.inner.feed);
        if feed.is_some() {
            return;
        }
        let inner = Arc::downgrade(&self.inner);
        *feed = Some(spawn_feed(
            self.client.clone(),
            vec![game_doc_id(session_id)],
            FeedStart::Now,
            self.retry,
            move |row| {
                if let Some(inner) = inner.upgrade() {
                    inner.on_change(row);
                }
            },
        ));
    }
}

impl StateStore for CouchStateStore {
    fn initialize(&self, session_id: Option<String>) -> BoxFuture<'static, StorageResult<String>> {
        let store = self.clone();
        Box::pin(async move {
            let session_id = match session_id {
                Some(id) => {
                    let stub = store
                        .client
                        .get_document::<RevisionStub>(&game_doc_id(&id))
                        .await?
                        .ok_or_else(|| StorageError::not_found(format!("session `{id}`")))?;
                    if let Some(version) = stub.version {
                        store.inner.versions.observe(version);
                    }
                    id
                }
                // The document itself appears with the creator's first push.
                None => Uuid::new_v4().simple().to_string(),
            };
            *lock(&store.inner.session) = Some(session_id.clone());
            Ok(session_id)
        })
    }

    fn push_state(&self, state: SyncableGameState) -> BoxFuture<'static, StorageResult<u64>> {
        let store = self.clone();
        Box::pin(async move {
            let session_id = store.session()?;
            let doc_id = game_doc_id(&session_id);
            let base = state.version;
            let mut state = state;

            // Votes land through the update handler between our read and write; re-reading the
            // stored document on every attempt keeps them.
            for attempt in 1..=WRITE_ATTEMPTS {
                let current = store
                    .client
                    .get_document::<CouchGameDocument>(&doc_id)
                    .await?;
                let rev = match current {
                    Some(current) => {
                        store.inner.versions.observe(current.game.version);
                        let carried = state.carry_votes_from(&deserialize(current.game));
                        if carried > 0 {
                            debug!(attempt, carried, "kept votes written since the last pull");
                        }
                        current.rev
                    }
                    None => None,
                };
                state.version = store.inner.versions.next(base);
                state.updated_at = now_ms();

                let doc = CouchGameDocument::from((session_id.clone(), serialize(&state), rev));
                match store.client.put_document(&doc_id, &doc).await {
                    Ok(()) => {
                        debug!(version = state.version, "pushed shared state");
                        return Ok(state.version);
                    }
                    Err(CouchDaoError::Conflict { .. }) => {
                        debug!(attempt, "shared state changed underneath push; retrying");
                    }
                    Err(err) => return Err(err.into()),
                }
            }

            Err(CouchDaoError::Conflict {
                doc_id,
                attempts: WRITE_ATTEMPTS,
            }
            .into())
        })
    }

    fn pull_state(&self) -> BoxFuture<'static, StorageResult<Option<SyncableGameState>>> {
        let store = self.clone();
        Box::pin(async move {
            let session_id = store.session()?;
            let doc = store
                .client
                .get_document::<CouchGameDocument>(&game_doc_id(&session_id))
                .await?;
            Ok(doc.map(|doc| {
                store.inner.versions.observe(doc.game.version);
                deserialize(doc.game)
            }))
        })
    }

    fn push_move(&self, record: MoveRecord) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let session_id = store.session()?;
            let doc_id = move_doc_id(&session_id, &Uuid::new_v4().simple().to_string());
            let doc = CouchMoveDocument {
                id: doc_id.clone(),
                session_id,
                record,
            };
            store
                .client
                .put_document(&doc_id, &doc)
                .await
                .map_err(Into::into)
        })
    }

    fn update_vote(&self, player_id: String, vote: Vote) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let session_id = store.session()?;
            let body = json!({ "playerId": player_id, "vote": vote, "at": now_ms() });
            let reply = store
                .client
                .call_update("vote", &game_doc_id(&session_id), &body)
                .await?;
            if let Some(version) = reply.version {
                store.inner.versions.observe(version);
            }
            Ok(())
        })
    }

    fn subscribe(&self, listener: StateListener) -> StorageResult<SubscriptionId> {
        let session_id = self.session()?;
        let id = self.inner.listeners.add(listener);
        self.ensure_feed(&session_id);
        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.inner.listeners.remove(&id);
    }

    fn cleanup(&self) {
        if let Some(feed) = lock(&self.inner.feed).take() {
            feed.abort();
        }
        self.inner.listeners.clear();
    }
}
