//! In-process state store: every client handle shares one [`LocalDocumentHub`].
//!
//! Notifications are delivered synchronously from inside the writing call.

use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use futures::future::BoxFuture;
use tracing::debug;
use uuid::Uuid;

use super::{StateChange, StateListener, StateStore, VersionCounter};
use crate::{
    clock::now_ms,
    dao::{
        listeners::{ListenerSet, SubscriptionId},
        lock,
        serializer::{deserialize, serialize},
        storage::{StorageError, StorageResult},
    },
    dto::document::GameDocument,
    state::game::{MoveRecord, SyncableGameState, Vote},
};

/// One shared document living in process memory.
#[derive(Default)]
struct LocalDocument {
    snapshot: Mutex<Option<GameDocument>>,
    moves: Mutex<Vec<MoveRecord>>,
    listeners: ListenerSet<StateChange>,
}

impl LocalDocument {
    fn notify(&self, document: GameDocument) {
        self.listeners
            .dispatch(&StateChange::Updated(deserialize(document)));
    }
}

/// Process-wide registry of shared documents, standing in for the remote store.
#[derive(Clone, Default)]
pub struct LocalDocumentHub {
    documents: Arc<DashMap<String, Arc<LocalDocument>>>,
}

impl LocalDocumentHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a fresh client handle on this hub.
    pub fn store(&self) -> LocalStateStore {
        LocalStateStore {
            hub: self.clone(),
            inner: Arc::new(LocalInner::default()),
        }
    }

    /// Delete a document and tell its subscribers the room is gone.
    pub fn remove(&self, session_id: &str) -> bool {
        match self.documents.remove(session_id) {
            Some((_, document)) => {
                document.listeners.dispatch(&StateChange::Removed);
                true
            }
            None => false,
        }
    }

    /// Auxiliary move log of a document.
    pub fn moves(&self, session_id: &str) -> Vec<MoveRecord> {
        self.documents
            .get(session_id)
            .map(|document| lock(&document.moves).clone())
            .unwrap_or_default()
    }

    fn get(&self, session_id: &str) -> Option<Arc<LocalDocument>> {
        self.documents
            .get(session_id)
            .map(|entry| entry.value().clone())
    }

    fn create(&self) -> String {
        let session_id = Uuid::new_v4().simple().to_string();
        self.documents
            .insert(session_id.clone(), Arc::new(LocalDocument::default()));
        session_id
    }
}

#[derive(Default)]
struct LocalInner {
    session: Mutex<Option<(String, Arc<LocalDocument>)>>,
    versions: VersionCounter,
    subscriptions: Mutex<Vec<SubscriptionId>>,
}

/// One client's handle on a [`LocalDocumentHub`] document.
#[derive(Clone)]
pub struct LocalStateStore {
    hub: LocalDocumentHub,
    inner: Arc<LocalInner>,
}

impl LocalStateStore {
    fn document(&self) -> StorageResult<Arc<LocalDocument>> {
        lock(&self.inner.session)
            .as_ref()
            .map(|(_, document)| document.clone())
            .ok_or(StorageError::NotInitialized)
    }
}

impl StateStore for LocalStateStore {
    fn initialize(&self, session_id: Option<String>) -> BoxFuture<'static, StorageResult<String>> {
        let store = self.clone();
        Box::pin(async move {
            let session_id = match session_id {
                Some(id) => id,
                None => store.hub.create(),
            };
            let document = store
                .hub
                .get(&session_id)
                .ok_or_else(|| StorageError::not_found(format!("session `{session_id}`")))?;
            if let Some(existing) = lock(&document.snapshot).as_ref() {
                store.inner.versions.observe(existing.version);
            }
            *lock(&store.inner.session) = Some((session_id.clone(), document));
            Ok(session_id)
        })
    }

    fn push_state(&self, state: SyncableGameState) -> BoxFuture<'static, StorageResult<u64>> {
        let store = self.clone();
        Box::pin(async move {
            let document = store.document()?;
            let mut state = state;
            let stored = {
                let mut snapshot = lock(&document.snapshot);
                if let Some(current) = snapshot.clone() {
                    state.carry_votes_from(&deserialize(current));
                }
                state.version = store.inner.versions.next(state.version);
                state.updated_at = now_ms();
                let stored = serialize(&state);
                *snapshot = Some(stored.clone());
                stored
            };
            debug!(version = state.version, "pushed local state");
            document.notify(stored);
            Ok(state.version)
        })
    }

    fn pull_state(&self) -> BoxFuture<'static, StorageResult<Option<SyncableGameState>>> {
        let store = self.clone();
        Box::pin(async move {
            let document = store.document()?;
            let snapshot = lock(&document.snapshot).clone();
            Ok(snapshot.map(|stored| {
                store.inner.versions.observe(stored.version);
                deserialize(stored)
            }))
        })
    }

    fn push_move(&self, record: MoveRecord) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let document = store.document()?;
            lock(&document.moves).push(record);
            Ok(())
        })
    }

    fn update_vote(&self, player_id: String, vote: Vote) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let document = store.document()?;
            let updated = {
                let mut guard = lock(&document.snapshot);
                let stored = guard
                    .as_mut()
                    .ok_or_else(|| StorageError::not_found("shared game state"))?;
                stored.no_moves_votes.insert(player_id, vote);
                stored.version += 1;
                stored.updated_at = now_ms();
                stored.clone()
            };
            store.inner.versions.observe(updated.version);
            document.notify(updated);
            Ok(())
        })
    }

    fn subscribe(&self, listener: StateListener) -> StorageResult<SubscriptionId> {
        let document = self.document()?;
        let inner = self.inner.clone();
        // Keep the push counter in step with everything this handle sees.
        let tracked: StateListener = Arc::new(move |change: &StateChange| {
            if let StateChange::Updated(state) = change {
                inner.versions.observe(state.version);
            }
            listener(change);
        });
        let id = document.listeners.add(tracked);
        lock(&self.inner.subscriptions).push(id);
        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        if let Ok(document) = self.document() {
            document.listeners.remove(&id);
        }
        lock(&self.inner.subscriptions).retain(|existing| *existing != id);
    }

    fn cleanup(&self) {
        let ids = std::mem::take(&mut *lock(&self.inner.subscriptions));
        if let Ok(document) = self.document() {
            for id in ids {
                document.listeners.remove(&id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::state::game::{NoMovesClaim, Player, Vote};

    fn state_with_players() -> SyncableGameState {
        let mut state = SyncableGameState::default();
        state.player_state.players = vec![
            Player {
                id: "a".into(),
                name: "A".into(),
            },
            Player {
                id: "b".into(),
                name: "B".into(),
            },
        ];
        state.board_state.board = vec![vec![0, 1], vec![2, 3]];
        state
    }

    #[tokio::test]
    async fn join_unknown_session_fails() {
        let hub = LocalDocumentHub::new();
        let err = hub
            .store()
            .initialize(Some("missing".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound { .. }));
    }

    #[tokio::test]
    async fn push_bumps_version_and_notifies_peers_synchronously() {
        let hub = LocalDocumentHub::new();
        let host = hub.store();
        let guest = hub.store();
        let session = host.initialize(None).await.unwrap();
        guest.initialize(Some(session)).await.unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        guest
            .subscribe(Arc::new(move |change: &StateChange| {
                if let StateChange::Updated(state) = change {
                    lock(&sink).push(state.clone());
                }
            }))
            .unwrap();

        let mut state = state_with_players();
        state.version = 41;
        let version = host.push_state(state.clone()).await.unwrap();
        assert_eq!(version, 42);

        let seen = lock(&seen).clone();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].version, 42);
        assert_eq!(seen[0].board_state.board, state.board_state.board);

        let pulled = guest.pull_state().await.unwrap().unwrap();
        assert_eq!(pulled.version, 42);
        assert!(pulled.updated_at > 0);
    }

    #[tokio::test]
    async fn push_from_an_older_pull_keeps_newer_votes() {
        let hub = LocalDocumentHub::new();
        let host = hub.store();
        let guest = hub.store();
        let session = host.initialize(None).await.unwrap();
        guest.initialize(Some(session)).await.unwrap();

        let mut state = state_with_players();
        state.no_moves_claim = Some(NoMovesClaim {
            player_id: "a".into(),
            score_preview: 3,
            timestamp: 10,
            board_size: 2,
        });
        host.push_state(state).await.unwrap();
        let stale = host.pull_state().await.unwrap().unwrap();

        guest.update_vote("b".into(), Vote::Finish).await.unwrap();
        let mut outgoing = stale;
        outgoing.score_state.total_moves += 1;
        host.push_state(outgoing).await.unwrap();

        let pulled = guest.pull_state().await.unwrap().unwrap();
        assert_eq!(pulled.no_moves_votes.get("b"), Some(&Vote::Finish));
        assert_eq!(pulled.score_state.total_moves, 1);
    }

    #[tokio::test]
    async fn pull_before_first_push_is_empty() {
        let hub = LocalDocumentHub::new();
        let store = hub.store();
        store.initialize(None).await.unwrap();
        assert!(store.pull_state().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn concurrent_votes_are_all_kept() {
        let hub = LocalDocumentHub::new();
        let a = hub.store();
        let b = hub.store();
        let session = a.initialize(None).await.unwrap();
        b.initialize(Some(session)).await.unwrap();
        a.push_state(state_with_players()).await.unwrap();

        let (first, second) = tokio::join!(
            a.update_vote("a".into(), Vote::Finish),
            b.update_vote("b".into(), Vote::Continue)
        );
        first.unwrap();
        second.unwrap();

        let state = a.pull_state().await.unwrap().unwrap();
        assert_eq!(state.no_moves_votes.len(), 2);
        assert_eq!(state.version, 3);

        // The next bulk push must not reuse a version produced by a vote write.
        let pushed = b.push_state(state).await.unwrap();
        assert_eq!(pushed, 4);
    }

    #[tokio::test]
    async fn cleanup_is_idempotent_and_detaches() {
        let hub = LocalDocumentHub::new();
        let store = hub.store();
        store.initialize(None).await.unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        store
            .subscribe(Arc::new(move |_: &StateChange| {
                counter.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();

        store.push_state(state_with_players()).await.unwrap();
        store.cleanup();
        store.cleanup();
        store.push_state(state_with_players()).await.unwrap();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn removing_document_reports_room_gone() {
        let hub = LocalDocumentHub::new();
        let store = hub.store();
        let session = store.initialize(None).await.unwrap();
        let removed = Arc::new(AtomicUsize::new(0));
        let counter = removed.clone();
        store
            .subscribe(Arc::new(move |change: &StateChange| {
                if matches!(change, StateChange::Removed) {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            }))
            .unwrap();

        assert!(hub.remove(&session));
        assert_eq!(removed.load(Ordering::SeqCst), 1);
        assert!(hub.store().initialize(Some(session)).await.is_err());
    }

    #[tokio::test]
    async fn moves_land_in_auxiliary_log() {
        use crate::state::game::{Direction, Position};

        let hub = LocalDocumentHub::new();
        let store = hub.store();
        let session = store.initialize(None).await.unwrap();
        store
            .push_move(MoveRecord {
                player_id: "a".into(),
                from: Position::new(0, 0),
                to: Position::new(0, 1),
                direction: Direction::Right,
                distance: 1,
                timestamp: 1,
            })
            .await
            .unwrap();
        assert_eq!(hub.moves(&session).len(), 1);
    }
}
