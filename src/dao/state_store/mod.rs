mod local;

pub use local::{LocalDocumentHub, LocalStateStore};

use futures::future::BoxFuture;

use crate::{
    dao::{
        listeners::{Listener, SubscriptionId},
        storage::StorageResult,
    },
    state::game::{MoveRecord, SyncableGameState, Vote},
};

/// Notification delivered to state-store subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateChange {
    /// A new snapshot was written (already deserialized).
    Updated(SyncableGameState),
    /// The shared document was deleted; the room is gone.
    Removed,
}

/// Callback invoked for every [`StateChange`].
pub type StateListener = Listener<StateChange>;

/// Shared-document primitive every client synchronizes through.
///
/// Bulk state is always replaced wholesale with a newer version; the vote write is the only
/// field-level mutation. Subscribers must discard snapshots whose version is not newer than
/// the last one they applied.
pub trait StateStore: Send + Sync {
    /// Join the document `session_id`, or create a new one when `None`. Returns the session id.
    ///
    /// Fails with `NotFound` when an explicit id does not resolve.
    fn initialize(&self, session_id: Option<String>) -> BoxFuture<'static, StorageResult<String>>;
    /// Stamp the next version and `updatedAt`, then write the full snapshot. Returns the version.
    fn push_state(&self, state: SyncableGameState) -> BoxFuture<'static, StorageResult<u64>>;
    /// Read the current snapshot, if any.
    fn pull_state(&self) -> BoxFuture<'static, StorageResult<Option<SyncableGameState>>>;
    /// Append an auxiliary move record; not needed for correctness.
    fn push_move(&self, record: MoveRecord) -> BoxFuture<'static, StorageResult<()>>;
    /// Atomically set one player's vote without touching the others.
    fn update_vote(&self, player_id: String, vote: Vote) -> BoxFuture<'static, StorageResult<()>>;
    /// Register a listener for remote changes.
    fn subscribe(&self, listener: StateListener) -> StorageResult<SubscriptionId>;
    /// Detach one listener.
    fn unsubscribe(&self, id: SubscriptionId);
    /// Detach every listener registered through this handle and stop any feed. Idempotent.
    fn cleanup(&self);
}

/// Version counter shared by the store implementations.
///
/// Tracks the highest version observed so a push never reuses a version a peer already wrote.
#[derive(Debug, Default)]
pub(crate) struct VersionCounter {
    highest: std::sync::atomic::AtomicU64,
}

impl VersionCounter {
    /// Remember a version seen on the wire.
    pub(crate) fn observe(&self, version: u64) {
        self.highest
            .fetch_max(version, std::sync::atomic::Ordering::SeqCst);
    }

    /// Reserve the version for a push whose input carries `base`.
    pub(crate) fn next(&self, base: u64) -> u64 {
        use std::sync::atomic::Ordering;

        let mut current = self.highest.load(Ordering::SeqCst);
        loop {
            let next = current.max(base) + 1;
            match self
                .highest
                .compare_exchange(current, next, Ordering::SeqCst, Ordering::SeqCst)
            {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }
}
