use std::sync::{Mutex, MutexGuard, PoisonError};

/// CouchDB implementations of the store traits.
#[cfg(feature = "couch-store")]
pub mod couchdb;
/// Listener registry shared by stores and channels.
pub mod listeners;
/// Realtime presence channel abstraction.
pub mod presence_channel;
/// Authoritative room record storage.
pub mod room_store;
/// Store-safe encoding of the shared game document.
pub mod serializer;
/// Shared game document storage.
pub mod state_store;
/// Storage abstraction layer for database operations.
pub mod storage;

/// Lock a std mutex, recovering the data if a panicking listener poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
