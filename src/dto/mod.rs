//! Store-safe wire shapes shared by every backend.

/// Shared game document as persisted by the state store.
pub mod document;
/// Realtime presence channel entries.
pub mod presence;
/// Authoritative room record mutated by the presence manager.
pub mod room;
