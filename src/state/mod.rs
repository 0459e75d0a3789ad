//! Domain model of a match and the pure decision logic applied to it.

/// Majority voting and single-actor request resolution.
pub mod consensus;
/// Shared match document and its parts.
pub mod game;
/// Connectivity bookkeeping for the presence manager.
pub mod presence;
/// Match settings and partial overrides.
pub mod settings;
