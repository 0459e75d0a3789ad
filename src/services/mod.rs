/// Interfaces of the board, modal, speech, navigation and timer collaborators.
pub mod collaborators;
/// Local game events routed to shared-state writes.
pub mod event_manager;
/// Broadcast hub for observable sync effects.
pub mod events;
/// Collaborators for running without a UI.
pub mod headless;
/// Votes, cash-out requests and host-only resolution writes.
pub mod match_controller;
/// Realtime and heartbeat connectivity detection.
pub mod presence_manager;
/// Applies remote snapshots to the local view.
pub mod reconciler;
/// Session setup and teardown.
pub mod session;
/// Storage connection backoff and health polling.
pub mod supervisor;
/// Reference-counted turn timer pauses.
pub mod timer_gate;

#[cfg(test)]
pub(crate) mod test_support;
