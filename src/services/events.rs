use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::state::{
    consensus::VoteTally,
    game::{GameOverResult, MoveRecord, NoMovesClaim},
    settings::Settings,
};

/// Observable effect of the sync core, fanned out to UIs, logs and tests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// A remote snapshot was applied.
    StateApplied { version: u64 },
    MoveAdded(MoveRecord),
    /// The move history shrank: a new round started.
    GameReset,
    SettingsChanged(Settings),
    GameOver(Box<GameOverResult>),
    GameOverCleared,
    ClaimOpened(NoMovesClaim),
    VotesUpdated(VoteTally),
    ClaimClosed,
    PlayerWaiting {
        player_id: String,
        name: Option<String>,
    },
    PlayerReturned {
        player_id: String,
        name: Option<String>,
    },
    /// The player is no longer in the room; the cached name is kept for the message.
    PlayerLeft {
        player_id: String,
        name: Option<String>,
    },
    /// The host removed the local player.
    Removed,
    RoomGone,
}

/// Broadcast hub for [`SyncEvent`]s.
pub struct EventHub {
    sender: broadcast::Sender<SyncEvent>,
}

impl EventHub {
    /// Construct a new hub backed by a Tokio broadcast channel with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Register a new subscriber that will receive subsequent events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    /// Subscribe as a stream; lagging receivers see a `Lagged` error item.
    pub fn stream(&self) -> BroadcastStream<SyncEvent> {
        BroadcastStream::new(self.sender.subscribe())
    }

    /// Send an event to all current subscribers, ignoring delivery errors.
    pub fn broadcast(&self, event: SyncEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(64)
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;

    use super::*;

    #[tokio::test]
    async fn stream_receives_events_sent_after_subscribing() {
        let hub = EventHub::new(4);
        hub.broadcast(SyncEvent::GameReset);
        let mut stream = hub.stream();
        hub.broadcast(SyncEvent::RoomGone);

        let next = stream.next().await.unwrap().unwrap();
        assert_eq!(next, SyncEvent::RoomGone);
    }
}
