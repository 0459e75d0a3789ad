//! One client's match session: store strategy, reconciler, consensus, presence and teardown.

use std::sync::{
    Arc, Weak,
    atomic::{AtomicBool, Ordering},
};

use tokio::{runtime::Handle, time::sleep};
use tracing::{debug, info, warn};

#[cfg(feature = "couch-store")]
use crate::dao::couchdb::{CouchClient, CouchPresenceChannel, CouchRoomStore, CouchStateStore};
use crate::{
    clock::now_ms,
    config::SyncConfig,
    dao::{
        listeners::SubscriptionId,
        presence_channel::{LocalPresenceHub, PresenceChannel},
        room_store::{LocalRoomStore, RoomStore},
        state_store::{LocalDocumentHub, StateChange, StateListener, StateStore},
        storage::StorageError,
    },
    dto::room::RoomRecord,
    error::SyncError,
    services::{
        collaborators::{BoardOps, Collaborators, Route},
        event_manager::EventManager,
        events::EventHub,
        match_controller::MatchController,
        presence_manager::PresenceManager,
        reconciler::{ApplyOutcome, Reconciler},
        timer_gate::TimerGate,
    },
    state::{
        game::{Player, PlayerState, SyncableGameState},
        settings::{Settings, SettingsPatch},
    },
};

/// Who this client is within its room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    pub room_id: String,
    pub player_id: String,
    pub player_name: String,
    /// Static role fixed at room creation; only the host writes resolutions and monitor decisions.
    pub is_host: bool,
}

/// Store strategy selected at session setup.
#[derive(Clone)]
pub struct Backends {
    pub state: Arc<dyn StateStore>,
    pub rooms: Arc<dyn RoomStore>,
    pub presence: Arc<dyn PresenceChannel>,
    /// Whether the presence backend flips entries offline by itself when a client drops.
    pub realtime_drops: bool,
}

impl Backends {
    /// CouchDB-backed stores for clients on different machines.
    #[cfg(feature = "couch-store")]
    pub fn couch(client: CouchClient, config: &SyncConfig) -> Self {
        Self {
            state: Arc::new(CouchStateStore::new(client.clone(), config.feed_retry)),
            rooms: Arc::new(CouchRoomStore::new(client.clone())),
            presence: Arc::new(CouchPresenceChannel::new(client, config.feed_retry)),
            realtime_drops: false,
        }
    }
}

/// In-process stores shared by every client of one process.
#[derive(Clone, Default)]
pub struct LocalBackends {
    pub documents: LocalDocumentHub,
    pub rooms: LocalRoomStore,
    pub presence: LocalPresenceHub,
}

impl LocalBackends {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fresh handles for one client.
    pub fn client(&self) -> Backends {
        Backends {
            state: Arc::new(self.documents.store()),
            rooms: Arc::new(self.rooms.clone()),
            presence: Arc::new(self.presence.channel()),
            realtime_drops: true,
        }
    }
}

/// A running match for one client. Call [`MatchSession::shutdown`] when done.
pub struct MatchSession {
    identity: SessionIdentity,
    session_id: String,
    store: Arc<dyn StateStore>,
    subscription: SubscriptionId,
    reconciler: Arc<Reconciler>,
    controller: Arc<MatchController>,
    event_manager: EventManager,
    presence: Arc<PresenceManager>,
    events: Arc<EventHub>,
    gate: Arc<TimerGate>,
    shut_down: AtomicBool,
}

impl MatchSession {
    /// Open (host) or join (guest) the room's shared document and start every service.
    pub async fn start(
        identity: SessionIdentity,
        config: &SyncConfig,
        backends: Backends,
        collaborators: Collaborators,
        settings: Settings,
    ) -> Result<Self, SyncError> {
        let events = Arc::new(EventHub::default());
        let gate = Arc::new(TimerGate::new(collaborators.timer.clone()));
        let store = backends.state.clone();

        let session_id = if identity.is_host {
            open_as_host(&identity, &backends, collaborators.board.as_ref(), &settings).await?
        } else {
            join_as_guest(&identity, config, &backends).await?
        };

        let reconciler = Arc::new(Reconciler::new(
            identity.player_id.clone(),
            settings,
            collaborators.clone(),
            gate.clone(),
            events.clone(),
        ));
        let controller = Arc::new(MatchController::new(
            identity.player_id.clone(),
            identity.is_host,
            store.clone(),
            collaborators.board.clone(),
            events.clone(),
        ));
        let event_manager = EventManager::new(
            identity.player_id.clone(),
            store.clone(),
            collaborators.board.clone(),
            reconciler.clone(),
            gate.clone(),
        );
        let presence = Arc::new(
            PresenceManager::start(
                &identity,
                config.presence,
                &backends,
                &collaborators,
                gate.clone(),
                events.clone(),
            )
            .await?,
        );

        let listener = state_listener(
            reconciler.clone(),
            Arc::downgrade(&controller),
            Arc::downgrade(&presence),
        );
        let subscription = match store.subscribe(listener) {
            Ok(id) => id,
            Err(err) => {
                presence.stop();
                return Err(err.into());
            }
        };

        let session = Self {
            identity,
            session_id,
            store,
            subscription,
            reconciler,
            controller,
            event_manager,
            presence,
            events,
            gate,
            shut_down: AtomicBool::new(false),
        };

        match session.store.pull_state().await {
            Ok(Some(state)) => {
                if let ApplyOutcome::Applied { .. } = session.reconciler.apply(state.clone())
                    && let Err(err) = session.controller.check_consensus(&state).await
                {
                    warn!(error = %err, "initial consensus check failed");
                }
            }
            Ok(None) => debug!("no snapshot yet; waiting for the first push"),
            Err(err) => warn!(error = %err, "initial pull failed; waiting for notifications"),
        }

        collaborators.navigator.go_to(Route::Game {
            room_id: session.identity.room_id.clone(),
        });
        info!(
            room_id = %session.identity.room_id,
            player_id = %session.identity.player_id,
            session_id = %session.session_id,
            is_host = session.identity.is_host,
            "match session started"
        );
        Ok(session)
    }

    pub fn identity(&self) -> &SessionIdentity {
        &self.identity
    }

    /// Id of the shared game document.
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn reconciler(&self) -> &Arc<Reconciler> {
        &self.reconciler
    }

    pub fn controller(&self) -> &Arc<MatchController> {
        &self.controller
    }

    pub fn event_manager(&self) -> &EventManager {
        &self.event_manager
    }

    pub fn presence(&self) -> &PresenceManager {
        &self.presence
    }

    pub fn events(&self) -> &Arc<EventHub> {
        &self.events
    }

    /// Announce leaving on the realtime channel, then tear down.
    pub async fn leave(&self) {
        self.presence.leave().await;
        self.shutdown();
    }

    /// Stop presence, detach from the store and stop the turn timer. Idempotent.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.presence.stop();
        self.store.unsubscribe(self.subscription);
        self.store.cleanup();
        self.gate.stop();
        info!(room_id = %self.identity.room_id, "match session shut down");
    }
}

/// Apply every remote snapshot, then re-check consensus on anything that was not stale.
fn state_listener(
    reconciler: Arc<Reconciler>,
    controller: Weak<MatchController>,
    presence: Weak<PresenceManager>,
) -> StateListener {
    let runtime = Handle::current();
    Arc::new(move |change: &StateChange| match change {
        StateChange::Updated(state) => {
            if reconciler.apply(state.clone()) == ApplyOutcome::Stale {
                return;
            }
            let Some(controller) = controller.upgrade() else {
                return;
            };
            let state = state.clone();
            runtime.spawn(async move {
                if let Err(err) = controller.check_consensus(&state).await {
                    warn!(error = %err, version = state.version, "consensus check failed");
                }
            });
        }
        StateChange::Removed => {
            if let Some(presence) = presence.upgrade() {
                presence.handle_room_gone();
            }
        }
    })
}

async fn open_as_host(
    identity: &SessionIdentity,
    backends: &Backends,
    board: &dyn BoardOps,
    settings: &Settings,
) -> Result<String, SyncError> {
    let room = backends.rooms.fetch_room(identity.room_id.clone()).await?;

    if let Some(existing) = room.session_id.clone() {
        let session_id = backends.state.initialize(Some(existing)).await?;
        if backends.state.pull_state().await?.is_none() {
            backends
                .state
                .push_state(initial_state(&room, board, settings))
                .await?;
        }
        info!(session_id = %session_id, "host rejoined existing match");
        return Ok(session_id);
    }

    let session_id = backends.state.initialize(None).await?;
    backends
        .state
        .push_state(initial_state(&room, board, settings))
        .await?;
    backends
        .rooms
        .attach_session(identity.room_id.clone(), session_id.clone(), now_ms())
        .await?;
    info!(session_id = %session_id, "host opened match");
    Ok(session_id)
}

/// Wait for the host to attach a shared document, then join it.
async fn join_as_guest(
    identity: &SessionIdentity,
    config: &SyncConfig,
    backends: &Backends,
) -> Result<String, SyncError> {
    for attempt in 1..=config.join_attempts {
        let room = backends.rooms.fetch_room(identity.room_id.clone()).await?;
        if let Some(session_id) = room.session_id {
            match backends.state.initialize(Some(session_id)).await {
                Ok(session_id) => return Ok(session_id),
                Err(StorageError::NotFound { .. }) => {}
                Err(err) => return Err(err.into()),
            }
        }
        debug!(attempt, room_id = %identity.room_id, "match not open yet; retrying");
        sleep(config.join_retry).await;
    }
    Err(SyncError::SessionNotFound(format!(
        "room `{}` has no open match",
        identity.room_id
    )))
}

fn initial_state(room: &RoomRecord, board: &dyn BoardOps, settings: &Settings) -> SyncableGameState {
    SyncableGameState {
        board_state: board.reset_board(settings),
        player_state: PlayerState {
            players: room
                .players
                .iter()
                .map(|player| Player {
                    id: player.id.clone(),
                    name: player.name.clone(),
                })
                .collect(),
            current_player_index: 0,
        },
        settings: Some(SettingsPatch::from(settings)),
        ..SyncableGameState::default()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        dto::room::RoomPlayer,
        services::{
            collaborators::ModalKind,
            event_manager::LocalGameEvent,
            events::SyncEvent,
            test_support::{Recorders, eventually, recorders},
        },
        state::{
            game::{Direction, GameOverReason, MoveRecord, Position, Vote},
            presence::PresenceTimings,
        },
    };

    const ROOM: &str = "table-7";

    fn config() -> SyncConfig {
        SyncConfig {
            presence: PresenceTimings {
                heartbeat_interval: Duration::from_secs(3_600),
                monitor_tick: Duration::from_secs(3_600),
                ..PresenceTimings::default()
            },
            join_attempts: 3,
            join_retry: Duration::from_millis(5),
            ..SyncConfig::default()
        }
    }

    async fn seed_room(local: &LocalBackends, ids: &[&str]) {
        let now = now_ms();
        local
            .rooms
            .create_room(RoomRecord {
                room_id: ROOM.into(),
                host_id: ids[0].into(),
                players: ids
                    .iter()
                    .map(|id| RoomPlayer::new(*id, id.to_uppercase(), now))
                    .collect(),
                session_id: None,
                started_at: Some(now - 10_000),
                created_at: now - 10_000,
            })
            .await
            .unwrap();
    }

    async fn join(local: &LocalBackends, id: &str, is_host: bool) -> (MatchSession, Recorders) {
        let rec = recorders();
        let identity = SessionIdentity {
            room_id: ROOM.into(),
            player_id: id.into(),
            player_name: id.to_uppercase(),
            is_host,
        };
        let session = MatchSession::start(
            identity,
            &config(),
            local.client(),
            rec.collaborators.clone(),
            Settings::default(),
        )
        .await
        .unwrap();
        (session, rec)
    }

    async fn table(ids: &[&str]) -> (LocalBackends, Vec<(MatchSession, Recorders)>) {
        let local = LocalBackends::new();
        seed_room(&local, ids).await;
        let mut clients = Vec::new();
        for (index, id) in ids.iter().enumerate() {
            clients.push(join(&local, id, index == 0).await);
        }
        (local, clients)
    }

    #[tokio::test]
    async fn guests_join_the_hosts_document() {
        let (local, clients) = table(&["h", "g"]).await;
        let room = local.rooms.fetch_room(ROOM.into()).await.unwrap();
        assert_eq!(room.session_id.as_deref(), Some(clients[0].0.session_id()));
        assert_eq!(clients[1].0.session_id(), clients[0].0.session_id());

        let guest_view = clients[1].0.reconciler().snapshot().unwrap();
        assert_eq!(guest_view.player_state.player_count(), 2);
        assert_eq!(clients[1].1.navigator.routes(), vec![Route::Game {
            room_id: ROOM.into()
        }]);
    }

    #[tokio::test]
    async fn host_move_is_announced_to_the_guest_only() {
        let (_local, clients) = table(&["h", "g"]).await;
        let (host, host_rec) = &clients[0];
        let (guest, guest_rec) = &clients[1];

        let from = host.reconciler().snapshot().unwrap().board_state.piece_position;
        let record = MoveRecord {
            player_id: "h".into(),
            from,
            to: Position::new(from.row + 1, from.col),
            direction: Direction::Down,
            distance: 1,
            timestamp: now_ms(),
        };
        host.event_manager()
            .handle(LocalGameEvent::MovePlayed(record.clone()))
            .await
            .unwrap();

        let speech = guest_rec.speech.clone();
        eventually(|| speech.spoken() == vec![record.clone()]).await;
        assert!(host_rec.speech.spoken().is_empty());
        assert_eq!(
            guest.reconciler().snapshot().unwrap().player_state.current_player_index,
            1
        );
    }

    #[tokio::test]
    async fn two_of_three_finish_votes_end_the_match_everywhere() {
        let (_local, clients) = table(&["h", "g", "c"]).await;
        clients[0]
            .0
            .event_manager()
            .handle(LocalGameEvent::NoLegalMovesClaimed { score_preview: 11 })
            .await
            .unwrap();
        for (_, rec) in &clients {
            assert!(rec.modals.is_open(ModalKind::NoMovesVote));
        }

        clients[1].0.controller().handle_vote(Vote::Finish).await.unwrap();
        clients[2].0.controller().handle_vote(Vote::Finish).await.unwrap();

        for (session, rec) in &clients {
            let modals = rec.modals.clone();
            eventually(|| modals.is_open(ModalKind::GameOver)).await;
            assert!(!rec.modals.is_open(ModalKind::NoMovesVote));
            let state = session.reconciler().snapshot().unwrap();
            let result = state.game_over.unwrap();
            assert_eq!(result.reason, GameOverReason::Bonus);
            assert_eq!(result.initiator.as_deref(), Some("h"));
            assert!(state.no_moves_votes.is_empty());
        }
    }

    #[tokio::test]
    async fn dropped_guest_pauses_the_hosts_timer() {
        let (local, clients) = table(&["h", "g"]).await;
        local.presence.drop_connection(ROOM, "g");

        let (host, host_rec) = &clients[0];
        assert!(host_rec.modals.is_open(ModalKind::Reconnecting));
        assert!(host_rec.timer.is_paused());
        assert_eq!(host.presence().waiting_players(), vec!["g".to_string()]);
    }

    #[tokio::test]
    async fn guest_gives_up_when_no_match_is_opened() {
        let local = LocalBackends::new();
        seed_room(&local, &["h", "g"]).await;
        let rec = recorders();
        let identity = SessionIdentity {
            room_id: ROOM.into(),
            player_id: "g".into(),
            player_name: "G".into(),
            is_host: false,
        };
        let err = MatchSession::start(
            identity,
            &config(),
            local.client(),
            rec.collaborators,
            Settings::default(),
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, SyncError::SessionNotFound(_)));
    }

    #[tokio::test]
    async fn deleted_document_sends_everyone_home_once() {
        let (local, clients) = table(&["h", "g"]).await;
        let mut events = clients[1].0.events().subscribe();
        assert!(local.documents.remove(clients[0].0.session_id()));

        for (_, rec) in &clients {
            assert_eq!(rec.navigator.routes().last(), Some(&Route::Home));
            assert!(rec.modals.is_open(ModalKind::RoomClosed));
        }
        let mut gone = 0;
        while let Ok(event) = events.try_recv() {
            gone += usize::from(event == SyncEvent::RoomGone);
        }
        assert_eq!(gone, 1);
    }

    #[tokio::test]
    async fn shutdown_is_idempotent_and_detaches() {
        let (_local, clients) = table(&["h", "g"]).await;
        let (host, _) = &clients[0];
        let (guest, guest_rec) = &clients[1];

        guest.shutdown();
        guest.shutdown();
        let seen = guest.reconciler().view().last_version();
        host.event_manager()
            .handle(LocalGameEvent::NoLegalMovesClaimed { score_preview: 1 })
            .await
            .unwrap();

        assert_eq!(guest.reconciler().view().last_version(), seen);
        assert!(!guest_rec.modals.is_open(ModalKind::NoMovesVote));
        assert_eq!(guest_rec.timer.calls(), vec!["stop"]);
    }
}
