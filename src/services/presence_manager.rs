//! Connectivity detection for one client: realtime channel first, heartbeat and host monitor
//! as the fallback.

use std::sync::{
    Arc, Mutex, Weak,
    atomic::{AtomicBool, Ordering},
};

use tokio::{
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, interval_at},
};
use tracing::{debug, info, warn};

use crate::{
    clock::now_ms,
    dao::{
        lock,
        presence_channel::{PresenceChannel, PresenceListener},
        room_store::RoomStore,
        storage::StorageError,
    },
    dto::{
        presence::{PresenceRecord, PresenceUpdate},
        room::RoomRecord,
    },
    error::SyncError,
    services::{
        collaborators::{Collaborators, ModalButton, ModalKind, ModalService, ModalSpec, Navigator, Route},
        events::{EventHub, SyncEvent},
        session::{Backends, SessionIdentity},
        timer_gate::{PauseReason, TimerGate},
    },
    state::presence::{
        MonitorAction, PresenceTimings, PresenceTracker, RealtimeOutcome, RoomChanges,
    },
};

/// Running presence detection for one session. Stop it with [`PresenceManager::stop`].
pub struct PresenceManager {
    inner: Arc<PresenceInner>,
}

struct PresenceInner {
    room_id: String,
    local_player_id: String,
    is_host: bool,
    rooms: Arc<dyn RoomStore>,
    channel: Arc<dyn PresenceChannel>,
    tracker: Mutex<PresenceTracker>,
    /// Names listed in the reconnection modal, empty when it is closed.
    waiting_shown: Mutex<Vec<String>>,
    modals: Arc<dyn ModalService>,
    navigator: Arc<dyn Navigator>,
    gate: Arc<TimerGate>,
    events: Arc<EventHub>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    heartbeat_stopped: AtomicBool,
    /// Set once the room is gone or the local player was removed.
    ended: AtomicBool,
    stopped: AtomicBool,
}

impl PresenceManager {
    /// Register on the realtime channel, send the first heartbeat and start both loops.
    pub async fn start(
        identity: &SessionIdentity,
        timings: PresenceTimings,
        backends: &Backends,
        collaborators: &Collaborators,
        gate: Arc<TimerGate>,
        events: Arc<EventHub>,
    ) -> Result<Self, SyncError> {
        let room = backends.rooms.fetch_room(identity.room_id.clone()).await?;
        let started_at = room.started_at.unwrap_or_else(now_ms);
        let tracker = PresenceTracker::new(
            identity.player_id.clone(),
            timings,
            started_at,
            backends.realtime_drops,
        );

        backends
            .presence
            .register(identity.room_id.clone(), identity.player_id.clone())
            .await?;

        let inner = Arc::new(PresenceInner {
            room_id: identity.room_id.clone(),
            local_player_id: identity.player_id.clone(),
            is_host: identity.is_host,
            rooms: backends.rooms.clone(),
            channel: backends.presence.clone(),
            tracker: Mutex::new(tracker),
            waiting_shown: Mutex::new(Vec::new()),
            modals: collaborators.modals.clone(),
            navigator: collaborators.navigator.clone(),
            gate,
            events,
            tasks: Mutex::new(Vec::new()),
            heartbeat_stopped: AtomicBool::new(false),
            ended: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        });

        // The roster must be known before realtime entries are folded in.
        inner.sync_room(&room, now_ms());
        let snapshot = inner.channel.snapshot(inner.room_id.clone()).await?;
        let now = now_ms();
        for (player_id, record) in snapshot {
            inner.on_realtime(&player_id, record, now);
        }

        let weak = Arc::downgrade(&inner);
        let listener: PresenceListener = Arc::new(move |update: &PresenceUpdate| {
            if let Some(inner) = weak.upgrade()
                && update.room_id == inner.room_id
            {
                inner.on_realtime(&update.player_id, update.record, now_ms());
            }
        });
        inner.channel.subscribe(inner.room_id.clone(), listener)?;

        inner.heartbeat().await;
        let heartbeat = spawn_heartbeat(&inner);
        let monitor = spawn_monitor(&inner);
        lock(&inner.tasks).extend([heartbeat, monitor]);

        info!(
            room_id = %inner.room_id,
            player_id = %inner.local_player_id,
            is_host = inner.is_host,
            "presence started"
        );
        Ok(Self { inner })
    }

    /// Run one monitor tick as of `now`. The background loop calls this with the wall clock.
    pub async fn tick_at(&self, now: i64) {
        self.inner.tick(now).await;
    }

    /// Ids of the players currently waited for, in the order they went away.
    pub fn waiting_players(&self) -> Vec<String> {
        lock(&self.inner.tracker)
            .waiting()
            .map(str::to_string)
            .collect()
    }

    pub fn is_waiting(&self, player_id: &str) -> bool {
        lock(&self.inner.tracker).is_waiting(player_id)
    }

    /// Surface a room that disappeared under the session. Idempotent.
    pub fn handle_room_gone(&self) {
        self.inner.handle_room_gone();
    }

    /// Mark the local player offline, then stop.
    pub async fn leave(&self) {
        let inner = &self.inner;
        if let Err(err) = inner
            .channel
            .set_offline(inner.room_id.clone(), inner.local_player_id.clone())
            .await
        {
            warn!(error = %err, room_id = %inner.room_id, "failed to announce leaving");
        }
        self.stop();
    }

    /// Stop both loops, detach from the realtime channel and lift the reconnection pause.
    /// Safe to call repeatedly.
    pub fn stop(&self) {
        let inner = &self.inner;
        if inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        for task in lock(&inner.tasks).drain(..) {
            task.abort();
        }
        inner.channel.cleanup();

        let mut shown = lock(&inner.waiting_shown);
        if !shown.is_empty() {
            shown.clear();
            inner.modals.close_modal(ModalKind::Reconnecting);
            inner.gate.release(PauseReason::Reconnect);
        }
        info!(room_id = %inner.room_id, "presence stopped");
    }
}

impl PresenceInner {
    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst) || self.ended.load(Ordering::SeqCst)
    }

    fn on_realtime(&self, player_id: &str, record: PresenceRecord, now: i64) {
        if self.is_stopped() {
            return;
        }
        let (outcome, name) = {
            let mut tracker = lock(&self.tracker);
            let outcome = tracker.apply_realtime(player_id, record, now);
            (outcome, tracker.name_of(player_id).map(str::to_string))
        };

        match outcome {
            RealtimeOutcome::Waiting => {
                info!(player_id, "player went offline; waiting for reconnection");
                self.events.broadcast(SyncEvent::PlayerWaiting {
                    player_id: player_id.to_string(),
                    name,
                });
                self.refresh_waiting_ui();
            }
            RealtimeOutcome::Returned => {
                info!(player_id, "player reconnected");
                self.events.broadcast(SyncEvent::PlayerReturned {
                    player_id: player_id.to_string(),
                    name,
                });
                self.refresh_waiting_ui();
            }
            RealtimeOutcome::Ignored => {
                debug!(player_id, state = ?record.state, "realtime signal ignored");
            }
            RealtimeOutcome::Unchanged => {}
        }
    }

    /// Show, update or close the reconnection modal to match the waiting set.
    fn refresh_waiting_ui(&self) {
        let waiting = {
            let tracker = lock(&self.tracker);
            tracker
                .waiting()
                .map(|id| tracker.name_of(id).unwrap_or(id).to_string())
                .collect::<Vec<_>>()
        };

        let mut shown = lock(&self.waiting_shown);
        if *shown == waiting {
            return;
        }
        *shown = waiting;
        if shown.is_empty() {
            self.modals.close_modal(ModalKind::Reconnecting);
            self.gate.release(PauseReason::Reconnect);
        } else {
            self.modals.show_modal(reconnect_modal(&shown));
            self.gate.hold(PauseReason::Reconnect);
        }
    }

    /// Write one heartbeat. Returns whether the loop should keep going.
    async fn heartbeat(&self) -> bool {
        if self.is_stopped() || self.heartbeat_stopped.load(Ordering::SeqCst) {
            return false;
        }
        match self
            .rooms
            .write_heartbeat(self.room_id.clone(), self.local_player_id.clone(), now_ms())
            .await
        {
            Ok(()) => true,
            Err(StorageError::RoomGone { .. }) => {
                warn!(room_id = %self.room_id, "heartbeat target room is gone");
                self.handle_room_gone();
                false
            }
            Err(StorageError::NotFound { .. }) => {
                self.handle_removed();
                false
            }
            Err(err) => {
                warn!(error = %err, room_id = %self.room_id, "heartbeat write failed");
                true
            }
        }
    }

    async fn tick(&self, now: i64) {
        if self.is_stopped() {
            return;
        }

        let late = lock(&self.tracker).reconcile_waiting(now);
        if !late.is_empty() {
            for player_id in late {
                let name = self.name_of(&player_id);
                info!(player_id = %player_id, "offline signal from the grace period still holds");
                self.events
                    .broadcast(SyncEvent::PlayerWaiting { player_id, name });
            }
            self.refresh_waiting_ui();
        }

        let room = match self.rooms.fetch_room(self.room_id.clone()).await {
            Ok(room) => room,
            Err(StorageError::RoomGone { .. }) => {
                self.handle_room_gone();
                return;
            }
            Err(err) => {
                warn!(error = %err, room_id = %self.room_id, "failed to fetch room record");
                return;
            }
        };
        if room.player(&self.local_player_id).is_none() {
            self.handle_removed();
            return;
        }

        self.sync_room(&room, now);
        if self.is_host {
            self.run_monitor(&room, now).await;
        }
    }

    /// Follow the stored room record: departures and the host's disconnect flags.
    fn sync_room(&self, room: &RoomRecord, now: i64) {
        let changes = lock(&self.tracker).apply_room(room, now);
        if changes == RoomChanges::default() {
            return;
        }

        for player_id in changes.departed {
            info!(player_id = %player_id, "player left the room");
            let name = self.name_of(&player_id);
            let label = name.clone().unwrap_or_else(|| player_id.clone());
            self.modals.show_modal(
                ModalSpec::new(
                    ModalKind::PlayerLeft,
                    "Player left",
                    format!("{label} left the match."),
                )
                .button(ModalButton::Dismiss, "OK"),
            );
            self.events
                .broadcast(SyncEvent::PlayerLeft { player_id, name });
        }
        for player_id in changes.waiting {
            info!(player_id = %player_id, "room record flags player disconnected");
            let name = self.name_of(&player_id);
            self.events
                .broadcast(SyncEvent::PlayerWaiting { player_id, name });
        }
        for player_id in changes.returned {
            info!(player_id = %player_id, "disconnect flag cleared");
            let name = self.name_of(&player_id);
            self.events
                .broadcast(SyncEvent::PlayerReturned { player_id, name });
        }
        self.refresh_waiting_ui();
    }

    fn name_of(&self, player_id: &str) -> Option<String> {
        lock(&self.tracker).name_of(player_id).map(str::to_string)
    }

    async fn run_monitor(&self, room: &RoomRecord, now: i64) {
        let actions = lock(&self.tracker).monitor(room, now);
        for action in actions {
            let (player_id, write) = match &action {
                MonitorAction::MarkDisconnected { player_id } => (
                    player_id,
                    self.rooms
                        .set_disconnected(self.room_id.clone(), player_id.clone(), true, now),
                ),
                MonitorAction::ClearDisconnected { player_id } => (
                    player_id,
                    self.rooms
                        .set_disconnected(self.room_id.clone(), player_id.clone(), false, now),
                ),
                MonitorAction::Remove { player_id } => (
                    player_id,
                    self.rooms
                        .remove_player(self.room_id.clone(), player_id.clone()),
                ),
            };

            let gone = match write.await {
                Ok(()) => {
                    info!(?action, "host monitor updated room");
                    true
                }
                Err(StorageError::NotFound { .. }) => {
                    debug!(player_id = %player_id, "player already left; skipping monitor write");
                    true
                }
                Err(StorageError::RoomGone { .. }) => {
                    self.handle_room_gone();
                    return;
                }
                Err(err) => {
                    warn!(error = %err, ?action, "host monitor write failed");
                    false
                }
            };
            if gone && matches!(action, MonitorAction::Remove { .. }) {
                self.prune_presence(player_id).await;
            }
        }
    }

    /// Delete a removed player's realtime entry so later joiners never wait for them.
    async fn prune_presence(&self, player_id: &str) {
        if let Err(err) = self
            .channel
            .remove(self.room_id.clone(), player_id.to_string())
            .await
        {
            warn!(error = %err, player_id, "failed to prune presence entry");
        }
    }

    fn handle_room_gone(&self) {
        if self.ended.swap(true, Ordering::SeqCst) {
            return;
        }
        self.heartbeat_stopped.store(true, Ordering::SeqCst);
        warn!(room_id = %self.room_id, "room closed");
        self.events.broadcast(SyncEvent::RoomGone);
        self.modals.close_all_modals();
        self.modals.show_modal(
            ModalSpec::new(ModalKind::RoomClosed, "Room closed", "This match is no longer available.")
                .button(ModalButton::Dismiss, "Back to home"),
        );
        self.navigator.go_to(Route::Home);
    }

    fn handle_removed(&self) {
        if self.ended.swap(true, Ordering::SeqCst) {
            return;
        }
        self.heartbeat_stopped.store(true, Ordering::SeqCst);
        warn!(
            room_id = %self.room_id,
            player_id = %self.local_player_id,
            "local player was removed from the room"
        );
        self.events.broadcast(SyncEvent::Removed);
        self.modals.close_all_modals();
        self.navigator.go_to(Route::Home);
    }
}

fn reconnect_modal(names: &[String]) -> ModalSpec {
    ModalSpec::new(
        ModalKind::Reconnecting,
        "Waiting for players",
        format!("Waiting for {} to reconnect...", names.join(", ")),
    )
    .blocking()
}

fn spawn_heartbeat(inner: &Arc<PresenceInner>) -> JoinHandle<()> {
    let period = lock(&inner.tracker).timings().heartbeat_interval;
    let weak = Arc::downgrade(inner);
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(inner) = Weak::upgrade(&weak) else {
                break;
            };
            if !inner.heartbeat().await {
                debug!(room_id = %inner.room_id, "heartbeat loop stopped");
                break;
            }
        }
    })
}

fn spawn_monitor(inner: &Arc<PresenceInner>) -> JoinHandle<()> {
    let period = lock(&inner.tracker).timings().monitor_tick;
    let weak = Arc::downgrade(inner);
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let Some(inner) = Weak::upgrade(&weak) else {
                break;
            };
            if inner.is_stopped() {
                break;
            }
            inner.tick(now_ms()).await;
        }
    })
}
