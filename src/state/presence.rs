//! Pure connectivity bookkeeping behind the presence manager.
//!
//! The tracker never performs I/O: it folds realtime signals and room records into a
//! "waiting for reconnection" set and tells the host which room-record writes to make.

use std::{
    collections::{BTreeMap, BTreeSet},
    time::Duration,
};

use indexmap::IndexSet;

use crate::dto::{
    presence::{PresenceRecord, PresenceState},
    room::{RoomPlayer, RoomRecord},
};

/// Intervals and thresholds driving disconnect detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceTimings {
    pub heartbeat_interval: Duration,
    pub monitor_tick: Duration,
    /// Heartbeat age after which a silent player is marked disconnected.
    pub disconnect_threshold: Duration,
    /// How long a marked player may stay away before the host removes them.
    pub kick_timeout: Duration,
    /// Window after match start during which disconnect signals are dropped.
    pub grace_period: Duration,
}

impl Default for PresenceTimings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(5),
            monitor_tick: Duration::from_secs(2),
            disconnect_threshold: Duration::from_secs(60),
            kick_timeout: Duration::from_secs(30),
            grace_period: Duration::from_secs(4),
        }
    }
}

/// What a realtime signal did to the waiting set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RealtimeOutcome {
    /// Dropped: the local player's own entry, a player outside the room, or an offline signal
    /// inside the grace period.
    Ignored,
    /// The player just started being waited for.
    Waiting,
    /// The player was waited for and is back.
    Returned,
    Unchanged,
}

/// What one room record did to the roster and the waiting set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomChanges {
    /// Players gone from the room since the previous record.
    pub departed: Vec<String>,
    /// Players the host flagged disconnected who just started being waited for.
    pub waiting: Vec<String>,
    /// Players whose flag was cleared and who are no longer waited for.
    pub returned: Vec<String>,
}

/// Room-record write the host monitor should perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorAction {
    MarkDisconnected { player_id: String },
    ClearDisconnected { player_id: String },
    Remove { player_id: String },
}

/// Per-client view of everyone else's connectivity.
#[derive(Debug, Clone)]
pub struct PresenceTracker {
    local_player_id: String,
    timings: PresenceTimings,
    started_at: i64,
    /// Whether the realtime backend flips entries to offline by itself when a client vanishes.
    realtime_drops: bool,
    realtime: BTreeMap<String, PresenceRecord>,
    roster: BTreeSet<String>,
    /// Players the stored room record flags disconnected, with when they were marked.
    flagged: BTreeMap<String, i64>,
    names: BTreeMap<String, String>,
    waiting: IndexSet<String>,
}

impl PresenceTracker {
    pub fn new(
        local_player_id: impl Into<String>,
        timings: PresenceTimings,
        started_at: i64,
        realtime_drops: bool,
    ) -> Self {
        Self {
            local_player_id: local_player_id.into(),
            timings,
            started_at,
            realtime_drops,
            realtime: BTreeMap::new(),
            roster: BTreeSet::new(),
            flagged: BTreeMap::new(),
            names: BTreeMap::new(),
            waiting: IndexSet::new(),
        }
    }

    pub fn timings(&self) -> &PresenceTimings {
        &self.timings
    }

    pub fn in_grace(&self, now: i64) -> bool {
        now.saturating_sub(self.started_at) < millis(self.timings.grace_period)
    }

    /// Cache a display name; names outlive the player's removal from the room.
    pub fn remember_name(&mut self, player_id: &str, name: &str) {
        self.names.insert(player_id.to_string(), name.to_string());
    }

    pub fn name_of(&self, player_id: &str) -> Option<&str> {
        self.names.get(player_id).map(String::as_str)
    }

    pub fn realtime_state(&self, player_id: &str) -> Option<PresenceState> {
        self.realtime.get(player_id).map(|record| record.state)
    }

    /// Fold one realtime signal in. The record is cached even when the signal is dropped.
    pub fn apply_realtime(
        &mut self,
        player_id: &str,
        record: PresenceRecord,
        now: i64,
    ) -> RealtimeOutcome {
        if player_id == self.local_player_id {
            return RealtimeOutcome::Ignored;
        }
        self.realtime.insert(player_id.to_string(), record);
        if !self.roster.contains(player_id) {
            return RealtimeOutcome::Ignored;
        }

        match record.state {
            PresenceState::Offline if self.in_grace(now) => RealtimeOutcome::Ignored,
            PresenceState::Offline => {
                if self.waiting.insert(player_id.to_string()) {
                    RealtimeOutcome::Waiting
                } else {
                    RealtimeOutcome::Unchanged
                }
            }
            PresenceState::Online if !self.online_since_flag(player_id, record) => {
                RealtimeOutcome::Unchanged
            }
            PresenceState::Online => {
                if self.waiting.shift_remove(player_id) {
                    RealtimeOutcome::Returned
                } else {
                    RealtimeOutcome::Unchanged
                }
            }
        }
    }

    /// Start waiting for players whose offline signal was dropped during the grace period.
    pub fn reconcile_waiting(&mut self, now: i64) -> Vec<String> {
        if self.in_grace(now) {
            return Vec::new();
        }
        let stale = self
            .realtime
            .iter()
            .filter(|(player_id, record)| {
                record.state == PresenceState::Offline
                    && self.roster.contains(*player_id)
                    && !self.waiting.contains(*player_id)
            })
            .map(|(player_id, _)| player_id.clone())
            .collect::<Vec<_>>();
        for player_id in &stale {
            self.waiting.insert(player_id.clone());
        }
        stale
    }

    /// Fold in the stored room record: prune departed players and follow the host's
    /// disconnect flags for players the realtime channel does not vouch for.
    pub fn apply_room(&mut self, room: &RoomRecord, now: i64) -> RoomChanges {
        let current = room
            .players
            .iter()
            .map(|player| player.id.clone())
            .collect::<BTreeSet<_>>();
        let departed = self.roster.difference(&current).cloned().collect::<Vec<_>>();
        for player_id in &departed {
            self.forget(player_id);
        }
        self.roster = current;

        let mut changes = RoomChanges {
            departed,
            ..RoomChanges::default()
        };
        for player in &room.players {
            self.remember_name(&player.id, &player.name);
            if player.id == self.local_player_id {
                continue;
            }
            if player.is_disconnected {
                self.flagged.insert(player.id.clone(), marked_at(player));
            } else {
                self.flagged.remove(&player.id);
            }
        }
        if self.in_grace(now) {
            return changes;
        }

        for player in &room.players {
            if player.id == self.local_player_id {
                continue;
            }
            let realtime = self.realtime.get(&player.id).copied();
            if player.is_disconnected {
                let vouched = realtime.is_some_and(|record| {
                    record.state == PresenceState::Online
                        && self.online_since_flag(&player.id, record)
                });
                if !vouched && self.waiting.insert(player.id.clone()) {
                    changes.waiting.push(player.id.clone());
                }
            } else if realtime.is_none_or(|record| record.state != PresenceState::Offline)
                && self.waiting.shift_remove(&player.id)
            {
                changes.returned.push(player.id.clone());
            }
        }
        changes
    }

    /// Drop a player who left the room for good. Returns whether they were being waited for.
    pub fn forget(&mut self, player_id: &str) -> bool {
        self.realtime.remove(player_id);
        self.flagged.remove(player_id);
        self.waiting.shift_remove(player_id)
    }

    /// Whether an online record outranks the stored disconnect flag. Without drop detection an
    /// online entry only counts when it was written after the player was marked.
    fn online_since_flag(&self, player_id: &str, record: PresenceRecord) -> bool {
        match self.flagged.get(player_id) {
            Some(marked) => self.realtime_drops || record.last_changed > *marked,
            None => true,
        }
    }

    pub fn is_waiting(&self, player_id: &str) -> bool {
        self.waiting.contains(player_id)
    }

    /// Players currently waited for, in the order they went away.
    pub fn waiting(&self) -> impl Iterator<Item = &str> {
        self.waiting.iter().map(String::as_str)
    }

    pub fn has_waiting(&self) -> bool {
        !self.waiting.is_empty()
    }

    /// Decide the host's room-record writes for one monitor tick.
    ///
    /// Realtime is authoritative whenever it has an opinion; the heartbeat only decides for
    /// players the realtime channel is silent about.
    pub fn monitor(&self, room: &RoomRecord, now: i64) -> Vec<MonitorAction> {
        if self.in_grace(now) {
            return Vec::new();
        }
        let threshold = millis(self.timings.disconnect_threshold);
        let kick = millis(self.timings.kick_timeout);

        let mut actions = Vec::new();
        for player in &room.players {
            if player.id == self.local_player_id {
                continue;
            }
            let realtime = self
                .realtime_state(&player.id)
                .filter(|state| self.realtime_drops || *state == PresenceState::Offline);
            let player_id = player.id.clone();

            if player.is_disconnected {
                let marked_at = marked_at(player);
                let heartbeat_back = player.last_seen > marked_at;
                let overdue = now.saturating_sub(marked_at) >= kick;
                match realtime {
                    Some(PresenceState::Online) => {
                        actions.push(MonitorAction::ClearDisconnected { player_id })
                    }
                    None if heartbeat_back => {
                        actions.push(MonitorAction::ClearDisconnected { player_id })
                    }
                    _ if overdue => actions.push(MonitorAction::Remove { player_id }),
                    _ => {}
                }
            } else {
                let stale = now.saturating_sub(player.last_seen) > threshold;
                match realtime {
                    Some(PresenceState::Offline) => {
                        actions.push(MonitorAction::MarkDisconnected { player_id })
                    }
                    None if stale => actions.push(MonitorAction::MarkDisconnected { player_id }),
                    _ => {}
                }
            }
        }
        actions
    }
}

fn marked_at(player: &RoomPlayer) -> i64 {
    player.disconnected_at.unwrap_or(player.last_seen)
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
