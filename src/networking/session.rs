//! Room membership and per-player race state.
//!
//! The registry is the single source of truth for who is in the room and
//! how far each player has typed. Every mutation notifies observers.

use serde::Serialize;
use std::collections::HashMap;

use super::control::{EventSink, NetEvent, PlayerView};
use super::peer::PeerId;
use super::protocol::ProgressUpdate;

/// Default room capacity, host included.
pub const MAX_PLAYERS: usize = 8;

/// Participation role of this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    /// Not in any room.
    Idle,
    /// Dialling a host, waiting for its HELLO.
    Joining,
    /// Created the room.
    Hosting,
    /// Joined someone else's room.
    Joined,
}

impl SessionState {
    pub fn in_room(&self) -> bool {
        matches!(self, SessionState::Hosting | SessionState::Joined)
    }
}

/// Local view of one participant.
#[derive(Debug, Clone, PartialEq)]
pub struct Player {
    pub id: PeerId,
    pub name: String,
    pub position: u32,
    pub total: u32,
    pub wpm: u32,
    pub accuracy: f64,
    pub errors: u32,
    pub finished: bool,
    /// Final ranking index, 0 until assigned.
    pub rank: u32,
    pub finish_time_ms: Option<u64>,
    joined_seq: u64,
}

impl Player {
    fn new(id: PeerId, name: String, joined_seq: u64) -> Self {
        Self {
            id,
            name,
            position: 0,
            total: 0,
            wpm: 0,
            accuracy: 0.0,
            errors: 0,
            finished: false,
            rank: 0,
            finish_time_ms: None,
            joined_seq,
        }
    }

    pub fn progress(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            f64::from(self.position.min(self.total)) / f64::from(self.total)
        }
    }

    fn reset_race(&mut self) {
        self.position = 0;
        self.total = 0;
        self.wpm = 0;
        self.accuracy = 0.0;
        self.errors = 0;
        self.finished = false;
        self.rank = 0;
        self.finish_time_ms = None;
    }
}

/// Player table keyed by [`PeerId`], self included.
#[derive(Debug)]
pub struct RoomRegistry {
    local_id: PeerId,
    host_id: Option<PeerId>,
    players: HashMap<PeerId, Player>,
    next_seq: u64,
    events: EventSink,
}

impl RoomRegistry {
    pub fn new(local_id: PeerId, events: EventSink) -> Self {
        Self {
            local_id,
            host_id: None,
            players: HashMap::new(),
            next_seq: 0,
            events,
        }
    }

    fn changed(&self) {
        self.events.emit(NetEvent::PlayersChanged(self.snapshot()));
    }

    pub fn set_host(&mut self, host: Option<PeerId>) {
        self.host_id = host;
    }

    pub fn host_id(&self) -> Option<&PeerId> {
        self.host_id.as_ref()
    }

    /// Adds a player. Re-inserting a known id only refreshes the name.
    pub fn insert(&mut self, id: PeerId, name: &str) -> bool {
        if let Some(player) = self.players.get_mut(&id) {
            if player.name != name {
                player.name = name.to_string();
                self.changed();
            }
            return false;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.players
            .insert(id.clone(), Player::new(id, name.to_string(), seq));
        self.changed();
        true
    }

    pub fn remove(&mut self, id: &PeerId) -> Option<Player> {
        let removed = self.players.remove(id)?;
        self.changed();
        Some(removed)
    }

    pub fn rename(&mut self, id: &PeerId, name: &str) {
        if let Some(player) = self.players.get_mut(id) {
            player.name = name.to_string();
            self.changed();
        }
    }

    /// Applies an absolute progress report. Reports from finished players
    /// are ignored.
    pub fn update_progress(&mut self, id: &PeerId, update: ProgressUpdate) {
        let Some(player) = self.players.get_mut(id) else {
            return;
        };
        if player.finished {
            return;
        }
        player.position = update.position;
        player.total = update.total;
        player.wpm = update.wpm;

        let event = NetEvent::PlayerProgress {
            id: player.id.clone(),
            name: player.name.clone(),
            progress: player.progress(),
            wpm: player.wpm,
            finished: update.finished,
            position: player.position,
        };
        self.events.emit(event);
        self.changed();
    }

    /// Records a finish. Returns `false` for an unknown or already
    /// finished player.
    pub fn mark_finished(
        &mut self,
        id: &PeerId,
        wpm: u32,
        accuracy: f64,
        rank: u32,
        now_ms: u64,
    ) -> bool {
        let Some(player) = self.players.get_mut(id) else {
            return false;
        };
        if player.finished {
            return false;
        }
        player.finished = true;
        player.wpm = wpm;
        player.accuracy = accuracy;
        player.rank = rank;
        player.finish_time_ms = Some(now_ms);
        if player.total > 0 {
            player.position = player.total;
        }

        let event = NetEvent::PlayerProgress {
            id: player.id.clone(),
            name: player.name.clone(),
            progress: 1.0,
            wpm,
            finished: true,
            position: player.position,
        };
        self.events.emit(event);
        self.changed();
        true
    }

    pub fn set_errors(&mut self, id: &PeerId, errors: u32) {
        if let Some(player) = self.players.get_mut(id) {
            player.errors = errors;
        }
    }

    /// Copies final ranks from the host's results.
    pub fn apply_ranks<'a>(&mut self, ranks: impl IntoIterator<Item = (&'a PeerId, u32)>) {
        for (id, rank) in ranks {
            if let Some(player) = self.players.get_mut(id) {
                player.rank = rank;
            }
        }
        self.changed();
    }

    /// Clears race state of every player, keeping membership.
    pub fn reset_race(&mut self) {
        self.players.values_mut().for_each(Player::reset_race);
        self.changed();
    }

    pub fn clear(&mut self) {
        self.host_id = None;
        if !self.players.is_empty() {
            self.players.clear();
            self.changed();
        }
    }

    pub fn get(&self, id: &PeerId) -> Option<&Player> {
        self.players.get(id)
    }

    pub fn contains(&self, id: &PeerId) -> bool {
        self.players.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    /// Player ids in join order.
    pub fn ids(&self) -> Vec<PeerId> {
        let mut players: Vec<&Player> = self.players.values().collect();
        players.sort_by_key(|p| p.joined_seq);
        players.into_iter().map(|p| p.id.clone()).collect()
    }

    /// UI rows in join order.
    pub fn snapshot(&self) -> Vec<PlayerView> {
        let mut players: Vec<&Player> = self.players.values().collect();
        players.sort_by_key(|p| p.joined_seq);
        players
            .into_iter()
            .map(|p| PlayerView {
                id: p.id.clone(),
                name: p.name.clone(),
                is_host: self.host_id.as_ref() == Some(&p.id),
                is_local: p.id == self.local_id,
                progress: p.progress(),
                position: p.position,
                total: p.total,
                wpm: p.wpm,
                accuracy: p.accuracy,
                finished: p.finished,
                rank: p.rank,
            })
            .collect()
    }
}
