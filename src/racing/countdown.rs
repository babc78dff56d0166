//! Ready check bookkeeping and the start countdown.
//!
//! The host collects `READY_RESPONSE`s before counting down; the countdown
//! itself is a fixed span after which the host sends `GAME_START`.

use std::collections::HashSet;

use crate::networking::peer::PeerId;

/// Host-side ready set for one race.
#[derive(Debug, Clone)]
pub struct ReadyCheck {
    ready: HashSet<PeerId>,
    deadline_ms: u64,
}

impl ReadyCheck {
    /// Opens a ready check; the host counts as ready.
    pub fn new(host: PeerId, now_ms: u64, timeout_ms: u64) -> Self {
        let mut ready = HashSet::new();
        ready.insert(host);
        Self {
            ready,
            deadline_ms: now_ms + timeout_ms,
        }
    }

    /// Returns `true` the first time `id` reports ready.
    pub fn mark_ready(&mut self, id: PeerId) -> bool {
        self.ready.insert(id)
    }

    /// Every current player has answered.
    pub fn is_complete(&self, players: &[PeerId]) -> bool {
        players.iter().all(|id| self.ready.contains(id))
    }

    /// Players that have not answered yet.
    pub fn missing(&self, players: &[PeerId]) -> Vec<PeerId> {
        players
            .iter()
            .filter(|id| !self.ready.contains(*id))
            .cloned()
            .collect()
    }

    pub fn ready_count(&self) -> usize {
        self.ready.len()
    }

    pub fn deadline_ms(&self) -> u64 {
        self.deadline_ms
    }
}

/// A running start countdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Countdown {
    seconds: u32,
    started_ms: u64,
}

impl Countdown {
    pub fn start(seconds: u32, now_ms: u64) -> Self {
        Self {
            seconds,
            started_ms: now_ms,
        }
    }

    pub fn seconds(&self) -> u32 {
        self.seconds
    }

    /// When the race starts.
    pub fn ends_at_ms(&self) -> u64 {
        self.started_ms + u64::from(self.seconds) * 1000
    }

    /// Whole seconds left, rounded up.
    pub fn remaining_seconds(&self, now_ms: u64) -> u32 {
        let left = self.ends_at_ms().saturating_sub(now_ms);
        left.div_ceil(1000) as u32
    }
}
