//! Finish ledger and ranking construction.
//!
//! The host captures the roster when the race starts, ranks finishers in
//! arrival order and appends racers that left before finishing.

use std::collections::HashMap;

use super::events::ParticipantStatus;
use crate::networking::peer::PeerId;
use crate::networking::protocol::Ranking;

/// One racer's standing.
#[derive(Debug, Clone, PartialEq)]
pub struct RaceEntry {
    pub id: PeerId,
    pub name: String,
    pub status: ParticipantStatus,
    pub wpm: u32,
    pub accuracy: f64,
    pub rank: Option<u32>,
}

/// Host-side bookkeeping for one race.
#[derive(Debug, Default)]
pub struct RaceLedger {
    roster: Vec<PeerId>,
    entries: HashMap<PeerId, RaceEntry>,
    finish_order: Vec<PeerId>,
    departed: Vec<PeerId>,
}

impl RaceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets the ledger for a race with the given roster.
    pub fn start(&mut self, roster: Vec<(PeerId, String)>) {
        self.clear();
        for (id, name) in roster {
            self.roster.push(id.clone());
            self.entries.insert(
                id.clone(),
                RaceEntry {
                    id,
                    name,
                    status: ParticipantStatus::Racing,
                    wpm: 0,
                    accuracy: 0.0,
                    rank: None,
                },
            );
        }
    }

    /// Assigns the next finishing position. `None` for racers not on the
    /// roster or already out of the race.
    pub fn record_finish(&mut self, id: &PeerId, wpm: u32, accuracy: f64) -> Option<u32> {
        let entry = self.entries.get_mut(id)?;
        if entry.status != ParticipantStatus::Racing {
            return None;
        }
        let rank = self.finish_order.len() as u32 + 1;
        entry.status = ParticipantStatus::Finished;
        entry.wpm = wpm;
        entry.accuracy = accuracy;
        entry.rank = Some(rank);
        self.finish_order.push(id.clone());
        Some(rank)
    }

    /// Marks a racer as gone before finishing.
    pub fn depart(&mut self, id: &PeerId) -> bool {
        match self.entries.get_mut(id) {
            Some(entry) if entry.status == ParticipantStatus::Racing => {
                entry.status = ParticipantStatus::Dnf;
                self.departed.push(id.clone());
                true
            }
            _ => false,
        }
    }

    /// Nobody on the roster is still racing.
    pub fn is_complete(&self) -> bool {
        !self.roster.is_empty()
            && self
                .entries
                .values()
                .all(|entry| entry.status != ParticipantStatus::Racing)
    }

    pub fn is_racing(&self, id: &PeerId) -> bool {
        self.entries
            .get(id)
            .is_some_and(|entry| entry.status == ParticipantStatus::Racing)
    }

    pub fn roster_len(&self) -> usize {
        self.roster.len()
    }

    pub fn finished_count(&self) -> usize {
        self.finish_order.len()
    }

    /// Final rankings: finishers by arrival, then departures by departure
    /// order, then anyone still racing by roster order. Positions are
    /// exactly `1..=roster_len`.
    pub fn rankings(&self) -> Vec<Ranking> {
        let still_racing = self
            .roster
            .iter()
            .filter(|id| self.is_racing(id));

        self.finish_order
            .iter()
            .chain(self.departed.iter())
            .chain(still_racing)
            .filter_map(|id| self.entries.get(id))
            .enumerate()
            .map(|(index, entry)| Ranking {
                id: entry.id.clone(),
                name: entry.name.clone(),
                wpm: entry.wpm,
                accuracy: entry.accuracy,
                position: index as u32 + 1,
            })
            .collect()
    }

    pub fn clear(&mut self) {
        self.roster.clear();
        self.entries.clear();
        self.finish_order.clear();
        self.departed.clear();
    }
}
