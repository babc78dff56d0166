//! Race phases and timing constants.

use serde::{Deserialize, Serialize};

use crate::networking::discovery::RoomStatus;

/// Phase of the race state machine.
///
/// Transitions are linear: Lobby, ReadyCheck, Countdown, Racing, Results,
/// then back to Lobby. A solo host skips ReadyCheck.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RacePhase {
    /// Waiting in the room; text may change.
    Lobby,
    /// Host is collecting ready responses.
    ReadyCheck,
    /// Start countdown running.
    Countdown,
    /// Race running
    Racing,
    /// Rankings published.
    Results,
}

impl RacePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            RacePhase::Lobby => "lobby",
            RacePhase::ReadyCheck => "ready_check",
            RacePhase::Countdown => "countdown",
            RacePhase::Racing => "racing",
            RacePhase::Results => "results",
        }
    }

    /// Status advertised in discovery datagrams.
    pub fn room_status(&self) -> RoomStatus {
        match self {
            RacePhase::Countdown => RoomStatus::Countdown,
            RacePhase::Racing => RoomStatus::Racing,
            RacePhase::Lobby | RacePhase::ReadyCheck | RacePhase::Results => RoomStatus::Waiting,
        }
    }
}

/// Standing of one racer in the current race.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantStatus {
    /// On the roster, still typing.
    Racing,
    /// Reported `FINISH`.
    Finished,
    /// Left before finishing.
    Dnf,
}

/// Race constants.
pub mod constants {
    /// Countdown duration in seconds
    pub const COUNTDOWN_SECONDS: u32 = 3;

    /// Ready check deadline (ms)
    pub const READY_CHECK_TIMEOUT_MS: u64 = 5000;

    /// Join attempt deadline (ms)
    pub const JOIN_TIMEOUT_MS: u64 = 5000;

    /// Words in a generated race text
    pub const RACE_WORD_COUNT: usize = 20;

    /// Language used until someone picks another
    pub const DEFAULT_LANGUAGE: &str = "en";
}
