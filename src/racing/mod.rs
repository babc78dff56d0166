//! Racing module for LAN typing races
//!
//! Provides the host-driven race state machine, ready checks, synchronized
//! countdowns and finish rankings.

pub mod countdown;
pub mod events;
pub mod orchestrator;
pub mod results;

// Re-export commonly used types
pub use countdown::{Countdown, ReadyCheck};
pub use events::{ParticipantStatus, RacePhase};
pub use orchestrator::{RaceAction, RaceOrchestrator, RaceSettings};
pub use results::RaceLedger;
