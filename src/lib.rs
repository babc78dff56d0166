//! Rapid Texter LAN - peer-to-peer multiplayer for the Rapid Texter typing race
//!
//! Hosts advertise rooms over UDP broadcast, players join over TCP and form
//! a full mesh, and the host drives a ready check, a countdown and the race
//! itself while every peer streams its typing progress to the others.

pub mod clock;
pub mod networking;
pub mod racing;
pub mod storage;
pub mod text;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use networking::{Command, LanHandle, LanNode, NetEvent, NetworkConfig, RoomController};
pub use racing::RacePhase;
pub use storage::config::AppConfig;
pub use text::{FixedText, TextSource, WordBank};
