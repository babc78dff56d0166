//! Networking module for LAN multiplayer
//!
//! Provides UDP broadcast discovery, the TCP full mesh, room membership,
//! progress reporting and the command/notification surface.

pub mod control;
pub mod controller;
pub mod discovery;
pub mod interfaces;
pub mod mesh;
pub mod node;
pub mod peer;
pub mod protocol;
pub mod session;
pub mod sync;

use serde::{Deserialize, Serialize};

// Re-export commonly used types
pub use control::{Command, EventSink, NetEvent, PlayerView, Snapshot};
pub use controller::{ControllerParams, Effect, RoomController};
pub use discovery::{RoomDirectory, RoomRecord, RoomStatus};
pub use interfaces::NetworkInterface;
pub use node::{LanHandle, LanNode, NodeError};
pub use peer::{LinkId, PeerId};
pub use protocol::{Message, Packet, PacketType, Ranking};
pub use session::{RoomRegistry, SessionState};
pub use sync::ProgressSync;

/// Default TCP port of the mesh listener.
pub const DEFAULT_TCP_PORT: u16 = 52765;

/// Network configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// TCP listening port for mesh links.
    pub tcp_port: u16,
    /// UDP port for discovery.
    pub discovery_port: u16,
    /// Announce period in milliseconds.
    pub announce_interval_ms: u64,
    /// Silence after which a discovered room is dropped.
    pub room_timeout_ms: u64,
    /// Progress broadcast period in milliseconds.
    pub progress_interval_ms: u64,
    /// Join attempt deadline in milliseconds.
    pub join_timeout_ms: u64,
    /// Ready check deadline in milliseconds.
    pub ready_check_timeout_ms: u64,
    /// Start countdown length in seconds.
    pub countdown_seconds: u32,
    /// Room capacity, host included.
    pub max_players: usize,
    /// Words in a generated race text.
    pub race_word_count: usize,
    /// Largest accepted frame body in bytes.
    pub max_frame_len: usize,
    /// Capacity of the notification channel.
    pub event_capacity: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            tcp_port: DEFAULT_TCP_PORT,
            discovery_port: discovery::DEFAULT_DISCOVERY_PORT,
            announce_interval_ms: discovery::ANNOUNCE_INTERVAL_MS,
            room_timeout_ms: discovery::ROOM_TIMEOUT_MS,
            progress_interval_ms: sync::PROGRESS_INTERVAL_MS,
            join_timeout_ms: crate::racing::events::constants::JOIN_TIMEOUT_MS,
            ready_check_timeout_ms: crate::racing::events::constants::READY_CHECK_TIMEOUT_MS,
            countdown_seconds: crate::racing::events::constants::COUNTDOWN_SECONDS,
            max_players: session::MAX_PLAYERS,
            race_word_count: crate::racing::events::constants::RACE_WORD_COUNT,
            max_frame_len: protocol::DEFAULT_MAX_FRAME_LEN,
            event_capacity: 256,
        }
    }
}

impl NetworkConfig {
    /// Create a new network configuration with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stale-room sweep period: half the room timeout.
    pub fn cleanup_interval_ms(&self) -> u64 {
        (self.room_timeout_ms / 2).max(1)
    }
}
