//! UDP broadcast room discovery for LAN multiplayer.
//!
//! Hosts announce their room once a second on a shared port; scanners keep
//! a directory of the rooms they heard from and evict the silent ones.

use serde::{Deserialize, Serialize};
use socket2::{Domain, Protocol, Socket, Type};
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use super::peer::PeerId;
use super::protocol::DiscoveryAnnounce;

/// Default UDP port shared by announcers and scanners.
pub const DEFAULT_DISCOVERY_PORT: u16 = 52766;

/// Default announce period.
pub const ANNOUNCE_INTERVAL_MS: u64 = 1000;

/// Default age after which a silent room is evicted.
pub const ROOM_TIMEOUT_MS: u64 = 5000;

/// Advertised room state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomStatus {
    Waiting,
    Countdown,
    Racing,
}

/// What a scanner knows about one advertised room.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoomRecord {
    pub host_name: String,
    pub host_ip: Ipv4Addr,
    pub host_id: PeerId,
    /// Host's TCP listening port.
    pub port: u16,
    pub player_count: u32,
    pub max_players: u32,
    pub status: RoomStatus,
    pub last_seen_ms: u64,
}

/// Outcome of feeding one announcement into the directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    /// First datagram from this host.
    New,
    /// Name, endpoint, player count or status changed.
    Updated,
    /// Same room, only the last-seen time moved.
    Refreshed,
}

/// Scan cache of advertised rooms, keyed by host id.
#[derive(Debug, Default)]
pub struct RoomDirectory {
    rooms: HashMap<PeerId, RoomRecord>,
    max_players: u32,
}

impl RoomDirectory {
    pub fn new(max_players: u32) -> Self {
        Self {
            rooms: HashMap::new(),
            max_players,
        }
    }

    /// Inserts or refreshes the room described by `announce`.
    pub fn upsert(&mut self, announce: &DiscoveryAnnounce, sender: Ipv4Addr, now_ms: u64) -> Upsert {
        let record = RoomRecord {
            host_name: announce.name.clone(),
            host_ip: sender,
            host_id: announce.uuid.clone(),
            port: announce.port,
            player_count: announce.player_count,
            max_players: self.max_players,
            status: announce.status,
            last_seen_ms: now_ms,
        };

        match self.rooms.insert(announce.uuid.clone(), record.clone()) {
            None => Upsert::New,
            Some(previous) if Self::same_room(&previous, &record) => Upsert::Refreshed,
            Some(_) => Upsert::Updated,
        }
    }

    fn same_room(a: &RoomRecord, b: &RoomRecord) -> bool {
        a.host_name == b.host_name
            && a.host_ip == b.host_ip
            && a.port == b.port
            && a.player_count == b.player_count
            && a.status == b.status
    }

    /// Drops every room silent for longer than `timeout_ms`.
    pub fn evict_stale(&mut self, now_ms: u64, timeout_ms: u64) -> Vec<RoomRecord> {
        let stale: Vec<PeerId> = self
            .rooms
            .iter()
            .filter(|(_, room)| now_ms.saturating_sub(room.last_seen_ms) > timeout_ms)
            .map(|(id, _)| id.clone())
            .collect();

        stale
            .iter()
            .filter_map(|id| self.rooms.remove(id))
            .inspect(|room| {
                tracing::debug!("Room {} ({}) went silent", room.host_name, room.host_ip)
            })
            .collect()
    }

    pub fn get(&self, host_id: &PeerId) -> Option<&RoomRecord> {
        self.rooms.get(host_id)
    }

    /// Rooms ordered by host name, then host id.
    pub fn rooms(&self) -> Vec<RoomRecord> {
        let mut rooms: Vec<RoomRecord> = self.rooms.values().cloned().collect();
        rooms.sort_by(|a, b| {
            a.host_name
                .cmp(&b.host_name)
                .then_with(|| a.host_id.cmp(&b.host_id))
        });
        rooms
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    pub fn clear(&mut self) {
        self.rooms.clear();
    }
}

/// Binds the shared discovery socket: address reuse, broadcast enabled,
/// non-blocking, on `0.0.0.0:port`.
pub fn bind_discovery_socket(port: u16) -> Result<tokio::net::UdpSocket, DiscoveryError> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| DiscoveryError::BindFailed(e.to_string()))?;
    socket
        .set_reuse_address(true)
        .map_err(|e| DiscoveryError::BindFailed(e.to_string()))?;
    #[cfg(unix)]
    socket
        .set_reuse_port(true)
        .map_err(|e| DiscoveryError::BindFailed(e.to_string()))?;
    socket
        .set_broadcast(true)
        .map_err(|e| DiscoveryError::BindFailed(e.to_string()))?;
    socket
        .set_nonblocking(true)
        .map_err(|e| DiscoveryError::BindFailed(e.to_string()))?;

    let addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port));
    socket
        .bind(&addr.into())
        .map_err(|e| DiscoveryError::BindFailed(format!("{}: {}", addr, e)))?;

    tokio::net::UdpSocket::from_std(socket.into())
        .map_err(|e| DiscoveryError::BindFailed(e.to_string()))
}

/// Discovery errors.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("Failed to bind discovery socket: {0}")]
    BindFailed(String),

    #[error("Failed to send announcement: {0}")]
    SendFailed(String),
}
