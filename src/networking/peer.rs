//! Participant identity and the per-connection link record.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use uuid::Uuid;

use super::protocol::FrameDecoder;

/// Process-lifetime identifier of one participant.
///
/// A random 128-bit value rendered as a hyphenated UUID string. Ordering is
/// plain lexicographic string ordering, which decides duplicate-link
/// tie-breaks.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// Fresh random identifier.
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for PeerId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for PeerId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Handle of one TCP connection inside the mesh's link table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkId(pub u64);

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link#{}", self.0)
    }
}

/// Which side opened the TCP connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOrigin {
    /// Accepted by our listener.
    Inbound,
    /// Dialled by us.
    Outbound,
}

/// One TCP connection to another participant.
#[derive(Debug)]
pub struct PeerLink {
    pub id: LinkId,
    pub origin: LinkOrigin,
    /// Remote endpoint as seen on the socket.
    pub remote_addr: SocketAddr,
    /// Canonical identity once the handshake completed. For outbound dials
    /// made from a peer list this starts as the expected identity.
    pub peer_id: Option<PeerId>,
    pub name: String,
    /// Listening port the remote announced in its HELLO.
    pub listen_port: u16,
    /// Outbound links stay unconnected until the dial succeeds.
    pub connected: bool,
    pub handshake_complete: bool,
    pub decoder: FrameDecoder,
}

impl PeerLink {
    pub fn new(
        id: LinkId,
        origin: LinkOrigin,
        remote_addr: SocketAddr,
        expected: Option<PeerId>,
        max_frame_len: usize,
    ) -> Self {
        Self {
            id,
            origin,
            remote_addr,
            peer_id: expected,
            name: String::new(),
            listen_port: remote_addr.port(),
            connected: origin == LinkOrigin::Inbound,
            handshake_complete: false,
            decoder: FrameDecoder::new(max_frame_len),
        }
    }

    /// Endpoint other participants should dial to reach this peer.
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.remote_addr.ip(), self.listen_port)
    }
}
