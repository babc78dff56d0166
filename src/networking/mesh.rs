//! Full-mesh link table.
//!
//! Owns every [`PeerLink`], keyed by [`LinkId`]. Sockets never point back
//! into this table; the driver only holds link ids. A completed handshake
//! makes the link canonical for its [`PeerId`]; at most one canonical link
//! exists per remote peer.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};

use super::peer::{LinkId, LinkOrigin, PeerId, PeerLink};
use super::protocol::{FrameError, PeerEntry};

/// Result of completing a handshake on a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handshake {
    /// First canonical link to this peer.
    New,
    /// The peer's previous link closed while this one was still pending;
    /// this link takes over without a membership change.
    Rebound,
    /// A second link to an already linked peer. `closed` was dropped from
    /// the table and must be closed by the caller.
    Duplicate {
        closed: LinkId,
        canonical_changed: bool,
    },
    /// HELLO repeated on an already complete link.
    Repeat,
}

/// Result of a link going away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Closed {
    /// The peer's canonical link closed; the peer is gone.
    Canonical(PeerId),
    /// The canonical link closed but a pending sibling may still complete.
    Deferred(PeerId),
    /// A pending link closed and it was the last hope of a deferred peer.
    DeferralExpired(PeerId),
    /// A completed but non-canonical link closed.
    Superseded,
    /// A link with no handshake closed.
    Pending,
    /// The link was not in the table.
    Unknown,
}

/// Link table plus dial bookkeeping.
#[derive(Debug)]
pub struct Mesh {
    local_id: PeerId,
    links: HashMap<LinkId, PeerLink>,
    by_peer: HashMap<PeerId, LinkId>,
    pending_dials: HashMap<SocketAddr, LinkId>,
    deferred: HashMap<PeerId, LinkId>,
    next_id: u64,
    max_links: usize,
    max_frame_len: usize,
}

impl Mesh {
    pub fn new(local_id: PeerId, max_links: usize, max_frame_len: usize) -> Self {
        Self {
            local_id,
            links: HashMap::new(),
            by_peer: HashMap::new(),
            pending_dials: HashMap::new(),
            deferred: HashMap::new(),
            next_id: 1,
            max_links,
            max_frame_len,
        }
    }

    fn allocate(&mut self) -> LinkId {
        let id = LinkId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Remote participants that hold or may take a slot: linked peers plus
    /// connections whose peer is still unknown. Dials to a known peer and
    /// duplicate links do not count twice.
    fn occupied_slots(&self) -> usize {
        let unidentified = self
            .links
            .values()
            .filter(|link| !link.handshake_complete && link.peer_id.is_none())
            .count();
        self.by_peer.len() + unidentified
    }

    /// Registers an accepted connection, or `None` when at capacity.
    pub fn open_inbound(&mut self, remote: SocketAddr) -> Option<LinkId> {
        if self.occupied_slots() >= self.max_links {
            tracing::info!("Refusing connection from {}: room is full", remote);
            return None;
        }
        let id = self.allocate();
        self.links.insert(
            id,
            PeerLink::new(id, LinkOrigin::Inbound, remote, None, self.max_frame_len),
        );
        Some(id)
    }

    /// Registers an outgoing dial, or `None` when it would duplicate an
    /// existing link, target ourselves, or repeat an outstanding dial.
    pub fn open_outbound(&mut self, remote: SocketAddr, expected: Option<PeerId>) -> Option<LinkId> {
        if let Some(peer) = &expected {
            if *peer == self.local_id || self.by_peer.contains_key(peer) {
                return None;
            }
        }
        if self.pending_dials.contains_key(&remote) {
            tracing::debug!("Dial to {} already in flight", remote);
            return None;
        }
        let already_linked = self
            .links
            .values()
            .any(|link| link.handshake_complete && link.listen_addr() == remote);
        if already_linked {
            return None;
        }

        let id = self.allocate();
        self.links.insert(
            id,
            PeerLink::new(id, LinkOrigin::Outbound, remote, expected, self.max_frame_len),
        );
        self.pending_dials.insert(remote, id);
        Some(id)
    }

    /// Marks an outbound dial as connected.
    pub fn connected(&mut self, id: LinkId) -> bool {
        match self.links.get_mut(&id) {
            Some(link) => {
                link.connected = true;
                true
            }
            None => false,
        }
    }

    /// Feeds raw bytes into a link's decoder and returns every complete
    /// frame body.
    pub fn ingest(&mut self, id: LinkId, bytes: &[u8]) -> Result<Vec<Vec<u8>>, FrameError> {
        let Some(link) = self.links.get_mut(&id) else {
            return Ok(Vec::new());
        };
        link.decoder.push(bytes);

        let mut frames = Vec::new();
        while let Some(frame) = link.decoder.next_frame()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Promotes a link to complete after the remote's HELLO.
    ///
    /// Returns the outcome plus any deferred peers whose pending sibling
    /// turned out to be somebody else.
    pub fn complete_handshake(
        &mut self,
        id: LinkId,
        peer: PeerId,
        name: &str,
        listen_port: u16,
    ) -> Option<(Handshake, Vec<PeerId>)> {
        let link = self.links.get_mut(&id)?;
        if link.handshake_complete {
            return Some((Handshake::Repeat, Vec::new()));
        }
        link.peer_id = Some(peer.clone());
        link.name = name.to_string();
        link.listen_port = listen_port;
        link.handshake_complete = true;
        let origin = link.origin;
        let remote = link.remote_addr;
        if self.pending_dials.get(&remote) == Some(&id) {
            self.pending_dials.remove(&remote);
        }

        let expired: Vec<PeerId> = self
            .deferred
            .iter()
            .filter(|(p, sibling)| **sibling == id && **p != peer)
            .map(|(p, _)| p.clone())
            .collect();
        for p in &expired {
            self.deferred.remove(p);
        }

        if self.deferred.remove(&peer).is_some() {
            self.by_peer.insert(peer, id);
            return Some((Handshake::Rebound, expired));
        }

        let Some(&existing) = self.by_peer.get(&peer) else {
            self.by_peer.insert(peer, id);
            return Some((Handshake::New, expired));
        };

        let existing_origin = self.links.get(&existing).map(|l| l.origin);
        let keep_new = match existing_origin {
            Some(existing_origin) if existing_origin != origin => {
                origin == self.preferred_origin(&peer)
            }
            Some(_) => false,
            None => true,
        };

        let outcome = if keep_new {
            self.by_peer.insert(peer.clone(), id);
            self.drop_link(existing);
            Handshake::Duplicate {
                closed: existing,
                canonical_changed: true,
            }
        } else {
            self.drop_link(id);
            Handshake::Duplicate {
                closed: id,
                canonical_changed: false,
            }
        };
        tracing::debug!("Duplicate link to {} resolved: {:?}", peer, outcome);
        Some((outcome, expired))
    }

    /// The smaller id keeps the link it initiated.
    fn preferred_origin(&self, peer: &PeerId) -> LinkOrigin {
        if self.local_id < *peer {
            LinkOrigin::Outbound
        } else {
            LinkOrigin::Inbound
        }
    }

    fn drop_link(&mut self, id: LinkId) {
        if let Some(link) = self.links.remove(&id) {
            if self.pending_dials.get(&link.remote_addr) == Some(&id) {
                self.pending_dials.remove(&link.remote_addr);
            }
        }
    }

    /// Removes a link from the table and reports what it meant.
    pub fn close(&mut self, id: LinkId) -> Closed {
        let Some(link) = self.links.remove(&id) else {
            return Closed::Unknown;
        };
        if self.pending_dials.get(&link.remote_addr) == Some(&id) {
            self.pending_dials.remove(&link.remote_addr);
        }

        if !link.handshake_complete {
            let orphaned = self
                .deferred
                .iter()
                .find(|(_, sibling)| **sibling == id)
                .map(|(peer, _)| peer.clone());
            if let Some(peer) = orphaned {
                self.deferred.remove(&peer);
                return Closed::DeferralExpired(peer);
            }
            return Closed::Pending;
        }

        let Some(peer) = link.peer_id else {
            return Closed::Pending;
        };
        if self.by_peer.get(&peer) != Some(&id) {
            return Closed::Superseded;
        }
        self.by_peer.remove(&peer);

        let sibling = self
            .links
            .values()
            .filter(|other| !other.handshake_complete)
            .find(|other| {
                other.peer_id.as_ref() == Some(&peer)
                    || other.remote_addr.ip() == link.remote_addr.ip()
            })
            .map(|other| other.id);

        match sibling {
            Some(sibling) => {
                tracing::debug!("Deferring removal of {} until {} settles", peer, sibling);
                self.deferred.insert(peer.clone(), sibling);
                Closed::Deferred(peer)
            }
            None => Closed::Canonical(peer),
        }
    }

    /// Canonical links of every peer except `exclude`, as `PEER_LIST` entries.
    pub fn peer_list_for(&self, exclude: &PeerId) -> Vec<PeerEntry> {
        let mut entries: Vec<PeerEntry> = self
            .by_peer
            .iter()
            .filter(|(peer, _)| *peer != exclude)
            .filter_map(|(peer, id)| self.links.get(id).map(|link| (peer, link)))
            .map(|(peer, link)| PeerEntry {
                uuid: peer.clone(),
                name: link.name.clone(),
                ip: link.remote_addr.ip().to_string(),
                port: link.listen_port,
            })
            .collect();
        entries.sort_by(|a, b| a.uuid.cmp(&b.uuid));
        entries
    }

    /// Entries we hold no link to and should dial.
    pub fn missing(&self, entries: &[PeerEntry]) -> Vec<(SocketAddr, PeerId)> {
        entries
            .iter()
            .filter(|entry| entry.uuid != self.local_id)
            .filter(|entry| !self.by_peer.contains_key(&entry.uuid))
            .filter(|entry| !self.deferred.contains_key(&entry.uuid))
            .filter_map(|entry| match entry.ip.parse::<IpAddr>() {
                Ok(ip) => Some((SocketAddr::new(ip, entry.port), entry.uuid.clone())),
                Err(_) => {
                    tracing::warn!("Ignoring peer {} with bad address {:?}", entry.uuid, entry.ip);
                    None
                }
            })
            .collect()
    }

    pub fn link(&self, id: LinkId) -> Option<&PeerLink> {
        self.links.get(&id)
    }

    pub fn link_for(&self, peer: &PeerId) -> Option<LinkId> {
        self.by_peer.get(peer).copied()
    }

    /// Handshaken identity of a link.
    pub fn peer_of(&self, id: LinkId) -> Option<&PeerId> {
        self.links
            .get(&id)
            .filter(|link| link.handshake_complete)
            .and_then(|link| link.peer_id.as_ref())
    }

    pub fn is_linked(&self, peer: &PeerId) -> bool {
        self.by_peer.contains_key(peer)
    }

    /// Canonical link of every connected peer, sorted by link id.
    pub fn canonical_links(&self) -> Vec<LinkId> {
        let mut ids: Vec<LinkId> = self.by_peer.values().copied().collect();
        ids.sort();
        ids
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// Drops everything and returns the ids the caller must close.
    pub fn clear(&mut self) -> Vec<LinkId> {
        let mut ids: Vec<LinkId> = self.links.keys().copied().collect();
        ids.sort();
        self.links.clear();
        self.by_peer.clear();
        self.pending_dials.clear();
        self.deferred.clear();
        ids
    }
}
