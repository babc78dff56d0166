//! In-memory LAN for driving several room controllers deterministically.
//!
//! Every peer gets the address `10.0.0.<n>:52765`. Effects are routed
//! through one FIFO queue, so bytes written before a close always arrive
//! before the close. Time only moves when a test calls [`SimNet::advance`].

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use rapidtexter::networking::peer::{LinkId, PeerId};
use rapidtexter::networking::{
    Command, ControllerParams, Effect, EventSink, NetEvent, NetworkConfig, Packet, RoomController,
};
use rapidtexter::{FixedText, ManualClock};
use tokio::sync::broadcast::{self, error::TryRecvError};

pub const PORT: u16 = 52765;
pub const RACE_TEXT: &str = "the quick brown fox jumps over the lazy dog";

const MAX_STEPS: usize = 200_000;

pub struct SimPeer {
    pub controller: RoomController,
    events: broadcast::Receiver<NetEvent>,
    ip: Ipv4Addr,
    online: bool,
    muted: bool,
}

enum Work {
    Dial {
        from: usize,
        link: LinkId,
        addr: SocketAddr,
    },
    Bytes {
        to: usize,
        link: LinkId,
        bytes: Vec<u8>,
    },
    Eof {
        to: usize,
        link: LinkId,
    },
    Datagram {
        to: usize,
        payload: Vec<u8>,
        from: SocketAddr,
    },
}

pub struct SimNet {
    pub clock: ManualClock,
    peers: Vec<SimPeer>,
    wires: HashMap<(usize, LinkId), (usize, LinkId)>,
    queue: VecDeque<Work>,
    next_ephemeral: u16,
    parked_targets: HashSet<Ipv4Addr>,
    parked: Vec<Work>,
}

pub fn test_config() -> NetworkConfig {
    NetworkConfig {
        event_capacity: 65_536,
        ..NetworkConfig::default()
    }
}

impl SimNet {
    pub fn new() -> Self {
        let clock = ManualClock::new();
        clock.set(1_000);
        Self {
            clock,
            peers: Vec::new(),
            wires: HashMap::new(),
            queue: VecDeque::new(),
            next_ephemeral: 40_000,
            parked_targets: HashSet::new(),
            parked: Vec::new(),
        }
    }

    pub fn add_peer(&mut self, id: &str, name: &str) -> usize {
        self.add_peer_with(id, name, test_config())
    }

    pub fn add_peer_with(&mut self, id: &str, name: &str, config: NetworkConfig) -> usize {
        let index = self.peers.len();
        let events = EventSink::new(config.event_capacity);
        let controller = RoomController::new(ControllerParams {
            config,
            local_id: PeerId::from(id),
            player_name: name.to_string(),
            language: "en".to_string(),
            listen_port: PORT,
            interfaces: Vec::new(),
            clock: Arc::new(self.clock.clone()),
            text_source: Box::new(FixedText::new(RACE_TEXT)),
            events: events.clone(),
        });
        self.peers.push(SimPeer {
            controller,
            events: events.subscribe(),
            ip: Ipv4Addr::new(10, 0, 0, index as u8 + 1),
            online: true,
            muted: false,
        });
        index
    }

    pub fn now(&self) -> u64 {
        use rapidtexter::Clock;
        self.clock.now_ms()
    }

    pub fn peer(&self, i: usize) -> &RoomController {
        &self.peers[i].controller
    }

    pub fn id(&self, i: usize) -> PeerId {
        self.peers[i].controller.local_id().clone()
    }

    pub fn ip(&self, i: usize) -> Ipv4Addr {
        self.peers[i].ip
    }

    /// Drains every notification peer `i` emitted so far.
    pub fn events(&mut self, i: usize) -> Vec<NetEvent> {
        let mut events = Vec::new();
        loop {
            match self.peers[i].events.try_recv() {
                Ok(event) => events.push(event),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(_) => break,
            }
        }
        events
    }

    pub fn command(&mut self, i: usize, command: Command) {
        self.peers[i].controller.handle_command(command);
        self.settle();
    }

    pub fn host(&mut self, i: usize) {
        self.command(i, Command::CreateRoom);
    }

    pub fn join(&mut self, i: usize, host: usize) {
        let ip = self.ip(host).to_string();
        self.command(i, Command::JoinRoom { ip, port: PORT });
    }

    /// Makes `i` dial `j` directly, as if `j` appeared in a peer list.
    pub fn dial(&mut self, i: usize, j: usize) -> bool {
        let addr = SocketAddr::new(IpAddr::V4(self.ip(j)), PORT);
        let expected = Some(self.id(j));
        self.peers[i].controller.connect_to_peer(addr, expected)
    }

    /// Drops every frame `i` writes from now on; its sockets stay open.
    pub fn mute(&mut self, i: usize) {
        self.peers[i].muted = true;
    }

    /// Holds back every dial towards `j` until [`SimNet::release_dials`].
    pub fn park_dials_to(&mut self, j: usize) {
        self.parked_targets.insert(self.ip(j));
    }

    /// Lets parked dials through, all at once and in the order they were made.
    pub fn release_dials(&mut self) {
        self.parked_targets.clear();
        for work in self.parked.drain(..) {
            self.queue.push_back(work);
        }
        self.settle();
    }

    /// Peer `i` vanishes: its sockets close under the other peers.
    pub fn crash(&mut self, i: usize) {
        self.peers[i].online = false;
        let ends: Vec<(usize, LinkId)> = self
            .wires
            .keys()
            .filter(|(peer, _)| *peer == i)
            .copied()
            .collect();
        for end in ends {
            if let Some(other) = self.wires.remove(&end) {
                self.wires.remove(&other);
                self.queue.push_back(Work::Eof {
                    to: other.0,
                    link: other.1,
                });
            }
        }
        self.settle();
    }

    /// Writes `packet` on `i`'s link to `j`, bypassing `i`'s controller.
    pub fn send_raw(&mut self, i: usize, j: usize, packet: Packet) {
        let link = self.peers[i]
            .controller
            .mesh()
            .link_for(&self.id(j))
            .expect("no link between the peers");
        let (to, far) = self.wired(i, link).expect("link is not wired");
        let bytes = packet.to_frame().expect("packet encodes");
        self.queue.push_back(Work::Bytes {
            to,
            link: far,
            bytes,
        });
        self.settle();
    }

    /// The far end of link `link` on peer `i`.
    pub fn wired(&self, i: usize, link: LinkId) -> Option<(usize, LinkId)> {
        self.wires.get(&(i, link)).copied()
    }

    /// Moves time forward, firing every timer in deadline order.
    pub fn advance(&mut self, ms: u64) {
        let target = self.now() + ms;
        loop {
            let next = self
                .peers
                .iter()
                .filter(|p| p.online)
                .filter_map(|p| p.controller.next_deadline())
                .min();
            match next {
                Some(deadline) if deadline <= target => {
                    if deadline > self.now() {
                        self.clock.set(deadline);
                    }
                    for peer in self.peers.iter_mut().filter(|p| p.online) {
                        peer.controller.poll_timers();
                    }
                    self.settle();
                }
                _ => break,
            }
        }
        self.clock.set(target);
        self.settle();
    }

    /// Delivers queued work until the network is quiet.
    pub fn settle(&mut self) {
        for _ in 0..MAX_STEPS {
            for i in 0..self.peers.len() {
                let effects = self.peers[i].controller.take_effects();
                for effect in effects {
                    self.route(i, effect);
                }
            }
            match self.queue.pop_front() {
                Some(work) => self.process(work),
                None => return,
            }
        }
        panic!("network did not settle");
    }

    fn route(&mut self, from: usize, effect: Effect) {
        match effect {
            Effect::Dial { link, addr } => {
                let work = Work::Dial { from, link, addr };
                match addr.ip() {
                    IpAddr::V4(ip) if self.parked_targets.contains(&ip) => self.parked.push(work),
                    _ => self.queue.push_back(work),
                }
            }
            Effect::Send { link, frame } => {
                if self.peers[from].muted || !self.peers[from].online {
                    return;
                }
                if let Some(&(to, far)) = self.wires.get(&(from, link)) {
                    self.queue.push_back(Work::Bytes {
                        to,
                        link: far,
                        bytes: frame,
                    });
                }
            }
            Effect::Close { link } => {
                if let Some((to, far)) = self.wires.remove(&(from, link)) {
                    self.wires.remove(&(to, far));
                    self.queue.push_back(Work::Eof { to, link: far });
                }
            }
            Effect::Announce { payload, target } => {
                let source = SocketAddr::new(IpAddr::V4(self.peers[from].ip), target.port());
                for to in 0..self.peers.len() {
                    if to != from && self.peers[to].online {
                        self.queue.push_back(Work::Datagram {
                            to,
                            payload: payload.clone(),
                            from: source,
                        });
                    }
                }
            }
        }
    }

    fn process(&mut self, work: Work) {
        match work {
            Work::Dial { from, link, addr } => {
                let target = self.peers.iter().position(|p| {
                    p.online && IpAddr::V4(p.ip) == addr.ip() && addr.port() == PORT
                });
                let Some(to) = target else {
                    // Nobody there: the SYN goes unanswered.
                    return;
                };
                let source = SocketAddr::new(IpAddr::V4(self.peers[from].ip), self.next_ephemeral);
                self.next_ephemeral += 1;

                match self.peers[to].controller.accept_inbound(source) {
                    Some(inbound) => {
                        self.wires.insert((from, link), (to, inbound));
                        self.wires.insert((to, inbound), (from, link));
                        if !self.peers[from].controller.link_connected(link) {
                            self.wires.remove(&(from, link));
                            self.wires.remove(&(to, inbound));
                            self.queue.push_back(Work::Eof { to, link: inbound });
                        }
                    }
                    None => self.peers[from]
                        .controller
                        .dial_failed(link, "connection refused"),
                }
            }
            Work::Bytes { to, link, bytes } => {
                if self.peers[to].online {
                    self.peers[to].controller.bytes_received(link, &bytes);
                }
            }
            Work::Eof { to, link } => {
                if self.peers[to].online {
                    self.peers[to].controller.link_closed(link);
                }
            }
            Work::Datagram { to, payload, from } => {
                self.peers[to].controller.datagram_received(&payload, from);
            }
        }
    }

    // ---- Race helpers ----------------------------------------------------

    /// Host starts; guests answer the ready check; countdown runs out.
    pub fn run_to_race(&mut self, host: usize) {
        self.command(host, Command::StartCountdown);
        let seconds = u64::from(test_config().countdown_seconds);
        self.advance(seconds * 1000);
    }

    /// Peer `i` types the whole text and finishes.
    pub fn finish(&mut self, i: usize, wpm: u32) {
        let total = self.peer(i).game_text().chars().count() as u32;
        self.command(
            i,
            Command::UpdateProgress {
                position: total,
                total,
                wpm,
            },
        );
        self.command(
            i,
            Command::FinishRace {
                wpm,
                accuracy: 98.0,
                errors: 1,
            },
        );
    }

    /// Peer `i` reports partial progress.
    pub fn type_some(&mut self, i: usize, position: u32, wpm: u32) {
        let total = self.peer(i).game_text().chars().count() as u32;
        self.command(
            i,
            Command::UpdateProgress {
                position,
                total,
                wpm,
            },
        );
    }
}

pub fn has_event(events: &[NetEvent], predicate: impl Fn(&NetEvent) -> bool) -> bool {
    events.iter().any(predicate)
}
