//! Sans-IO room controller.
//!
//! One [`RoomController`] holds all multiplayer state of a participant and
//! runs on a single logical thread. The driver feeds it commands, link
//! events, datagrams and timer wake-ups; it answers with [`Effect`]s to
//! perform and [`NetEvent`]s for the UI.

use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;

use super::control::{Command, EventSink, NetEvent, Snapshot};
use super::discovery::{RoomDirectory, Upsert};
use super::interfaces::{self, NetworkInterface};
use super::mesh::{Closed, Handshake, Mesh};
use super::peer::{LinkId, PeerId};
use super::protocol::{DiscoveryAnnounce, Hello, Message, Packet, DISCOVERY_TYPE};
use super::session::{RoomRegistry, SessionState};
use super::sync::ProgressSync;
use super::NetworkConfig;
use crate::clock::{Clock, Timer, TimerTable};
use crate::racing::{RaceAction, RaceOrchestrator, RacePhase, RaceSettings};
use crate::text::TextSource;

/// I/O the driver must perform, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Open a TCP connection for an outbound link.
    Dial { link: LinkId, addr: SocketAddr },
    /// Write one frame to a link.
    Send { link: LinkId, frame: Vec<u8> },
    /// Close a link once its queued frames are written.
    Close { link: LinkId },
    /// Send a discovery datagram.
    Announce { payload: Vec<u8>, target: SocketAddrV4 },
}

/// Everything a controller needs at construction.
pub struct ControllerParams {
    pub config: NetworkConfig,
    pub local_id: PeerId,
    pub player_name: String,
    pub language: String,
    /// Port our TCP listener is actually bound to.
    pub listen_port: u16,
    pub interfaces: Vec<NetworkInterface>,
    pub clock: Arc<dyn Clock>,
    pub text_source: Box<dyn TextSource>,
    pub events: EventSink,
}

pub struct RoomController {
    config: NetworkConfig,
    local_id: PeerId,
    player_name: String,
    language: String,
    listen_port: u16,
    local_ip: Ipv4Addr,
    interfaces: Vec<NetworkInterface>,
    selected_interface: Option<Ipv4Addr>,
    clock: Arc<dyn Clock>,
    events: EventSink,
    state: SessionState,
    host_id: Option<PeerId>,
    join_link: Option<LinkId>,
    join_target: Option<SocketAddr>,
    mesh: Mesh,
    registry: RoomRegistry,
    race: RaceOrchestrator,
    progress: ProgressSync,
    rooms: RoomDirectory,
    scanning: bool,
    timers: TimerTable,
    effects: Vec<Effect>,
    last_error: Option<String>,
}

impl RoomController {
    pub fn new(params: ControllerParams) -> Self {
        let config = params.config;
        let settings = RaceSettings {
            countdown_seconds: config.countdown_seconds,
            ready_check_timeout_ms: config.ready_check_timeout_ms,
            word_count: config.race_word_count,
        };
        let local_ip = interfaces::preferred_local_ip(&params.interfaces);

        Self {
            mesh: Mesh::new(
                params.local_id.clone(),
                config.max_players.saturating_sub(1),
                config.max_frame_len,
            ),
            registry: RoomRegistry::new(params.local_id.clone(), params.events.clone()),
            race: RaceOrchestrator::new(params.local_id.clone(), settings, params.text_source),
            rooms: RoomDirectory::new(config.max_players as u32),
            progress: ProgressSync::new(),
            timers: TimerTable::new(),
            effects: Vec::new(),
            state: SessionState::Idle,
            host_id: None,
            join_link: None,
            join_target: None,
            scanning: false,
            selected_interface: None,
            last_error: None,
            local_id: params.local_id,
            player_name: params.player_name,
            language: params.language,
            listen_port: params.listen_port,
            local_ip,
            interfaces: params.interfaces,
            clock: params.clock,
            events: params.events,
            config,
        }
    }

    fn now(&self) -> u64 {
        self.clock.now_ms()
    }

    pub fn local_id(&self) -> &PeerId {
        &self.local_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_host(&self) -> bool {
        self.state == SessionState::Hosting
    }

    pub fn host_id(&self) -> Option<&PeerId> {
        self.host_id.as_ref()
    }

    pub fn phase(&self) -> RacePhase {
        self.race.phase()
    }

    pub fn game_text(&self) -> &str {
        self.race.text()
    }

    pub fn registry(&self) -> &RoomRegistry {
        &self.registry
    }

    pub fn mesh(&self) -> &Mesh {
        &self.mesh
    }

    pub fn rooms(&self) -> &RoomDirectory {
        &self.rooms
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<NetEvent> {
        self.events.subscribe()
    }

    /// Earliest armed timer deadline.
    pub fn next_deadline(&self) -> Option<u64> {
        self.timers.next_deadline()
    }

    /// Drains pending effects.
    pub fn take_effects(&mut self) -> Vec<Effect> {
        std::mem::take(&mut self.effects)
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            local_id: self.local_id.clone(),
            player_name: self.player_name.clone(),
            state: self.state,
            is_host: self.is_host(),
            host_id: self.host_id.clone(),
            phase: self.race.phase(),
            countdown_remaining: self.race.countdown_remaining(self.now()),
            play_again_pending: self.race.invite_pending(),
            game_text: self.race.text().to_string(),
            game_language: self.race.language().to_string(),
            players: self.registry.snapshot(),
            scanning: self.scanning,
            rooms: self.rooms.rooms(),
            rankings: self.race.rankings().to_vec(),
            interfaces: self.interfaces.clone(),
            selected_interface: self.selected_interface,
            last_error: self.last_error.clone(),
        }
    }

    fn emit(&self, event: NetEvent) {
        self.events.emit(event);
    }

    fn emit_room_state(&self) {
        self.emit(NetEvent::RoomStateChanged {
            state: self.state,
            is_host: self.is_host(),
        });
    }

    // ---- Outbound packets ------------------------------------------------

    fn send(&mut self, link: LinkId, message: Message) {
        let kind = message.packet_type();
        match Packet::new(self.local_id.clone(), message).to_frame() {
            Ok(frame) => self.effects.push(Effect::Send { link, frame }),
            Err(e) => tracing::warn!("Failed to encode {}: {}", kind.as_str(), e),
        }
    }

    fn broadcast(&mut self, message: Message) {
        self.broadcast_except(message, None);
    }

    fn broadcast_except(&mut self, message: Message, except: Option<LinkId>) {
        let kind = message.packet_type();
        let frame = match Packet::new(self.local_id.clone(), message).to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("Failed to encode {}: {}", kind.as_str(), e);
                return;
            }
        };
        for link in self.mesh.canonical_links() {
            if Some(link) != except {
                self.effects.push(Effect::Send {
                    link,
                    frame: frame.clone(),
                });
            }
        }
    }

    fn send_hello(&mut self, link: LinkId) {
        let hello = Hello {
            name: self.player_name.clone(),
            port: self.listen_port,
            is_room_creator: self.is_host(),
            host_uuid: self.host_id.clone().unwrap_or_else(|| PeerId::from("")),
        };
        self.send(link, Message::Hello(hello));
    }

    fn send_announce(&mut self) {
        let announce = DiscoveryAnnounce::new(
            self.local_id.clone(),
            self.player_name.clone(),
            self.listen_port,
            self.registry.len() as u32,
            self.race.phase().room_status(),
        );
        match announce.to_bytes() {
            Ok(payload) => {
                let ip = interfaces::broadcast_target(self.selected_interface, &self.interfaces);
                let target = SocketAddrV4::new(ip, self.config.discovery_port);
                self.effects.push(Effect::Announce { payload, target });
            }
            Err(e) => tracing::warn!("Failed to encode announcement: {}", e),
        }
    }

    fn close_link(&mut self, link: LinkId) -> Closed {
        self.effects.push(Effect::Close { link });
        self.mesh.close(link)
    }

    fn apply(&mut self, actions: Vec<RaceAction>) {
        for action in actions {
            match action {
                RaceAction::Broadcast(message) => self.broadcast(message),
                RaceAction::SendToHost(message) => {
                    let link = self.host_id.as_ref().and_then(|h| self.mesh.link_for(h));
                    match link {
                        Some(link) => self.send(link, message),
                        None => tracing::warn!("No link to the host"),
                    }
                }
                RaceAction::Notify(event) => self.emit(event),
                RaceAction::Arm(timer, deadline) => self.timers.arm(timer, deadline),
                RaceAction::Disarm(timer) => self.timers.disarm(timer),
                RaceAction::StartProgress => {
                    self.progress.start();
                    let next = self.now() + self.config.progress_interval_ms;
                    self.timers.arm(Timer::ProgressTick, next);
                }
                RaceAction::StopProgress => {
                    self.progress.stop();
                    self.timers.disarm(Timer::ProgressTick);
                }
                RaceAction::Leave => self.teardown(None),
            }
        }
    }

    // ---- Commands --------------------------------------------------------

    pub fn handle_command(&mut self, command: Command) {
        tracing::trace!("Command {:?}", command);
        match command {
            Command::CreateRoom => self.create_room(),
            Command::CloseRoom | Command::LeaveRoom => {
                if self.state != SessionState::Idle {
                    self.teardown(None);
                }
            }
            Command::StartScanning => self.start_scanning(),
            Command::StopScanning => self.stop_scanning(),
            Command::RefreshRooms => {
                self.rooms.clear();
                self.emit(NetEvent::RoomsChanged(Vec::new()));
                self.start_scanning();
            }
            Command::JoinRoom { ip, port } => self.join_room(&ip, port),
            Command::SetPlayerName(name) => {
                if name != self.player_name {
                    self.player_name = name.clone();
                    let local = self.local_id.clone();
                    self.registry.rename(&local, &name);
                    self.emit(NetEvent::PlayerNameChanged(name));
                }
            }
            Command::SetSelectedInterface(ip) => self.select_interface(&ip),
            Command::SetGameLanguage(language) => self.set_language(language),
            Command::SetGameText(text) => {
                let actions = self.race.set_text(text);
                self.apply(actions);
            }
            Command::RefreshGameText => {
                let actions = self.race.refresh_text();
                self.apply(actions);
            }
            Command::StartCountdown => {
                if !self.is_host() {
                    tracing::debug!("Ignoring startCountdown: not hosting");
                    return;
                }
                let now = self.now();
                let actions = self.race.start_countdown(&mut self.registry, now);
                self.apply(actions);
            }
            Command::UpdateProgress {
                position,
                total,
                wpm,
            } => self.update_progress(position, total, wpm),
            Command::FinishRace {
                wpm,
                accuracy,
                errors,
            } => self.finish_race(wpm, accuracy, errors),
            Command::KickPlayer(id) => self.kick(id),
            Command::SendPlayAgainInvite => {
                let actions = self.race.send_play_again_invite(&mut self.registry);
                self.apply(actions);
            }
            Command::AcceptPlayAgain => {
                let actions = self.race.accept_play_again(&mut self.registry);
                self.apply(actions);
            }
            Command::DeclinePlayAgain => {
                let actions = self.race.decline_play_again();
                self.apply(actions);
            }
            Command::ReturnToLobby => {
                if self.state.in_room() {
                    let actions = self.race.return_to_lobby(&mut self.registry);
                    self.apply(actions);
                }
            }
        }
    }

    fn create_room(&mut self) {
        if self.state != SessionState::Idle {
            tracing::debug!("Cannot create a room while {:?}", self.state);
            return;
        }
        self.stop_scanning();
        self.last_error = None;
        self.state = SessionState::Hosting;
        self.host_id = Some(self.local_id.clone());
        self.registry.set_host(self.host_id.clone());
        let local = self.local_id.clone();
        self.registry.insert(local, &self.player_name.clone());

        let language = self.language.clone();
        let actions = self.race.open(true, &language);
        self.apply(actions);

        tracing::info!("Hosting room as {} on port {}", self.player_name, self.listen_port);
        self.emit_room_state();

        self.send_announce();
        let next = self.now() + self.config.announce_interval_ms;
        self.timers.arm(Timer::Announce, next);
    }

    fn start_scanning(&mut self) {
        if self.scanning {
            return;
        }
        self.scanning = true;
        let next = self.now() + self.config.cleanup_interval_ms();
        self.timers.arm(Timer::RoomCleanup, next);
        self.emit(NetEvent::ScanningChanged(true));
    }

    fn stop_scanning(&mut self) {
        if !self.scanning {
            return;
        }
        self.scanning = false;
        self.timers.disarm(Timer::RoomCleanup);
        self.emit(NetEvent::ScanningChanged(false));
    }

    fn select_interface(&mut self, ip: &str) {
        let selected = if ip.trim().is_empty() {
            None
        } else {
            match ip.trim().parse::<Ipv4Addr>() {
                Ok(ip) => Some(ip),
                Err(_) => {
                    tracing::warn!("Ignoring invalid interface address {:?}", ip);
                    return;
                }
            }
        };
        if selected != self.selected_interface {
            self.selected_interface = selected;
            self.emit(NetEvent::SelectedInterfaceChanged(selected));
        }
    }

    fn set_language(&mut self, language: String) {
        match self.state {
            SessionState::Idle | SessionState::Joining => {
                if language != self.language {
                    self.language = language.clone();
                    self.emit(NetEvent::GameLanguageChanged(language));
                }
            }
            SessionState::Hosting => {
                self.language = language.clone();
                let actions = self.race.set_language(language);
                self.apply(actions);
            }
            SessionState::Joined => {
                tracing::debug!("Ignoring setGameLanguage: only the host may do that");
            }
        }
    }

    fn update_progress(&mut self, position: u32, total: u32, wpm: u32) {
        if self.race.phase() != RacePhase::Racing || !self.progress.is_active() {
            return;
        }
        self.progress.update(position, total, wpm);
        if !self.progress.is_finished() {
            let local = self.local_id.clone();
            self.registry
                .update_progress(&local, self.progress.latest());
        }
    }

    fn finish_race(&mut self, wpm: u32, accuracy: f64, errors: u32) {
        if !self.progress.is_active() || self.progress.is_finished() {
            tracing::debug!("Ignoring finishRace: not racing");
            return;
        }
        let now = self.now();
        let local = self.local_id.clone();
        let Some(position) = self
            .race
            .local_finish(wpm, accuracy, &mut self.registry, now)
        else {
            return;
        };
        self.registry.set_errors(&local, errors);

        if let Some(message) = self.progress.finish(wpm, accuracy, position) {
            self.broadcast(message);
        }
        self.timers.disarm(Timer::ProgressTick);
        tracing::info!("Finished in position {} at {} wpm", position, wpm);

        let actions = self.race.check_completion(&mut self.registry);
        self.apply(actions);
    }

    fn kick(&mut self, id: PeerId) {
        if !self.is_host() {
            tracing::debug!("Ignoring kickPlayer: only the host may do that");
            return;
        }
        if id == self.local_id {
            return;
        }
        let Some(link) = self.mesh.link_for(&id) else {
            tracing::debug!("Cannot kick {}: not connected", id);
            return;
        };
        let name = self
            .registry
            .get(&id)
            .map(|p| p.name.clone())
            .unwrap_or_default();

        tracing::info!("Kicking {} ({})", name, id);
        self.send(link, Message::Kick { uuid: id.clone() });
        self.broadcast_except(
            Message::PlayerLeft {
                uuid: id.clone(),
                name,
            },
            Some(link),
        );
        self.close_link(link);
        self.remove_player(&id);
    }

    // ---- Joining ---------------------------------------------------------

    fn is_self_endpoint(&self, addr: SocketAddr) -> bool {
        if addr.port() != self.listen_port {
            return false;
        }
        match addr.ip() {
            IpAddr::V4(ip) => ip == self.local_ip || ip.is_loopback() || ip.is_unspecified(),
            IpAddr::V6(ip) => ip.is_loopback() || ip.is_unspecified(),
        }
    }

    fn join_room(&mut self, ip: &str, port: u16) {
        if self.state != SessionState::Idle {
            tracing::debug!("Cannot join while {:?}", self.state);
            return;
        }
        let Ok(host_ip) = ip.trim().parse::<IpAddr>() else {
            let reason = format!("Invalid IP address format: {}", ip);
            self.last_error = Some(reason.clone());
            self.emit(NetEvent::JoinFailed(reason));
            return;
        };
        let addr = SocketAddr::new(host_ip, port);
        if self.is_self_endpoint(addr) {
            let reason = "Cannot join your own room".to_string();
            self.last_error = Some(reason.clone());
            self.emit(NetEvent::JoinFailed(reason));
            return;
        }

        self.stop_scanning();
        self.last_error = None;
        self.state = SessionState::Joining;
        self.emit_room_state();

        let Some(link) = self.mesh.open_outbound(addr, None) else {
            self.fail_join(format!("Could not connect to {}", addr));
            return;
        };
        let local = self.local_id.clone();
        self.registry.insert(local, &self.player_name.clone());

        tracing::info!("Joining room at {}", addr);
        self.join_link = Some(link);
        self.join_target = Some(addr);
        self.effects.push(Effect::Dial { link, addr });
        let deadline = self.now() + self.config.join_timeout_ms;
        self.timers.arm(Timer::JoinTimeout, deadline);
    }

    fn fail_join(&mut self, reason: String) {
        tracing::warn!("Join failed: {}", reason);
        self.reset_to_idle();
        self.last_error = Some(reason.clone());
        self.emit(NetEvent::JoinFailed(reason));
        self.emit_room_state();
    }

    /// Dials a peer directly. Refuses our own endpoint, a peer we already
    /// hold a link to, and an address with a dial in flight.
    pub fn connect_to_peer(&mut self, addr: SocketAddr, expected: Option<PeerId>) -> bool {
        if self.is_self_endpoint(addr) {
            tracing::debug!("Not dialling our own endpoint {}", addr);
            return false;
        }
        match self.mesh.open_outbound(addr, expected) {
            Some(link) => {
                tracing::debug!("Dialling {} on {}", addr, link);
                self.effects.push(Effect::Dial { link, addr });
                true
            }
            None => false,
        }
    }

    // ---- Teardown --------------------------------------------------------

    fn reset_to_idle(&mut self) {
        for link in self.mesh.clear() {
            self.effects.push(Effect::Close { link });
        }
        self.registry.clear();
        let actions = self.race.reset();
        self.apply(actions);
        self.progress.stop();
        for timer in [
            Timer::Announce,
            Timer::JoinTimeout,
            Timer::ReadyCheckTimeout,
            Timer::CountdownEnd,
            Timer::ProgressTick,
        ] {
            self.timers.disarm(timer);
        }
        self.state = SessionState::Idle;
        self.host_id = None;
        self.join_link = None;
        self.join_target = None;
    }

    /// Leaves the room and returns to Idle, surfacing `error` if given.
    fn teardown(&mut self, error: Option<String>) {
        if self.state == SessionState::Joining {
            self.fail_join("Join cancelled".to_string());
            return;
        }
        tracing::info!("Leaving room");
        self.reset_to_idle();
        if let Some(error) = error {
            self.last_error = Some(error.clone());
            self.emit(NetEvent::ConnectionError(error));
        }
        self.emit_room_state();
    }

    // ---- Link events -----------------------------------------------------

    /// A TCP connection was accepted. `None` means refuse and close it.
    pub fn accept_inbound(&mut self, remote: SocketAddr) -> Option<LinkId> {
        if !self.state.in_room() {
            tracing::debug!("Refusing connection from {}: not in a room", remote);
            return None;
        }
        if self.is_host() && !self.race.accepts_new_players() {
            tracing::info!(
                "Refusing connection from {}: race is {}",
                remote,
                self.race.phase().as_str()
            );
            return None;
        }
        let link = self.mesh.open_inbound(remote)?;
        tracing::debug!("Accepted {} from {}", link, remote);
        self.send_hello(link);
        Some(link)
    }

    /// An outbound dial connected. `false` means the link is unknown and the
    /// socket should be dropped.
    pub fn link_connected(&mut self, link: LinkId) -> bool {
        if !self.mesh.connected(link) {
            return false;
        }
        self.send_hello(link);
        true
    }

    pub fn dial_failed(&mut self, link: LinkId, reason: &str) {
        if self.join_link == Some(link) {
            let target = self
                .join_target
                .map(|a| a.to_string())
                .unwrap_or_default();
            self.fail_join(format!("Could not connect to {}: {}", target, reason));
            return;
        }
        tracing::debug!("Dial on {} failed: {}", link, reason);
        let closed = self.mesh.close(link);
        self.handle_closed(closed);
    }

    pub fn link_closed(&mut self, link: LinkId) {
        if self.join_link == Some(link) && self.state == SessionState::Joining {
            self.fail_join("Connection closed by host".to_string());
            return;
        }
        let closed = self.mesh.close(link);
        self.handle_closed(closed);
    }

    fn handle_closed(&mut self, closed: Closed) {
        match closed {
            Closed::Canonical(peer) | Closed::DeferralExpired(peer) => self.peer_gone(peer),
            Closed::Deferred(peer) => {
                tracing::debug!("Link to {} closed, waiting on its sibling", peer)
            }
            Closed::Superseded | Closed::Pending | Closed::Unknown => {}
        }
    }

    fn peer_gone(&mut self, peer: PeerId) {
        tracing::info!("Peer {} disconnected", peer);
        let was_host = self.host_id.as_ref() == Some(&peer);
        self.remove_player(&peer);
        if was_host && self.state == SessionState::Joined {
            self.teardown(Some("Host left the room".to_string()));
        }
    }

    fn remove_player(&mut self, id: &PeerId) {
        let Some(player) = self.registry.remove(id) else {
            return;
        };
        self.emit(NetEvent::PlayerLeft {
            id: id.clone(),
            name: player.name,
        });
        let now = self.now();
        let actions = self.race.player_removed(id, &mut self.registry, now);
        self.apply(actions);
    }

    /// Drops a link after a protocol violation.
    fn drop_link(&mut self, link: LinkId) {
        let closed = self.close_link(link);
        self.handle_closed(closed);
    }

    pub fn bytes_received(&mut self, link: LinkId, bytes: &[u8]) {
        let frames = match self.mesh.ingest(link, bytes) {
            Ok(frames) => frames,
            Err(e) => {
                tracing::warn!("Framing error on {}: {}", link, e);
                self.drop_link(link);
                return;
            }
        };

        for frame in frames {
            match Packet::from_bytes(&frame) {
                Ok(packet) => self.handle_packet(link, packet),
                Err(e) if !e.is_fatal() => tracing::debug!("Discarding packet on {}: {}", link, e),
                Err(e) => {
                    tracing::warn!("Protocol error on {}: {}", link, e);
                    self.drop_link(link);
                    return;
                }
            }
            if self.mesh.link(link).is_none() {
                return;
            }
        }
    }

    fn handle_packet(&mut self, link: LinkId, packet: Packet) {
        let Packet {
            sender, message, ..
        } = packet;
        let kind = message.packet_type();

        if let Message::Hello(hello) = message {
            self.handle_hello(link, sender, hello);
            return;
        }

        match self.mesh.peer_of(link) {
            Some(peer) if *peer == sender => {}
            Some(peer) => {
                tracing::warn!(
                    "Dropping {} on {}: sender {} is not {}",
                    kind.as_str(),
                    link,
                    sender,
                    peer
                );
                return;
            }
            None => {
                tracing::debug!("Dropping {} on {} before HELLO", kind.as_str(), link);
                return;
            }
        }

        if kind.is_host_only() && self.host_id.as_ref() != Some(&sender) {
            tracing::warn!("Dropping {} from non-host {}", kind.as_str(), sender);
            return;
        }

        let now = self.now();
        match message {
            Message::Hello(_) => {}
            Message::PeerList(entries) => {
                if self.state.in_room() {
                    for (addr, id) in self.mesh.missing(&entries) {
                        self.connect_to_peer(addr, Some(id));
                    }
                }
            }
            Message::GameStart => {
                let actions = self.race.on_game_start(&self.registry);
                self.apply(actions);
            }
            Message::ProgressUpdate(update) => {
                if self.race.phase() == RacePhase::Racing {
                    self.registry.update_progress(&sender, update);
                }
            }
            Message::Finish(report) => {
                let actions = self
                    .race
                    .on_finish(&sender, report, &mut self.registry, now);
                self.apply(actions);
            }
            Message::GameText(text) => {
                let actions = self.race.on_game_text(text);
                self.apply(actions);
            }
            Message::Countdown { seconds } => {
                let actions = self.race.on_countdown(seconds, now);
                self.apply(actions);
            }
            Message::PlayerLeft { uuid, name } => {
                if uuid == self.local_id {
                    return;
                }
                tracing::info!("Host reports {} ({}) left", name, uuid);
                if let Some(peer_link) = self.mesh.link_for(&uuid) {
                    self.close_link(peer_link);
                }
                self.remove_player(&uuid);
            }
            Message::RaceResults(rankings) => {
                let actions = self.race.on_results(rankings, &mut self.registry);
                self.apply(actions);
            }
            Message::ReadyCheck(text) => {
                let actions = self.race.on_ready_check(text, &mut self.registry);
                self.apply(actions);
            }
            Message::ReadyResponse => {
                let actions = self.race.ready_response(&sender, &self.registry, now);
                self.apply(actions);
            }
            Message::PlayAgainInvite => {
                let actions = self.race.on_play_again_invite();
                self.apply(actions);
            }
            Message::PlayAgainResponse { accepted } => {
                let name = self
                    .registry
                    .get(&sender)
                    .map(|p| p.name.clone())
                    .unwrap_or_default();
                let actions = self.race.on_play_again_response(&name, accepted);
                self.apply(actions);
            }
            Message::Kick { uuid } => {
                if uuid == self.local_id {
                    tracing::info!("Kicked from the room");
                    self.teardown(None);
                    self.emit(NetEvent::Kicked);
                }
            }
        }
    }

    fn handle_hello(&mut self, link: LinkId, sender: PeerId, hello: Hello) {
        if sender == self.local_id {
            tracing::warn!("Connected to ourselves on {}", link);
            self.drop_link(link);
            return;
        }

        match self.state {
            SessionState::Idle => {
                self.drop_link(link);
                return;
            }
            SessionState::Joining => {
                if self.join_link != Some(link) {
                    self.drop_link(link);
                    return;
                }
                self.complete_join(&sender, &hello);
            }
            SessionState::Joined => {
                let known_host = self.host_id.as_ref();
                let same_room = hello.host_uuid.is_empty()
                    || Some(&hello.host_uuid) == known_host
                    || Some(&sender) == known_host;
                if !same_room {
                    tracing::warn!(
                        "Rejecting {} from another room (host {})",
                        sender,
                        hello.host_uuid
                    );
                    self.drop_link(link);
                    return;
                }
            }
            SessionState::Hosting => {
                if !self.registry.contains(&sender) && !self.race.accepts_new_players() {
                    tracing::info!(
                        "Refusing {} while the race is {}",
                        hello.name,
                        self.race.phase().as_str()
                    );
                    self.drop_link(link);
                    return;
                }
            }
        }

        let Some((outcome, expired)) =
            self.mesh
                .complete_handshake(link, sender.clone(), &hello.name, hello.port)
        else {
            return;
        };
        for peer in expired {
            self.peer_gone(peer);
        }

        match outcome {
            Handshake::New => {
                tracing::info!("Handshake complete with {} ({})", hello.name, sender);
                if self.registry.insert(sender.clone(), &hello.name) {
                    self.emit(NetEvent::PlayerJoined {
                        id: sender.clone(),
                        name: hello.name.clone(),
                    });
                }
                self.send_room_state(link, &sender);
            }
            Handshake::Rebound => {
                tracing::debug!("{} rebound to {}", sender, link);
                self.registry.insert(sender, &hello.name);
            }
            Handshake::Duplicate {
                closed,
                canonical_changed,
            } => {
                self.effects.push(Effect::Close { link: closed });
                if canonical_changed {
                    self.send_room_state(link, &sender);
                }
            }
            Handshake::Repeat => {}
        }
    }

    fn complete_join(&mut self, sender: &PeerId, hello: &Hello) {
        let host = if hello.is_room_creator || hello.host_uuid.is_empty() {
            sender.clone()
        } else {
            hello.host_uuid.clone()
        };
        tracing::info!("Joined room of {}", host);
        self.host_id = Some(host);
        self.registry.set_host(self.host_id.clone());
        self.state = SessionState::Joined;
        self.join_link = None;
        self.join_target = None;
        self.timers.disarm(Timer::JoinTimeout);

        let language = self.language.clone();
        let actions = self.race.open(false, &language);
        self.apply(actions);

        self.emit(NetEvent::JoinSucceeded);
        self.emit_room_state();
    }

    /// PEER_LIST plus, for a host in the lobby, the current text.
    fn send_room_state(&mut self, link: LinkId, peer: &PeerId) {
        let peers = self.mesh.peer_list_for(peer);
        self.send(link, Message::PeerList(peers));
        if let Some(text) = self.race.text_for_new_peer() {
            self.send(link, text);
        }
    }

    // ---- Discovery -------------------------------------------------------

    pub fn datagram_received(&mut self, bytes: &[u8], from: SocketAddr) {
        if !self.scanning {
            return;
        }
        let announce = match DiscoveryAnnounce::from_bytes(bytes) {
            Ok(announce) => announce,
            Err(e) => {
                tracing::trace!("Ignoring datagram from {}: {}", from, e);
                return;
            }
        };
        if announce.kind != DISCOVERY_TYPE || announce.uuid == self.local_id {
            return;
        }
        let IpAddr::V4(ip) = from.ip() else {
            return;
        };

        let now = self.now();
        match self.rooms.upsert(&announce, ip, now) {
            Upsert::New => {
                tracing::info!("Found room of {} at {}:{}", announce.name, ip, announce.port);
                if let Some(room) = self.rooms.get(&announce.uuid).cloned() {
                    self.emit(NetEvent::RoomFound(room));
                }
                self.emit(NetEvent::RoomsChanged(self.rooms.rooms()));
            }
            Upsert::Updated => self.emit(NetEvent::RoomsChanged(self.rooms.rooms())),
            Upsert::Refreshed => {}
        }
    }

    // ---- Timers ----------------------------------------------------------

    pub fn poll_timers(&mut self) {
        let now = self.now();
        for timer in self.timers.take_expired(now) {
            match timer {
                Timer::Announce => {
                    if self.is_host() {
                        self.send_announce();
                        self.timers
                            .arm(Timer::Announce, now + self.config.announce_interval_ms);
                    }
                }
                Timer::RoomCleanup => {
                    if self.scanning {
                        let evicted = self.rooms.evict_stale(now, self.config.room_timeout_ms);
                        if !evicted.is_empty() {
                            self.emit(NetEvent::RoomsChanged(self.rooms.rooms()));
                        }
                        self.timers
                            .arm(Timer::RoomCleanup, now + self.config.cleanup_interval_ms());
                    }
                }
                Timer::JoinTimeout => {
                    if self.state == SessionState::Joining {
                        let ip = self
                            .join_target
                            .map(|a| a.ip().to_string())
                            .unwrap_or_default();
                        self.fail_join(format!("Connection timed out. Host not found at {}", ip));
                    }
                }
                Timer::ReadyCheckTimeout => {
                    let actions = self.race.ready_timeout(&self.registry, now);
                    self.apply(actions);
                }
                Timer::CountdownEnd => {
                    let actions = self.race.countdown_elapsed(&self.registry);
                    self.apply(actions);
                }
                Timer::ProgressTick => {
                    if let Some(message) = self.progress.tick() {
                        self.broadcast(message);
                        self.timers
                            .arm(Timer::ProgressTick, now + self.config.progress_interval_ms);
                    }
                }
            }
        }
    }
}
