//! Tokio driver for the room controller.
//!
//! Owns the TCP listener, the discovery socket and one reader plus one
//! writer task per link. Everything funnels into a single `select!` loop
//! that feeds the [`RoomController`] and executes the effects it returns.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use super::control::{Command, EventSink, NetEvent, Snapshot};
use super::controller::{ControllerParams, Effect, RoomController};
use super::discovery::{bind_discovery_socket, DiscoveryError};
use super::interfaces;
use super::peer::{LinkId, PeerId};
use super::protocol::MAX_DATAGRAM_SIZE;
use super::NetworkConfig;
use crate::clock::MonotonicClock;
use crate::text::TextSource;

const READ_BUFFER_SIZE: usize = 8192;

/// Requests from a [`LanHandle`] to the event loop.
enum Request {
    Command(Command),
    Snapshot(oneshot::Sender<Snapshot>),
    Shutdown,
}

/// Socket activity reported by link tasks.
enum LinkEvent {
    Connected { link: LinkId, stream: TcpStream },
    DialFailed { link: LinkId, reason: String },
    Data { link: LinkId, bytes: Vec<u8> },
    Closed { link: LinkId },
}

/// Work for a link's writer task.
enum Outgoing {
    Frame(Vec<u8>),
    /// Flush what is queued, then shut the socket down.
    Close,
}

struct LinkIo {
    writer: mpsc::UnboundedSender<Outgoing>,
    reader: JoinHandle<()>,
}

/// Network node errors.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    #[error("Failed to bind TCP listener on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("Discovery unavailable: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("Network node has shut down")]
    Closed,
}

/// Event loop state. Created and consumed by [`LanNode::start`].
pub struct LanNode {
    controller: RoomController,
    clock: Arc<MonotonicClock>,
    listener: TcpListener,
    discovery: Option<UdpSocket>,
    udp_buf: Vec<u8>,
    links: HashMap<LinkId, LinkIo>,
    link_tx: mpsc::UnboundedSender<LinkEvent>,
    link_rx: mpsc::UnboundedReceiver<LinkEvent>,
    requests: mpsc::UnboundedReceiver<Request>,
    dial_timeout: Duration,
}

/// Cloneable front end of a running node.
#[derive(Clone)]
pub struct LanHandle {
    requests: mpsc::UnboundedSender<Request>,
    events: EventSink,
    local_id: PeerId,
    listen_addr: SocketAddr,
    task: Arc<tokio::sync::Mutex<Option<JoinHandle<()>>>>,
}

impl LanHandle {
    /// Queues a command for the event loop.
    pub fn command(&self, command: Command) -> Result<(), NodeError> {
        self.requests
            .send(Request::Command(command))
            .map_err(|_| NodeError::Closed)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NetEvent> {
        self.events.subscribe()
    }

    /// Full current state, taken between two loop iterations.
    pub async fn snapshot(&self) -> Result<Snapshot, NodeError> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(Request::Snapshot(tx))
            .map_err(|_| NodeError::Closed)?;
        rx.await.map_err(|_| NodeError::Closed)
    }

    pub fn local_id(&self) -> &PeerId {
        &self.local_id
    }

    /// Address the mesh listener is bound to.
    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    /// Leaves any room and stops the event loop.
    pub async fn shutdown(&self) {
        let _ = self.requests.send(Request::Shutdown);
        if let Some(task) = self.task.lock().await.take() {
            if let Err(e) = task.await {
                tracing::warn!("Network task ended abnormally: {}", e);
            }
        }
    }
}

impl LanNode {
    /// Binds the sockets and spawns the event loop.
    ///
    /// A discovery socket that cannot be bound only disables scanning and
    /// announcing; a TCP listener that cannot be bound is an error.
    pub async fn start(
        config: NetworkConfig,
        player_name: String,
        language: String,
        text_source: Box<dyn TextSource>,
    ) -> Result<LanHandle, NodeError> {
        let listener = TcpListener::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, config.tcp_port))
            .await
            .map_err(|source| NodeError::Bind {
                port: config.tcp_port,
                source,
            })?;
        let listen_addr = listener.local_addr().map_err(|source| NodeError::Bind {
            port: config.tcp_port,
            source,
        })?;

        let discovery = match bind_discovery_socket(config.discovery_port) {
            Ok(socket) => Some(socket),
            Err(e) => {
                tracing::warn!("{}; scanning and announcing are off", NodeError::from(e));
                None
            }
        };

        let local_id = PeerId::random();
        let events = EventSink::new(config.event_capacity);
        let clock = Arc::new(MonotonicClock::new());
        let interfaces = interfaces::candidates();
        for iface in &interfaces {
            tracing::debug!("Interface {}", iface.label());
        }

        let dial_timeout = Duration::from_millis(config.join_timeout_ms);
        let controller = RoomController::new(ControllerParams {
            config,
            local_id: local_id.clone(),
            player_name,
            language,
            listen_port: listen_addr.port(),
            interfaces,
            clock: clock.clone(),
            text_source,
            events: events.clone(),
        });

        let (request_tx, requests) = mpsc::unbounded_channel();
        let (link_tx, link_rx) = mpsc::unbounded_channel();
        let node = LanNode {
            controller,
            clock,
            listener,
            discovery,
            udp_buf: vec![0u8; MAX_DATAGRAM_SIZE],
            links: HashMap::new(),
            link_tx,
            link_rx,
            requests,
            dial_timeout,
        };

        tracing::info!("Node {} listening on {}", local_id, listen_addr);
        let task = tokio::spawn(node.run());

        Ok(LanHandle {
            requests: request_tx,
            events,
            local_id,
            listen_addr,
            task: Arc::new(tokio::sync::Mutex::new(Some(task))),
        })
    }

    async fn run(mut self) {
        loop {
            let deadline = self
                .controller
                .next_deadline()
                .map(|ms| tokio::time::Instant::from_std(self.clock.instant_at(ms)));

            tokio::select! {
                request = self.requests.recv() => {
                    match request {
                        Some(Request::Command(command)) => self.controller.handle_command(command),
                        Some(Request::Snapshot(reply)) => {
                            let _ = reply.send(self.controller.snapshot());
                        }
                        Some(Request::Shutdown) | None => break,
                    }
                }
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, remote)) => self.on_accept(stream, remote),
                        Err(e) => tracing::warn!("Accept failed: {}", e),
                    }
                }
                Some(event) = self.link_rx.recv() => self.on_link_event(event),
                received = recv_datagram(self.discovery.as_ref(), &mut self.udp_buf) => {
                    match received {
                        Ok((len, from)) => {
                            self.controller.datagram_received(&self.udp_buf[..len], from);
                        }
                        Err(e) => tracing::debug!("Discovery receive failed: {}", e),
                    }
                }
                _ = sleep_until(deadline) => self.controller.poll_timers(),
            }

            self.flush().await;
        }

        self.controller.handle_command(Command::LeaveRoom);
        self.flush().await;
        tracing::info!("Network node stopped");
    }

    fn on_accept(&mut self, stream: TcpStream, remote: SocketAddr) {
        match self.controller.accept_inbound(remote) {
            Some(link) => self.spawn_io(link, stream),
            None => drop(stream),
        }
    }

    fn on_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Connected { link, stream } => {
                if self.controller.link_connected(link) {
                    self.spawn_io(link, stream);
                }
            }
            LinkEvent::DialFailed { link, reason } => self.controller.dial_failed(link, &reason),
            LinkEvent::Data { link, bytes } => self.controller.bytes_received(link, &bytes),
            LinkEvent::Closed { link } => {
                if let Some(io) = self.links.remove(&link) {
                    let _ = io.writer.send(Outgoing::Close);
                }
                self.controller.link_closed(link);
            }
        }
    }

    fn spawn_io(&mut self, link: LinkId, stream: TcpStream) {
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!("Could not disable Nagle on {}: {}", link, e);
        }
        let (read_half, write_half) = stream.into_split();
        let (writer_tx, writer_rx) = mpsc::unbounded_channel();

        let reader = tokio::spawn(read_link(link, read_half, self.link_tx.clone()));
        tokio::spawn(write_link(link, write_half, writer_rx));

        self.links.insert(
            link,
            LinkIo {
                writer: writer_tx,
                reader,
            },
        );
    }

    fn dial(&self, link: LinkId, addr: SocketAddr) {
        let tx = self.link_tx.clone();
        let timeout = self.dial_timeout;
        tokio::spawn(async move {
            let event = match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => LinkEvent::Connected { link, stream },
                Ok(Err(e)) => LinkEvent::DialFailed {
                    link,
                    reason: e.to_string(),
                },
                Err(_) => LinkEvent::DialFailed {
                    link,
                    reason: "connection timed out".to_string(),
                },
            };
            let _ = tx.send(event);
        });
    }

    /// Executes every pending effect in order.
    async fn flush(&mut self) {
        for effect in self.controller.take_effects() {
            match effect {
                Effect::Dial { link, addr } => self.dial(link, addr),
                Effect::Send { link, frame } => match self.links.get(&link) {
                    Some(io) => {
                        let _ = io.writer.send(Outgoing::Frame(frame));
                    }
                    None => tracing::debug!("Dropping frame for unconnected {}", link),
                },
                Effect::Close { link } => {
                    if let Some(io) = self.links.remove(&link) {
                        io.reader.abort();
                        let _ = io.writer.send(Outgoing::Close);
                    }
                }
                Effect::Announce { payload, target } => {
                    let Some(socket) = self.discovery.as_ref() else {
                        continue;
                    };
                    if let Err(e) = socket.send_to(&payload, target).await {
                        tracing::debug!("{}", DiscoveryError::SendFailed(e.to_string()));
                    }
                }
            }
        }
    }
}

async fn read_link(link: LinkId, mut reader: OwnedReadHalf, tx: mpsc::UnboundedSender<LinkEvent>) {
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                let bytes = buf[..n].to_vec();
                if tx.send(LinkEvent::Data { link, bytes }).is_err() {
                    return;
                }
            }
            Err(e) => {
                tracing::debug!("Read on {} failed: {}", link, e);
                break;
            }
        }
    }
    let _ = tx.send(LinkEvent::Closed { link });
}

async fn write_link(link: LinkId, mut writer: OwnedWriteHalf, mut rx: mpsc::UnboundedReceiver<Outgoing>) {
    while let Some(outgoing) = rx.recv().await {
        match outgoing {
            Outgoing::Frame(frame) => {
                if let Err(e) = writer.write_all(&frame).await {
                    tracing::debug!("Write on {} failed: {}", link, e);
                    break;
                }
            }
            Outgoing::Close => break,
        }
    }
    let _ = writer.shutdown().await;
}

async fn recv_datagram(
    socket: Option<&UdpSocket>,
    buf: &mut [u8],
) -> std::io::Result<(usize, SocketAddr)> {
    match socket {
        Some(socket) => socket.recv_from(buf).await,
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
