//! Control surface: commands in, notifications out.
//!
//! The UI sends [`Command`]s and subscribes to [`NetEvent`]s. Core logic
//! never calls into the UI; every notification goes through an
//! [`EventSink`] backed by a broadcast channel.

use serde::Serialize;
use std::net::Ipv4Addr;
use tokio::sync::broadcast;

use super::discovery::RoomRecord;
use super::interfaces::NetworkInterface;
use super::peer::PeerId;
use super::protocol::Ranking;
use super::session::SessionState;
use crate::racing::RacePhase;

/// Commands accepted from the UI.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    CreateRoom,
    CloseRoom,
    StartScanning,
    StopScanning,
    /// Forget every discovered room and keep listening.
    RefreshRooms,
    JoinRoom { ip: String, port: u16 },
    LeaveRoom,
    SetPlayerName(String),
    /// Interface address to broadcast on; an empty string clears it.
    SetSelectedInterface(String),
    SetGameLanguage(String),
    SetGameText(String),
    RefreshGameText,
    StartCountdown,
    UpdateProgress { position: u32, total: u32, wpm: u32 },
    FinishRace { wpm: u32, accuracy: f64, errors: u32 },
    KickPlayer(PeerId),
    SendPlayAgainInvite,
    AcceptPlayAgain,
    DeclinePlayAgain,
    ReturnToLobby,
}

/// Notifications for the UI.
#[derive(Debug, Clone, PartialEq)]
pub enum NetEvent {
    RoomStateChanged { state: SessionState, is_host: bool },
    PlayerNameChanged(String),
    ScanningChanged(bool),
    SelectedInterfaceChanged(Option<Ipv4Addr>),
    RoomsChanged(Vec<RoomRecord>),
    RoomFound(RoomRecord),
    PlayersChanged(Vec<PlayerView>),
    PlayerJoined { id: PeerId, name: String },
    PlayerLeft { id: PeerId, name: String },
    GameTextChanged(String),
    GameLanguageChanged(String),
    PhaseChanged(RacePhase),
    WaitingForReady(bool),
    AllPlayersReady,
    CountdownStarted { seconds: u32 },
    RaceStarted,
    PlayerProgress {
        id: PeerId,
        name: String,
        progress: f64,
        wpm: u32,
        finished: bool,
        position: u32,
    },
    RaceFinished { rankings: Vec<Ranking> },
    JoinSucceeded,
    JoinFailed(String),
    ConnectionError(String),
    Kicked,
    PlayAgainInviteReceived,
    PlayAgainAccepted { name: String },
    PlayAgainDeclined { name: String },
    ReturnedToLobby,
}

/// One row of the player list as the UI sees it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayerView {
    pub id: PeerId,
    pub name: String,
    pub is_host: bool,
    pub is_local: bool,
    /// Fraction of the text typed, 0.0 when the total is unknown.
    pub progress: f64,
    pub position: u32,
    pub total: u32,
    pub wpm: u32,
    pub accuracy: f64,
    pub finished: bool,
    /// Final ranking, 0 until ranked.
    pub rank: u32,
}

/// Full state for a freshly attached UI.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub local_id: PeerId,
    pub player_name: String,
    pub state: SessionState,
    pub is_host: bool,
    pub host_id: Option<PeerId>,
    pub phase: RacePhase,
    /// Seconds left before the race starts, during the countdown.
    pub countdown_remaining: Option<u32>,
    /// A play-again invite is waiting for an answer.
    pub play_again_pending: bool,
    pub game_text: String,
    pub game_language: String,
    pub players: Vec<PlayerView>,
    pub scanning: bool,
    pub rooms: Vec<RoomRecord>,
    pub rankings: Vec<Ranking>,
    pub interfaces: Vec<NetworkInterface>,
    pub selected_interface: Option<Ipv4Addr>,
    pub last_error: Option<String>,
}

/// Outbound notification channel.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: broadcast::Sender<NetEvent>,
}

impl EventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Emits one notification. Nobody listening is not an error.
    pub fn emit(&self, event: NetEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("No subscribers for network event");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NetEvent> {
        self.tx.subscribe()
    }
}
