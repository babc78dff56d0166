//! Wire protocol for the LAN mesh.
//!
//! Every TCP packet is a 4-byte big-endian length followed by a compact JSON
//! envelope `{type, sender, ts, payload}`. Discovery datagrams are bare JSON
//! objects.

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::discovery::RoomStatus;
use super::peer::PeerId;

/// Application tag carried by every discovery datagram.
pub const APP_ID: &str = "RapidTexterP2P";

/// Discovery datagram kind tag.
pub const DISCOVERY_TYPE: &str = "DISCOVERY";

/// Size of the frame length prefix in bytes.
pub const FRAME_HEADER_LEN: usize = 4;

/// Default cap on a single frame body (1 MiB).
pub const DEFAULT_MAX_FRAME_LEN: usize = 1024 * 1024;

/// Largest discovery datagram we read.
pub const MAX_DATAGRAM_SIZE: usize = 4096;

/// Packet type tags. The integer values are the wire encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    Hello = 0,
    PeerList = 1,
    GameStart = 2,
    ProgressUpdate = 3,
    Finish = 4,
    GameText = 5,
    Countdown = 6,
    PlayerLeft = 7,
    RaceResults = 8,
    ReadyCheck = 9,
    ReadyResponse = 10,
    PlayAgainInvite = 11,
    PlayAgainResponse = 12,
    Kick = 13,
}

impl PacketType {
    pub fn from_i64(value: i64) -> Option<Self> {
        let kind = match value {
            0 => Self::Hello,
            1 => Self::PeerList,
            2 => Self::GameStart,
            3 => Self::ProgressUpdate,
            4 => Self::Finish,
            5 => Self::GameText,
            6 => Self::Countdown,
            7 => Self::PlayerLeft,
            8 => Self::RaceResults,
            9 => Self::ReadyCheck,
            10 => Self::ReadyResponse,
            11 => Self::PlayAgainInvite,
            12 => Self::PlayAgainResponse,
            13 => Self::Kick,
            _ => return None,
        };
        Some(kind)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hello => "HELLO",
            Self::PeerList => "PEER_LIST",
            Self::GameStart => "GAME_START",
            Self::ProgressUpdate => "PROGRESS_UPDATE",
            Self::Finish => "FINISH",
            Self::GameText => "GAME_TEXT",
            Self::Countdown => "COUNTDOWN",
            Self::PlayerLeft => "PLAYER_LEFT",
            Self::RaceResults => "RACE_RESULTS",
            Self::ReadyCheck => "READY_CHECK",
            Self::ReadyResponse => "READY_RESPONSE",
            Self::PlayAgainInvite => "PLAY_AGAIN_INVITE",
            Self::PlayAgainResponse => "PLAY_AGAIN_RESPONSE",
            Self::Kick => "KICK",
        }
    }

    /// Packets only the host may originate.
    pub fn is_host_only(&self) -> bool {
        matches!(
            self,
            Self::GameStart
                | Self::GameText
                | Self::Countdown
                | Self::PlayerLeft
                | Self::RaceResults
                | Self::ReadyCheck
                | Self::PlayAgainInvite
                | Self::Kick
        )
    }
}

/// Handshake payload sent by both sides of every new connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hello {
    pub name: String,
    /// Sender's TCP listening port.
    pub port: u16,
    pub is_room_creator: bool,
    pub host_uuid: PeerId,
}

/// One entry of a `PEER_LIST`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeerEntry {
    pub uuid: PeerId,
    pub name: String,
    pub ip: String,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct PeerListPayload {
    peers: Vec<PeerEntry>,
}

/// Race text plus its language tag (`GAME_TEXT` and `READY_CHECK`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceText {
    pub text: String,
    pub language: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct CountdownPayload {
    seconds: u32,
}

/// Absolute typing progress of the sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub position: u32,
    pub total: u32,
    pub wpm: u32,
    pub finished: bool,
}

/// Sender's final result.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FinishReport {
    pub wpm: u32,
    pub accuracy: f64,
    /// Position the sender believes it finished in; the host's ranking wins.
    pub position: u32,
}

/// One row of `RACE_RESULTS`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ranking {
    pub id: PeerId,
    pub name: String,
    pub wpm: u32,
    pub accuracy: f64,
    pub position: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct RankingsPayload {
    rankings: Vec<Ranking>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct PlayerLeftPayload {
    uuid: PeerId,
    name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct KickPayload {
    uuid: PeerId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct PlayAgainPayload {
    accepted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Empty {}

/// Typed packet body.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Hello(Hello),
    PeerList(Vec<PeerEntry>),
    GameStart,
    ProgressUpdate(ProgressUpdate),
    Finish(FinishReport),
    GameText(RaceText),
    Countdown { seconds: u32 },
    PlayerLeft { uuid: PeerId, name: String },
    RaceResults(Vec<Ranking>),
    ReadyCheck(RaceText),
    ReadyResponse,
    PlayAgainInvite,
    PlayAgainResponse { accepted: bool },
    Kick { uuid: PeerId },
}

impl Message {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Message::Hello(_) => PacketType::Hello,
            Message::PeerList(_) => PacketType::PeerList,
            Message::GameStart => PacketType::GameStart,
            Message::ProgressUpdate(_) => PacketType::ProgressUpdate,
            Message::Finish(_) => PacketType::Finish,
            Message::GameText(_) => PacketType::GameText,
            Message::Countdown { .. } => PacketType::Countdown,
            Message::PlayerLeft { .. } => PacketType::PlayerLeft,
            Message::RaceResults(_) => PacketType::RaceResults,
            Message::ReadyCheck(_) => PacketType::ReadyCheck,
            Message::ReadyResponse => PacketType::ReadyResponse,
            Message::PlayAgainInvite => PacketType::PlayAgainInvite,
            Message::PlayAgainResponse { .. } => PacketType::PlayAgainResponse,
            Message::Kick { .. } => PacketType::Kick,
        }
    }

    fn payload(&self) -> Result<Value, serde_json::Error> {
        match self {
            Message::Hello(hello) => serde_json::to_value(hello),
            Message::PeerList(peers) => serde_json::to_value(PeerListPayload {
                peers: peers.clone(),
            }),
            Message::GameStart
            | Message::ReadyResponse
            | Message::PlayAgainInvite => serde_json::to_value(Empty {}),
            Message::ProgressUpdate(update) => serde_json::to_value(update),
            Message::Finish(report) => serde_json::to_value(report),
            Message::GameText(text) | Message::ReadyCheck(text) => serde_json::to_value(text),
            Message::Countdown { seconds } => {
                serde_json::to_value(CountdownPayload { seconds: *seconds })
            }
            Message::PlayerLeft { uuid, name } => serde_json::to_value(PlayerLeftPayload {
                uuid: uuid.clone(),
                name: name.clone(),
            }),
            Message::RaceResults(rankings) => serde_json::to_value(RankingsPayload {
                rankings: rankings.clone(),
            }),
            Message::PlayAgainResponse { accepted } => {
                serde_json::to_value(PlayAgainPayload {
                    accepted: *accepted,
                })
            }
            Message::Kick { uuid } => serde_json::to_value(KickPayload { uuid: uuid.clone() }),
        }
    }

    fn from_payload(kind: PacketType, payload: Value) -> Result<Self, ProtocolError> {
        let message = match kind {
            PacketType::Hello => Message::Hello(parse(kind, payload)?),
            PacketType::PeerList => {
                let list: PeerListPayload = parse(kind, payload)?;
                Message::PeerList(list.peers)
            }
            PacketType::GameStart => Message::GameStart,
            PacketType::ProgressUpdate => Message::ProgressUpdate(parse(kind, payload)?),
            PacketType::Finish => Message::Finish(parse(kind, payload)?),
            PacketType::GameText => Message::GameText(parse(kind, payload)?),
            PacketType::Countdown => {
                let countdown: CountdownPayload = parse(kind, payload)?;
                Message::Countdown {
                    seconds: countdown.seconds,
                }
            }
            PacketType::PlayerLeft => {
                let left: PlayerLeftPayload = parse(kind, payload)?;
                Message::PlayerLeft {
                    uuid: left.uuid,
                    name: left.name,
                }
            }
            PacketType::RaceResults => {
                let results: RankingsPayload = parse(kind, payload)?;
                Message::RaceResults(results.rankings)
            }
            PacketType::ReadyCheck => Message::ReadyCheck(parse(kind, payload)?),
            PacketType::ReadyResponse => Message::ReadyResponse,
            PacketType::PlayAgainInvite => Message::PlayAgainInvite,
            PacketType::PlayAgainResponse => {
                let response: PlayAgainPayload = parse(kind, payload)?;
                Message::PlayAgainResponse {
                    accepted: response.accepted,
                }
            }
            PacketType::Kick => {
                let kick: KickPayload = parse(kind, payload)?;
                Message::Kick { uuid: kick.uuid }
            }
        };
        Ok(message)
    }
}

fn parse<T: DeserializeOwned>(kind: PacketType, payload: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(payload).map_err(|e| ProtocolError::InvalidPayload {
        kind: kind.as_str(),
        reason: e.to_string(),
    })
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: i64,
    sender: PeerId,
    ts: i64,
    #[serde(default)]
    payload: Value,
}

/// A decoded packet: who sent it, when, and what.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    pub sender: PeerId,
    /// Wall-clock milliseconds at send time, for logging only.
    pub timestamp: i64,
    pub message: Message,
}

impl Packet {
    /// New packet stamped with the current wall-clock time.
    pub fn new(sender: PeerId, message: Message) -> Self {
        Self {
            sender,
            timestamp: Utc::now().timestamp_millis(),
            message,
        }
    }

    /// JSON envelope without the length prefix.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        let envelope = Envelope {
            kind: self.message.packet_type() as i64,
            sender: self.sender.clone(),
            ts: self.timestamp,
            payload: self
                .message
                .payload()
                .map_err(|e| ProtocolError::Encode(e.to_string()))?,
        };
        serde_json::to_vec(&envelope).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Parses one frame body.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let envelope: Envelope =
            serde_json::from_slice(bytes).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        let kind =
            PacketType::from_i64(envelope.kind).ok_or(ProtocolError::UnknownType(envelope.kind))?;
        let message = Message::from_payload(kind, envelope.payload)?;

        Ok(Self {
            sender: envelope.sender,
            timestamp: envelope.ts,
            message,
        })
    }

    /// Length-prefixed frame ready for the socket.
    pub fn to_frame(&self) -> Result<Vec<u8>, ProtocolError> {
        Ok(encode_frame(&self.to_bytes()?))
    }
}

/// Prepends the 4-byte big-endian length.
pub fn encode_frame(body: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(body);
    frame
}

/// Reassembles length-prefixed frames from a byte stream.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    max_frame_len: usize,
}

impl FrameDecoder {
    pub fn new(max_frame_len: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_frame_len,
        }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Bytes waiting for the rest of their frame.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Next complete frame body, if the buffer holds one.
    ///
    /// An announced length above the cap is an error as soon as the header
    /// arrives; the body is never buffered.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, FrameError> {
        if self.buffer.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }

        let mut header = [0u8; FRAME_HEADER_LEN];
        header.copy_from_slice(&self.buffer[..FRAME_HEADER_LEN]);
        let len = u32::from_be_bytes(header) as usize;

        if len > self.max_frame_len {
            return Err(FrameError::TooLarge {
                len,
                max: self.max_frame_len,
            });
        }

        if self.buffer.len() < FRAME_HEADER_LEN + len {
            return Ok(None);
        }

        let body = self.buffer[FRAME_HEADER_LEN..FRAME_HEADER_LEN + len].to_vec();
        self.buffer.drain(..FRAME_HEADER_LEN + len);
        Ok(Some(body))
    }
}

/// Room advertisement broadcast by a hosting peer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryAnnounce {
    pub app: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub uuid: PeerId,
    pub name: String,
    pub port: u16,
    pub player_count: u32,
    pub status: RoomStatus,
}

impl DiscoveryAnnounce {
    pub fn new(
        uuid: PeerId,
        name: impl Into<String>,
        port: u16,
        player_count: u32,
        status: RoomStatus,
    ) -> Self {
        Self {
            app: APP_ID.to_string(),
            kind: DISCOVERY_TYPE.to_string(),
            uuid,
            name: name.into(),
            port,
            player_count,
            status,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        serde_json::to_vec(self).map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    /// Parses a datagram, rejecting anything not tagged with [`APP_ID`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let announce: Self =
            serde_json::from_slice(bytes).map_err(|e| ProtocolError::Malformed(e.to_string()))?;
        if announce.app != APP_ID {
            return Err(ProtocolError::ForeignApp(announce.app));
        }
        Ok(announce)
    }
}

/// Packet decode and encode errors.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Malformed packet: {0}")]
    Malformed(String),

    #[error("Unknown packet type: {0}")]
    UnknownType(i64),

    #[error("Invalid {kind} payload: {reason}")]
    InvalidPayload { kind: &'static str, reason: String },

    #[error("Datagram from another application: {0}")]
    ForeignApp(String),

    #[error("Failed to encode packet: {0}")]
    Encode(String),
}

impl ProtocolError {
    /// Whether the link that produced this error must be closed.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ProtocolError::UnknownType(_))
    }
}

/// Framing errors; always fatal to the link.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("Frame of {len} bytes exceeds cap of {max}")]
    TooLarge { len: usize, max: usize },
}
