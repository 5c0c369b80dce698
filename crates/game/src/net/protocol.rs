use std::net::SocketAddr;

use super::codec::{CodecError, PacketReader, PacketWriter};
use super::server_info::{SERVER_PRESENT_PACKET_SIZE, ServerInfo};
use super::transport::Priority;
use crate::lobby::{GameStatus, ServerStatusData};

pub const MAX_PACKET_SIZE: usize = 1200;
pub const DEFAULT_PORT: u16 = 1234;
pub const DEFAULT_TICK_RATE: u32 = 60;

pub type PlayerId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolVersion {
    pub major: i32,
    pub minor: i32,
}

impl ProtocolVersion {
    pub const CURRENT: ProtocolVersion = ProtocolVersion { major: 1, minor: 2 };

    /// Servers that never sent a version behave like this one.
    pub const LEGACY: ProtocolVersion = ProtocolVersion { major: 0, minor: 9 };

    pub fn is_compatible(&self, other: &ProtocolVersion) -> bool {
        self == other
    }

    fn encode(&self, writer: &mut PacketWriter) {
        writer.write_i32(self.major).write_i32(self.minor);
    }

    fn decode(reader: &mut PacketReader<'_>) -> Result<Self, CodecError> {
        Ok(Self {
            major: reader.read_i32()?,
            minor: reader.read_i32()?,
        })
    }
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageId {
    ServerPresent = 0x70,
    VersionMismatch = 0x71,
    EnterServer = 0x72,
    RulesChecksum = 0x73,
    Lobby = 0x74,
}

impl TryFrom<u8> for MessageId {
    type Error = PacketError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x70 => Ok(MessageId::ServerPresent),
            0x71 => Ok(MessageId::VersionMismatch),
            0x72 => Ok(MessageId::EnterServer),
            0x73 => Ok(MessageId::RulesChecksum),
            0x74 => Ok(MessageId::Lobby),
            other => Err(PacketError::UnknownMessage(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LobbyPacketType {
    ServerStatus = 0,
    RemovedFromGame = 1,
    OpenGame = 2,
    JoinGame = 3,
    LeaveGame = 4,
    GameStatus = 5,
    StartGame = 6,
}

impl TryFrom<u8> for LobbyPacketType {
    type Error = PacketError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(LobbyPacketType::ServerStatus),
            1 => Ok(LobbyPacketType::RemovedFromGame),
            2 => Ok(LobbyPacketType::OpenGame),
            3 => Ok(LobbyPacketType::JoinGame),
            4 => Ok(LobbyPacketType::LeaveGame),
            5 => Ok(LobbyPacketType::GameStatus),
            6 => Ok(LobbyPacketType::StartGame),
            other => Err(PacketError::UnknownLobbyPacket(other)),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PacketError {
    #[error("empty packet")]
    Empty,
    #[error("unknown message id {0:#04x}")]
    UnknownMessage(u8),
    #[error("unknown lobby packet type {0}")]
    UnknownLobbyPacket(u8),
    #[error("message {0:?} is not valid in this direction")]
    UnexpectedMessage(MessageId),
    #[error("packet length {actual}, expected {expected}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("{field} index {index} out of range ({len} entries)")]
    IndexOutOfRange {
        field: &'static str,
        index: usize,
        len: usize,
    },
    #[error("column {field} has {actual} entries, expected {expected}")]
    MisalignedColumns {
        field: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Player details sent when entering a server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnterServer {
    pub version: ProtocolVersion,
    pub side: u8,
    pub name: String,
    pub color: u32,
}

/// Sent by the server once a match was arranged; leaving the lobby protocol
/// hinges on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RulesHandoff {
    pub checksum: i32,
    pub score_to_win: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LobbyRequest {
    OpenGame {
        speed: u32,
        score: u32,
        rules: u32,
        password: String,
    },
    JoinGame {
        game_id: u32,
        password: String,
    },
    LeaveGame,
    StartGame {
        opponent: PlayerId,
    },
}

impl LobbyRequest {
    pub fn packet_type(&self) -> LobbyPacketType {
        match self {
            LobbyRequest::OpenGame { .. } => LobbyPacketType::OpenGame,
            LobbyRequest::JoinGame { .. } => LobbyPacketType::JoinGame,
            LobbyRequest::LeaveGame => LobbyPacketType::LeaveGame,
            LobbyRequest::StartGame { .. } => LobbyPacketType::StartGame,
        }
    }

    pub fn priority(&self) -> Priority {
        match self {
            LobbyRequest::OpenGame { .. } => Priority::High,
            _ => Priority::Low,
        }
    }

    fn encode(&self, writer: &mut PacketWriter) {
        writer.write_u8(self.packet_type() as u8);
        match self {
            LobbyRequest::OpenGame {
                speed,
                score,
                rules,
                password,
            } => {
                writer
                    .write_u32(*speed)
                    .write_u32(*score)
                    .write_u32(*rules)
                    .write_string(password);
            }
            LobbyRequest::JoinGame { game_id, password } => {
                writer.write_u32(*game_id).write_string(password);
            }
            LobbyRequest::LeaveGame => {}
            LobbyRequest::StartGame { opponent } => {
                writer.write_u32(*opponent);
            }
        }
    }

    fn decode(reader: &mut PacketReader<'_>) -> Result<Self, PacketError> {
        let request = match LobbyPacketType::try_from(reader.read_u8()?)? {
            LobbyPacketType::OpenGame => LobbyRequest::OpenGame {
                speed: reader.read_u32()?,
                score: reader.read_u32()?,
                rules: reader.read_u32()?,
                password: reader.read_string()?,
            },
            LobbyPacketType::JoinGame => LobbyRequest::JoinGame {
                game_id: reader.read_u32()?,
                password: reader.read_string()?,
            },
            LobbyPacketType::LeaveGame => LobbyRequest::LeaveGame,
            LobbyPacketType::StartGame => LobbyRequest::StartGame {
                opponent: reader.read_u32()?,
            },
            _ => return Err(PacketError::UnexpectedMessage(MessageId::Lobby)),
        };
        Ok(request)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LobbyMessage {
    ServerStatus(ServerStatusData),
    GameStatus(GameStatus),
    RemovedFromGame,
}

impl LobbyMessage {
    fn encode(&self, writer: &mut PacketWriter) {
        match self {
            LobbyMessage::ServerStatus(status) => {
                writer.write_u8(LobbyPacketType::ServerStatus as u8);
                status.encode(writer);
            }
            LobbyMessage::GameStatus(game) => {
                writer.write_u8(LobbyPacketType::GameStatus as u8);
                game.encode(writer);
            }
            LobbyMessage::RemovedFromGame => {
                writer.write_u8(LobbyPacketType::RemovedFromGame as u8);
            }
        }
    }

    fn decode(reader: &mut PacketReader<'_>) -> Result<Self, PacketError> {
        match LobbyPacketType::try_from(reader.read_u8()?)? {
            LobbyPacketType::ServerStatus => {
                Ok(LobbyMessage::ServerStatus(ServerStatusData::decode(reader)?))
            }
            LobbyPacketType::GameStatus => {
                Ok(LobbyMessage::GameStatus(GameStatus::decode(reader)?))
            }
            LobbyPacketType::RemovedFromGame => Ok(LobbyMessage::RemovedFromGame),
            _ => Err(PacketError::UnexpectedMessage(MessageId::Lobby)),
        }
    }
}

/// Messages travelling from client to server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    ServerPresent(ProtocolVersion),
    EnterServer(EnterServer),
    Lobby(LobbyRequest),
}

impl ClientMessage {
    pub fn encode(&self) -> Vec<u8> {
        let mut writer;
        match self {
            ClientMessage::ServerPresent(version) => {
                writer = PacketWriter::with_tag(MessageId::ServerPresent as u8);
                version.encode(&mut writer);
            }
            ClientMessage::EnterServer(enter) => {
                writer = PacketWriter::with_tag(MessageId::EnterServer as u8);
                enter.version.encode(&mut writer);
                writer
                    .write_u8(enter.side)
                    .write_string(&enter.name)
                    .write_u32(enter.color);
            }
            ClientMessage::Lobby(request) => {
                writer = PacketWriter::with_tag(MessageId::Lobby as u8);
                request.encode(&mut writer);
            }
        }
        writer.into_bytes()
    }

    pub fn decode(data: &[u8]) -> Result<Self, PacketError> {
        let (&tag, _) = data.split_first().ok_or(PacketError::Empty)?;
        let mut reader = PacketReader::new(&data[1..]);

        match MessageId::try_from(tag)? {
            MessageId::ServerPresent => {
                // Clients older than the versioned probe send only the tag.
                let version = if reader.is_exhausted() {
                    ProtocolVersion::LEGACY
                } else {
                    ProtocolVersion::decode(&mut reader)?
                };
                Ok(ClientMessage::ServerPresent(version))
            }
            MessageId::EnterServer => Ok(ClientMessage::EnterServer(EnterServer {
                version: ProtocolVersion::decode(&mut reader)?,
                side: reader.read_u8()?,
                name: reader.read_string()?,
                color: reader.read_u32()?,
            })),
            MessageId::Lobby => Ok(ClientMessage::Lobby(LobbyRequest::decode(&mut reader)?)),
            other => Err(PacketError::UnexpectedMessage(other)),
        }
    }
}

/// Messages travelling from server to client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    ServerPresent(ServerInfo),
    VersionMismatch(ProtocolVersion),
    Lobby(LobbyMessage),
    RulesChecksum(RulesHandoff),
}

impl ServerMessage {
    pub fn encode(&self) -> Vec<u8> {
        let mut writer;
        match self {
            ServerMessage::ServerPresent(info) => {
                writer = PacketWriter::with_tag(MessageId::ServerPresent as u8);
                info.encode(&mut writer);
            }
            ServerMessage::VersionMismatch(version) => {
                writer = PacketWriter::with_tag(MessageId::VersionMismatch as u8);
                version.encode(&mut writer);
            }
            ServerMessage::Lobby(message) => {
                writer = PacketWriter::with_tag(MessageId::Lobby as u8);
                message.encode(&mut writer);
            }
            ServerMessage::RulesChecksum(handoff) => {
                writer = PacketWriter::with_tag(MessageId::RulesChecksum as u8);
                writer
                    .write_i32(handoff.checksum)
                    .write_i32(handoff.score_to_win);
            }
        }
        writer.into_bytes()
    }

    /// `sender` supplies the address part of an identification reply, which
    /// must match the fixed record size exactly to be parsed at all.
    pub fn decode(data: &[u8], sender: SocketAddr) -> Result<Self, PacketError> {
        let (&tag, _) = data.split_first().ok_or(PacketError::Empty)?;
        let mut reader = PacketReader::new(&data[1..]);

        match MessageId::try_from(tag)? {
            MessageId::ServerPresent => {
                if data.len() != SERVER_PRESENT_PACKET_SIZE {
                    return Err(PacketError::InvalidLength {
                        expected: SERVER_PRESENT_PACKET_SIZE,
                        actual: data.len(),
                    });
                }
                Ok(ServerMessage::ServerPresent(ServerInfo::decode(
                    &mut reader,
                    sender,
                )?))
            }
            MessageId::VersionMismatch => {
                let version =
                    ProtocolVersion::decode(&mut reader).unwrap_or(ProtocolVersion::LEGACY);
                Ok(ServerMessage::VersionMismatch(version))
            }
            MessageId::Lobby => Ok(ServerMessage::Lobby(LobbyMessage::decode(&mut reader)?)),
            MessageId::RulesChecksum => Ok(ServerMessage::RulesChecksum(RulesHandoff {
                checksum: reader.read_i32()?,
                score_to_win: reader.read_i32()?,
            })),
            other => Err(PacketError::UnexpectedMessage(other)),
        }
    }
}
