use std::fmt;
use std::net::SocketAddr;

use super::codec::{CodecError, PacketReader, PacketWriter};

pub const NAME_WIDTH: usize = 32;
pub const DESCRIPTION_WIDTH: usize = 192;

/// Size of the fixed record following the identification tag.
pub const SERVER_INFO_WIRE_SIZE: usize = 4 + 4 + NAME_WIDTH + DESCRIPTION_WIDTH;

/// Identification reply length: tag byte plus the fixed record.
pub const SERVER_PRESENT_PACKET_SIZE: usize = 1 + SERVER_INFO_WIRE_SIZE;

/// What a server advertises about itself. The address part is not on the
/// wire; receivers fill it in from the replying peer.
#[derive(Debug, Clone, Default)]
pub struct ServerInfo {
    pub hostname: String,
    pub port: u16,
    pub name: String,
    pub description: String,
    pub active_games: i32,
    pub waiting_players: i32,
}

impl ServerInfo {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            ..Default::default()
        }
    }

    /// Bootstrap record for a server that is known only by name, such as the
    /// one this process is about to host.
    pub fn named(name: impl Into<String>) -> Self {
        Self::new(name, "")
    }

    pub fn with_address(mut self, hostname: impl Into<String>, port: u16) -> Self {
        self.hostname = hostname.into();
        self.port = port;
        self
    }

    pub fn decode(reader: &mut PacketReader<'_>, addr: SocketAddr) -> Result<Self, CodecError> {
        let active_games = reader.read_i32()?;
        let waiting_players = reader.read_i32()?;
        let name = reader.read_fixed_string(NAME_WIDTH)?;
        let description = reader.read_fixed_string(DESCRIPTION_WIDTH)?;

        Ok(Self {
            hostname: addr.ip().to_string(),
            port: addr.port(),
            name,
            description,
            active_games,
            waiting_players,
        })
    }

    pub fn encode(&self, writer: &mut PacketWriter) {
        writer
            .write_i32(self.active_games)
            .write_i32(self.waiting_players)
            .write_fixed_string(&self.name, NAME_WIDTH)
            .write_fixed_string(&self.description, DESCRIPTION_WIDTH);
    }

    pub fn is_at(&self, hostname: &str, port: u16) -> bool {
        self.hostname == hostname && self.port == port
    }
}

impl PartialEq for ServerInfo {
    fn eq(&self, other: &Self) -> bool {
        self.hostname == other.hostname && self.port == other.port && self.name == other.name
    }
}

impl Eq for ServerInfo {}

impl fmt::Display for ServerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}:{}, {} games, {} waiting)",
            self.name, self.hostname, self.port, self.active_games, self.waiting_players
        )
    }
}
