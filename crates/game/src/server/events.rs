use std::fmt;
use std::net::SocketAddr;

use crate::net::{DisconnectReason, PlayerId, ProtocolVersion};

use super::games::GameId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    Listening {
        addr: SocketAddr,
    },
    PlayerConnected {
        peer: PlayerId,
        addr: SocketAddr,
    },
    PlayerEntered {
        peer: PlayerId,
        name: String,
    },
    PlayerLeft {
        peer: PlayerId,
        reason: DisconnectReason,
    },
    VersionRejected {
        peer: PlayerId,
        version: ProtocolVersion,
    },
    GameOpened {
        game_id: GameId,
        creator: PlayerId,
    },
    GameStarted {
        game_id: GameId,
        players: [PlayerId; 2],
    },
    GameClosed {
        game_id: GameId,
    },
    ConnectionDenied {
        addr: SocketAddr,
        reason: &'static str,
    },
    RequestDenied {
        peer: PlayerId,
        reason: String,
    },
    Error {
        message: String,
    },
}

impl ServerEvent {
    pub fn is_error(&self) -> bool {
        matches!(self, ServerEvent::Error { .. })
    }
}

impl fmt::Display for ServerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerEvent::Listening { addr } => write!(f, "Listening on {}", addr),
            ServerEvent::PlayerConnected { peer, addr } => {
                write!(f, "Peer {} connected from {}", peer, addr)
            }
            ServerEvent::PlayerEntered { peer, name } => {
                write!(f, "Player {} entered as {:?}", peer, name)
            }
            ServerEvent::PlayerLeft { peer, reason } => {
                write!(f, "Peer {} {}", peer, reason.as_str())
            }
            ServerEvent::VersionRejected { peer, version } => {
                write!(f, "Peer {} speaks protocol {}", peer, version)
            }
            ServerEvent::GameOpened { game_id, creator } => {
                write!(f, "Player {} opened game {}", creator, game_id)
            }
            ServerEvent::GameStarted { game_id, players } => write!(
                f,
                "Game {} started: {} vs {}",
                game_id, players[0], players[1]
            ),
            ServerEvent::GameClosed { game_id } => write!(f, "Game {} closed", game_id),
            ServerEvent::ConnectionDenied { addr, reason } => {
                write!(f, "Connection from {} denied: {}", addr, reason)
            }
            ServerEvent::RequestDenied { peer, reason } => {
                write!(f, "Request from {} denied: {}", peer, reason)
            }
            ServerEvent::Error { message } => f.write_str(message),
        }
    }
}
