use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use super::protocol::PlayerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Priority {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reliability {
    Unreliable,
    ReliableOrdered,
}

/// Connection lifecycle notifications are delivered in the same queue as
/// application packets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    ConnectionAccepted,
    ConnectionFailed,
    ConnectionLost,
    DisconnectionNotification,
    Packet(Vec<u8>),
}

impl TransportEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransportEvent::ConnectionFailed
                | TransportEvent::ConnectionLost
                | TransportEvent::DisconnectionNotification
        )
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("frame encoding failed: {0}")]
    Frame(String),
    #[error("not connected")]
    NotConnected,
    #[error("packet of {0} bytes exceeds the datagram limit")]
    TooLarge(usize),
}

/// One connection to a remote peer.
pub trait Transport {
    fn send(
        &mut self,
        data: &[u8],
        priority: Priority,
        reliability: Reliability,
    ) -> Result<(), TransportError>;

    /// Next queued event, or `None` when nothing is pending. Never blocks.
    fn receive(&mut self) -> Option<TransportEvent>;

    fn disconnect(&mut self);

    fn remote_addr(&self) -> SocketAddr;

    /// Identity the remote end knows this connection by, once accepted.
    fn local_id(&self) -> Option<PlayerId>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send(
        &mut self,
        data: &[u8],
        priority: Priority,
        reliability: Reliability,
    ) -> Result<(), TransportError> {
        (**self).send(data, priority, reliability)
    }

    fn receive(&mut self) -> Option<TransportEvent> {
        (**self).receive()
    }

    fn disconnect(&mut self) {
        (**self).disconnect()
    }

    fn remote_addr(&self) -> SocketAddr {
        (**self).remote_addr()
    }

    fn local_id(&self) -> Option<PlayerId> {
        (**self).local_id()
    }
}

/// Opens connections; used for the lobby session and for discovery probes.
pub trait Connector {
    type Connection: Transport;

    fn connect(&self, addr: SocketAddr) -> Result<Self::Connection, TransportError>;
}

impl<C: Connector> Connector for Arc<C> {
    type Connection = C::Connection;

    fn connect(&self, addr: SocketAddr) -> Result<C::Connection, TransportError> {
        (**self).connect(addr)
    }
}

/// Sends discovery pings and collects the replies. Shared between the scan
/// task, which pings, and the main loop, which drains pongs.
pub trait Pinger: Send + Sync {
    fn ping(&self, addr: SocketAddr) -> Result<(), TransportError>;

    fn receive_pong(&self) -> Option<SocketAddr>;
}
