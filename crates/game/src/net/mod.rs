mod codec;
mod connection;
mod endpoint;
mod frame;
mod listener;
mod protocol;
mod server_info;
mod stats;
mod transport;

pub use codec::{CodecError, PacketReader, PacketWriter, WireFormat};
pub use connection::{AdmitError, DisconnectReason, PeerConnection, PeerManager};
pub use endpoint::{EndpointConfig, MAX_DATAGRAM_SIZE, UdpConnection, UdpConnector, UdpPinger};
pub use frame::{FRAME_MAGIC, FRAME_VERSION, Frame, FrameError, FrameHeader, FramePayload};
pub use listener::{HostEndpoint, HostEvent};
pub use protocol::{
    ClientMessage, DEFAULT_PORT, DEFAULT_TICK_RATE, EnterServer, LobbyMessage, LobbyPacketType,
    LobbyRequest, MAX_PACKET_SIZE, MessageId, PacketError, PlayerId, ProtocolVersion,
    RulesHandoff, ServerMessage,
};
pub use server_info::{
    DESCRIPTION_WIDTH, NAME_WIDTH, SERVER_INFO_WIRE_SIZE, SERVER_PRESENT_PACKET_SIZE, ServerInfo,
};
pub use stats::{NetworkStats, rand_u64};
pub use transport::{
    Connector, Pinger, Priority, Reliability, Transport, TransportError, TransportEvent,
};

#[cfg(test)]
pub(crate) mod testing;
