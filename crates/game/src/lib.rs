pub mod config;
pub mod discovery;
pub mod host;
pub mod lobby;
pub mod net;
pub mod server;

pub use config::{
    ConfigError, DiscoveryConfig, PlayerIdentity, PlayerProfile, PlayerSide, UserConfig,
    parse_server_address,
};
pub use discovery::{
    DirectoryError, DirectoryFetch, DiscoveryEvent, DiscoveryStrategy, HttpDirectory,
    ServerBrowser,
};
pub use host::{HostError, HostSession, HostedServer, LocalHost};
pub use lobby::{
    ConnectionState, GameStatus, GameSubstate, LobbySession, LobbySubstate, MainSubstate,
    MatchHandoff, OpenGame, Preferences, ServerStatusData, SessionError, SessionOrigin,
};
pub use net::{
    ClientMessage, Connector, DEFAULT_PORT, DEFAULT_TICK_RATE, NetworkStats, PacketError,
    Pinger, PlayerId, ProtocolVersion, ServerInfo, ServerMessage, Transport, TransportError,
    TransportEvent, UdpConnection, UdpConnector, UdpPinger,
};
pub use server::{HostConfig, LobbyServer, RulesetEntry, ServerEvent, rules_checksum};
