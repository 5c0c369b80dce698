use std::net::{SocketAddr, ToSocketAddrs};

use crate::config::{PlayerIdentity, UserConfig};
use crate::net::{
    ClientMessage, Connector, EnterServer, LobbyMessage, LobbyRequest, Priority, ProtocolVersion,
    Reliability, RulesHandoff, ServerInfo, ServerMessage, Transport, TransportError,
    TransportEvent,
};

use super::preference::{Preferences, RulesResolver, ScriptRulesResolver};
use super::status::ServerStatusData;
use super::substate::{GameSubstate, LobbySubstate, MainSubstate, SubstateEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    ConnectionFailed,
    Disconnected,
}

impl ConnectionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConnectionState::ConnectionFailed | ConnectionState::Disconnected
        )
    }

    /// Failed and disconnected sessions stay that way; a new session is
    /// needed to retry.
    pub fn on_transport(self, event: &TransportEvent) -> ConnectionState {
        if self.is_terminal() {
            return self;
        }
        match event {
            TransportEvent::ConnectionFailed => ConnectionState::ConnectionFailed,
            TransportEvent::ConnectionLost | TransportEvent::DisconnectionNotification => {
                ConnectionState::Disconnected
            }
            TransportEvent::ConnectionAccepted | TransportEvent::Packet(_) => self,
        }
    }

    pub fn on_lobby_packet(self) -> ConnectionState {
        match self {
            ConnectionState::Connecting => ConnectionState::Connected,
            other => other,
        }
    }
}

/// Where the user came from before entering the lobby.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOrigin {
    Lan,
    Online,
    Direct,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("not connected to the server")]
    NotConnected,
    #[error("action not available in the current lobby view")]
    WrongSubstate,
    #[error("only the game creator can start it")]
    NotHost,
    #[error("nobody joined the game yet")]
    NoOpponent,
    #[error("no server status received yet")]
    NoCatalog,
    #[error("no open game selected")]
    NoGameSelected,
    #[error("failed to resolve {0}")]
    Resolve(String),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Everything the match protocol needs once the lobby is done.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchHandoff {
    pub rules: RulesHandoff,
    pub game: GameSubstate,
}

pub struct LobbySession<T: Transport> {
    transport: T,
    server: ServerInfo,
    origin: SessionOrigin,
    state: ConnectionState,
    identity: PlayerIdentity,
    config: UserConfig,
    resolver: Box<dyn RulesResolver>,
    status: Option<ServerStatusData>,
    preferences: Option<Preferences>,
    substate: LobbySubstate,
    version_notice: Option<ProtocolVersion>,
}

pub fn resolve_server(server: &ServerInfo) -> Result<SocketAddr, SessionError> {
    (server.hostname.as_str(), server.port)
        .to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or_else(|| SessionError::Resolve(format!("{}:{}", server.hostname, server.port)))
}

impl<T: Transport> LobbySession<T> {
    pub fn new(
        transport: T,
        server: ServerInfo,
        origin: SessionOrigin,
        config: UserConfig,
    ) -> Self {
        Self {
            transport,
            server,
            origin,
            state: ConnectionState::Connecting,
            identity: config.network_identity(),
            config,
            resolver: Box::new(ScriptRulesResolver::default()),
            status: None,
            preferences: None,
            substate: LobbySubstate::default(),
            version_notice: None,
        }
    }

    /// Opens the primary connection to `server`. Failing here is the only
    /// error that is fatal for a session.
    pub fn connect<C>(
        connector: &C,
        server: ServerInfo,
        origin: SessionOrigin,
        config: UserConfig,
    ) -> Result<Self, SessionError>
    where
        C: Connector<Connection = T>,
    {
        let addr = resolve_server(&server)?;
        log::info!("Entering lobby of {} at {}", server.name, addr);
        let transport = connector.connect(addr)?;
        Ok(Self::new(transport, server, origin, config))
    }

    pub fn with_resolver(mut self, resolver: impl RulesResolver + 'static) -> Self {
        self.resolver = Box::new(resolver);
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn server(&self) -> &ServerInfo {
        &self.server
    }

    pub fn origin(&self) -> SessionOrigin {
        self.origin
    }

    pub fn status(&self) -> Option<&ServerStatusData> {
        self.status.as_ref()
    }

    pub fn substate(&self) -> &LobbySubstate {
        &self.substate
    }

    pub fn preferences(&self) -> Option<Preferences> {
        self.preferences
    }

    pub fn identity(&self) -> &PlayerIdentity {
        &self.identity
    }

    /// Server version reported by a mismatch reply, until taken for display.
    pub fn take_version_notice(&mut self) -> Option<ProtocolVersion> {
        self.version_notice.take()
    }

    /// Drains the transport. Returns the handoff as soon as a match is
    /// arranged; packets behind it stay queued for the match protocol.
    pub fn poll(&mut self) -> Option<MatchHandoff> {
        while let Some(event) = self.transport.receive() {
            match event {
                TransportEvent::ConnectionAccepted => self.on_accepted(),
                TransportEvent::Packet(data) => {
                    if let Some(handoff) = self.on_packet(&data) {
                        return Some(handoff);
                    }
                }
                other => {
                    let next = self.state.on_transport(&other);
                    if next != self.state {
                        log::info!("Lobby connection to {}: {:?}", self.server.name, next);
                    }
                    self.state = next;
                }
            }
        }
        None
    }

    fn on_accepted(&mut self) {
        let enter = ClientMessage::EnterServer(EnterServer {
            version: ProtocolVersion::CURRENT,
            side: self.identity.side.wire_value(),
            name: self.identity.name.clone(),
            color: self.identity.color,
        });
        if let Err(e) = self.transport.send(
            &enter.encode(),
            Priority::Low,
            Reliability::ReliableOrdered,
        ) {
            log::warn!("Failed to enter {}: {}", self.server.name, e);
        }
        self.substate = LobbySubstate::default();
    }

    fn on_packet(&mut self, data: &[u8]) -> Option<MatchHandoff> {
        if self.state.is_terminal() {
            log::debug!("Dropping packet on closed session with {}", self.server.name);
            return None;
        }

        let addr = self.transport.remote_addr();
        let message = match ServerMessage::decode(data, addr) {
            Ok(message) => message,
            Err(e) => {
                log::warn!("Discarding malformed packet from {}: {}", addr, e);
                return None;
            }
        };

        match message {
            ServerMessage::Lobby(lobby) => {
                self.state = self.state.on_lobby_packet();
                self.on_lobby_message(lobby);
                None
            }
            // only a pending game may be handed over to a match
            ServerMessage::RulesChecksum(rules) => match self.substate.as_game() {
                Some(game) => {
                    log::info!(
                        "Game {} starts, rules checksum {:#x}, playing to {}",
                        game.game_id,
                        rules.checksum,
                        rules.score_to_win
                    );
                    Some(MatchHandoff {
                        rules,
                        game: game.clone(),
                    })
                }
                None => {
                    log::warn!("Ignoring rules checksum outside of a pending game");
                    None
                }
            },
            ServerMessage::VersionMismatch(version) => {
                log::warn!(
                    "Server {} runs protocol {}, we speak {}",
                    self.server.name,
                    version,
                    ProtocolVersion::CURRENT
                );
                self.version_notice = Some(version);
                None
            }
            ServerMessage::ServerPresent(_) => None,
        }
    }

    fn on_lobby_message(&mut self, message: LobbyMessage) {
        match message {
            LobbyMessage::ServerStatus(status) => {
                let first = self.preferences.is_none();
                if first {
                    let prefs = self.closest_preferences(&status);
                    self.preferences = Some(prefs);
                    self.substate =
                        LobbySubstate::transition(SubstateEvent::StatusFirstReceived, prefs);
                }
                if let LobbySubstate::Main(main) = &mut self.substate {
                    main.validate_selection(&status);
                }
                self.status = Some(status);
            }
            LobbyMessage::GameStatus(status) => {
                self.substate = LobbySubstate::transition(
                    SubstateEvent::JoinedGame {
                        status,
                        local_id: self.transport.local_id(),
                    },
                    self.preferences.unwrap_or_default(),
                );
            }
            LobbyMessage::RemovedFromGame => {
                self.substate = LobbySubstate::transition(
                    SubstateEvent::RemovedFromGame,
                    self.preferences.unwrap_or_default(),
                );
            }
        }
    }

    fn closest_preferences(&self, status: &ServerStatusData) -> Preferences {
        let title = self.resolver.title(&self.config.rules);
        Preferences::closest(
            status,
            self.config.gamefps,
            self.config.scoretowin,
            title.as_deref(),
        )
    }

    fn connected_status(&self) -> Result<&ServerStatusData, SessionError> {
        if self.state != ConnectionState::Connected {
            return Err(SessionError::NotConnected);
        }
        self.status.as_ref().ok_or(SessionError::NoCatalog)
    }

    fn send_request(&mut self, request: LobbyRequest) -> Result<(), SessionError> {
        let priority = request.priority();
        let packet = ClientMessage::Lobby(request).encode();
        self.transport
            .send(&packet, priority, Reliability::ReliableOrdered)?;
        Ok(())
    }

    /// Mutable access for editing choices in the main view.
    pub fn main_substate_mut(&mut self) -> Option<&mut MainSubstate> {
        self.substate.as_main_mut()
    }

    pub fn game_substate_mut(&mut self) -> Option<&mut GameSubstate> {
        self.substate.as_game_mut()
    }

    pub fn select_game(&mut self, index: usize) -> Result<(), SessionError> {
        let status = self.status.as_ref().ok_or(SessionError::NoCatalog)?;
        let main = self
            .substate
            .as_main_mut()
            .ok_or(SessionError::WrongSubstate)?;
        main.select_game(index, status);
        Ok(())
    }

    pub fn open_game(&mut self) -> Result<(), SessionError> {
        self.connected_status()?;
        let request = self
            .substate
            .as_main()
            .ok_or(SessionError::WrongSubstate)?
            .open_game_request();
        self.send_request(request)
    }

    pub fn join_selected_game(&mut self) -> Result<(), SessionError> {
        let status = self.connected_status()?;
        let request = self
            .substate
            .as_main()
            .ok_or(SessionError::WrongSubstate)?
            .join_game_request(status)
            .ok_or(SessionError::NoGameSelected)?;
        self.send_request(request)
    }

    pub fn leave_game(&mut self) -> Result<(), SessionError> {
        self.connected_status()?;
        let request = self
            .substate
            .as_game()
            .ok_or(SessionError::WrongSubstate)?
            .leave_request();
        self.send_request(request)
    }

    pub fn start_game(&mut self) -> Result<(), SessionError> {
        self.connected_status()?;
        let game = self.substate.as_game().ok_or(SessionError::WrongSubstate)?;
        if !game.is_host {
            return Err(SessionError::NotHost);
        }
        let request = game.start_game_request().ok_or(SessionError::NoOpponent)?;
        self.send_request(request)
    }

    pub fn disconnect(&mut self) {
        self.transport.disconnect();
        self.state = self.state.on_transport(&TransportEvent::DisconnectionNotification);
    }

    /// Gives up the lobby and hands the live connection to the match protocol.
    pub fn into_transport(self) -> T {
        self.transport
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lobby::preference::SCORE_CHOICES;
    use crate::lobby::status::{GameStatus, OpenGame};
    use crate::net::testing::{MemoryConnector, MemoryPeer, MemoryTransport, memory_pair};
    use crate::net::{LobbyPacketType, MessageId, PacketReader};

    const LOCAL_ID: u32 = 42;

    fn server() -> ServerInfo {
        ServerInfo::named("test server").with_address("127.0.0.1", 1234)
    }

    fn config() -> UserConfig {
        UserConfig {
            gamefps: 58,
            scoretowin: 12,
            rules: "crazy.lua".into(),
            ..Default::default()
        }
    }

    fn session() -> (LobbySession<MemoryTransport>, MemoryPeer) {
        let (transport, peer) = memory_pair("127.0.0.1:1234".parse().unwrap());
        let session = LobbySession::new(transport, server(), SessionOrigin::Lan, config())
            .with_resolver(|rules: &str| (rules == "crazy.lua").then(|| "Crazy".to_string()));
        (session, peer)
    }

    fn status() -> ServerStatusData {
        ServerStatusData {
            player_count: 2,
            possible_speeds: vec![40, 50, 60, 75, 90],
            possible_rules: vec!["Default".into(), "Crazy".into()],
            possible_rules_author: vec!["a".into(), "b".into()],
            open_games: vec![OpenGame {
                id: 9,
                name: "open".into(),
                rules_index: 0,
                speed_index: 3,
                score: 15,
                has_password: false,
            }],
        }
    }

    fn status_packet(status: ServerStatusData) -> Vec<u8> {
        ServerMessage::Lobby(LobbyMessage::ServerStatus(status)).encode()
    }

    fn game_packet(creator: u32, others: Vec<u32>) -> Vec<u8> {
        ServerMessage::Lobby(LobbyMessage::GameStatus(GameStatus {
            game_id: 9,
            creator,
            name: "open".into(),
            speed: 3,
            rules: 0,
            score: 15,
            other_player_names: others.iter().map(|p| format!("p{}", p)).collect(),
            other_players: others,
        }))
        .encode()
    }

    fn rules_packet() -> Vec<u8> {
        ServerMessage::RulesChecksum(RulesHandoff {
            checksum: 1234,
            score_to_win: 15,
        })
        .encode()
    }

    fn connected() -> (LobbySession<MemoryTransport>, MemoryPeer) {
        let (mut session, peer) = session();
        peer.accept(LOCAL_ID);
        peer.deliver(status_packet(status()));
        assert_eq!(session.poll(), None);
        peer.take_sent();
        (session, peer)
    }

    #[test]
    fn test_accept_sends_entry_packet() {
        let (mut session, peer) = session();
        peer.accept(LOCAL_ID);
        session.poll();

        assert_eq!(session.state(), ConnectionState::Connecting);
        let sent = peer.take_sent();
        assert_eq!(sent.len(), 1);
        match ClientMessage::decode(&sent[0]).unwrap() {
            ClientMessage::EnterServer(enter) => {
                assert_eq!(enter.version, ProtocolVersion::CURRENT);
                assert_eq!(enter.name, "Left Player");
            }
            other => panic!("Expected EnterServer, got {:?}", other),
        }
    }

    #[test]
    fn test_first_status_connects_and_picks_preferences() {
        let (session, _peer) = connected();
        assert_eq!(session.state(), ConnectionState::Connected);

        let prefs = session.preferences().unwrap();
        assert_eq!(prefs.speed, 2);
        assert_eq!(prefs.rules, 1);
        assert_eq!(SCORE_CHOICES[prefs.score], 10);

        let main = session.substate().as_main().unwrap();
        assert_eq!(main.chosen_speed, 2);
    }

    #[test]
    fn test_preferences_are_computed_once() {
        let (mut session, peer) = connected();
        session.main_substate_mut().unwrap().cycle_score();

        let mut changed = status();
        changed.possible_speeds = vec![100, 58];
        peer.deliver(status_packet(changed));
        session.poll();

        assert_eq!(session.preferences().unwrap().speed, 2);
        assert_eq!(session.status().unwrap().possible_speeds, vec![100, 58]);
        // the user's edit survives a status refresh
        assert_eq!(session.substate().as_main().unwrap().chosen_score, 3);
    }

    #[test]
    fn test_failed_connection_is_terminal() {
        let (mut session, peer) = session();
        peer.push(TransportEvent::ConnectionFailed);
        session.poll();
        assert_eq!(session.state(), ConnectionState::ConnectionFailed);

        peer.push(TransportEvent::ConnectionAccepted);
        peer.deliver(status_packet(status()));
        session.poll();
        assert_eq!(session.state(), ConnectionState::ConnectionFailed);
    }

    #[test]
    fn test_lost_connection_disconnects() {
        let (mut session, peer) = connected();
        peer.push(TransportEvent::ConnectionLost);
        session.poll();
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert!(matches!(session.open_game(), Err(SessionError::NotConnected)));
    }

    #[test]
    fn test_closed_session_ignores_lobby_packets() {
        let (mut session, peer) = connected();
        let before = session.status().cloned();
        peer.push(TransportEvent::ConnectionLost);
        peer.deliver(status_packet(ServerStatusData::default()));
        peer.deliver(rules_packet());
        assert_eq!(session.poll(), None);

        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert_eq!(session.status().cloned(), before);
        assert!(session.substate().as_main().is_some());
    }

    #[test]
    fn test_stale_rules_checksum_is_discarded() {
        let (mut session, peer) = connected();
        peer.deliver(rules_packet());
        assert_eq!(session.poll(), None);
        assert!(session.substate().as_main().is_some());
    }

    #[test]
    fn test_rules_checksum_hands_off_from_game() {
        let (mut session, peer) = connected();
        peer.deliver(game_packet(LOCAL_ID, vec![7]));
        peer.deliver(rules_packet());
        peer.deliver(vec![0xEE]);

        let handoff = session.poll().unwrap();
        assert_eq!(handoff.rules.checksum, 1234);
        assert!(handoff.game.is_host);

        // the packet behind the handoff belongs to the match protocol
        let mut transport = session.into_transport();
        assert_eq!(transport.receive(), Some(TransportEvent::Packet(vec![0xEE])));
    }

    #[test]
    fn test_removed_from_game_keeps_preferences() {
        let (mut session, peer) = connected();
        peer.deliver(game_packet(1, vec![LOCAL_ID]));
        session.poll();
        assert!(!session.substate().as_game().unwrap().is_host);

        peer.deliver(ServerMessage::Lobby(LobbyMessage::RemovedFromGame).encode());
        session.poll();
        let main = session.substate().as_main().unwrap();
        assert_eq!(main.chosen_speed, 2);
        assert_eq!(main.chosen_rules, 1);
    }

    #[test]
    fn test_malformed_packets_do_not_tear_down() {
        let (mut session, peer) = connected();
        let mut bad = status();
        bad.open_games[0].rules_index = 5;
        peer.deliver(status_packet(bad));
        peer.deliver(vec![0x01, 0x02]);
        session.poll();

        assert_eq!(session.state(), ConnectionState::Connected);
        assert_eq!(session.status().unwrap().open_games[0].rules_index, 0);
    }

    #[test]
    fn test_open_game_uses_high_priority() {
        let (mut session, peer) = connected();
        session.open_game().unwrap();

        let link = peer.link();
        let (data, priority, reliability) = &link.sent[0];
        assert_eq!(*priority, Priority::High);
        assert_eq!(*reliability, Reliability::ReliableOrdered);
        assert_eq!(data[0], MessageId::Lobby as u8);
        assert_eq!(data[1], LobbyPacketType::OpenGame as u8);

        let mut reader = PacketReader::new(&data[2..]);
        assert_eq!(reader.read_u32().unwrap(), 2);
        assert_eq!(reader.read_u32().unwrap(), 10);
        assert_eq!(reader.read_u32().unwrap(), 1);
    }

    #[test]
    fn test_join_requires_selection() {
        let (mut session, peer) = connected();
        assert!(matches!(
            session.join_selected_game(),
            Err(SessionError::NoGameSelected)
        ));

        session.select_game(1).unwrap();
        session.join_selected_game().unwrap();
        let sent = peer.take_sent();
        assert_eq!(
            ClientMessage::decode(&sent[0]).unwrap(),
            ClientMessage::Lobby(LobbyRequest::JoinGame {
                game_id: 9,
                password: String::new()
            })
        );
    }

    #[test]
    fn test_start_game_guards() {
        let (mut session, peer) = connected();
        assert!(matches!(session.start_game(), Err(SessionError::WrongSubstate)));

        peer.deliver(game_packet(LOCAL_ID, vec![]));
        session.poll();
        assert!(matches!(session.start_game(), Err(SessionError::NoOpponent)));

        peer.deliver(game_packet(3, vec![LOCAL_ID]));
        session.poll();
        assert!(matches!(session.start_game(), Err(SessionError::NotHost)));

        peer.deliver(game_packet(LOCAL_ID, vec![3]));
        session.poll();
        peer.take_sent();
        session.start_game().unwrap();
        assert_eq!(
            ClientMessage::decode(&peer.take_sent()[0]).unwrap(),
            ClientMessage::Lobby(LobbyRequest::StartGame { opponent: 3 })
        );
    }

    #[test]
    fn test_version_notice_is_sticky_until_taken() {
        let (mut session, peer) = connected();
        let server_version = ProtocolVersion { major: 2, minor: 0 };
        peer.deliver(ServerMessage::VersionMismatch(server_version).encode());
        session.poll();
        assert_eq!(session.state(), ConnectionState::Connected);
        assert_eq!(
            session.take_version_notice(),
            Some(ProtocolVersion { major: 2, minor: 0 })
        );
        assert_eq!(session.take_version_notice(), None);
    }

    #[test]
    fn test_connect_resolves_and_opens() {
        let connector = MemoryConnector::default();
        let session =
            LobbySession::connect(&connector, server(), SessionOrigin::Direct, config()).unwrap();
        assert_eq!(session.origin(), SessionOrigin::Direct);
        assert_eq!(connector.peers().len(), 1);
        assert_eq!(connector.peers()[0].addr, "127.0.0.1:1234".parse::<SocketAddr>().unwrap());

        let refusing = MemoryConnector::refusing();
        assert!(LobbySession::connect(&refusing, server(), SessionOrigin::Lan, config()).is_err());
    }
}
