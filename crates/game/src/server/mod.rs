mod config;
mod events;
mod games;

use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::SocketAddr;

use crate::host::HostedServer;
use crate::lobby::ServerStatusData;
use crate::net::{
    ClientMessage, DisconnectReason, EnterServer, HostEndpoint, HostEvent, LobbyMessage,
    LobbyRequest, NetworkStats, PlayerId, ProtocolVersion, RulesHandoff, ServerInfo,
    ServerMessage,
};

pub use config::{HostConfig, RulesetEntry, rules_checksum};
pub use events::ServerEvent;
pub use games::{
    GameId, GameRegistry, GameSettings, GameState, JoinError, LeaveOutcome, PendingGame,
    StartError, StartOutcome,
};

/// Dedicated lobby server: answers identification queries, keeps the list of
/// open games and pairs players up for matches.
pub struct LobbyServer {
    endpoint: HostEndpoint,
    config: HostConfig,
    /// Names of players that entered the lobby.
    players: HashMap<PlayerId, String>,
    games: GameRegistry,
    pending_events: VecDeque<ServerEvent>,
    log_events: bool,
    status_dirty: bool,
}

impl LobbyServer {
    pub fn bind(config: HostConfig) -> io::Result<Self> {
        let endpoint =
            HostEndpoint::bind(&config.bind_addr(), config.max_clients, config.idle_timeout)?;

        let mut pending_events = VecDeque::new();
        pending_events.push_back(ServerEvent::Listening {
            addr: endpoint.local_addr(),
        });

        Ok(Self {
            endpoint,
            config,
            players: HashMap::new(),
            games: GameRegistry::new(),
            pending_events,
            log_events: false,
            status_dirty: false,
        })
    }

    /// Writes queued events to the log each tick instead of keeping them
    /// for `drain_events`. Used when nobody else owns the server.
    pub fn logging_events(mut self) -> Self {
        self.log_events = true;
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.endpoint.local_addr()
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn stats(&self) -> &NetworkStats {
        self.endpoint.stats()
    }

    pub fn games(&self) -> &GameRegistry {
        &self.games
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = ServerEvent> + '_ {
        self.pending_events.drain(..)
    }

    pub fn status(&self) -> ServerStatusData {
        ServerStatusData {
            player_count: self.players.len() as u32,
            possible_speeds: self.config.speeds.clone(),
            possible_rules: self.config.rulesets.iter().map(|r| r.title.clone()).collect(),
            possible_rules_author: self.config.rulesets.iter().map(|r| r.author.clone()).collect(),
            open_games: self.games.open_games(),
        }
    }

    pub fn tick(&mut self) {
        self.process_packets();
        self.update_games();
    }

    pub fn kick(&mut self, peer: PlayerId) {
        self.endpoint.disconnect_peer(peer);
    }

    pub fn shutdown(&mut self) {
        self.endpoint.shutdown();
        self.process_packets();
    }

    fn handle_host_event(&mut self, event: HostEvent) {
        match event {
            HostEvent::PeerConnected { peer, addr } => {
                self.pending_events
                    .push_back(ServerEvent::PlayerConnected { peer, addr });
            }
            HostEvent::Packet { peer, data } => self.handle_packet(peer, &data),
            HostEvent::PeerDisconnected { peer, reason } => self.handle_disconnect(peer, reason),
            HostEvent::ConnectionDenied { addr, reason } => {
                self.pending_events
                    .push_back(ServerEvent::ConnectionDenied { addr, reason });
            }
        }
    }

    fn handle_packet(&mut self, peer: PlayerId, data: &[u8]) {
        let message = match ClientMessage::decode(data) {
            Ok(message) => message,
            Err(e) => {
                log::debug!("Discarding packet from {}: {}", peer, e);
                return;
            }
        };

        match message {
            ClientMessage::ServerPresent(version) => self.handle_identify(peer, version),
            ClientMessage::EnterServer(enter) => self.handle_enter(peer, enter),
            ClientMessage::Lobby(request) => {
                if !self.players.contains_key(&peer) {
                    log::debug!("Lobby request from {} before entering", peer);
                    return;
                }
                self.handle_lobby(peer, request);
            }
        }
    }

    fn handle_identify(&mut self, peer: PlayerId, version: ProtocolVersion) {
        let reply = if version.is_compatible(&ProtocolVersion::CURRENT) {
            ServerMessage::ServerPresent(self.info())
        } else {
            self.pending_events
                .push_back(ServerEvent::VersionRejected { peer, version });
            ServerMessage::VersionMismatch(ProtocolVersion::CURRENT)
        };
        self.send(peer, &reply);
    }

    fn handle_enter(&mut self, peer: PlayerId, enter: EnterServer) {
        if !enter.version.is_compatible(&ProtocolVersion::CURRENT) {
            self.pending_events.push_back(ServerEvent::VersionRejected {
                peer,
                version: enter.version,
            });
            self.send(peer, &ServerMessage::VersionMismatch(ProtocolVersion::CURRENT));
            return;
        }

        log::debug!(
            "Player {} enters as {:?} (side {}, color {:06x})",
            peer,
            enter.name,
            enter.side,
            enter.color
        );
        self.players.insert(peer, enter.name.clone());
        self.pending_events.push_back(ServerEvent::PlayerEntered {
            peer,
            name: enter.name,
        });
        self.status_dirty = true;
    }

    fn handle_lobby(&mut self, peer: PlayerId, request: LobbyRequest) {
        match request {
            LobbyRequest::OpenGame {
                speed,
                score,
                rules,
                password,
            } => self.handle_open_game(peer, speed, score, rules, password),
            LobbyRequest::JoinGame { game_id, password } => {
                match self.games.join(game_id, peer, &password) {
                    Ok(()) => {
                        self.send_game_status(game_id);
                        self.status_dirty = true;
                    }
                    Err(e) => self.deny(peer, e.to_string()),
                }
            }
            LobbyRequest::LeaveGame => {
                if let Some(outcome) = self.games.leave(peer) {
                    self.send(peer, &ServerMessage::Lobby(LobbyMessage::RemovedFromGame));
                    self.apply_leave(outcome);
                }
            }
            LobbyRequest::StartGame { opponent } => match self.games.start(peer, opponent) {
                Ok(outcome) => self.start_match(outcome),
                Err(e) => self.deny(peer, e.to_string()),
            },
        }
    }

    fn handle_open_game(
        &mut self,
        peer: PlayerId,
        speed: u32,
        score: u32,
        rules: u32,
        password: String,
    ) {
        let speed_index = u8::try_from(speed)
            .ok()
            .filter(|&i| usize::from(i) < self.config.speeds.len());
        let rules_index = u8::try_from(rules)
            .ok()
            .filter(|&i| usize::from(i) < self.config.rulesets.len());
        let score_to_win = u8::try_from(score).ok().filter(|&s| s > 0);

        let (Some(speed_index), Some(rules_index), Some(score)) =
            (speed_index, rules_index, score_to_win)
        else {
            self.deny(peer, format!("invalid game settings {}/{}/{}", speed, rules, score));
            return;
        };

        let name = self.players.get(&peer).cloned().unwrap_or_default();
        let settings = GameSettings {
            name,
            speed_index,
            rules_index,
            score,
            password: (!password.is_empty()).then_some(password),
        };

        match self.games.open(peer, settings) {
            Some(game_id) => {
                self.pending_events.push_back(ServerEvent::GameOpened {
                    game_id,
                    creator: peer,
                });
                self.send_game_status(game_id);
                self.status_dirty = true;
            }
            None => self.deny(peer, "already in a game".into()),
        }
    }

    fn start_match(&mut self, outcome: StartOutcome) {
        for &player in &outcome.removed {
            self.send(player, &ServerMessage::Lobby(LobbyMessage::RemovedFromGame));
        }

        if let Some(game) = self.games.get(outcome.game_id) {
            let checksum = self
                .config
                .rulesets
                .get(usize::from(game.settings.rules_index))
                .map(|r| r.checksum)
                .unwrap_or_default();
            let handoff = ServerMessage::RulesChecksum(RulesHandoff {
                checksum,
                score_to_win: i32::from(game.settings.score),
            });
            for player in outcome.players {
                self.send(player, &handoff);
            }
        }

        self.pending_events.push_back(ServerEvent::GameStarted {
            game_id: outcome.game_id,
            players: outcome.players,
        });
        self.status_dirty = true;
    }

    fn apply_leave(&mut self, outcome: LeaveOutcome) {
        if outcome.closed {
            for &player in &outcome.removed {
                self.send(player, &ServerMessage::Lobby(LobbyMessage::RemovedFromGame));
            }
            self.pending_events.push_back(ServerEvent::GameClosed {
                game_id: outcome.game_id,
            });
        } else {
            self.send_game_status(outcome.game_id);
        }
        self.status_dirty = true;
    }

    fn handle_disconnect(&mut self, peer: PlayerId, reason: DisconnectReason) {
        if let Some(outcome) = self.games.leave(peer) {
            self.apply_leave(outcome);
        }
        if self.players.remove(&peer).is_some() {
            self.status_dirty = true;
        }
        self.pending_events
            .push_back(ServerEvent::PlayerLeft { peer, reason });
    }

    fn send_game_status(&mut self, game_id: GameId) {
        let Some(game) = self.games.get(game_id) else {
            return;
        };
        let messages: Vec<(PlayerId, ServerMessage)> = game
            .players
            .iter()
            .map(|&p| {
                let status = game.status_for(p, &self.players);
                (p, ServerMessage::Lobby(LobbyMessage::GameStatus(status)))
            })
            .collect();

        for (player, message) in messages {
            self.send(player, &message);
        }
    }

    /// Sends the current status to every player that is not in a match.
    fn broadcast_status(&mut self) {
        let message = ServerMessage::Lobby(LobbyMessage::ServerStatus(self.status()));
        let receivers: Vec<PlayerId> = self
            .players
            .keys()
            .copied()
            .filter(|&p| !self.games.is_playing(p))
            .collect();

        for player in receivers {
            self.send(player, &message);
        }
    }

    fn deny(&mut self, peer: PlayerId, reason: String) {
        log::debug!("Denied request from {}: {}", peer, reason);
        self.pending_events
            .push_back(ServerEvent::RequestDenied { peer, reason });
    }

    fn send(&mut self, peer: PlayerId, message: &ServerMessage) {
        if let Err(e) = self.endpoint.send_to(peer, &message.encode()) {
            self.pending_events.push_back(ServerEvent::Error {
                message: format!("Failed to send to {}: {}", peer, e),
            });
        }
    }
}

impl HostedServer for LobbyServer {
    /// The identification record with live counters.
    fn info(&self) -> ServerInfo {
        let playing = self
            .players
            .keys()
            .filter(|&&p| self.games.is_playing(p))
            .count();

        let mut info = ServerInfo::new(&self.config.name, &self.config.description)
            .with_address(self.local_addr().ip().to_string(), self.local_addr().port());
        info.active_games = self.games.active_count() as i32;
        info.waiting_players = (self.players.len() - playing) as i32;
        info
    }

    fn allow_new_players(&mut self, allow: bool) {
        self.endpoint.set_accepting(allow);
    }

    fn has_active_game(&self) -> bool {
        self.games.active_count() > 0
    }

    fn process_packets(&mut self) {
        match self.endpoint.receive() {
            Ok(events) => {
                for event in events {
                    self.handle_host_event(event);
                }
            }
            Err(e) => self.pending_events.push_back(ServerEvent::Error {
                message: format!("Network error: {}", e),
            }),
        }
    }

    fn update_games(&mut self) {
        if self.status_dirty {
            self.status_dirty = false;
            self.broadcast_status();
        }

        if !self.log_events {
            return;
        }
        for event in self.pending_events.drain(..) {
            if event.is_error() {
                log::warn!("{}", event);
            } else {
                log::debug!("{}", event);
            }
        }
    }
}
