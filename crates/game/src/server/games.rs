use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use crate::lobby::{GameStatus, OpenGame};
use crate::net::PlayerId;

pub type GameId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameState {
    Waiting,
    Active,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameSettings {
    pub name: String,
    pub speed_index: u8,
    pub rules_index: u8,
    pub score: u8,
    pub password: Option<String>,
}

#[derive(Debug)]
pub struct PendingGame {
    pub id: GameId,
    pub creator: PlayerId,
    pub settings: GameSettings,
    pub state: GameState,
    pub players: Vec<PlayerId>,
    pub created_at: Instant,
}

impl PendingGame {
    pub fn new(id: GameId, creator: PlayerId, settings: GameSettings) -> Self {
        Self {
            id,
            creator,
            settings,
            state: GameState::Waiting,
            players: vec![creator],
            created_at: Instant::now(),
        }
    }

    pub fn has_password(&self) -> bool {
        self.settings.password.is_some()
    }

    pub fn is_member(&self, player: PlayerId) -> bool {
        self.players.contains(&player)
    }

    pub fn to_open_game(&self) -> OpenGame {
        OpenGame {
            id: self.id,
            name: self.settings.name.clone(),
            rules_index: self.settings.rules_index,
            speed_index: self.settings.speed_index,
            score: self.settings.score,
            has_password: self.has_password(),
        }
    }

    /// The game as seen by `receiver`: everyone but the receiver is listed
    /// as another player.
    pub fn status_for(&self, receiver: PlayerId, names: &HashMap<PlayerId, String>) -> GameStatus {
        let other_players: Vec<PlayerId> = self
            .players
            .iter()
            .copied()
            .filter(|&p| p != receiver)
            .collect();
        let other_player_names = other_players
            .iter()
            .map(|p| names.get(p).cloned().unwrap_or_default())
            .collect();

        GameStatus {
            game_id: self.id,
            creator: self.creator,
            name: self.settings.name.clone(),
            speed: u32::from(self.settings.speed_index),
            rules: u32::from(self.settings.rules_index),
            score: u32::from(self.settings.score),
            other_players,
            other_player_names,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum JoinError {
    #[error("no such game")]
    NotFound,
    #[error("already in a game")]
    AlreadyInGame,
    #[error("wrong password")]
    InvalidPassword,
    #[error("game already started")]
    Started,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum StartError {
    #[error("not in a game")]
    NotInGame,
    #[error("only the creator can start the game")]
    NotHost,
    #[error("opponent is not in the game")]
    NoOpponent,
    #[error("game already started")]
    Started,
}

/// What became of a game after a player left it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaveOutcome {
    pub game_id: GameId,
    /// The game no longer exists; `removed` were dropped along with it.
    pub closed: bool,
    pub removed: Vec<PlayerId>,
    pub remaining: Vec<PlayerId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartOutcome {
    pub game_id: GameId,
    pub players: [PlayerId; 2],
    pub removed: Vec<PlayerId>,
}

/// Open and running games of one server, keyed by id in creation order.
#[derive(Debug)]
pub struct GameRegistry {
    games: BTreeMap<GameId, PendingGame>,
    player_games: HashMap<PlayerId, GameId>,
    next_id: GameId,
}

impl Default for GameRegistry {
    fn default() -> Self {
        Self {
            games: BTreeMap::new(),
            player_games: HashMap::new(),
            next_id: 1,
        }
    }
}

impl GameRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `None` when the creator already is in a game.
    pub fn open(&mut self, creator: PlayerId, settings: GameSettings) -> Option<GameId> {
        if self.player_games.contains_key(&creator) {
            return None;
        }

        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1).max(1);

        self.games.insert(id, PendingGame::new(id, creator, settings));
        self.player_games.insert(creator, id);
        Some(id)
    }

    pub fn join(
        &mut self,
        game_id: GameId,
        player: PlayerId,
        password: &str,
    ) -> Result<(), JoinError> {
        if self.player_games.contains_key(&player) {
            return Err(JoinError::AlreadyInGame);
        }

        let game = self.games.get_mut(&game_id).ok_or(JoinError::NotFound)?;
        if game.state != GameState::Waiting {
            return Err(JoinError::Started);
        }

        if let Some(ref required) = game.settings.password {
            if password != required {
                return Err(JoinError::InvalidPassword);
            }
        }

        game.players.push(player);
        self.player_games.insert(player, game_id);
        Ok(())
    }

    /// A creator leaving closes a waiting game; anyone leaving ends a
    /// running one.
    pub fn leave(&mut self, player: PlayerId) -> Option<LeaveOutcome> {
        let game_id = self.player_games.remove(&player)?;
        let game = self.games.get_mut(&game_id)?;
        game.players.retain(|&p| p != player);

        let closes = game.creator == player || game.state == GameState::Active;
        if !closes {
            return Some(LeaveOutcome {
                game_id,
                closed: false,
                removed: Vec::new(),
                remaining: game.players.clone(),
            });
        }

        let removed = self
            .games
            .remove(&game_id)
            .map(|game| game.players)
            .unwrap_or_default();
        for p in &removed {
            self.player_games.remove(p);
        }

        Some(LeaveOutcome {
            game_id,
            closed: true,
            removed,
            remaining: Vec::new(),
        })
    }

    /// Moves the creator's game into a running match against `opponent`.
    /// Other joined players are dropped from it.
    pub fn start(
        &mut self,
        creator: PlayerId,
        opponent: PlayerId,
    ) -> Result<StartOutcome, StartError> {
        let game_id = *self.player_games.get(&creator).ok_or(StartError::NotInGame)?;
        let game = self.games.get_mut(&game_id).ok_or(StartError::NotInGame)?;

        if game.creator != creator {
            return Err(StartError::NotHost);
        }
        if game.state != GameState::Waiting {
            return Err(StartError::Started);
        }
        if opponent == creator || !game.is_member(opponent) {
            return Err(StartError::NoOpponent);
        }

        let removed: Vec<PlayerId> = game
            .players
            .iter()
            .copied()
            .filter(|&p| p != creator && p != opponent)
            .collect();
        game.players = vec![creator, opponent];
        game.state = GameState::Active;

        for p in &removed {
            self.player_games.remove(p);
        }

        Ok(StartOutcome {
            game_id,
            players: [creator, opponent],
            removed,
        })
    }

    pub fn get(&self, game_id: GameId) -> Option<&PendingGame> {
        self.games.get(&game_id)
    }

    pub fn player_game(&self, player: PlayerId) -> Option<GameId> {
        self.player_games.get(&player).copied()
    }

    pub fn is_playing(&self, player: PlayerId) -> bool {
        self.player_game(player)
            .and_then(|id| self.games.get(&id))
            .is_some_and(|game| game.state == GameState::Active)
    }

    /// Waiting games in creation order, as listed in the server status.
    pub fn open_games(&self) -> Vec<OpenGame> {
        self.games
            .values()
            .filter(|g| g.state == GameState::Waiting)
            .map(PendingGame::to_open_game)
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.games
            .values()
            .filter(|g| g.state == GameState::Active)
            .count()
    }

    pub fn game_count(&self) -> usize {
        self.games.len()
    }
}
