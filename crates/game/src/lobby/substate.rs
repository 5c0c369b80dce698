use crate::net::{LobbyRequest, PlayerId};

use super::preference::{Preferences, SCORE_CHOICES};
use super::status::{GameStatus, ServerStatusData};

/// Browsing open games, or preparing to open one. Entry 0 of the game list
/// is the "open a new game" choice; entry `n` maps to `open_games[n - 1]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MainSubstate {
    pub chosen_speed: usize,
    pub chosen_rules: usize,
    pub chosen_score: usize,
    pub selected_game: usize,
    pub password: String,
}

impl MainSubstate {
    pub fn new(prefs: Preferences) -> Self {
        Self {
            chosen_speed: prefs.speed,
            chosen_rules: prefs.rules,
            chosen_score: prefs.score,
            selected_game: 0,
            password: String::new(),
        }
    }

    pub fn cycle_speed(&mut self, status: &ServerStatusData) {
        self.chosen_speed = wrap_next(self.chosen_speed, status.possible_speeds.len());
    }

    pub fn cycle_rules(&mut self, status: &ServerStatusData) {
        self.chosen_rules = wrap_next(self.chosen_rules, status.possible_rules.len());
    }

    pub fn cycle_score(&mut self) {
        self.chosen_score = wrap_next(self.chosen_score, SCORE_CHOICES.len());
    }

    pub fn chosen_score_value(&self) -> u32 {
        SCORE_CHOICES
            .get(self.chosen_score)
            .copied()
            .unwrap_or(SCORE_CHOICES[0])
    }

    pub fn select_game(&mut self, index: usize, status: &ServerStatusData) {
        if index != self.selected_game {
            self.password.clear();
        }
        self.selected_game = index;
        self.validate_selection(status);
    }

    /// A game that vanished from the list falls back to the "open game" entry.
    pub fn validate_selection(&mut self, status: &ServerStatusData) {
        if self.selected_game > status.open_games.len() {
            self.selected_game = 0;
            self.password.clear();
        }
    }

    pub fn set_password(&mut self, password: impl Into<String>) {
        self.password = password.into();
    }

    pub fn open_game_request(&self) -> LobbyRequest {
        LobbyRequest::OpenGame {
            speed: self.chosen_speed as u32,
            score: self.chosen_score_value(),
            rules: self.chosen_rules as u32,
            password: self.password.clone(),
        }
    }

    /// `None` while the "open game" entry is selected.
    pub fn join_game_request(&self, status: &ServerStatusData) -> Option<LobbyRequest> {
        let index = self.selected_game.checked_sub(1)?;
        let game = status.game(index)?;
        Some(LobbyRequest::JoinGame {
            game_id: game.id,
            password: self.password.clone(),
        })
    }
}

/// Inside a pending game, waiting for the host to start it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameSubstate {
    pub game_id: u32,
    pub is_host: bool,
    pub name: String,
    pub speed: u32,
    pub rules: u32,
    pub score: u32,
    pub other_players: Vec<PlayerId>,
    pub other_player_names: Vec<String>,
    pub selected_player: usize,
}

impl GameSubstate {
    pub fn from_status(status: GameStatus, local_id: Option<PlayerId>) -> Self {
        Self {
            game_id: status.game_id,
            is_host: local_id == Some(status.creator),
            name: status.name,
            speed: status.speed,
            rules: status.rules,
            score: status.score,
            other_players: status.other_players,
            other_player_names: status.other_player_names,
            selected_player: 0,
        }
    }

    pub fn select_player(&mut self, index: usize) {
        self.selected_player = index.min(self.other_players.len().saturating_sub(1));
    }

    pub fn selected_opponent(&self) -> Option<PlayerId> {
        self.other_players.get(self.selected_player).copied()
    }

    pub fn leave_request(&self) -> LobbyRequest {
        LobbyRequest::LeaveGame
    }

    /// Host-only, and only once somebody joined.
    pub fn start_game_request(&self) -> Option<LobbyRequest> {
        if !self.is_host {
            return None;
        }
        self.selected_opponent()
            .map(|opponent| LobbyRequest::StartGame { opponent })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LobbySubstate {
    Main(MainSubstate),
    Game(GameSubstate),
}

/// Server announcements that replace the active substate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubstateEvent {
    StatusFirstReceived,
    JoinedGame {
        status: GameStatus,
        local_id: Option<PlayerId>,
    },
    RemovedFromGame,
}

impl Default for LobbySubstate {
    fn default() -> Self {
        LobbySubstate::Main(MainSubstate::new(Preferences::default()))
    }
}

impl LobbySubstate {
    pub fn transition(event: SubstateEvent, prefs: Preferences) -> LobbySubstate {
        match event {
            SubstateEvent::StatusFirstReceived | SubstateEvent::RemovedFromGame => {
                LobbySubstate::Main(MainSubstate::new(prefs))
            }
            SubstateEvent::JoinedGame { status, local_id } => {
                LobbySubstate::Game(GameSubstate::from_status(status, local_id))
            }
        }
    }

    pub fn as_main(&self) -> Option<&MainSubstate> {
        match self {
            LobbySubstate::Main(main) => Some(main),
            LobbySubstate::Game(_) => None,
        }
    }

    pub fn as_main_mut(&mut self) -> Option<&mut MainSubstate> {
        match self {
            LobbySubstate::Main(main) => Some(main),
            LobbySubstate::Game(_) => None,
        }
    }

    pub fn as_game(&self) -> Option<&GameSubstate> {
        match self {
            LobbySubstate::Game(game) => Some(game),
            LobbySubstate::Main(_) => None,
        }
    }

    pub fn as_game_mut(&mut self) -> Option<&mut GameSubstate> {
        match self {
            LobbySubstate::Game(game) => Some(game),
            LobbySubstate::Main(_) => None,
        }
    }
}

fn wrap_next(current: usize, len: usize) -> usize {
    if len == 0 { 0 } else { (current + 1) % len }
}
