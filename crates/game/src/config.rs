use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::net::DEFAULT_PORT;

pub const MAX_PLAYER_NAME_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerSide {
    #[default]
    Left,
    Right,
}

impl PlayerSide {
    pub fn wire_value(&self) -> u8 {
        match self {
            PlayerSide::Left => 0,
            PlayerSide::Right => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerProfile {
    pub name: String,
    pub human: bool,
    pub script_name: String,
    pub color: [u8; 3],
}

impl Default for PlayerProfile {
    fn default() -> Self {
        Self {
            name: String::from("Player"),
            human: true,
            script_name: String::from("com_11"),
            color: [0, 0, 255],
        }
    }
}

/// The identity announced to a server on entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerIdentity {
    pub name: String,
    pub side: PlayerSide,
    pub color: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserConfig {
    pub network_side: PlayerSide,
    pub left_player: PlayerProfile,
    pub right_player: PlayerProfile,
    pub gamefps: u32,
    pub scoretowin: u32,
    pub rules: String,
    pub additional_network_server: String,
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            network_side: PlayerSide::Left,
            left_player: PlayerProfile {
                name: String::from("Left Player"),
                ..Default::default()
            },
            right_player: PlayerProfile {
                name: String::from("Right Player"),
                color: [255, 0, 0],
                ..Default::default()
            },
            gamefps: 75,
            scoretowin: 15,
            rules: String::from("default.lua"),
            additional_network_server: String::new(),
        }
    }
}

impl UserConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Falls back to defaults when the file is missing or broken.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                log::warn!("Using default user config: {}", e);
                Self::default()
            }
        }
    }

    pub fn profile(&self, side: PlayerSide) -> &PlayerProfile {
        match side {
            PlayerSide::Left => &self.left_player,
            PlayerSide::Right => &self.right_player,
        }
    }

    pub fn player_identity(&self, side: PlayerSide, force_human: bool) -> PlayerIdentity {
        let profile = self.profile(side);
        let name = if force_human || profile.human {
            profile.name.clone()
        } else {
            format!("{}.lua", profile.script_name)
        };

        let [r, g, b] = profile.color;
        PlayerIdentity {
            name: name.chars().take(MAX_PLAYER_NAME_LEN).collect(),
            side,
            color: u32::from(r) | u32::from(g) << 8 | u32::from(b) << 16,
        }
    }

    /// The identity used online: always the configured network side, always
    /// human.
    pub fn network_identity(&self) -> PlayerIdentity {
        self.player_identity(self.network_side, true)
    }

    pub fn additional_server(&self) -> Option<(String, u16)> {
        let address = self.additional_network_server.trim();
        if address.is_empty() {
            return None;
        }
        Some(parse_server_address(address))
    }
}

/// Splits `host[:port]`. A missing, unparsable or out-of-range port yields the
/// well-known port.
pub fn parse_server_address(address: &str) -> (String, u16) {
    match address.split_once(':') {
        Some((host, port)) => {
            let port = port
                .trim()
                .parse::<i64>()
                .ok()
                .filter(|p| (1..=65535).contains(p))
                .map(|p| p as u16)
                .unwrap_or(DEFAULT_PORT);
            (host.to_string(), port)
        }
        None => (address.to_string(), DEFAULT_PORT),
    }
}

#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    pub port: u16,
    pub directory_url: String,
    pub cache_path: PathBuf,
    pub fetch_timeout: Duration,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            directory_url: String::from("http://blobbyvolley.de/server.php"),
            cache_path: PathBuf::from("onlineserver.xml"),
            fetch_timeout: Duration::from_secs(5),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_server_address() {
        assert_eq!(parse_server_address("example.org"), ("example.org".into(), DEFAULT_PORT));
        assert_eq!(parse_server_address("example.org:4000"), ("example.org".into(), 4000));
        assert_eq!(parse_server_address("example.org:abc"), ("example.org".into(), DEFAULT_PORT));
        assert_eq!(parse_server_address("example.org:0"), ("example.org".into(), DEFAULT_PORT));
        assert_eq!(parse_server_address("example.org:70000"), ("example.org".into(), DEFAULT_PORT));
    }

    #[test]
    fn test_identity_for_script_player() {
        let mut config = UserConfig::default();
        config.right_player.human = false;
        config.right_player.script_name = "hyperion".into();

        let identity = config.player_identity(PlayerSide::Right, false);
        assert_eq!(identity.name, "hyperion.lua");

        assert_eq!(identity.side, PlayerSide::Right);

        let forced = config.player_identity(PlayerSide::Right, true);
        assert_eq!(forced.name, "Right Player");
        assert_eq!(forced.side, PlayerSide::Right);
    }

    #[test]
    fn test_identity_name_and_color() {
        let mut config = UserConfig::default();
        config.left_player.name = "a very long player name indeed".into();
        config.left_player.color = [0x11, 0x22, 0x33];

        let identity = config.network_identity();
        assert_eq!(identity.name.chars().count(), MAX_PLAYER_NAME_LEN);
        assert_eq!(identity.color, 0x332211);
        assert_eq!(identity.side, PlayerSide::Left);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: UserConfig = toml::from_str(
            r#"
            network_side = "right"
            gamefps = 90
            additional_network_server = "10.1.1.1:4321"

            [right_player]
            name = "Remote"
            "#,
        )
        .unwrap();

        assert_eq!(config.network_side, PlayerSide::Right);
        assert_eq!(config.gamefps, 90);
        assert_eq!(config.scoretowin, 15);
        assert_eq!(config.right_player.name, "Remote");
        assert!(config.right_player.human);
        assert_eq!(config.additional_server(), Some(("10.1.1.1".into(), 4321)));
    }

    #[test]
    fn test_missing_file_falls_back() {
        let config = UserConfig::load_or_default("/nonexistent/volley.toml");
        assert_eq!(config, UserConfig::default());
    }
}
