use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::config::{ConfigError, UserConfig};
use crate::lobby::script_field;
use crate::net::{DEFAULT_PORT, DEFAULT_TICK_RATE};

/// CRC-32 of a rules script, as sent in the match handoff.
pub fn rules_checksum(script: &[u8]) -> i32 {
    crc32fast::hash(script) as i32
}

/// One ruleset the server offers. The checksum is handed to both players
/// when a match starts.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RulesetEntry {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub author: String,
    /// Entries without a script stand for the built-in rules.
    #[serde(default)]
    pub script: Option<PathBuf>,
    #[serde(skip)]
    pub checksum: i32,
}

impl RulesetEntry {
    pub fn named(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            author: String::new(),
            script: None,
            checksum: 0,
        }
    }

    /// Title and author come from the script's `__TITLE__` and `__AUTHOR__`
    /// lines, the checksum from its whole content.
    pub fn from_script(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut entry = Self {
            script: Some(path.as_ref().to_path_buf()),
            ..Self::named("")
        };
        entry.load_script(Path::new(""))?;
        Ok(entry)
    }

    /// Relative script paths are resolved against `base`.
    fn load_script(&mut self, base: &Path) -> Result<(), ConfigError> {
        let Some(script) = &self.script else {
            return Ok(());
        };
        let path = base.join(script);
        let bytes = fs::read(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        self.checksum = rules_checksum(&bytes);

        let text = String::from_utf8_lossy(&bytes);
        if self.title.is_empty() {
            self.title = script_field(&text, "__TITLE__").unwrap_or_else(|| {
                path.file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
                    .unwrap_or_default()
            });
        }
        if self.author.is_empty() {
            self.author = script_field(&text, "__AUTHOR__").unwrap_or_default();
        }
        log::debug!("Loaded rules {} ({:#010x})", self.title, self.checksum);
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    pub bind: String,
    pub port: u16,
    pub tick_rate: u32,
    pub max_clients: usize,
    pub name: String,
    pub description: String,
    pub speeds: Vec<u32>,
    pub rulesets: Vec<RulesetEntry>,
    #[serde(skip)]
    pub idle_timeout: Duration,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            bind: String::from("0.0.0.0"),
            port: DEFAULT_PORT,
            tick_rate: DEFAULT_TICK_RATE,
            max_clients: 32,
            name: String::from("Volley Server"),
            description: String::new(),
            speeds: vec![60, 75, 90, 100],
            rulesets: vec![RulesetEntry::named("Default")],
            idle_timeout: Duration::from_secs(10),
        }
    }
}

impl HostConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: Self = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        let base = path.parent().unwrap_or(Path::new(""));
        for ruleset in &mut config.rulesets {
            ruleset.load_script(base)?;
        }
        Ok(config)
    }

    /// A server hosted from the game menu: named after the local player,
    /// offering only the locally configured speed and ruleset.
    pub fn for_local_player(user: &UserConfig, rules: RulesetEntry) -> Self {
        let name = user.network_identity().name;
        Self {
            description: format!("{}'s game", name),
            name,
            speeds: vec![user.gamefps],
            rulesets: vec![rules],
            max_clients: 8,
            ..Default::default()
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}
