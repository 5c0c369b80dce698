use std::fs;
use std::path::PathBuf;

use super::status::ServerStatusData;

/// Score-to-win values offered when opening a game.
pub const SCORE_CHOICES: [u32; 8] = [2, 5, 10, 15, 20, 25, 40, 50];

pub const DEFAULT_SCORE_INDEX: usize = 3;

/// Maps a configured ruleset identifier to the title it announces, which is
/// what servers list in their catalog.
pub trait RulesResolver {
    fn title(&self, rules: &str) -> Option<String>;
}

impl<F> RulesResolver for F
where
    F: Fn(&str) -> Option<String>,
{
    fn title(&self, rules: &str) -> Option<String> {
        self(rules)
    }
}

/// Reads the `__TITLE__` assignment out of a rules script on disk.
#[derive(Debug, Clone)]
pub struct ScriptRulesResolver {
    pub rules_dir: PathBuf,
}

impl ScriptRulesResolver {
    pub fn new(rules_dir: impl Into<PathBuf>) -> Self {
        Self {
            rules_dir: rules_dir.into(),
        }
    }
}

impl Default for ScriptRulesResolver {
    fn default() -> Self {
        Self::new("rules")
    }
}

impl RulesResolver for ScriptRulesResolver {
    fn title(&self, rules: &str) -> Option<String> {
        let path = self.rules_dir.join(rules);
        let script = match fs::read_to_string(&path) {
            Ok(script) => script,
            Err(e) => {
                log::debug!("Cannot read rules {}: {}", path.display(), e);
                return None;
            }
        };
        script_field(&script, "__TITLE__")
    }
}

/// Value of a quoted `NAME = "value"` assignment in a rules script.
pub(crate) fn script_field(script: &str, name: &str) -> Option<String> {
    script.lines().find_map(|line| {
        let value = line.trim().strip_prefix(name)?.trim_start();
        let value = value.strip_prefix('=')?.trim();
        let quote = value.chars().next().filter(|c| *c == '"' || *c == '\'')?;
        let inner = &value[1..];
        inner.find(quote).map(|end| inner[..end].to_string())
    })
}

/// Index of the entry closest to `target`. Ties go to the lowest index;
/// `None` for an empty list.
pub fn closest_index<I>(values: I, target: i64) -> Option<usize>
where
    I: IntoIterator<Item = i64>,
{
    let mut best: Option<(usize, i64)> = None;
    for (index, value) in values.into_iter().enumerate() {
        let distance = (value - target).abs();
        if best.is_none_or(|(_, d)| distance < d) {
            best = Some((index, distance));
        }
    }
    best.map(|(index, _)| index)
}

/// Indices preselected in a fresh main substate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preferences {
    pub speed: usize,
    pub rules: usize,
    pub score: usize,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            speed: 0,
            rules: 0,
            score: DEFAULT_SCORE_INDEX,
        }
    }
}

impl Preferences {
    /// Picks the catalog entries closest to the local configuration. A rules
    /// title missing from the catalog leaves the first entry selected.
    pub fn closest(
        status: &ServerStatusData,
        target_fps: u32,
        target_score: u32,
        rules_title: Option<&str>,
    ) -> Self {
        let speed = closest_index(
            status.possible_speeds.iter().map(|&s| i64::from(s)),
            i64::from(target_fps),
        )
        .unwrap_or(0);

        let score = closest_index(
            SCORE_CHOICES.iter().map(|&s| i64::from(s)),
            i64::from(target_score),
        )
        .unwrap_or(DEFAULT_SCORE_INDEX);

        let rules = rules_title
            .and_then(|title| status.possible_rules.iter().position(|r| r == title))
            .unwrap_or(0);

        Self {
            speed,
            rules,
            score,
        }
    }
}
