//! Engine configuration.
//!
//! Loaded from TOML, with environment overrides for the per-game settings.
//!
//! ```toml
//! event_channel_capacity = 256
//! recent_moves_limit = 50
//!
//! [game]
//! grid_size = 100
//! player_cooldown_seconds = 5
//! max_concurrent_players = 1000
//! ```

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::state::grid::MAX_GRID_SIZE;

/// Default board edge length.
pub const DEFAULT_GRID_SIZE: usize = 100;

/// Default seconds between a player's moves.
pub const DEFAULT_PLAYER_COOLDOWN_SECONDS: u64 = 5;

/// Default seats per game.
pub const DEFAULT_MAX_CONCURRENT_PLAYERS: usize = 1000;

/// Default per-game broadcast buffer.
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default number of moves kept in a snapshot.
pub const DEFAULT_RECENT_MOVES_LIMIT: usize = 50;

/// Parameters fixed when a game is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    pub grid_size: usize,
    pub player_cooldown_seconds: u64,
    pub max_concurrent_players: usize,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            grid_size: DEFAULT_GRID_SIZE,
            player_cooldown_seconds: DEFAULT_PLAYER_COOLDOWN_SECONDS,
            max_concurrent_players: DEFAULT_MAX_CONCURRENT_PLAYERS,
        }
    }
}

impl GameConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.player_cooldown_seconds)
    }

    /// Seats per team. An odd seat count gives one team the extra seat.
    pub fn team_capacity(&self) -> usize {
        self.max_concurrent_players.div_ceil(2)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.grid_size == 0 || self.grid_size > MAX_GRID_SIZE {
            return Err(ConfigError::Invalid(format!(
                "grid_size must be between 1 and {}",
                MAX_GRID_SIZE
            )));
        }
        if self.max_concurrent_players == 0 {
            return Err(ConfigError::Invalid(
                "max_concurrent_players must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Engine-wide settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Defaults for games created without explicit parameters
    pub game: GameConfig,
    /// Events buffered per game before slow subscribers start lagging
    pub event_channel_capacity: usize,
    /// Accepted moves retained for snapshots
    pub recent_moves_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            game: GameConfig::default(),
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            recent_moves_limit: DEFAULT_RECENT_MOVES_LIMIT,
        }
    }
}

impl EngineConfig {
    /// Read and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Override game settings from `GRID_SIZE`, `PLAYER_COOLDOWN_SECONDS`
    /// and `MAX_CONCURRENT_PLAYERS`.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("GRID_SIZE") {
            self.game.grid_size = parse_var("GRID_SIZE", &v)?;
        }
        if let Some(v) = lookup("PLAYER_COOLDOWN_SECONDS") {
            self.game.player_cooldown_seconds = parse_var("PLAYER_COOLDOWN_SECONDS", &v)?;
        }
        if let Some(v) = lookup("MAX_CONCURRENT_PLAYERS") {
            self.game.max_concurrent_players = parse_var("MAX_CONCURRENT_PLAYERS", &v)?;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.game.validate()?;
        if self.event_channel_capacity == 0 {
            return Err(ConfigError::Invalid(
                "event_channel_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{} has invalid value {:?}", key, value)))
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Io(String),
    Parse(String),
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "Failed to read config: {}", e),
            Self::Parse(e) => write!(f, "Failed to parse config: {}", e),
            Self::Invalid(e) => write!(f, "Invalid config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}
