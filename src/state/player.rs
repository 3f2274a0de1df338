//! Players and their location.
//!
//! A player is registered once with a unique username and may sit in at most
//! one game at a time. Where a player is gets tracked by a small state
//! machine that rejects invalid transitions.
//!
//! # State Diagram
//!
//! ```text
//! ┌──────────┐   join(game, team)   ┌──────────────────────┐
//! │   Idle   │─────────────────────▶│ InGame { game, team }│
//! └──────────┘                      └──────────┬───────────┘
//!       ▲                                      │
//!       │      leave / release (game removed)  │
//!       └──────────────────────────────────────┘
//! ```

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::game::GameId;
use super::grid::Team;

/// Minimum username length, in characters.
pub const MIN_USERNAME_LEN: usize = 3;

/// Maximum username length, in characters.
pub const MAX_USERNAME_LEN: usize = 50;

/// Opaque player identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub Uuid);

impl PlayerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PlayerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Where a player currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PlayerLocation {
    /// Not seated in any game
    #[default]
    Idle,

    /// Seated in a game on a team
    InGame { game_id: GameId, team: Team },
}

impl PlayerLocation {
    pub fn is_in_game(&self) -> bool {
        matches!(self, Self::InGame { .. })
    }

    pub fn game_id(&self) -> Option<GameId> {
        match self {
            Self::InGame { game_id, .. } => Some(*game_id),
            Self::Idle => None,
        }
    }
}

impl fmt::Display for PlayerLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::InGame { game_id, team } => write!(f, "InGame({}, {})", game_id, team),
        }
    }
}

/// State transition events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerEvent {
    Join { game_id: GameId, team: Team },
    Leave { game_id: GameId },
    /// The game was removed out from under the player.
    Release { game_id: GameId },
}

/// Error when a state transition is invalid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidTransition {
    pub from: PlayerLocation,
    pub event: PlayerEvent,
    pub reason: &'static str,
}

impl fmt::Display for InvalidTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Invalid transition from {} via {:?}: {}",
            self.from, self.event, self.reason
        )
    }
}

impl std::error::Error for InvalidTransition {}

/// Player location state machine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlayerState {
    location: PlayerLocation,
}

impl PlayerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn location(&self) -> &PlayerLocation {
        &self.location
    }

    /// Apply an event in place, returning error if invalid.
    pub fn apply_mut(&mut self, event: PlayerEvent) -> Result<(), InvalidTransition> {
        self.location = self.transition(&event)?;
        Ok(())
    }

    fn transition(&self, event: &PlayerEvent) -> Result<PlayerLocation, InvalidTransition> {
        use PlayerEvent::*;
        use PlayerLocation::*;

        let invalid = |reason: &'static str| InvalidTransition {
            from: self.location,
            event: *event,
            reason,
        };

        match (&self.location, event) {
            (Idle, Join { game_id, team }) => Ok(InGame {
                game_id: *game_id,
                team: *team,
            }),
            (InGame { game_id: current, .. }, Join { game_id, .. }) if current == game_id => {
                Err(invalid("Already in this game"))
            }
            (InGame { .. }, Join { .. }) => Err(invalid("Must leave current game first")),

            (InGame { game_id: current, .. }, Leave { game_id } | Release { game_id })
                if current == game_id =>
            {
                Ok(Idle)
            }
            (InGame { .. }, Leave { .. }) => Err(invalid("Not in that game")),
            (InGame { .. }, Release { .. }) => Err(invalid("Not in that game")),
            (Idle, Leave { .. } | Release { .. }) => Err(invalid("Not in a game")),
        }
    }

    pub fn is_in_game(&self) -> bool {
        self.location.is_in_game()
    }

    pub fn game_id(&self) -> Option<GameId> {
        self.location.game_id()
    }
}

/// A registered player.
#[derive(Debug, Clone, Serialize)]
pub struct Player {
    pub id: PlayerId,
    pub username: String,
    /// Most recent team assignment
    pub team: Option<Team>,
    pub created_at: DateTime<Utc>,
    pub last_move_time: Option<DateTime<Utc>>,
    pub total_moves: u64,
    #[serde(skip)]
    state: PlayerState,
}

impl Player {
    fn new(username: String, now: DateTime<Utc>) -> Self {
        Self {
            id: PlayerId::new(),
            username,
            team: None,
            created_at: now,
            last_move_time: None,
            total_moves: 0,
            state: PlayerState::new(),
        }
    }

    pub fn location(&self) -> &PlayerLocation {
        self.state.location()
    }

    pub fn is_on_team(&self) -> bool {
        self.team.is_some()
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "id": self.id,
            "username": self.username,
            "team": self.team,
            "created_at": self.created_at,
            "last_move_time": self.last_move_time,
            "total_moves": self.total_moves,
            "location": self.state.location(),
        })
    }
}

/// Player errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlayerError {
    InvalidUsername(String),
    UsernameTaken(String),
    NotFound(PlayerId),
    Transition(InvalidTransition),
}

impl fmt::Display for PlayerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidUsername(name) => write!(
                f,
                "Username {:?} must be {}-{} characters",
                name, MIN_USERNAME_LEN, MAX_USERNAME_LEN
            ),
            Self::UsernameTaken(name) => write!(f, "Username {:?} is already taken", name),
            Self::NotFound(id) => write!(f, "Player {} not found", id),
            Self::Transition(err) => err.fmt(f),
        }
    }
}

impl std::error::Error for PlayerError {}

impl From<InvalidTransition> for PlayerError {
    fn from(err: InvalidTransition) -> Self {
        Self::Transition(err)
    }
}

#[derive(Debug, Default)]
struct RosterInner {
    players: HashMap<PlayerId, Player>,
    /// Lowercased username to player ID
    usernames: HashMap<String, PlayerId>,
}

/// All registered players.
#[derive(Debug, Default)]
pub struct PlayerRoster {
    inner: RwLock<RosterInner>,
}

impl PlayerRoster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new player under a unique username.
    pub async fn register(&self, username: &str, now: DateTime<Utc>) -> Result<Player, PlayerError> {
        let username = username.trim();
        let len = username.chars().count();
        if !(MIN_USERNAME_LEN..=MAX_USERNAME_LEN).contains(&len) {
            return Err(PlayerError::InvalidUsername(username.to_string()));
        }

        let key = username.to_lowercase();
        let mut inner = self.inner.write().await;
        if inner.usernames.contains_key(&key) {
            return Err(PlayerError::UsernameTaken(username.to_string()));
        }

        let player = Player::new(username.to_string(), now);
        inner.usernames.insert(key, player.id);
        inner.players.insert(player.id, player.clone());
        tracing::info!(player_id = %player.id, username = %player.username, "player registered");
        Ok(player)
    }

    /// Get a copy of a player record.
    pub async fn get(&self, player_id: PlayerId) -> Option<Player> {
        self.inner.read().await.players.get(&player_id).cloned()
    }

    pub async fn find_by_username(&self, username: &str) -> Option<Player> {
        let inner = self.inner.read().await;
        let id = inner.usernames.get(&username.trim().to_lowercase())?;
        inner.players.get(id).cloned()
    }

    /// Apply a location event to a player.
    pub async fn apply_event(&self, player_id: PlayerId, event: PlayerEvent) -> Result<(), PlayerError> {
        let mut inner = self.inner.write().await;
        let player = inner
            .players
            .get_mut(&player_id)
            .ok_or(PlayerError::NotFound(player_id))?;
        player.state.apply_mut(event)?;
        if let PlayerEvent::Join { team, .. } = event {
            player.team = Some(team);
        }
        Ok(())
    }

    /// Record an accepted move on the player's persistent record.
    pub async fn record_move(&self, player_id: PlayerId, at: DateTime<Utc>) {
        let mut inner = self.inner.write().await;
        if let Some(player) = inner.players.get_mut(&player_id) {
            player.last_move_time = Some(at);
            player.total_moves += 1;
        }
    }

    pub async fn count(&self) -> usize {
        self.inner.read().await.players.len()
    }
}
