//! Player sessions per game.
//!
//! Tracks who is seated in which game, on which team, and when each of them
//! last moved. Cooldown clocks live here, keyed by `(game, player)`, so two
//! games never share a player's cooldown.
//!
//! Lock order is always game, then session table, then roster.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};

use super::clock::Clock;
use super::game::{GameId, GameManager};
use super::grid::Team;
use super::hub::{BroadcastHub, GameEvent};
use super::player::{PlayerError, PlayerEvent, PlayerId, PlayerLocation, PlayerRoster};
use crate::config::GameConfig;

/// A player's seat in one game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionEntry {
    pub player_id: PlayerId,
    /// Fixed at first join
    pub team: Team,
    pub joined_at: DateTime<Utc>,
    /// Last accepted move in this game
    pub last_move_at: Option<DateTime<Utc>>,
    pub moves: u64,
    pub connected: bool,
}

/// Session errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    GameNotFound(GameId),
    GameCompleted(GameId),
    UnknownPlayer(PlayerId),
    TeamFull(Team),
    GameFull,
    /// The player already played this game on the given team.
    TeamLocked(Team),
    AlreadyJoined,
    AlreadyInGame(GameId),
    NotJoined,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GameNotFound(id) => write!(f, "Game {} not found", id),
            Self::GameCompleted(id) => write!(f, "Game {} is completed", id),
            Self::UnknownPlayer(id) => write!(f, "Player {} not found", id),
            Self::TeamFull(team) => write!(f, "Team {} is full", team),
            Self::GameFull => write!(f, "Game is full"),
            Self::TeamLocked(team) => write!(f, "Player is locked to team {}", team),
            Self::AlreadyJoined => write!(f, "Already joined this game"),
            Self::AlreadyInGame(id) => write!(f, "Already playing in game {}", id),
            Self::NotJoined => write!(f, "Not joined to this game"),
        }
    }
}

impl std::error::Error for SessionError {}

/// Sessions of a single game.
#[derive(Debug, Clone)]
pub struct GameSessions {
    pub game_id: GameId,
    max_players: usize,
    team_capacity: usize,
    cooldown: Duration,
    members: HashMap<PlayerId, SessionEntry>,
}

impl GameSessions {
    pub fn new(game_id: GameId, config: &GameConfig) -> Self {
        Self {
            game_id,
            max_players: config.max_concurrent_players,
            team_capacity: config.team_capacity(),
            cooldown: config.cooldown(),
            members: HashMap::new(),
        }
    }

    /// Connected players on a team.
    pub fn team_count(&self, team: Team) -> usize {
        self.members
            .values()
            .filter(|m| m.connected && m.team == team)
            .count()
    }

    pub fn connected_count(&self) -> usize {
        self.members.values().filter(|m| m.connected).count()
    }

    fn is_full(&self, team: Team) -> bool {
        self.team_count(team) >= self.team_capacity || self.connected_count() >= self.max_players
    }

    /// Decide the team for a joining player.
    pub fn pick_team(&self, player_id: PlayerId, requested: Option<Team>) -> Result<Team, SessionError> {
        if let Some(entry) = self.members.get(&player_id) {
            if entry.connected {
                return Err(SessionError::AlreadyJoined);
            }
            if requested.is_some_and(|t| t != entry.team) {
                return Err(SessionError::TeamLocked(entry.team));
            }
            if self.is_full(entry.team) {
                return Err(SessionError::TeamFull(entry.team));
            }
            return Ok(entry.team);
        }

        match requested {
            Some(team) if self.is_full(team) => Err(SessionError::TeamFull(team)),
            Some(team) => Ok(team),
            None => {
                let smaller = if self.team_count(Team::Red) <= self.team_count(Team::Black) {
                    Team::Red
                } else {
                    Team::Black
                };
                [smaller, smaller.opponent()]
                    .into_iter()
                    .find(|team| !self.is_full(*team))
                    .ok_or(SessionError::GameFull)
            }
        }
    }

    /// Seat a player. Keeps the cooldown clock of a returning player.
    fn admit(&mut self, player_id: PlayerId, team: Team, now: DateTime<Utc>) {
        let entry = self.members.entry(player_id).or_insert(SessionEntry {
            player_id,
            team,
            joined_at: now,
            last_move_at: None,
            moves: 0,
            connected: true,
        });
        entry.connected = true;
        entry.joined_at = now;
    }

    /// Team of a connected player.
    pub fn team_of(&self, player_id: PlayerId) -> Option<Team> {
        self.members
            .get(&player_id)
            .filter(|m| m.connected)
            .map(|m| m.team)
    }

    /// Time until the player may move again; zero if eligible now.
    pub fn cooldown_remaining(&self, player_id: PlayerId, now: DateTime<Utc>) -> Duration {
        let Some(last) = self.members.get(&player_id).and_then(|m| m.last_move_at) else {
            return Duration::ZERO;
        };
        // A clock that went backwards counts as no time elapsed
        let elapsed = (now - last).to_std().unwrap_or(Duration::ZERO);
        self.cooldown.saturating_sub(elapsed)
    }

    /// Start the player's cooldown clock.
    pub fn record_move(&mut self, player_id: PlayerId, at: DateTime<Utc>) {
        if let Some(entry) = self.members.get_mut(&player_id) {
            entry.last_move_at = Some(at);
            entry.moves += 1;
        }
    }

    pub fn get(&self, player_id: PlayerId) -> Option<&SessionEntry> {
        self.members.get(&player_id)
    }

    pub fn members(&self) -> impl Iterator<Item = &SessionEntry> {
        self.members.values()
    }
}

/// Session registry - tracks sessions for all games.
#[derive(Debug)]
pub struct SessionRegistry {
    games: Arc<GameManager>,
    roster: Arc<PlayerRoster>,
    hub: Arc<BroadcastHub>,
    clock: Arc<dyn Clock>,
    tables: RwLock<HashMap<GameId, Arc<Mutex<GameSessions>>>>,
}

impl SessionRegistry {
    pub fn new(
        games: Arc<GameManager>,
        roster: Arc<PlayerRoster>,
        hub: Arc<BroadcastHub>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            games,
            roster,
            hub,
            clock,
            tables: RwLock::new(HashMap::new()),
        }
    }

    /// Create the session table for a new game.
    pub async fn open(&self, game_id: GameId, config: &GameConfig) {
        self.tables
            .write()
            .await
            .entry(game_id)
            .or_insert_with(|| Arc::new(Mutex::new(GameSessions::new(game_id, config))));
    }

    /// Session table of a game.
    pub async fn table(&self, game_id: GameId) -> Option<Arc<Mutex<GameSessions>>> {
        self.tables.read().await.get(&game_id).cloned()
    }

    /// Seat a player in a game.
    ///
    /// An explicit team is honored if it has room. Without one the player
    /// goes to the smaller team, red on a tie.
    pub async fn join(
        &self,
        game_id: GameId,
        player_id: PlayerId,
        requested: Option<Team>,
    ) -> Result<Team, SessionError> {
        let handle = self
            .games
            .get(game_id)
            .await
            .ok_or(SessionError::GameNotFound(game_id))?;
        let game = handle.lock().await;
        if game.status().is_terminal() {
            return Err(SessionError::GameCompleted(game_id));
        }

        let table = self
            .table(game_id)
            .await
            .ok_or(SessionError::GameNotFound(game_id))?;
        let mut sessions = table.lock().await;

        let team = sessions.pick_team(player_id, requested)?;
        self.roster
            .apply_event(player_id, PlayerEvent::Join { game_id, team })
            .await
            .map_err(|e| join_error(player_id, e))?;

        let now = self.clock.now();
        sessions.admit(player_id, team, now);
        tracing::info!(
            game_id = %game_id,
            player_id = %player_id,
            team = %team,
            red = sessions.team_count(Team::Red),
            black = sessions.team_count(Team::Black),
            "player joined"
        );

        self.hub
            .publish(
                game_id,
                GameEvent::PlayerJoined {
                    game_id,
                    player_id,
                    team,
                    at: now,
                },
            )
            .await;
        drop(sessions);
        drop(game);
        Ok(team)
    }

    /// Remove a player's live session. Claimed territory stays, and so do the
    /// player's team and cooldown clock should they come back.
    pub async fn leave(&self, game_id: GameId, player_id: PlayerId) -> Result<(), SessionError> {
        let handle = self
            .games
            .get(game_id)
            .await
            .ok_or(SessionError::GameNotFound(game_id))?;
        let game = handle.lock().await;

        let table = self
            .table(game_id)
            .await
            .ok_or(SessionError::GameNotFound(game_id))?;
        let mut sessions = table.lock().await;
        if sessions.team_of(player_id).is_none() {
            return Err(SessionError::NotJoined);
        }

        self.roster
            .apply_event(player_id, PlayerEvent::Leave { game_id })
            .await
            .map_err(|_| SessionError::NotJoined)?;
        if let Some(entry) = sessions.members.get_mut(&player_id) {
            entry.connected = false;
        }
        tracing::info!(game_id = %game_id, player_id = %player_id, "player left");

        self.hub
            .publish(
                game_id,
                GameEvent::PlayerLeft {
                    game_id,
                    player_id,
                    at: self.clock.now(),
                },
            )
            .await;
        drop(sessions);
        drop(game);
        Ok(())
    }

    /// Time until the player may move again in this game.
    pub async fn cooldown_remaining(
        &self,
        game_id: GameId,
        player_id: PlayerId,
        now: DateTime<Utc>,
    ) -> Result<Duration, SessionError> {
        let table = self
            .table(game_id)
            .await
            .ok_or(SessionError::GameNotFound(game_id))?;
        let sessions = table.lock().await;
        Ok(sessions.cooldown_remaining(player_id, now))
    }

    /// Everyone who has joined the game, connected or not.
    pub async fn members(&self, game_id: GameId) -> Result<Vec<SessionEntry>, SessionError> {
        let table = self
            .table(game_id)
            .await
            .ok_or(SessionError::GameNotFound(game_id))?;
        let sessions = table.lock().await;
        let mut members: Vec<SessionEntry> = sessions.members().cloned().collect();
        members.sort_by_key(|m| m.joined_at);
        Ok(members)
    }

    /// Drop a game's table and free its connected players.
    /// Returns the players released.
    pub async fn close(&self, game_id: GameId) -> Vec<PlayerId> {
        let Some(table) = self.tables.write().await.remove(&game_id) else {
            return Vec::new();
        };
        let sessions = table.lock().await;

        let mut released = Vec::new();
        for entry in sessions.members().filter(|m| m.connected) {
            match self
                .roster
                .apply_event(entry.player_id, PlayerEvent::Release { game_id })
                .await
            {
                Ok(()) => released.push(entry.player_id),
                Err(e) => tracing::warn!(
                    game_id = %game_id,
                    player_id = %entry.player_id,
                    error = %e,
                    "failed to release player"
                ),
            }
        }
        released
    }
}

fn join_error(player_id: PlayerId, err: PlayerError) -> SessionError {
    match err {
        PlayerError::NotFound(_) => SessionError::UnknownPlayer(player_id),
        PlayerError::Transition(t) => match t.from {
            PlayerLocation::InGame { game_id, .. } => SessionError::AlreadyInGame(game_id),
            PlayerLocation::Idle => SessionError::NotJoined,
        },
        _ => SessionError::UnknownPlayer(player_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::clock::ManualClock;
    use pretty_assertions::assert_eq;

    fn config(max_players: usize, cooldown: u64) -> GameConfig {
        GameConfig {
            grid_size: 4,
            player_cooldown_seconds: cooldown,
            max_concurrent_players: max_players,
        }
    }

    struct Fixture {
        games: Arc<GameManager>,
        roster: Arc<PlayerRoster>,
        clock: Arc<ManualClock>,
        registry: SessionRegistry,
    }

    fn fixture() -> Fixture {
        let games = Arc::new(GameManager::new(10));
        let roster = Arc::new(PlayerRoster::new());
        let hub = Arc::new(BroadcastHub::new(16));
        let clock = Arc::new(ManualClock::default());
        let registry = SessionRegistry::new(
            Arc::clone(&games),
            Arc::clone(&roster),
            hub,
            clock.clone(),
        );
        Fixture {
            games,
            roster,
            clock,
            registry,
        }
    }

    async fn new_game(fx: &Fixture, config: GameConfig) -> GameId {
        let handle = fx.games.create(config.clone(), fx.clock.now()).await.unwrap();
        fx.registry.open(handle.id, &config).await;
        handle.id
    }

    async fn new_player(fx: &Fixture, name: &str) -> PlayerId {
        fx.roster.register(name, fx.clock.now()).await.unwrap().id
    }

    #[tokio::test]
    async fn test_auto_balance() {
        let fx = fixture();
        let game_id = new_game(&fx, config(10, 0)).await;

        let mut teams = Vec::new();
        for name in ["ann", "ben", "cat", "dan"] {
            let player = new_player(&fx, name).await;
            teams.push(fx.registry.join(game_id, player, None).await.unwrap());
        }
        assert_eq!(teams, vec![Team::Red, Team::Black, Team::Red, Team::Black]);
    }

    #[tokio::test]
    async fn test_requested_team_full() {
        let fx = fixture();
        let game_id = new_game(&fx, config(3, 0)).await;

        for name in ["ann", "ben"] {
            let player = new_player(&fx, name).await;
            fx.registry.join(game_id, player, Some(Team::Red)).await.unwrap();
        }
        let third = new_player(&fx, "cat").await;
        assert_eq!(
            fx.registry.join(game_id, third, Some(Team::Red)).await,
            Err(SessionError::TeamFull(Team::Red))
        );
        assert_eq!(fx.registry.join(game_id, third, None).await, Ok(Team::Black));

        let fourth = new_player(&fx, "dan").await;
        assert_eq!(
            fx.registry.join(game_id, fourth, None).await,
            Err(SessionError::GameFull)
        );
    }

    #[tokio::test]
    async fn test_one_game_per_player() {
        let fx = fixture();
        let first = new_game(&fx, config(10, 0)).await;
        let second = new_game(&fx, config(10, 0)).await;
        let player = new_player(&fx, "ann").await;

        fx.registry.join(first, player, None).await.unwrap();
        assert_eq!(
            fx.registry.join(first, player, None).await,
            Err(SessionError::AlreadyJoined)
        );
        assert_eq!(
            fx.registry.join(second, player, None).await,
            Err(SessionError::AlreadyInGame(first))
        );

        fx.registry.leave(first, player).await.unwrap();
        assert!(fx.registry.join(second, player, None).await.is_ok());
    }

    #[tokio::test]
    async fn test_rejoin_keeps_team_and_cooldown() {
        let fx = fixture();
        let game_id = new_game(&fx, config(10, 5)).await;
        let player = new_player(&fx, "ann").await;

        fx.registry.join(game_id, player, Some(Team::Black)).await.unwrap();
        {
            let table = fx.registry.table(game_id).await.unwrap();
            table.lock().await.record_move(player, fx.clock.now());
        }
        fx.registry.leave(game_id, player).await.unwrap();
        assert_eq!(
            fx.registry.leave(game_id, player).await,
            Err(SessionError::NotJoined)
        );

        assert_eq!(
            fx.registry.join(game_id, player, Some(Team::Red)).await,
            Err(SessionError::TeamLocked(Team::Black))
        );
        assert_eq!(fx.registry.join(game_id, player, None).await, Ok(Team::Black));

        let remaining = fx
            .registry
            .cooldown_remaining(game_id, player, fx.clock.now())
            .await
            .unwrap();
        assert_eq!(remaining, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_cooldown_remaining() {
        let fx = fixture();
        let game_id = new_game(&fx, config(10, 5)).await;
        let player = new_player(&fx, "ann").await;
        fx.registry.join(game_id, player, None).await.unwrap();

        let now = fx.clock.now();
        assert_eq!(
            fx.registry.cooldown_remaining(game_id, player, now).await,
            Ok(Duration::ZERO)
        );

        let table = fx.registry.table(game_id).await.unwrap();
        table.lock().await.record_move(player, now);

        fx.clock.advance(Duration::from_secs(2));
        assert_eq!(
            fx.registry.cooldown_remaining(game_id, player, fx.clock.now()).await,
            Ok(Duration::from_secs(3))
        );

        fx.clock.advance(Duration::from_secs(3));
        assert_eq!(
            fx.registry.cooldown_remaining(game_id, player, fx.clock.now()).await,
            Ok(Duration::ZERO)
        );
    }

    #[tokio::test]
    async fn test_unknown_game_and_player() {
        let fx = fixture();
        let missing = GameId::new();
        let player = new_player(&fx, "ann").await;
        assert_eq!(
            fx.registry.join(missing, player, None).await,
            Err(SessionError::GameNotFound(missing))
        );

        let game_id = new_game(&fx, config(10, 0)).await;
        let ghost = PlayerId::new();
        assert_eq!(
            fx.registry.join(game_id, ghost, None).await,
            Err(SessionError::UnknownPlayer(ghost))
        );
        assert!(fx.registry.members(game_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_close_releases_players() {
        let fx = fixture();
        let game_id = new_game(&fx, config(10, 0)).await;
        let player = new_player(&fx, "ann").await;
        fx.registry.join(game_id, player, None).await.unwrap();

        assert_eq!(fx.registry.close(game_id).await, vec![player]);
        let record = fx.roster.get(player).await.unwrap();
        assert_eq!(*record.location(), PlayerLocation::Idle);
        assert!(fx.registry.table(game_id).await.is_none());
    }
}
