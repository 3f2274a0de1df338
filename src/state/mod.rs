//! Game engine state.
//!
//! - `grid` - the board and team tallies
//! - `game` - per-game state machine and the table of games
//! - `moves` - move requests and accepted move records
//! - `player` - registered players and where they are
//! - `session` - who sits in which game, team seats and cooldown clocks
//! - `arbiter` - validates and applies moves under the per-game lock
//! - `hub` - per-game event fan-out
//! - `clock` - time source
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                               Engine                                 │
//! │                                                                      │
//! │   submit(move) ──▶ MoveArbiter                                       │
//! │                      │ lock game_id                                  │
//! │                      ▼                                               │
//! │  ┌───────────────┐  ┌──────────────────┐  ┌──────────────┐           │
//! │  │  GameManager  │  │ SessionRegistry  │  │ PlayerRoster │           │
//! │  │ game_id →     │  │ game_id →        │  │ player_id →  │           │
//! │  │  Mutex<Game>  │  │  Mutex<Sessions> │  │   Player     │           │
//! │  └───────────────┘  └──────────────────┘  └──────────────┘           │
//! │                      │ publish                                       │
//! │                      ▼                                               │
//! │               ┌──────────────┐                                       │
//! │               │ BroadcastHub │ game_id → broadcast channel ──▶ subs  │
//! │               └──────────────┘                                       │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```

pub mod arbiter;
pub mod clock;
pub mod game;
pub mod grid;
pub mod hub;
pub mod moves;
pub mod player;
pub mod session;

use std::sync::Arc;

pub use arbiter::{MoveArbiter, MoveError, MoveReceipt};
pub use clock::{Clock, ManualClock, SystemClock};
pub use game::{
    majority_winner, Game, GameError, GameHandle, GameId, GameManager, GameSnapshot, GameStatus,
    MoveOutcome,
};
pub use grid::{Grid, GridError, Position, Tally, Team, MAX_GRID_SIZE};
pub use hub::{BroadcastHub, GameEvent, HubError, Subscription};
pub use moves::{Move, MoveRequest};
pub use player::{
    InvalidTransition, Player, PlayerError, PlayerEvent, PlayerId, PlayerLocation, PlayerRoster,
    PlayerState,
};
pub use session::{GameSessions, SessionEntry, SessionError, SessionRegistry};

use crate::config::{EngineConfig, GameConfig};

/// The whole engine, wired together.
///
/// Every component receives its collaborators explicitly; nothing is global.
/// The components can also be built and used on their own.
#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    pub games: Arc<GameManager>,
    pub roster: Arc<PlayerRoster>,
    pub sessions: Arc<SessionRegistry>,
    pub hub: Arc<BroadcastHub>,
    pub arbiter: MoveArbiter,
    clock: Arc<dyn Clock>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: EngineConfig, clock: Arc<dyn Clock>) -> Self {
        let games = Arc::new(GameManager::new(config.recent_moves_limit));
        let roster = Arc::new(PlayerRoster::new());
        let hub = Arc::new(BroadcastHub::new(config.event_channel_capacity));
        let sessions = Arc::new(SessionRegistry::new(
            Arc::clone(&games),
            Arc::clone(&roster),
            Arc::clone(&hub),
            Arc::clone(&clock),
        ));
        let arbiter = MoveArbiter::new(
            Arc::clone(&games),
            Arc::clone(&sessions),
            Arc::clone(&roster),
            Arc::clone(&hub),
            Arc::clone(&clock),
        );
        Self {
            config,
            games,
            roster,
            sessions,
            hub,
            arbiter,
            clock,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub async fn register_player(&self, username: &str) -> Result<Player, PlayerError> {
        self.roster.register(username, self.clock.now()).await
    }

    /// Create a game with the engine's default parameters.
    pub async fn create_game(&self) -> Result<GameId, GridError> {
        self.create_game_with(self.config.game.clone()).await
    }

    /// Create a game with explicit parameters.
    pub async fn create_game_with(&self, config: GameConfig) -> Result<GameId, GridError> {
        let handle = self.games.create(config, self.clock.now()).await?;
        self.sessions.open(handle.id, handle.config()).await;
        Ok(handle.id)
    }

    pub async fn join_game(
        &self,
        game_id: GameId,
        player_id: PlayerId,
        team: Option<Team>,
    ) -> Result<Team, SessionError> {
        self.sessions.join(game_id, player_id, team).await
    }

    pub async fn leave_game(&self, game_id: GameId, player_id: PlayerId) -> Result<(), SessionError> {
        self.sessions.leave(game_id, player_id).await
    }

    pub async fn submit_move(
        &self,
        game_id: GameId,
        player_id: PlayerId,
        x: i32,
        y: i32,
    ) -> Result<MoveReceipt, MoveError> {
        self.arbiter
            .submit(MoveRequest::new(game_id, player_id, x, y))
            .await
    }

    pub async fn snapshot(&self, game_id: GameId) -> Option<GameSnapshot> {
        Some(self.games.get(game_id).await?.snapshot().await)
    }

    /// Subscribe to a game and get its current state in one step.
    ///
    /// Both happen inside the game's critical section, so every event on the
    /// subscription comes after the snapshot and none is missed.
    ///
    /// Returns `None` if the game does not exist or was cleaned up while
    /// waiting for its lock.
    pub async fn watch(&self, game_id: GameId) -> Option<(GameSnapshot, Subscription)> {
        let handle = self.games.get(game_id).await?;
        let game = handle.lock().await;
        let subscription = self.hub.subscribe(game_id).await;

        // Cleanup unregisters a game before closing its channel, so a game
        // still registered here gets its channel closed later by cleanup.
        let registered = self
            .games
            .get(game_id)
            .await
            .is_some_and(|current| Arc::ptr_eq(&current, &handle));
        if !registered {
            self.hub.close(game_id).await;
            return None;
        }
        Some((game.snapshot(), subscription))
    }

    pub fn unsubscribe(&self, subscription: Subscription) {
        self.hub.unsubscribe(subscription);
    }

    /// Remove completed games, free their players and close their channels.
    pub async fn cleanup(&self) -> CleanupResult {
        let finished_games = self.games.cleanup_finished().await;
        let mut released_players = Vec::new();
        for game_id in &finished_games {
            released_players.extend(self.sessions.close(*game_id).await);
            self.hub.close(*game_id).await;
        }
        if !finished_games.is_empty() {
            tracing::info!(
                games = finished_games.len(),
                players = released_players.len(),
                "cleaned up finished games"
            );
        }
        CleanupResult {
            finished_games,
            released_players,
        }
    }
}

/// Result of cleanup operation.
#[derive(Debug, Default)]
pub struct CleanupResult {
    pub finished_games: Vec<GameId>,
    pub released_players: Vec<PlayerId>,
}

impl CleanupResult {
    pub fn is_empty(&self) -> bool {
        self.finished_games.is_empty() && self.released_players.is_empty()
    }
}
