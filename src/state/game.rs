//! Game state management.
//!
//! A game owns one grid and moves through `Waiting → Active → Completed`.
//! The running tally is updated together with every grid write so it always
//! equals a full scan of the board.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard, RwLock};
use uuid::Uuid;

use super::grid::{Grid, GridError, Tally, Team};
use super::moves::Move;
use crate::config::GameConfig;

/// Opaque game identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GameId(pub Uuid);

impl GameId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for GameId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for GameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Game state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameStatus {
    /// Created, no move yet
    #[default]
    Waiting,
    /// At least one move applied
    Active,
    /// A team won. Terminal.
    Completed,
}

impl GameStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Active => "active",
            Self::Completed => "completed",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

impl fmt::Display for GameStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Game errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameError {
    InvalidTransition { from: GameStatus, to: GameStatus },
    OutOfBounds { x: i32, y: i32, size: usize },
}

impl fmt::Display for GameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidTransition { from, to } => {
                write!(f, "Invalid game transition from {} to {}", from, to)
            }
            Self::OutOfBounds { x, y, size } => {
                write!(f, "Cell ({}, {}) is outside the {}x{} grid", x, y, size, size)
            }
        }
    }
}

impl std::error::Error for GameError {}

/// What applying a move did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MoveOutcome {
    /// Owner of the cell before the move
    pub previous: Option<Team>,
    pub tally: Tally,
    pub status: GameStatus,
    /// Set when this move ended the game
    pub winner: Option<Team>,
    /// Move count after this move
    pub sequence: u64,
}

/// Strict majority of all cells wins. An exact half is not a win.
pub fn majority_winner(tally: &Tally, cell_count: usize) -> Option<Team> {
    [Team::Red, Team::Black]
        .into_iter()
        .find(|team| tally.get(*team) * 2 > cell_count)
}

/// Game session state.
#[derive(Debug, Clone)]
pub struct Game {
    /// Unique game ID
    pub id: GameId,

    /// Parameters fixed at creation
    config: GameConfig,

    status: GameStatus,

    grid: Grid,

    /// Cached per-team cell counts
    tally: Tally,

    winner: Option<Team>,

    total_moves: u64,

    /// Most recent accepted moves, oldest first
    recent_moves: VecDeque<Move>,

    recent_moves_limit: usize,

    pub created_at: DateTime<Utc>,

    /// Set by the first accepted move
    pub started_at: Option<DateTime<Utc>>,

    /// Set when a winner is found
    pub completed_at: Option<DateTime<Utc>>,
}

impl Game {
    /// Create a new waiting game.
    pub fn new(
        id: GameId,
        config: GameConfig,
        recent_moves_limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Self, GridError> {
        let grid = Grid::new(config.grid_size)?;
        Ok(Self {
            id,
            config,
            status: GameStatus::Waiting,
            grid,
            tally: Tally::default(),
            winner: None,
            total_moves: 0,
            recent_moves: VecDeque::new(),
            recent_moves_limit,
            created_at: now,
            started_at: None,
            completed_at: None,
        })
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn status(&self) -> GameStatus {
        self.status
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn tally(&self) -> Tally {
        self.tally
    }

    pub fn winner(&self) -> Option<Team> {
        self.winner
    }

    pub fn total_moves(&self) -> u64 {
        self.total_moves
    }

    /// Cells nobody owns, derived from the tally.
    pub fn unclaimed(&self) -> usize {
        self.grid.cell_count() - self.tally.claimed()
    }

    /// Claim a cell for `team`.
    ///
    /// Any in-bounds cell may be claimed, including cells the other team
    /// owns. Nothing is mutated when an error is returned.
    pub fn apply_move(
        &mut self,
        team: Team,
        x: i32,
        y: i32,
        at: DateTime<Utc>,
    ) -> Result<MoveOutcome, GameError> {
        if self.status.is_terminal() {
            return Err(GameError::InvalidTransition {
                from: self.status,
                to: GameStatus::Active,
            });
        }

        let size = self.grid.size();
        let previous = self
            .grid
            .set(x, y, Some(team))
            .map_err(|_| GameError::OutOfBounds { x, y, size })?;
        self.tally.transfer(previous, Some(team));
        self.total_moves += 1;

        if self.status == GameStatus::Waiting {
            self.status = GameStatus::Active;
            self.started_at = Some(at);
        }

        let winner = self.check_win();
        if let Some(team) = winner {
            self.status = GameStatus::Completed;
            self.winner = Some(team);
            self.completed_at = Some(at);
        }

        Ok(MoveOutcome {
            previous,
            tally: self.tally,
            status: self.status,
            winner,
            sequence: self.total_moves,
        })
    }

    /// The team holding a strict majority of the board, if any.
    pub fn check_win(&self) -> Option<Team> {
        majority_winner(&self.tally, self.grid.cell_count())
    }

    /// Append an accepted move to the recent history.
    pub fn record(&mut self, mv: Move) {
        if self.recent_moves_limit == 0 {
            return;
        }
        while self.recent_moves.len() >= self.recent_moves_limit {
            self.recent_moves.pop_front();
        }
        self.recent_moves.push_back(mv);
    }

    pub fn recent_moves(&self) -> impl Iterator<Item = &Move> {
        self.recent_moves.iter()
    }

    /// Full self-consistent copy of the game.
    pub fn snapshot(&self) -> GameSnapshot {
        GameSnapshot {
            id: self.id,
            status: self.status,
            winner: self.winner,
            tally: self.tally,
            unclaimed: self.unclaimed(),
            total_moves: self.total_moves,
            config: self.config.clone(),
            grid: self.grid.clone(),
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            recent_moves: self.recent_moves.iter().cloned().collect(),
        }
    }
}

/// Serializable copy of a game for late subscribers and persistence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameSnapshot {
    pub id: GameId,
    pub status: GameStatus,
    pub winner: Option<Team>,
    pub tally: Tally,
    pub unclaimed: usize,
    pub total_moves: u64,
    pub config: GameConfig,
    pub grid: Grid,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub recent_moves: Vec<Move>,
}

impl GameSnapshot {
    pub fn to_json(&self) -> serde_json::Value {
        let rows: Vec<Vec<Option<Team>>> = self.grid.rows().map(|r| r.to_vec()).collect();
        serde_json::json!({
            "game_id": self.id,
            "status": self.status,
            "winner": self.winner,
            "red_team_count": self.tally.red,
            "black_team_count": self.tally.black,
            "unclaimed": self.unclaimed,
            "total_moves": self.total_moves,
            "grid_size": self.grid.size(),
            "grid": rows,
            "created_at": self.created_at,
            "started_at": self.started_at,
            "completed_at": self.completed_at,
            "recent_moves": self.recent_moves,
        })
    }
}

/// A game plus the lock that serializes every mutation of it.
///
/// Created once per game and kept for the game's lifetime.
#[derive(Debug)]
pub struct GameHandle {
    pub id: GameId,
    config: GameConfig,
    state: Mutex<Game>,
}

impl GameHandle {
    fn new(game: Game) -> Self {
        Self {
            id: game.id,
            config: game.config.clone(),
            state: Mutex::new(game),
        }
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    /// Enter the game's critical section.
    pub async fn lock(&self) -> MutexGuard<'_, Game> {
        self.state.lock().await
    }

    pub async fn snapshot(&self) -> GameSnapshot {
        self.state.lock().await.snapshot()
    }

    pub async fn status(&self) -> GameStatus {
        self.state.lock().await.status()
    }
}

/// Game manager - tracks all games by ID.
#[derive(Debug)]
pub struct GameManager {
    games: RwLock<HashMap<GameId, Arc<GameHandle>>>,
    recent_moves_limit: usize,
}

impl GameManager {
    pub fn new(recent_moves_limit: usize) -> Self {
        Self {
            games: RwLock::new(HashMap::new()),
            recent_moves_limit,
        }
    }

    /// Create and register a new game.
    pub async fn create(
        &self,
        config: GameConfig,
        now: DateTime<Utc>,
    ) -> Result<Arc<GameHandle>, GridError> {
        let game = Game::new(GameId::new(), config, self.recent_moves_limit, now)?;
        let handle = Arc::new(GameHandle::new(game));
        self.games
            .write()
            .await
            .insert(handle.id, Arc::clone(&handle));
        tracing::info!(
            game_id = %handle.id,
            grid_size = handle.config.grid_size,
            "game created"
        );
        Ok(handle)
    }

    pub async fn get(&self, game_id: GameId) -> Option<Arc<GameHandle>> {
        self.games.read().await.get(&game_id).cloned()
    }

    pub async fn ids(&self) -> Vec<GameId> {
        self.games.read().await.keys().copied().collect()
    }

    /// Remove completed games, returning their IDs.
    pub async fn cleanup_finished(&self) -> Vec<GameId> {
        let handles: Vec<Arc<GameHandle>> = self.games.read().await.values().cloned().collect();

        let mut finished = Vec::new();
        for handle in handles {
            if handle.status().await.is_terminal() {
                finished.push(handle.id);
            }
        }

        let mut games = self.games.write().await;
        for id in &finished {
            games.remove(id);
        }
        finished
    }

    /// Count games in the Active state.
    pub async fn active_count(&self) -> usize {
        let handles: Vec<Arc<GameHandle>> = self.games.read().await.values().cloned().collect();
        let mut count = 0;
        for handle in handles {
            if handle.status().await.is_active() {
                count += 1;
            }
        }
        count
    }

    /// Total game count.
    pub async fn count(&self) -> usize {
        self.games.read().await.len()
    }
}
