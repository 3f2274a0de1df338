//! Move records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::game::GameId;
use super::grid::Team;
use super::player::PlayerId;

/// A move as it arrives from the request layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveRequest {
    pub game_id: GameId,
    pub player_id: PlayerId,
    pub x: i32,
    pub y: i32,
}

impl MoveRequest {
    pub fn new(game_id: GameId, player_id: PlayerId, x: i32, y: i32) -> Self {
        Self {
            game_id,
            player_id,
            x,
            y,
        }
    }
}

/// An accepted move. Never mutated once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Move {
    pub game_id: GameId,
    pub player_id: PlayerId,
    pub team: Team,
    pub x: i32,
    pub y: i32,
    pub timestamp: DateTime<Utc>,
    /// The game's move count after this move; starts at 1
    pub sequence: u64,
}
