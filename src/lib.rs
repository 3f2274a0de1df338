//! Siege Engine Library
//!
//! This crate is the authoritative game engine for Siege, a real-time
//! territory-capture game for two teams, Red and Black.
//!
//! # Overview
//!
//! The state module provides:
//!
//! - **Grid** - An N×N board of cells, each unclaimed or owned by a team, with
//!   per-team tallies kept in step with every write.
//!
//! - **Game State Machine** - Waiting, Active and Completed, with a strict
//!   majority win rule checked after every move.
//!
//! - **Player Sessions** - Who plays in which game, on which team, and the
//!   per-game cooldown clock of each player.
//!
//! - **Move Arbiter** - Validates and applies moves one game at a time.
//!
//! - **Broadcast Hub** - Ordered per-game event streams for observers.
//!
//! # Design Principles
//!
//! 1. **One lock per game** - Every mutation of a game happens under that
//!    game's lock. Different games never contend.
//!
//! 2. **State machines validate transitions** - Invalid game or player
//!    transitions are rejected with clear errors.
//!
//! 3. **No networking** - This crate is pure state, no WebSocket or HTTP.
//!
//! 4. **Serialization-ready** - Events and snapshots convert to JSON for clients.
//!
//! # Example
//!
//! ```rust
//! use siege_engine::{config::EngineConfig, Engine, GameEvent, GameStatus, Team};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = EngineConfig::default();
//!     config.game.grid_size = 2;
//!     config.game.player_cooldown_seconds = 0;
//!     let engine = Engine::new(config);
//!
//!     let game_id = engine.create_game().await?;
//!     let alice = engine.register_player("alice").await?;
//!     let bob = engine.register_player("bob").await?;
//!     engine.join_game(game_id, alice.id, Some(Team::Red)).await?;
//!     engine.join_game(game_id, bob.id, Some(Team::Black)).await?;
//!
//!     // Current state plus every event from here on
//!     let (snapshot, mut events) = engine.watch(game_id).await.ok_or("no such game")?;
//!     assert_eq!(snapshot.status, GameStatus::Waiting);
//!
//!     engine.submit_move(game_id, alice.id, 0, 0).await?;
//!     engine.submit_move(game_id, bob.id, 0, 1).await?;
//!     engine.submit_move(game_id, alice.id, 1, 0).await?;
//!     let receipt = engine.submit_move(game_id, alice.id, 1, 1).await?;
//!     assert_eq!(receipt.outcome.winner, Some(Team::Red));
//!
//!     let mut last = None;
//!     for _ in 0..4 {
//!         last = Some(events.recv().await?);
//!     }
//!     assert!(matches!(
//!         last,
//!         Some(GameEvent::MoveApplied { status: GameStatus::Completed, .. })
//!     ));
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod state;

// Re-export everything from state module at crate root
pub use state::*;
