//! Move validation and application.
//!
//! [`MoveArbiter::submit`] is the only path that mutates a game. Every check,
//! the grid write, the cooldown clock update and the event publish happen
//! while holding that game's lock, so two moves for the same game never
//! interleave and a rejected move leaves nothing behind. Different games
//! never contend on their game locks.
//!
//! Publishing inside the critical section keeps event order equal to move
//! order. The cost is that a publish takes the hub's channel table in read
//! mode, so it can briefly wait behind a `subscribe` or `close` for any game
//! while holding this game's lock. The send itself never waits on receivers.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use super::clock::Clock;
use super::game::{GameError, GameId, GameManager, GameStatus, MoveOutcome};
use super::grid::Position;
use super::hub::{BroadcastHub, GameEvent};
use super::moves::{Move, MoveRequest};
use super::player::{PlayerId, PlayerRoster};
use super::session::SessionRegistry;

/// Why a move was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MoveError {
    GameNotFound(GameId),
    GameCompleted(GameId),
    NotOnTeam(PlayerId),
    OutOfBounds { x: i32, y: i32, size: usize },
    CooldownActive { remaining: Duration },
    InvalidTransition { from: GameStatus, to: GameStatus },
}

impl fmt::Display for MoveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GameNotFound(id) => write!(f, "Game {} not found", id),
            Self::GameCompleted(id) => write!(f, "Game {} is completed", id),
            Self::NotOnTeam(id) => write!(f, "Player {} is not on a team in this game", id),
            Self::OutOfBounds { x, y, size } => {
                write!(f, "Cell ({}, {}) is outside the {}x{} grid", x, y, size, size)
            }
            Self::CooldownActive { remaining } => {
                write!(f, "Cooldown active, {}ms remaining", remaining.as_millis())
            }
            Self::InvalidTransition { from, to } => {
                write!(f, "Invalid game transition from {} to {}", from, to)
            }
        }
    }
}

impl std::error::Error for MoveError {}

impl From<GameError> for MoveError {
    fn from(err: GameError) -> Self {
        match err {
            GameError::InvalidTransition { from, to } => Self::InvalidTransition { from, to },
            GameError::OutOfBounds { x, y, size } => Self::OutOfBounds { x, y, size },
        }
    }
}

/// Result of an accepted move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MoveReceipt {
    #[serde(rename = "move")]
    pub mv: Move,
    pub outcome: MoveOutcome,
    /// Subscribers the event was queued for
    pub delivered: usize,
}

/// Serializes and applies moves, one game at a time.
#[derive(Debug)]
pub struct MoveArbiter {
    games: Arc<GameManager>,
    sessions: Arc<SessionRegistry>,
    roster: Arc<PlayerRoster>,
    hub: Arc<BroadcastHub>,
    clock: Arc<dyn Clock>,
}

impl MoveArbiter {
    pub fn new(
        games: Arc<GameManager>,
        sessions: Arc<SessionRegistry>,
        roster: Arc<PlayerRoster>,
        hub: Arc<BroadcastHub>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            games,
            sessions,
            roster,
            hub,
            clock,
        }
    }

    /// Validate and apply one move.
    ///
    /// On success the grid, tallies, cooldown clock and player record are
    /// updated and exactly one event is published. On error nothing changes.
    pub async fn submit(&self, request: MoveRequest) -> Result<MoveReceipt, MoveError> {
        let result = self.submit_inner(request).await;
        if let Err(err) = &result {
            tracing::debug!(
                game_id = %request.game_id,
                player_id = %request.player_id,
                x = request.x,
                y = request.y,
                error = %err,
                "move rejected"
            );
        }
        result
    }

    async fn submit_inner(&self, request: MoveRequest) -> Result<MoveReceipt, MoveError> {
        let MoveRequest {
            game_id,
            player_id,
            x,
            y,
        } = request;

        let handle = self
            .games
            .get(game_id)
            .await
            .ok_or(MoveError::GameNotFound(game_id))?;

        // Critical section for this game starts here
        let mut game = handle.lock().await;
        if game.status().is_terminal() {
            return Err(MoveError::GameCompleted(game_id));
        }

        let table = self
            .sessions
            .table(game_id)
            .await
            .ok_or(MoveError::NotOnTeam(player_id))?;
        let mut sessions = table.lock().await;
        let team = sessions
            .team_of(player_id)
            .ok_or(MoveError::NotOnTeam(player_id))?;

        let size = game.grid().size();
        if !Position::new(x, y).is_within(size) {
            return Err(MoveError::OutOfBounds { x, y, size });
        }

        let now = self.clock.now();
        let remaining = sessions.cooldown_remaining(player_id, now);
        if !remaining.is_zero() {
            return Err(MoveError::CooldownActive { remaining });
        }

        let outcome = game.apply_move(team, x, y, now)?;
        sessions.record_move(player_id, now);
        self.roster.record_move(player_id, now).await;

        let mv = Move {
            game_id,
            player_id,
            team,
            x,
            y,
            timestamp: now,
            sequence: outcome.sequence,
        };
        game.record(mv.clone());

        tracing::debug!(
            game_id = %game_id,
            player_id = %player_id,
            team = %team,
            x,
            y,
            sequence = outcome.sequence,
            red = outcome.tally.red,
            black = outcome.tally.black,
            "move applied"
        );
        if let Some(winner) = outcome.winner {
            tracing::info!(
                game_id = %game_id,
                winner = %winner,
                total_moves = outcome.sequence,
                "game completed"
            );
        }

        // Published before the lock is released so delivery order matches
        // mutation order. The send itself never waits on subscribers.
        let delivered = self
            .hub
            .publish(
                game_id,
                GameEvent::MoveApplied {
                    game_id,
                    mv: mv.clone(),
                    previous_owner: outcome.previous,
                    tallies: outcome.tally,
                    status: outcome.status,
                    winner: outcome.winner,
                },
            )
            .await;
        drop(sessions);
        drop(game);

        Ok(MoveReceipt {
            mv,
            outcome,
            delivered,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GameConfig;
    use crate::state::clock::ManualClock;
    use crate::state::grid::{Tally, Team};
    use pretty_assertions::assert_eq;

    struct Fixture {
        games: Arc<GameManager>,
        roster: Arc<PlayerRoster>,
        sessions: Arc<SessionRegistry>,
        hub: Arc<BroadcastHub>,
        clock: Arc<ManualClock>,
        arbiter: MoveArbiter,
    }

    fn fixture() -> Fixture {
        let games = Arc::new(GameManager::new(10));
        let roster = Arc::new(PlayerRoster::new());
        let hub = Arc::new(BroadcastHub::new(64));
        let clock = Arc::new(ManualClock::default());
        let sessions = Arc::new(SessionRegistry::new(
            Arc::clone(&games),
            Arc::clone(&roster),
            Arc::clone(&hub),
            clock.clone(),
        ));
        let arbiter = MoveArbiter::new(
            Arc::clone(&games),
            Arc::clone(&sessions),
            Arc::clone(&roster),
            Arc::clone(&hub),
            clock.clone(),
        );
        Fixture {
            games,
            roster,
            sessions,
            hub,
            clock,
            arbiter,
        }
    }

    async fn new_game(fx: &Fixture, size: usize, cooldown: u64) -> GameId {
        let config = GameConfig {
            grid_size: size,
            player_cooldown_seconds: cooldown,
            max_concurrent_players: 10,
        };
        let handle = fx.games.create(config.clone(), fx.clock.now()).await.unwrap();
        fx.sessions.open(handle.id, &config).await;
        handle.id
    }

    async fn seat(fx: &Fixture, game_id: GameId, name: &str, team: Team) -> PlayerId {
        let player = fx.roster.register(name, fx.clock.now()).await.unwrap().id;
        fx.sessions.join(game_id, player, Some(team)).await.unwrap();
        player
    }

    #[tokio::test]
    async fn test_accepted_move_updates_everything() {
        let fx = fixture();
        let game_id = new_game(&fx, 3, 5).await;
        let player = seat(&fx, game_id, "ann", Team::Red).await;
        let mut sub = fx.hub.subscribe(game_id).await;

        let receipt = fx
            .arbiter
            .submit(MoveRequest::new(game_id, player, 2, 1))
            .await
            .unwrap();

        assert_eq!(receipt.mv.team, Team::Red);
        assert_eq!(receipt.mv.sequence, 1);
        assert_eq!(receipt.outcome.tally, Tally { red: 1, black: 0 });
        assert_eq!(receipt.delivered, 1);

        let event = sub.recv().await.unwrap();
        assert_eq!(event.sequence(), Some(1));

        let record = fx.roster.get(player).await.unwrap();
        assert_eq!(record.total_moves, 1);
        assert_eq!(record.last_move_time, Some(fx.clock.now()));

        let snapshot = fx.games.get(game_id).await.unwrap().snapshot().await;
        assert_eq!(snapshot.status, GameStatus::Active);
        assert_eq!(snapshot.recent_moves, vec![receipt.mv]);
    }

    #[tokio::test]
    async fn test_rejections() {
        let fx = fixture();
        let game_id = new_game(&fx, 2, 0).await;
        let player = seat(&fx, game_id, "ann", Team::Red).await;
        let outsider = fx.roster.register("bob", fx.clock.now()).await.unwrap().id;

        let missing = GameId::new();
        assert_eq!(
            fx.arbiter.submit(MoveRequest::new(missing, player, 0, 0)).await,
            Err(MoveError::GameNotFound(missing))
        );
        assert_eq!(
            fx.arbiter.submit(MoveRequest::new(game_id, outsider, 0, 0)).await,
            Err(MoveError::NotOnTeam(outsider))
        );
        assert_eq!(
            fx.arbiter.submit(MoveRequest::new(game_id, player, -1, 0)).await,
            Err(MoveError::OutOfBounds { x: -1, y: 0, size: 2 })
        );
        assert_eq!(
            fx.arbiter.submit(MoveRequest::new(game_id, player, 0, 2)).await,
            Err(MoveError::OutOfBounds { x: 0, y: 2, size: 2 })
        );

        let snapshot = fx.games.get(game_id).await.unwrap().snapshot().await;
        assert_eq!(snapshot.status, GameStatus::Waiting);
        assert_eq!(snapshot.total_moves, 0);
    }

    #[tokio::test]
    async fn test_cooldown() {
        let fx = fixture();
        let game_id = new_game(&fx, 4, 5).await;
        let player = seat(&fx, game_id, "ann", Team::Black).await;
        let mut sub = fx.hub.subscribe(game_id).await;

        fx.arbiter
            .submit(MoveRequest::new(game_id, player, 0, 0))
            .await
            .unwrap();

        fx.clock.advance(Duration::from_secs(4));
        let err = fx
            .arbiter
            .submit(MoveRequest::new(game_id, player, 1, 0))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            MoveError::CooldownActive {
                remaining: Duration::from_secs(1)
            }
        );

        fx.clock.advance(Duration::from_secs(1));
        fx.arbiter
            .submit(MoveRequest::new(game_id, player, 1, 0))
            .await
            .unwrap();

        // Exactly one event per accepted move, none for the rejection
        assert_eq!(sub.try_recv().unwrap().and_then(|e| e.sequence()), Some(1));
        assert_eq!(sub.try_recv().unwrap().and_then(|e| e.sequence()), Some(2));
        assert_eq!(sub.try_recv().unwrap(), None);
    }

    #[tokio::test]
    async fn test_cooldown_is_per_game() {
        let fx = fixture();
        let first = new_game(&fx, 4, 60).await;
        let second = new_game(&fx, 4, 60).await;
        let player = seat(&fx, first, "ann", Team::Red).await;

        fx.arbiter
            .submit(MoveRequest::new(first, player, 0, 0))
            .await
            .unwrap();
        fx.sessions.leave(first, player).await.unwrap();
        fx.sessions.join(second, player, None).await.unwrap();

        assert!(fx
            .arbiter
            .submit(MoveRequest::new(second, player, 0, 0))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_left_player_cannot_move() {
        let fx = fixture();
        let game_id = new_game(&fx, 4, 0).await;
        let player = seat(&fx, game_id, "ann", Team::Red).await;
        fx.sessions.leave(game_id, player).await.unwrap();

        assert_eq!(
            fx.arbiter.submit(MoveRequest::new(game_id, player, 0, 0)).await,
            Err(MoveError::NotOnTeam(player))
        );
    }

    #[tokio::test]
    async fn test_completed_game_rejects_moves() {
        let fx = fixture();
        let game_id = new_game(&fx, 2, 0).await;
        let red = seat(&fx, game_id, "ann", Team::Red).await;

        for (x, y) in [(0, 0), (1, 0)] {
            let receipt = fx
                .arbiter
                .submit(MoveRequest::new(game_id, red, x, y))
                .await
                .unwrap();
            assert_eq!(receipt.outcome.winner, None);
        }
        let receipt = fx
            .arbiter
            .submit(MoveRequest::new(game_id, red, 0, 1))
            .await
            .unwrap();
        assert_eq!(receipt.outcome.winner, Some(Team::Red));
        assert_eq!(receipt.outcome.status, GameStatus::Completed);

        assert_eq!(
            fx.arbiter.submit(MoveRequest::new(game_id, red, 1, 1)).await,
            Err(MoveError::GameCompleted(game_id))
        );
    }

    #[test]
    fn test_error_conversion() {
        let err: MoveError = GameError::OutOfBounds { x: 5, y: 5, size: 4 }.into();
        assert_eq!(err, MoveError::OutOfBounds { x: 5, y: 5, size: 4 });
        assert_eq!(err.to_string(), "Cell (5, 5) is outside the 4x4 grid");
    }
}
