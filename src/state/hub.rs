//! Per-game event fan-out.
//!
//! Every game gets its own broadcast channel, created on first use. Sends
//! never block: a subscriber that falls more than the channel capacity behind
//! loses the oldest events and is told how many it missed, without affecting
//! anyone else.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio::sync::RwLock;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::{Stream, StreamExt};

use super::game::{GameId, GameStatus};
use super::grid::{Tally, Team};
use super::moves::Move;
use super::player::PlayerId;

/// State change pushed to everyone watching a game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GameEvent {
    MoveApplied {
        game_id: GameId,
        #[serde(rename = "move")]
        mv: Move,
        /// Owner of the cell before the move
        previous_owner: Option<Team>,
        tallies: Tally,
        status: GameStatus,
        winner: Option<Team>,
    },
    PlayerJoined {
        game_id: GameId,
        player_id: PlayerId,
        team: Team,
        at: DateTime<Utc>,
    },
    PlayerLeft {
        game_id: GameId,
        player_id: PlayerId,
        at: DateTime<Utc>,
    },
}

impl GameEvent {
    pub fn game_id(&self) -> GameId {
        match self {
            Self::MoveApplied { game_id, .. }
            | Self::PlayerJoined { game_id, .. }
            | Self::PlayerLeft { game_id, .. } => *game_id,
        }
    }

    /// Move sequence number, for move events.
    pub fn sequence(&self) -> Option<u64> {
        match self {
            Self::MoveApplied { mv, .. } => Some(mv.sequence),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Subscription errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HubError {
    /// The subscriber fell behind and this many events were dropped.
    Lagged(u64),
    /// The game's channel was closed.
    Closed,
}

impl fmt::Display for HubError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lagged(n) => write!(f, "Subscriber lagged, {} events dropped", n),
            Self::Closed => write!(f, "Game channel closed"),
        }
    }
}

impl std::error::Error for HubError {}

/// A live feed of one game's events, in publish order.
///
/// Only events published after the subscription was created are delivered.
#[derive(Debug)]
pub struct Subscription {
    pub id: u64,
    pub game_id: GameId,
    rx: broadcast::Receiver<GameEvent>,
}

impl Subscription {
    /// Wait for the next event.
    pub async fn recv(&mut self) -> Result<GameEvent, HubError> {
        match self.rx.recv().await {
            Ok(event) => Ok(event),
            Err(RecvError::Lagged(n)) => {
                tracing::warn!(game_id = %self.game_id, subscription = self.id, missed = n, "subscriber lagged");
                Err(HubError::Lagged(n))
            }
            Err(RecvError::Closed) => Err(HubError::Closed),
        }
    }

    /// Take the next event if one is already queued.
    pub fn try_recv(&mut self) -> Result<Option<GameEvent>, HubError> {
        match self.rx.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Lagged(n)) => Err(HubError::Lagged(n)),
            Err(TryRecvError::Closed) => Err(HubError::Closed),
        }
    }

    /// Turn the subscription into a stream that ends when the channel closes.
    pub fn into_stream(self) -> impl Stream<Item = Result<GameEvent, HubError>> {
        BroadcastStream::new(self.rx).map(|item| {
            item.map_err(|err| match err {
                BroadcastStreamRecvError::Lagged(n) => HubError::Lagged(n),
                #[allow(unreachable_patterns)]
                _ => HubError::Closed,
            })
        })
    }
}

/// Fan-out of game events to subscribers, scoped per game.
#[derive(Debug)]
pub struct BroadcastHub {
    channels: RwLock<HashMap<GameId, broadcast::Sender<GameEvent>>>,
    capacity: usize,
    next_subscription: AtomicU64,
}

impl BroadcastHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
            next_subscription: AtomicU64::new(1),
        }
    }

    /// Start receiving a game's events.
    pub async fn subscribe(&self, game_id: GameId) -> Subscription {
        let mut channels = self.channels.write().await;
        let tx = channels
            .entry(game_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0);
        let id = self.next_subscription.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(game_id = %game_id, subscription = id, "subscribed");
        Subscription {
            id,
            game_id,
            rx: tx.subscribe(),
        }
    }

    /// Stop delivery to a subscription. Events already queued for it are
    /// discarded.
    pub fn unsubscribe(&self, subscription: Subscription) {
        tracing::debug!(
            game_id = %subscription.game_id,
            subscription = subscription.id,
            "unsubscribed"
        );
        drop(subscription);
    }

    /// Deliver an event to every current subscriber of its game.
    /// Returns how many subscribers it was queued for.
    pub async fn publish(&self, game_id: GameId, event: GameEvent) -> usize {
        let channels = self.channels.read().await;
        match channels.get(&game_id) {
            // Err only means nobody is listening right now
            Some(tx) => tx.send(event).unwrap_or(0),
            None => 0,
        }
    }

    pub async fn subscriber_count(&self, game_id: GameId) -> usize {
        self.channels
            .read()
            .await
            .get(&game_id)
            .map_or(0, |tx| tx.receiver_count())
    }

    /// Drop a game's channel. Its subscribers see [`HubError::Closed`] once
    /// they drain what was already queued.
    pub async fn close(&self, game_id: GameId) -> bool {
        self.channels.write().await.remove(&game_id).is_some()
    }
}
