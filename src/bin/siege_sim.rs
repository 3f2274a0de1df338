//! Siege simulator - drive the engine with simulated players.
//!
//! Usage:
//!   cargo run --bin siege_sim -- --games 2 --players 10 --grid-size 8 --cooldown 0
//!   RUST_LOG=siege_engine=debug cargo run --bin siege_sim -- --config siege.toml

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing_subscriber::EnvFilter;

use siege_engine::config::EngineConfig;
use siege_engine::{Engine, GameEvent, GameId, HubError, MoveError, PlayerId, Subscription};

#[derive(Parser)]
#[command(name = "siege_sim", about = "Run simulated players against the Siege engine")]
struct Cli {
    /// Path to an engine config TOML file
    #[arg(long, env = "SIEGE_CONFIG")]
    config: Option<PathBuf>,

    /// Number of games to run side by side
    #[arg(long, default_value = "1")]
    games: usize,

    /// Simulated players per game
    #[arg(long, default_value = "8")]
    players: usize,

    /// Move attempts per player
    #[arg(long, default_value = "50")]
    moves: u32,

    /// Override the grid size from config
    #[arg(long)]
    grid_size: Option<usize>,

    /// Override the move cooldown (seconds) from config
    #[arg(long)]
    cooldown: Option<u64>,

    /// Random seed
    #[arg(long, default_value = "42")]
    seed: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    config.apply_env()?;
    if let Some(size) = cli.grid_size {
        config.game.grid_size = size;
    }
    if let Some(cooldown) = cli.cooldown {
        config.game.player_cooldown_seconds = cooldown;
    }
    config.validate()?;

    tracing::info!(
        games = cli.games,
        players = cli.players,
        grid_size = config.game.grid_size,
        cooldown = config.game.player_cooldown_seconds,
        "starting simulation"
    );

    let engine = Arc::new(Engine::new(config));
    let mut game_ids = Vec::with_capacity(cli.games);
    let mut watchers = Vec::with_capacity(cli.games);
    let mut players = Vec::new();

    for g in 0..cli.games {
        let game_id = engine.create_game().await?;
        let (_, subscription) = engine
            .watch(game_id)
            .await
            .ok_or("game vanished right after creation")?;
        watchers.push(tokio::spawn(watch_game(subscription)));

        for i in 0..cli.players {
            let player = engine.register_player(&format!("sim-{}-{}", g, i)).await?;
            engine.join_game(game_id, player.id, None).await?;
            let seed = cli.seed.wrapping_add((g * cli.players + i) as u64);
            players.push(tokio::spawn(play(
                Arc::clone(&engine),
                game_id,
                player.id,
                cli.moves,
                seed,
            )));
        }
        game_ids.push(game_id);
    }

    let mut accepted: u64 = 0;
    for handle in players {
        accepted += handle.await?;
    }

    // Closing the channels lets each watcher drain and exit
    for game_id in &game_ids {
        engine.hub.close(*game_id).await;
    }
    for handle in watchers {
        handle.await?;
    }

    tracing::info!(accepted, "all players finished");
    for game_id in &game_ids {
        if let Some(snapshot) = engine.snapshot(*game_id).await {
            println!("{}", serde_json::to_string_pretty(&snapshot.to_json())?);
        }
    }

    let cleaned = engine.cleanup().await;
    tracing::info!(
        finished = cleaned.finished_games.len(),
        released = cleaned.released_players.len(),
        "simulation done"
    );
    Ok(())
}

/// One simulated player. Returns the number of accepted moves.
async fn play(
    engine: Arc<Engine>,
    game_id: GameId,
    player_id: PlayerId,
    attempts: u32,
    seed: u64,
) -> u64 {
    let mut rng = StdRng::seed_from_u64(seed);
    // Validated config keeps this within MAX_GRID_SIZE
    let size = engine.config().game.grid_size as i32;
    let mut accepted = 0;

    for _ in 0..attempts {
        let x = rng.gen_range(0..size);
        let y = rng.gen_range(0..size);
        match engine.submit_move(game_id, player_id, x, y).await {
            Ok(_) => accepted += 1,
            Err(MoveError::CooldownActive { remaining }) => {
                tokio::time::sleep(remaining).await;
            }
            Err(MoveError::GameCompleted(_)) => break,
            Err(err) => {
                tracing::warn!(player_id = %player_id, error = %err, "player stopped");
                break;
            }
        }
        tokio::task::yield_now().await;
    }
    accepted
}

async fn watch_game(mut subscription: Subscription) {
    let game_id = subscription.game_id;
    loop {
        match subscription.recv().await {
            Ok(GameEvent::MoveApplied {
                mv,
                tallies,
                winner,
                ..
            }) => {
                tracing::debug!(
                    game_id = %game_id,
                    sequence = mv.sequence,
                    team = %mv.team,
                    x = mv.x,
                    y = mv.y,
                    red = tallies.red,
                    black = tallies.black,
                    "move"
                );
                if let Some(winner) = winner {
                    tracing::info!(game_id = %game_id, winner = %winner, moves = mv.sequence, "winner");
                }
            }
            Ok(event) => {
                tracing::debug!(game_id = %game_id, event = %event.to_json(), "event");
            }
            Err(HubError::Lagged(missed)) => {
                tracing::warn!(game_id = %game_id, missed, "watcher fell behind");
            }
            Err(HubError::Closed) => break,
        }
    }
}
