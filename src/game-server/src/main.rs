use std::{process::ExitCode, time::Duration};

use clap::Parser;
use common::utility::create_shutdown_channel;
use game_server::entrypoint::{serve, GameServerConfig};
use tracing::{error, Level};

#[derive(Parser, Debug)]
#[command(name = "game-server")]
#[command(about = "Rock, paper, scissors against a random opponent, over websockets")]
struct Args {
    /// Address for client websocket connections
    #[arg(long, env = "RPS_SOCKET_ADDRESS", default_value = "0.0.0.0:3002")]
    socket_address: String,

    /// Address for the REST api
    #[arg(long, env = "RPS_REST_ADDRESS", default_value = "0.0.0.0:8082")]
    rest_address: String,

    /// Delay before the opponent's choice is revealed
    #[arg(long, env = "RPS_REVEAL_DELAY_MS", default_value_t = 1000)]
    reveal_delay_ms: u64,

    /// Time after the reveal during which new choices are ignored
    #[arg(long, env = "RPS_INPUT_COOLDOWN_MS", default_value_t = 1500)]
    input_cooldown_ms: u64,

    /// Seed the opponents for reproducible games
    #[arg(long, env = "RPS_SEED")]
    seed: Option<u64>,

    #[arg(long, env = "RPS_LOG_LEVEL", default_value = "debug")]
    log_level: Level,
}

impl From<Args> for GameServerConfig {
    fn from(args: Args) -> Self {
        GameServerConfig {
            socket_address: args.socket_address,
            rest_address: args.rest_address,
            reveal_delay: Duration::from_millis(args.reveal_delay_ms),
            input_cooldown: Duration::from_millis(args.input_cooldown_ms),
            seed: args.seed,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_line_number(true)
        .with_file(true)
        .with_max_level(args.log_level)
        .init();

    let config = GameServerConfig::from(args);
    let strategies = config.strategies();
    let (_shutdown_sender, shutdown_receiver) = create_shutdown_channel();
    match serve(config, strategies, shutdown_receiver, None).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Game server failed: {}", e);
            ExitCode::FAILURE
        }
    }
}
