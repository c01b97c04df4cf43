//! kosmos-universe — root coordinator of a kosmos federation.
//!
//! Owns the coarse joins and the backlog of every job, feeds registered
//! spaces, and routes finished values back to the gateway each job came
//! in through.
//!
//! # Usage
//!
//! ```bash
//! # Local IPC stack with defaults
//! kosmos-universe
//!
//! # TCP, checkpointing to disk every 30 seconds
//! kosmos-universe --listen tcp://0.0.0.0:7001 \
//!     --checkpoint /var/lib/kosmos/universe.ckpt --checkpoint-secs 30
//! ```

use clap::Parser;
use kosmos_cli::{init_tracing, load_config, shutdown_signal};
use kosmos_core::Problem;
use kosmos_engine::{KosmosConfig, Universe};
use kosmos_wire::{RpcServer, Transport};

/// Root coordinator of a kosmos federation.
#[derive(Parser, Debug)]
#[command(name = "kosmos-universe", version, about)]
struct Cli {
    /// Path to kosmos.toml config file.
    #[arg(long, env = "KOSMOS_CONFIG", default_value = "config/kosmos.toml")]
    config: String,

    /// Endpoint to listen on, overriding the config.
    #[arg(long)]
    listen: Option<String>,

    /// Checkpoint file path, overriding the config.
    #[arg(long)]
    checkpoint: Option<String>,

    /// Seconds between checkpoints, overriding the config.
    #[arg(long)]
    checkpoint_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    tracing::info!(?cli, "starting kosmos-universe");

    let mut config = load_config(&cli.config)?;
    if let Some(listen) = cli.listen {
        config.universe.listen = listen;
    }
    if let Some(checkpoint) = cli.checkpoint {
        config.universe.checkpoint_path = Some(checkpoint);
    }
    if let Some(secs) = cli.checkpoint_secs {
        config.universe.checkpoint_secs = secs;
    }

    let kind = config.problem.kind.clone();
    match kind.as_str() {
        "fibonacci" => run(config.problem.fibonacci(), config).await,
        "tsp" => run(config.problem.tsp(), config).await,
        other => anyhow::bail!("unknown problem kind {other:?}"),
    }
}

async fn run<P: Problem>(problem: P, config: KosmosConfig) -> anyhow::Result<()> {
    let listen: Transport = config.universe.listen.parse()?;
    let universe = Universe::new(problem, &config.universe, config.timing.clone());
    universe.recover_from_checkpoint().await;
    universe.start_checkpointing();

    let server = RpcServer::bind(&listen).await?;

    let universe_for_signal = universe.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("shutdown signal received");
        universe_for_signal.exit();
    });

    tracing::info!(listen = %listen, "universe running");
    universe.clone().serve(server).await?;
    universe.write_checkpoint().await?;
    tracing::info!("kosmos-universe exited cleanly");
    Ok(())
}
