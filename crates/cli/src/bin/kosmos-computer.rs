//! kosmos-computer — worker node of a kosmos federation.
//!
//! Registers with a space, runs a pool of workers over the local ready
//! queue, and keeps a slice of each split for itself so the queue never
//! starves while results round-trip through the tiers.

use clap::Parser;
use kosmos_cli::{init_tracing, load_config, shutdown_signal};
use kosmos_core::Problem;
use kosmos_engine::{Computer, KosmosConfig};
use kosmos_wire::{RpcServer, Transport};

/// Worker node of a kosmos federation.
#[derive(Parser, Debug)]
#[command(name = "kosmos-computer", version, about)]
struct Cli {
    /// Path to kosmos.toml config file.
    #[arg(long, env = "KOSMOS_CONFIG", default_value = "config/kosmos.toml")]
    config: String,

    /// Endpoint to listen on, overriding the config.
    #[arg(long)]
    listen: Option<String>,

    /// Space endpoint to register with, overriding the config.
    #[arg(long)]
    space: Option<String>,

    /// Node number of this computer, overriding the config.
    #[arg(long)]
    node: Option<u32>,

    /// Worker count, overriding the config (0 = one per core).
    #[arg(long)]
    workers: Option<usize>,

    /// How many children of each split to keep locally, overriding the
    /// config.
    #[arg(long)]
    retain: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    tracing::info!(?cli, "starting kosmos-computer");

    let mut config = load_config(&cli.config)?;
    if let Some(listen) = cli.listen {
        config.computer.listen = listen;
    }
    if let Some(space) = cli.space {
        config.computer.space = space;
    }
    if let Some(node) = cli.node {
        config.computer.node = node;
    }
    if let Some(workers) = cli.workers {
        config.computer.workers = workers;
    }
    if let Some(retain) = cli.retain {
        config.computer.retain = retain;
    }

    let kind = config.problem.kind.clone();
    match kind.as_str() {
        "fibonacci" => run(config.problem.fibonacci(), config).await,
        "tsp" => run(config.problem.tsp(), config).await,
        other => anyhow::bail!("unknown problem kind {other:?}"),
    }
}

async fn run<P: Problem>(problem: P, config: KosmosConfig) -> anyhow::Result<()> {
    let listen: Transport = config.computer.listen.parse()?;
    let space_at: Transport = config.computer.space.parse()?;
    let computer = Computer::new(problem, &config.computer);
    computer.spawn_workers();

    let server = RpcServer::bind(&listen).await?;

    let computer_for_signal = computer.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("shutdown signal received");
        computer_for_signal.exit();
    });

    // Serve before saying hello so the space's connect-back lands.
    let serving = tokio::spawn(computer.clone().serve(server));
    computer
        .register_with_space(&space_at, listen.clone(), &config.timing)
        .await?;
    tracing::info!(listen = %listen, space = %space_at, "computer running");

    serving.await??;
    tracing::info!("kosmos-computer exited cleanly");
    Ok(())
}
