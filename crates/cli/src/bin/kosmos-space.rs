//! kosmos-space — mid-tier dispatcher of a kosmos federation.
//!
//! Registers with a universe, adopts computers that announce themselves,
//! and settles fine-grained joins locally while coarse results pass
//! through to the universe.

use clap::Parser;
use kosmos_cli::{init_tracing, load_config, shutdown_signal};
use kosmos_core::Problem;
use kosmos_engine::{KosmosConfig, Space};
use kosmos_wire::{RpcServer, Transport};

/// Mid-tier dispatcher of a kosmos federation.
#[derive(Parser, Debug)]
#[command(name = "kosmos-space", version, about)]
struct Cli {
    /// Path to kosmos.toml config file.
    #[arg(long, env = "KOSMOS_CONFIG", default_value = "config/kosmos.toml")]
    config: String,

    /// Endpoint to listen on, overriding the config.
    #[arg(long)]
    listen: Option<String>,

    /// Universe endpoint to register with, overriding the config.
    #[arg(long)]
    universe: Option<String>,

    /// Node number of this space, overriding the config.
    #[arg(long)]
    node: Option<u32>,

    /// Whether to run completed joins in place, overriding the config.
    #[arg(long)]
    direct_execute: Option<bool>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    tracing::info!(?cli, "starting kosmos-space");

    let mut config = load_config(&cli.config)?;
    if let Some(listen) = cli.listen {
        config.space.listen = listen;
    }
    if let Some(universe) = cli.universe {
        config.space.universe = universe;
    }
    if let Some(node) = cli.node {
        config.space.node = node;
    }
    if let Some(direct_execute) = cli.direct_execute {
        config.space.direct_execute = direct_execute;
    }

    let kind = config.problem.kind.clone();
    match kind.as_str() {
        "fibonacci" => run(config.problem.fibonacci(), config).await,
        "tsp" => run(config.problem.tsp(), config).await,
        other => anyhow::bail!("unknown problem kind {other:?}"),
    }
}

async fn run<P: Problem>(problem: P, config: KosmosConfig) -> anyhow::Result<()> {
    let listen: Transport = config.space.listen.parse()?;
    let universe_at: Transport = config.space.universe.parse()?;
    let space = Space::new(problem, &config.space, config.timing.clone());

    let server = RpcServer::bind(&listen).await?;

    let space_for_signal = space.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("shutdown signal received");
        space_for_signal.exit();
    });

    // Serve before saying hello so the universe's connect-back lands.
    let serving = tokio::spawn(space.clone().serve(server));
    space
        .register_with_universe(&universe_at, listen.clone())
        .await?;
    tracing::info!(listen = %listen, universe = %universe_at, "space running");

    serving.await??;
    tracing::info!("kosmos-space exited cleanly");
    Ok(())
}
