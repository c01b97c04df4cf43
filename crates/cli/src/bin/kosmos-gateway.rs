//! kosmos-gateway — client-facing front of a kosmos federation.
//!
//! Registers with a universe, opens named client sessions with duration
//! budgets, and hands submitted jobs to the universe while finished
//! values queue up per session.

use clap::Parser;
use kosmos_cli::{init_tracing, load_config, shutdown_signal};
use kosmos_core::{Fibonacci, Problem, Tsp};
use kosmos_engine::{Gateway, KosmosConfig};
use kosmos_wire::{RpcServer, Transport};

/// Client-facing front of a kosmos federation.
#[derive(Parser, Debug)]
#[command(name = "kosmos-gateway", version, about)]
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

    /// Node number of this gateway, overriding the config.
    #[arg(long)]
    node: Option<u32>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    tracing::info!(?cli, "starting kosmos-gateway");

    let mut config = load_config(&cli.config)?;
    if let Some(listen) = cli.listen {
        config.gateway.listen = listen;
    }
    if let Some(universe) = cli.universe {
        config.gateway.universe = universe;
    }
    if let Some(node) = cli.node {
        config.gateway.node = node;
    }

    // The gateway never executes tasks; the problem only fixes the
    // payload types on the wire.
    let kind = config.problem.kind.clone();
    match kind.as_str() {
        "fibonacci" => run::<Fibonacci>(config).await,
        "tsp" => run::<Tsp>(config).await,
        other => anyhow::bail!("unknown problem kind {other:?}"),
    }
}

async fn run<P: Problem>(config: KosmosConfig) -> anyhow::Result<()> {
    let listen: Transport = config.gateway.listen.parse()?;
    let universe_at: Transport = config.gateway.universe.parse()?;
    let gateway = Gateway::<P>::new(&config.gateway, config.timing.clone());

    let server = RpcServer::bind(&listen).await?;

    let gateway_for_signal = gateway.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("shutdown signal received");
        gateway_for_signal.exit();
    });

    // Serve before saying hello so the universe's connect-back lands.
    let serving = tokio::spawn(gateway.clone().serve(server));
    gateway
        .register_with_universe(&universe_at, listen.clone())
        .await?;
    tracing::info!(listen = %listen, universe = %universe_at, "gateway running");

    serving.await??;
    tracing::info!("kosmos-gateway exited cleanly");
    Ok(())
}
