//! kosmos-submit — submit jobs to a kosmos gateway and wait for results.
//!
//! # Usage
//!
//! ```bash
//! # Fibonacci numbers through the local stack
//! kosmos-submit fibonacci 30 32 34
//!
//! # A random 12-city tour with a one-hour session budget
//! kosmos-submit --budget 1:00 tsp --cities 12 --seed 7
//! ```

use std::collections::HashMap;
use std::time::Duration;

use clap::{Parser, Subcommand};
use kosmos_cli::init_tracing;
use kosmos_core::{Fibonacci, Tsp, TspInput};
use kosmos_engine::JobClient;
use kosmos_wire::Transport;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Submit jobs to a kosmos gateway and wait for the results.
#[derive(Parser, Debug)]
#[command(name = "kosmos-submit", version, about)]
struct Cli {
    /// Gateway endpoint to submit through.
    #[arg(long, env = "KOSMOS_GATEWAY", default_value = "ipc://gateway-0")]
    gateway: String,

    /// Session name.
    #[arg(long, env = "KOSMOS_CLIENT", default_value = "kosmos-cli")]
    name: String,

    /// Session budget as minutes ("90") or hours and minutes ("1:30").
    #[arg(long)]
    budget: Option<String>,

    /// Request timeout in seconds.
    #[arg(long, default_value_t = 5)]
    timeout: u64,

    /// Seconds to wait for each result.
    #[arg(long, default_value_t = 600)]
    wait: u64,

    /// Print results as JSON lines instead of text.
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    job: Job,
}

#[derive(Subcommand, Debug)]
enum Job {
    /// Compute fibonacci numbers.
    Fibonacci {
        /// Indexes to compute.
        #[arg(required = true)]
        n: Vec<u64>,
    },

    /// Solve a random travelling-salesman instance exactly.
    Tsp {
        /// Number of cities.
        #[arg(long, default_value_t = 10)]
        cities: usize,

        /// Seed for the random distance matrix.
        #[arg(long, default_value_t = 42)]
        seed: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let gateway: Transport = cli.gateway.parse()?;

    match &cli.job {
        Job::Fibonacci { n } => fibonacci(&cli, &gateway, n.clone()).await,
        Job::Tsp { cities, seed } => tsp(&cli, &gateway, *cities, *seed).await,
    }
}

async fn fibonacci(cli: &Cli, gateway: &Transport, inputs: Vec<u64>) -> anyhow::Result<()> {
    let client =
        JobClient::<Fibonacci>::connect(&cli.name, gateway, Duration::from_secs(cli.timeout))
            .await?;
    let minutes = client.register(cli.budget.clone()).await?;
    tracing::info!(minutes, "session open");

    let mut submitted = HashMap::new();
    for &n in &inputs {
        let root = client.submit(n).await?;
        tracing::info!(task = %root, n, "submitted");
        submitted.insert(root, n);
    }
    for _ in &inputs {
        let (root, value) = client.result(Duration::from_secs(cli.wait)).await?;
        let n = submitted.remove(&root);
        if cli.json {
            println!(
                "{}",
                serde_json::json!({ "task": root.to_string(), "n": n, "value": value })
            );
        } else {
            match n {
                Some(n) => println!("fib({n}) = {value}"),
                None => println!("{root} = {value}"),
            }
        }
    }

    client.unregister().await?;
    Ok(())
}

async fn tsp(cli: &Cli, gateway: &Transport, cities: usize, seed: u64) -> anyhow::Result<()> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut distances = vec![vec![0.0; cities]; cities];
    for a in 0..cities {
        for b in 0..cities {
            if a != b {
                distances[a][b] = rng.gen_range(1.0..10.0);
            }
        }
    }

    let client = JobClient::<Tsp>::connect(&cli.name, gateway, Duration::from_secs(cli.timeout))
        .await?;
    let minutes = client.register(cli.budget.clone()).await?;
    tracing::info!(minutes, "session open");

    let root = client.submit(TspInput::tour(distances)).await?;
    tracing::info!(task = %root, cities, "submitted");

    let (_, best) = client.result(Duration::from_secs(cli.wait)).await?;
    if cli.json {
        println!("{}", serde_json::to_string(&best)?);
    } else {
        println!(
            "shortest tour: {:?} with length {:.3}",
            best.cities, best.length
        );
    }

    client.unregister().await?;
    Ok(())
}
