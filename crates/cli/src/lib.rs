//! Shared plumbing for the kosmos binaries.

use kosmos_engine::KosmosConfig;
use tracing::{info, warn};

/// Structured logging to stderr, filtered by `RUST_LOG` (default `info`).
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

/// Load the config file, falling back to single-host defaults when it
/// cannot be read. `KOSMOS_*` environment overrides win either way.
pub fn load_config(path: &str) -> anyhow::Result<KosmosConfig> {
    match KosmosConfig::from_file(path) {
        Ok(config) => {
            info!(path, "loaded config");
            Ok(config)
        }
        Err(e) => {
            warn!(error = %e, path, "config not loaded, using local defaults");
            let mut config = KosmosConfig::local();
            config.apply_env_overrides();
            config.validate()?;
            Ok(config)
        }
    }
}

/// Wait for SIGINT or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to register SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {},
            _ = sigterm.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.expect("failed to listen for ctrl_c");
    }
}
