//! Configuration for kosmos nodes.
//!
//! All four node kinds read one [`KosmosConfig`]: each binary picks the
//! section it needs, so a single TOML file can describe a whole
//! deployment. Values resolve in order: defaults, then the config file,
//! then `KOSMOS_*` environment variables.

use std::path::Path;
use std::time::Duration;

use kosmos_core::{Fibonacci, Tsp};
use kosmos_wire::Transport;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

/// Top-level configuration shared by every kosmos binary.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KosmosConfig {
    #[serde(default)]
    pub universe: UniverseConfig,
    #[serde(default)]
    pub space: SpaceConfig,
    #[serde(default)]
    pub computer: ComputerConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub problem: ProblemConfig,
}

/// Universe (root coordinator) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UniverseConfig {
    /// Endpoint the universe listens on, e.g. `ipc://universe` or
    /// `tcp://0.0.0.0:7001`.
    #[serde(default = "default_universe_listen")]
    pub listen: String,
    /// Where to write periodic state snapshots. `None` disables both
    /// checkpointing and recovery.
    #[serde(default)]
    pub checkpoint_path: Option<String>,
    /// Seconds between snapshots.
    #[serde(default = "default_checkpoint_secs")]
    pub checkpoint_secs: u64,
}

/// Space (mid-tier dispatcher) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpaceConfig {
    #[serde(default = "default_space_listen")]
    pub listen: String,
    /// Endpoint of the universe this space registers with.
    #[serde(default = "default_universe_listen")]
    pub universe: String,
    /// Node number, unique among spaces under one universe.
    #[serde(default = "default_node")]
    pub node: u32,
    /// Run joins whose arguments complete here directly instead of
    /// queueing them for a computer.
    #[serde(default = "default_direct_execute")]
    pub direct_execute: bool,
}

/// Computer (worker host) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputerConfig {
    #[serde(default = "default_computer_listen")]
    pub listen: String,
    /// Endpoint of the space this computer registers with.
    #[serde(default = "default_space_listen")]
    pub space: String,
    /// Node number, unique among computers under one space.
    #[serde(default = "default_node")]
    pub node: u32,
    /// Worker count. `0` means one per available CPU core.
    #[serde(default)]
    pub workers: usize,
    /// How many spawned children a worker keeps for itself instead of
    /// shipping them back to its space.
    #[serde(default = "default_retain")]
    pub retain: usize,
    /// Backlog multiplier for the busy signal: the computer reports
    /// busy once its queue holds more than `workload * workers` tasks.
    #[serde(default = "default_workload")]
    pub workload: usize,
}

/// Gateway (client-facing front) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_listen")]
    pub listen: String,
    /// Endpoint of the universe this gateway registers with.
    #[serde(default = "default_universe_listen")]
    pub universe: String,
    /// Node number, unique among gateways under one universe.
    #[serde(default)]
    pub node: u32,
    /// Session budget in minutes for clients that do not name one.
    #[serde(default = "default_budget_min")]
    pub default_budget_min: u64,
    /// Largest session budget a client may request, in minutes.
    #[serde(default = "default_budget_limit_min")]
    pub budget_limit_min: u64,
}

/// Retry and polling intervals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Pause before rechecking a peer that reported busy.
    #[serde(default = "default_send_retry_ms")]
    pub send_retry_ms: u64,
    /// Pause after an empty poll before asking again.
    #[serde(default = "default_poll_idle_ms")]
    pub poll_idle_ms: u64,
    /// How long a request waits for its reply before failing the peer.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

/// Which problem the deployment runs and its tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemConfig {
    /// `fibonacci` or `tsp`.
    #[serde(default = "default_problem_kind")]
    pub kind: String,
    /// Layer at or below which joins stay at the universe.
    #[serde(default = "default_coarse_layer")]
    pub coarse_layer: u32,
    /// City count at or below which a TSP task is solved by brute force.
    #[serde(default = "default_tsp_brute_force")]
    pub tsp_brute_force: usize,
}

fn default_universe_listen() -> String {
    "ipc://universe".to_string()
}

fn default_space_listen() -> String {
    "ipc://space-1".to_string()
}

fn default_computer_listen() -> String {
    "ipc://computer-1".to_string()
}

fn default_gateway_listen() -> String {
    "ipc://gateway-0".to_string()
}

fn default_node() -> u32 {
    1
}

fn default_direct_execute() -> bool {
    true
}

fn default_retain() -> usize {
    1
}

fn default_workload() -> usize {
    4
}

fn default_budget_min() -> u64 {
    65
}

fn default_budget_limit_min() -> u64 {
    3600
}

fn default_checkpoint_secs() -> u64 {
    10
}

fn default_send_retry_ms() -> u64 {
    5
}

fn default_poll_idle_ms() -> u64 {
    5
}

fn default_request_timeout_ms() -> u64 {
    3000
}

fn default_problem_kind() -> String {
    "fibonacci".to_string()
}

fn default_coarse_layer() -> u32 {
    3
}

fn default_tsp_brute_force() -> usize {
    8
}

impl Default for UniverseConfig {
    fn default() -> Self {
        Self {
            listen: default_universe_listen(),
            checkpoint_path: None,
            checkpoint_secs: default_checkpoint_secs(),
        }
    }
}

impl Default for SpaceConfig {
    fn default() -> Self {
        Self {
            listen: default_space_listen(),
            universe: default_universe_listen(),
            node: default_node(),
            direct_execute: default_direct_execute(),
        }
    }
}

impl Default for ComputerConfig {
    fn default() -> Self {
        Self {
            listen: default_computer_listen(),
            space: default_space_listen(),
            node: default_node(),
            workers: 0,
            retain: default_retain(),
            workload: default_workload(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen: default_gateway_listen(),
            universe: default_universe_listen(),
            node: 0,
            default_budget_min: default_budget_min(),
            budget_limit_min: default_budget_limit_min(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            send_retry_ms: default_send_retry_ms(),
            poll_idle_ms: default_poll_idle_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl Default for ProblemConfig {
    fn default() -> Self {
        Self {
            kind: default_problem_kind(),
            coarse_layer: default_coarse_layer(),
            tsp_brute_force: default_tsp_brute_force(),
        }
    }
}

impl TimingConfig {
    pub fn send_retry(&self) -> Duration {
        Duration::from_millis(self.send_retry_ms)
    }

    pub fn poll_idle(&self) -> Duration {
        Duration::from_millis(self.poll_idle_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl ProblemConfig {
    pub fn fibonacci(&self) -> Fibonacci {
        Fibonacci {
            coarse_layer: self.coarse_layer,
        }
    }

    pub fn tsp(&self) -> Tsp {
        Tsp {
            brute_force_size: self.tsp_brute_force,
            coarse_layer: self.coarse_layer,
        }
    }
}

impl KosmosConfig {
    /// Parse a TOML document, apply environment overrides and validate.
    pub fn from_toml(content: &str) -> Result<Self, EngineError> {
        let mut config: KosmosConfig = toml::from_str(content)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, EngineError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Single-host defaults: every endpoint an IPC socket under
    /// `/tmp/kosmos`.
    pub fn local() -> Self {
        Self::default()
    }

    /// TCP preset for a deployment whose upper tiers live on `host`.
    pub fn distributed(host: &str) -> Self {
        let mut config = Self::default();
        config.gateway.listen = "tcp://0.0.0.0:7000".to_string();
        config.universe.listen = "tcp://0.0.0.0:7001".to_string();
        config.space.listen = "tcp://0.0.0.0:7002".to_string();
        config.computer.listen = "tcp://0.0.0.0:7003".to_string();
        config.space.universe = format!("tcp://{host}:7001");
        config.gateway.universe = format!("tcp://{host}:7001");
        config.computer.space = format!("tcp://{host}:7002");
        config
    }

    /// Apply `KOSMOS_SECTION_KEY` environment variable overrides.
    ///
    /// # Examples
    ///
    /// - `KOSMOS_UNIVERSE_LISTEN=tcp://0.0.0.0:7001`
    /// - `KOSMOS_SPACE_NODE=2`
    /// - `KOSMOS_COMPUTER_WORKERS=8`
    /// - `KOSMOS_PROBLEM_KIND=tsp`
    pub fn apply_env_overrides(&mut self) {
        if let Ok(listen) = std::env::var("KOSMOS_UNIVERSE_LISTEN") {
            self.universe.listen = listen;
        }
        if let Ok(path) = std::env::var("KOSMOS_UNIVERSE_CHECKPOINT_PATH") {
            self.universe.checkpoint_path = Some(path);
        }
        if let Ok(secs) = std::env::var("KOSMOS_UNIVERSE_CHECKPOINT_SECS") {
            if let Ok(secs) = secs.parse() {
                self.universe.checkpoint_secs = secs;
            }
        }
        if let Ok(listen) = std::env::var("KOSMOS_SPACE_LISTEN") {
            self.space.listen = listen;
        }
        if let Ok(universe) = std::env::var("KOSMOS_SPACE_UNIVERSE") {
            self.space.universe = universe;
        }
        if let Ok(node) = std::env::var("KOSMOS_SPACE_NODE") {
            if let Ok(node) = node.parse() {
                self.space.node = node;
            }
        }
        if let Ok(direct) = std::env::var("KOSMOS_SPACE_DIRECT_EXECUTE") {
            if let Ok(direct) = direct.parse() {
                self.space.direct_execute = direct;
            }
        }
        if let Ok(listen) = std::env::var("KOSMOS_COMPUTER_LISTEN") {
            self.computer.listen = listen;
        }
        if let Ok(space) = std::env::var("KOSMOS_COMPUTER_SPACE") {
            self.computer.space = space;
        }
        if let Ok(node) = std::env::var("KOSMOS_COMPUTER_NODE") {
            if let Ok(node) = node.parse() {
                self.computer.node = node;
            }
        }
        if let Ok(workers) = std::env::var("KOSMOS_COMPUTER_WORKERS") {
            if let Ok(workers) = workers.parse() {
                self.computer.workers = workers;
            }
        }
        if let Ok(retain) = std::env::var("KOSMOS_COMPUTER_RETAIN") {
            if let Ok(retain) = retain.parse() {
                self.computer.retain = retain;
            }
        }
        if let Ok(listen) = std::env::var("KOSMOS_GATEWAY_LISTEN") {
            self.gateway.listen = listen;
        }
        if let Ok(universe) = std::env::var("KOSMOS_GATEWAY_UNIVERSE") {
            self.gateway.universe = universe;
        }
        if let Ok(node) = std::env::var("KOSMOS_GATEWAY_NODE") {
            if let Ok(node) = node.parse() {
                self.gateway.node = node;
            }
        }
        if let Ok(kind) = std::env::var("KOSMOS_PROBLEM_KIND") {
            self.problem.kind = kind;
        }
        if let Ok(layer) = std::env::var("KOSMOS_PROBLEM_COARSE_LAYER") {
            if let Ok(layer) = layer.parse() {
                self.problem.coarse_layer = layer;
            }
        }
        if let Ok(size) = std::env::var("KOSMOS_PROBLEM_TSP_BRUTE_FORCE") {
            if let Ok(size) = size.parse() {
                self.problem.tsp_brute_force = size;
            }
        }
    }

    /// Check endpoint syntax and value ranges.
    pub fn validate(&self) -> Result<(), EngineError> {
        check_endpoint("universe.listen", &self.universe.listen)?;
        check_endpoint("space.listen", &self.space.listen)?;
        check_endpoint("space.universe", &self.space.universe)?;
        check_endpoint("computer.listen", &self.computer.listen)?;
        check_endpoint("computer.space", &self.computer.space)?;
        check_endpoint("gateway.listen", &self.gateway.listen)?;
        check_endpoint("gateway.universe", &self.gateway.universe)?;

        if self.universe.checkpoint_secs == 0 {
            return Err(EngineError::Config(
                "universe.checkpoint_secs must be at least 1".to_string(),
            ));
        }
        if self.computer.workload == 0 {
            return Err(EngineError::Config(
                "computer.workload must be at least 1".to_string(),
            ));
        }
        if self.gateway.default_budget_min == 0 {
            return Err(EngineError::Config(
                "gateway.default_budget_min must be at least 1".to_string(),
            ));
        }
        if self.gateway.budget_limit_min < self.gateway.default_budget_min {
            return Err(EngineError::Config(format!(
                "gateway.budget_limit_min ({}) is below gateway.default_budget_min ({})",
                self.gateway.budget_limit_min, self.gateway.default_budget_min
            )));
        }
        if self.timing.request_timeout_ms == 0 {
            return Err(EngineError::Config(
                "timing.request_timeout_ms must be at least 1".to_string(),
            ));
        }
        match self.problem.kind.as_str() {
            "fibonacci" | "tsp" => {}
            other => {
                return Err(EngineError::Config(format!(
                    "unknown problem kind '{other}', expected 'fibonacci' or 'tsp'"
                )));
            }
        }
        if self.problem.tsp_brute_force == 0 {
            return Err(EngineError::Config(
                "problem.tsp_brute_force must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn check_endpoint(key: &str, raw: &str) -> Result<(), EngineError> {
    raw.parse::<Transport>()
        .map(|_| ())
        .map_err(|e| EngineError::Config(format!("{key}: {e}")))
}
