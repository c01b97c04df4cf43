pub mod client;
pub mod computer;
pub mod config;
pub mod error;
pub mod gateway;
pub mod link;
pub mod policy;
pub mod proxy;
pub mod snapshot;
pub mod space;
pub mod store;
pub mod universe;

pub use client::JobClient;
pub use computer::Computer;
pub use config::{
    ComputerConfig, GatewayConfig, KosmosConfig, ProblemConfig, SpaceConfig, TimingConfig,
    UniverseConfig,
};
pub use error::EngineError;
pub use gateway::Gateway;
pub use link::{GatewayLink, PeerLink, RemoteLink};
pub use policy::{FixedRetention, NoRetention, RetentionPolicy};
pub use proxy::{GatewayProxy, PeerProxy};
pub use snapshot::UniverseSnapshot;
pub use space::Space;
pub use store::{JoinFill, SuccessorMap, TaskQueue};
pub use universe::Universe;
