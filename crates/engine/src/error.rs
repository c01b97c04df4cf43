//! Error types for the engine crate.

use kosmos_core::TaskError;
use kosmos_wire::{Rejection, WireError};
use thiserror::Error;

/// Errors produced by nodes, links and the client API.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("task error: {0}")]
    Task(#[from] TaskError),

    #[error(transparent)]
    Wire(#[from] WireError),

    /// The remote peer answered, but with an error or a reply that does
    /// not fit the request.
    #[error("peer error: {0}")]
    Peer(String),

    #[error("{0}")]
    Rejected(#[from] Rejection),

    #[error("config error: {0}")]
    Config(String),

    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot error: {0}")]
    Snapshot(String),
}
