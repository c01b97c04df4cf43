use thiserror::Error;

/// Errors from the messaging layer.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("serialization error: {0}")]
    Serialization(#[from] rmp_serde::encode::Error),

    #[error("deserialization error: {0}")]
    Deserialization(#[from] rmp_serde::decode::Error),

    #[error("zeromq error: {0}")]
    Zmq(#[from] zeromq::ZmqError),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("bad endpoint: {0}")]
    Endpoint(String),

    #[error("no reply within {0:?}")]
    Timeout(std::time::Duration),

    #[error("peer rejected request: {0}")]
    Rejected(String),
}
