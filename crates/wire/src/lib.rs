pub mod error;
pub mod message;
pub mod reqrep;
pub mod rpc;
pub mod transport;

pub use error::WireError;
pub use message::Message;
pub use reqrep::{ReplyToken, RpcClient, RpcServer};
pub use rpc::{ClientRequest, ClientResponse, NodeRequest, NodeResponse, PeerKind, Rejection};
pub use transport::Transport;
