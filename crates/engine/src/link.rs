//! Links between tiers.
//!
//! A tier never talks to a socket directly. It talks to a [`PeerLink`]
//! (looking down at a space or computer) or is talked to through a
//! [`GatewayLink`] (the universe looking sideways at a gateway). The
//! production implementation is [`RemoteLink`] over the kosmos RPC
//! protocol; tests plug in in-process implementations.

use std::time::Duration;

use async_trait::async_trait;
use kosmos_core::{Outcome, Problem, Task, TaskId};
use kosmos_wire::{
    Message, NodeRequest, NodeResponse, PeerKind, RpcClient, Transport, WireError,
};
use kosmos_wire::rpc::topics;

use crate::error::EngineError;

/// A connection to one registered lower-tier peer.
#[async_trait]
pub trait PeerLink<P: Problem>: Send + Sync + 'static {
    /// Short name for logs, e.g. `computer-3`.
    fn label(&self) -> &str;

    /// Hand the peer a task to work on.
    async fn add_task(&self, task: Task<P>) -> Result<(), EngineError>;

    /// Ask the peer for its next finished outcome, if any.
    async fn poll_result(&self) -> Result<Option<Outcome<P>>, EngineError>;

    /// Whether the peer's backlog is deep enough to pause dispatch.
    async fn is_busy(&self) -> Result<bool, EngineError>;

    /// Tell the peer to shut down.
    async fn exit(&self) -> Result<(), EngineError>;
}

/// A connection from the universe to one registered gateway.
#[async_trait]
pub trait GatewayLink<P: Problem>: Send + Sync + 'static {
    fn label(&self) -> &str;

    /// Ask the gateway for the next client-submitted root task.
    async fn poll_task(&self) -> Result<Option<Task<P>>, EngineError>;

    /// Deliver a finished job's value back to the gateway.
    async fn deliver(&self, root: TaskId, value: P::Value) -> Result<(), EngineError>;
}

/// [`PeerLink`] and [`GatewayLink`] over the kosmos RPC protocol.
pub struct RemoteLink {
    label: String,
    client: RpcClient,
    timeout: Duration,
}

impl RemoteLink {
    /// Connect to a peer's node service.
    pub async fn connect(
        label: impl Into<String>,
        transport: &Transport,
        timeout: Duration,
    ) -> Result<Self, EngineError> {
        let client = RpcClient::connect(transport).await?;
        Ok(Self {
            label: label.into(),
            client,
            timeout,
        })
    }

    /// Announce this node to the peer so it connects a link back.
    pub async fn hello<P: Problem>(
        &self,
        peer: PeerKind,
        node: u32,
        endpoint: Transport,
    ) -> Result<(), EngineError> {
        match self
            .call::<P>(&NodeRequest::Hello {
                peer,
                node,
                endpoint,
            })
            .await?
        {
            NodeResponse::Ack => Ok(()),
            NodeResponse::Error(e) => Err(EngineError::Peer(e)),
            _ => Err(self.unexpected("hello")),
        }
    }

    async fn call<P: Problem>(
        &self,
        request: &NodeRequest<P>,
    ) -> Result<NodeResponse<P>, EngineError> {
        let msg = Message::new(topics::NODE_SERVICE, request).map_err(WireError::from)?;
        let reply = self.client.request(msg, self.timeout).await?;
        Ok(reply.decode::<NodeResponse<P>>().map_err(WireError::from)?)
    }

    fn unexpected(&self, what: &str) -> EngineError {
        EngineError::Peer(format!("{}: unexpected reply to {what}", self.label))
    }
}

#[async_trait]
impl<P: Problem> PeerLink<P> for RemoteLink {
    fn label(&self) -> &str {
        &self.label
    }

    async fn add_task(&self, task: Task<P>) -> Result<(), EngineError> {
        match self.call(&NodeRequest::AddTask { task }).await? {
            NodeResponse::Ack => Ok(()),
            NodeResponse::Error(e) => Err(EngineError::Peer(e)),
            _ => Err(self.unexpected("add_task")),
        }
    }

    async fn poll_result(&self) -> Result<Option<Outcome<P>>, EngineError> {
        match self.call(&NodeRequest::PollResult).await? {
            NodeResponse::Outcome(outcome) => Ok(outcome),
            NodeResponse::Error(e) => Err(EngineError::Peer(e)),
            _ => Err(self.unexpected("poll_result")),
        }
    }

    async fn is_busy(&self) -> Result<bool, EngineError> {
        match self.call::<P>(&NodeRequest::IsBusy).await? {
            NodeResponse::Busy(busy) => Ok(busy),
            NodeResponse::Error(e) => Err(EngineError::Peer(e)),
            _ => Err(self.unexpected("is_busy")),
        }
    }

    async fn exit(&self) -> Result<(), EngineError> {
        match self.call::<P>(&NodeRequest::Exit).await? {
            NodeResponse::Ack => Ok(()),
            NodeResponse::Error(e) => Err(EngineError::Peer(e)),
            _ => Err(self.unexpected("exit")),
        }
    }
}

#[async_trait]
impl<P: Problem> GatewayLink<P> for RemoteLink {
    fn label(&self) -> &str {
        &self.label
    }

    async fn poll_task(&self) -> Result<Option<Task<P>>, EngineError> {
        match self.call(&NodeRequest::PollTask).await? {
            NodeResponse::Task(task) => Ok(task),
            NodeResponse::Error(e) => Err(EngineError::Peer(e)),
            _ => Err(self.unexpected("poll_task")),
        }
    }

    async fn deliver(&self, root: TaskId, value: P::Value) -> Result<(), EngineError> {
        match self.call::<P>(&NodeRequest::Deliver { root, value }).await? {
            NodeResponse::Ack => Ok(()),
            NodeResponse::Error(e) => Err(EngineError::Peer(e)),
            _ => Err(self.unexpected("deliver")),
        }
    }
}
