//! Client-side handle for talking to a gateway.

use std::marker::PhantomData;
use std::time::Duration;

use kosmos_core::{Problem, TaskId};
use kosmos_wire::rpc::topics;
use kosmos_wire::{ClientRequest, ClientResponse, Message, RpcClient, Transport, WireError};

use crate::error::EngineError;

/// A named session against one gateway.
///
/// Wraps the client service in typed calls: register once, submit any
/// number of jobs, then collect finished values with [`result`]. The
/// session name travels with every request; the gateway threads it into
/// each job's lineage so values find their way back here.
///
/// [`result`]: JobClient::result
pub struct JobClient<P: Problem> {
    name: String,
    client: RpcClient,
    timeout: Duration,
    _problem: PhantomData<P>,
}

impl<P: Problem> JobClient<P> {
    /// Connect to a gateway's client service.
    pub async fn connect(
        name: impl Into<String>,
        gateway: &Transport,
        timeout: Duration,
    ) -> Result<Self, EngineError> {
        let client = RpcClient::connect(gateway).await?;
        Ok(Self {
            name: name.into(),
            client,
            timeout,
            _problem: PhantomData,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Open the session. Returns the granted budget in minutes.
    pub async fn register(&self, budget: Option<String>) -> Result<u64, EngineError> {
        let request = ClientRequest::<P>::Register {
            name: self.name.clone(),
            budget,
        };
        match self.call(&request, self.timeout).await? {
            ClientResponse::Registered { minutes } => Ok(minutes),
            other => Err(self.unexpected("register", other)),
        }
    }

    /// Submit one job. Returns the root id the finished value will carry.
    pub async fn submit(&self, input: P::Input) -> Result<TaskId, EngineError> {
        let request = ClientRequest::Submit {
            name: self.name.clone(),
            input,
        };
        match self.call(&request, self.timeout).await? {
            ClientResponse::Submitted { task_id } => Ok(task_id),
            other => Err(self.unexpected("submit", other)),
        }
    }

    /// Block until the session's next job finishes, up to `wait`.
    ///
    /// The gateway parks the request server-side, so the wait is spent
    /// there rather than in a polling loop here.
    pub async fn result(&self, wait: Duration) -> Result<(TaskId, P::Value), EngineError> {
        let request = ClientRequest::<P>::GetResult {
            name: self.name.clone(),
        };
        match self.call(&request, wait).await? {
            ClientResponse::Value { root, value } => Ok((root, value)),
            other => Err(self.unexpected("result", other)),
        }
    }

    /// Close the session and discard anything still queued under it.
    pub async fn unregister(&self) -> Result<(), EngineError> {
        let request = ClientRequest::<P>::Unregister {
            name: self.name.clone(),
        };
        match self.call(&request, self.timeout).await? {
            ClientResponse::Unregistered => Ok(()),
            other => Err(self.unexpected("unregister", other)),
        }
    }

    async fn call(
        &self,
        request: &ClientRequest<P>,
        timeout: Duration,
    ) -> Result<ClientResponse<P>, EngineError> {
        let msg = Message::new(topics::CLIENT_SERVICE, request).map_err(WireError::from)?;
        let reply = self.client.request(msg, timeout).await?;
        Ok(reply
            .decode::<ClientResponse<P>>()
            .map_err(WireError::from)?)
    }

    fn unexpected(&self, what: &str, got: ClientResponse<P>) -> EngineError {
        match got {
            ClientResponse::Rejected(rejection) => EngineError::Rejected(rejection),
            _ => EngineError::Peer(format!("{}: unexpected reply to {what}", self.name)),
        }
    }
}
