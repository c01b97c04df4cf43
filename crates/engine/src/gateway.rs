//! Gateway: the client-facing front of a kosmos deployment.
//!
//! Clients register a named session with a duration budget, submit
//! problem inputs, and block on results. The gateway mints each job's
//! root lineage (client segment, then its own gateway segment), queues
//! the root task for the universe to pull, and fans finished values
//! back out to the session that asked. When a session's budget runs
//! out the session and its queued tasks are dropped.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use indexmap::IndexMap;
use kosmos_core::{Problem, Segment, Task, TaskId};
use kosmos_wire::rpc::topics;
use kosmos_wire::{
    ClientRequest, ClientResponse, Message, NodeRequest, NodeResponse, PeerKind, Rejection,
    ReplyToken, RpcServer, Transport, WireError,
};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::{GatewayConfig, TimingConfig};
use crate::error::EngineError;
use crate::link::RemoteLink;
use crate::store::TaskQueue;

struct ClientSession<P: Problem> {
    results: Arc<TaskQueue<(TaskId, P::Value)>>,
    minutes: u64,
    expiry: JoinHandle<()>,
}

pub struct Gateway<P: Problem> {
    node: u32,
    default_budget_min: u64,
    budget_limit_min: u64,
    timing: TimingConfig,
    clients: Mutex<IndexMap<String, ClientSession<P>>>,
    /// Root tasks waiting for the universe to pull them.
    pending: TaskQueue<Task<P>>,
    seq: AtomicU64,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl<P: Problem> Gateway<P> {
    pub fn new(config: &GatewayConfig, timing: TimingConfig) -> Arc<Self> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Arc::new(Self {
            node: config.node,
            default_budget_min: config.default_budget_min,
            budget_limit_min: config.budget_limit_min,
            timing,
            clients: Mutex::new(IndexMap::new()),
            pending: TaskQueue::unbounded(),
            seq: AtomicU64::new(0),
            shutdown_tx,
            shutdown_rx,
        })
    }

    pub fn node(&self) -> u32 {
        self.node
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    pub async fn client_count(&self) -> usize {
        self.clients.lock().await.len()
    }

    pub fn exit(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Open a session. `budget` is `"mm"` or `"hh:mm"`; `None` takes
    /// the configured default. Returns the granted minutes.
    pub async fn register(
        self: &Arc<Self>,
        name: &str,
        budget: Option<&str>,
    ) -> Result<u64, Rejection> {
        if name.is_empty() {
            return Err(Rejection::EmptyName);
        }
        let minutes = match budget {
            None => self.default_budget_min,
            Some(raw) => parse_budget(raw)?,
        };
        if minutes > self.budget_limit_min {
            return Err(Rejection::BudgetTooLarge {
                asked: minutes,
                limit: self.budget_limit_min,
            });
        }
        let mut clients = self.clients.lock().await;
        if clients.contains_key(name) {
            return Err(Rejection::DuplicateClient(name.to_string()));
        }
        let expiry = {
            let gateway = self.clone();
            let client = name.to_string();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(minutes.saturating_mul(60))).await;
                gateway.expire(&client).await;
            })
        };
        clients.insert(
            name.to_string(),
            ClientSession {
                results: Arc::new(TaskQueue::unbounded()),
                minutes,
                expiry,
            },
        );
        info!(client = name, minutes, "client registered");
        Ok(minutes)
    }

    /// Close a session, dropping its queued submissions.
    pub async fn unregister(&self, name: &str) -> Result<(), Rejection> {
        let session = self
            .clients
            .lock()
            .await
            .shift_remove(name)
            .ok_or_else(|| Rejection::UnknownClient(name.to_string()))?;
        session.expiry.abort();
        self.purge_client(name).await;
        info!(client = name, "client unregistered");
        Ok(())
    }

    /// Budget ran out. Reached from the session's own expiry task, so
    /// the session is dropped without aborting that task.
    async fn expire(&self, name: &str) {
        let session = self.clients.lock().await.shift_remove(name);
        if session.is_some() {
            warn!(client = name, "session budget exhausted, dropping client");
            self.purge_client(name).await;
        }
    }

    async fn purge_client(&self, name: &str) {
        let dropped = self
            .pending
            .purge(|task| task.id.client_name() == Some(name))
            .await;
        if !dropped.is_empty() {
            info!(client = name, dropped = dropped.len(), "dropped queued submissions");
        }
    }

    /// Accept a job. The root id carries the client's name and this
    /// gateway's node so the finished value can find its way back.
    pub async fn submit(&self, name: &str, input: P::Input) -> Result<TaskId, Rejection> {
        if !self.clients.lock().await.contains_key(name) {
            return Err(Rejection::UnknownClient(name.to_string()));
        }
        let root_id = TaskId::root(Segment::Client {
            name: name.to_string(),
            seq: self.next_seq(),
        })
        .child(Segment::Gateway {
            node: self.node,
            seq: self.next_seq(),
        });
        let task = Task::root(root_id.clone(), input);
        self.pending.push(task).await;
        info!(client = name, task = %root_id, "job submitted");
        Ok(root_id)
    }

    /// Block until one of the session's jobs finishes. Values come back
    /// in completion order, each tagged with its root id.
    pub async fn get_result(&self, name: &str) -> Result<(TaskId, P::Value), Rejection> {
        let results = self
            .clients
            .lock()
            .await
            .get(name)
            .map(|session| session.results.clone())
            .ok_or_else(|| Rejection::UnknownClient(name.to_string()))?;
        Ok(results.take().await)
    }

    /// Hand the universe the next submitted root task, if any.
    pub async fn poll_task(&self) -> Option<Task<P>> {
        self.pending.try_take().await
    }

    /// Take a finished value from the universe and queue it for its
    /// client. Values for unknown clients are dropped.
    pub async fn deliver(&self, root: TaskId, value: P::Value) {
        let Some(name) = root.client_name().map(str::to_string) else {
            warn!(task = %root, "result without a client in its lineage dropped");
            return;
        };
        let results = self
            .clients
            .lock()
            .await
            .get(&name)
            .map(|session| session.results.clone());
        match results {
            Some(results) => {
                debug!(client = %name, task = %root, "result ready");
                results.push((root, value)).await;
            }
            None => warn!(client = %name, task = %root, "result for an unknown client dropped"),
        }
    }

    /// Announce this gateway to its universe so the universe links back.
    pub async fn register_with_universe(
        &self,
        universe: &Transport,
        listen: Transport,
    ) -> Result<(), EngineError> {
        let link = RemoteLink::connect("universe", universe, self.timing.request_timeout()).await?;
        link.hello::<P>(PeerKind::Gateway, self.node, listen).await?;
        info!(gateway = self.node, universe = %universe, "registered with universe");
        Ok(())
    }

    /// Answer client-service and node-service requests until shutdown.
    pub async fn serve(self: Arc<Self>, server: RpcServer) -> Result<(), EngineError> {
        let server = Arc::new(server);
        let mut shutdown = self.shutdown_rx.clone();
        loop {
            tokio::select! {
                _ = shutdown.changed() => return Ok(()),
                next = server.recv_request() => {
                    let (token, msg) = next?;
                    let gateway = self.clone();
                    let server = server.clone();
                    tokio::spawn(async move {
                        if let Err(e) = gateway.handle(server, token, msg).await {
                            warn!(error = %e, "request handling failed");
                        }
                    });
                }
            }
        }
    }

    async fn handle(
        self: Arc<Self>,
        server: Arc<RpcServer>,
        token: ReplyToken,
        msg: Message,
    ) -> Result<(), EngineError> {
        if msg.topic == topics::CLIENT_SERVICE {
            self.handle_client(server, token, msg).await
        } else {
            self.handle_node(server, token, msg).await
        }
    }

    async fn handle_client(
        self: Arc<Self>,
        server: Arc<RpcServer>,
        token: ReplyToken,
        msg: Message,
    ) -> Result<(), EngineError> {
        let request: ClientRequest<P> = msg.decode().map_err(WireError::from)?;
        let response: ClientResponse<P> = match request {
            ClientRequest::Register { name, budget } => {
                match self.register(&name, budget.as_deref()).await {
                    Ok(minutes) => ClientResponse::Registered { minutes },
                    Err(rejection) => ClientResponse::Rejected(rejection),
                }
            }
            ClientRequest::Unregister { name } => match self.unregister(&name).await {
                Ok(()) => ClientResponse::Unregistered,
                Err(rejection) => ClientResponse::Rejected(rejection),
            },
            ClientRequest::Submit { name, input } => match self.submit(&name, input).await {
                Ok(task_id) => ClientResponse::Submitted { task_id },
                Err(rejection) => ClientResponse::Rejected(rejection),
            },
            ClientRequest::GetResult { name } => match self.get_result(&name).await {
                Ok((root, value)) => ClientResponse::Value { root, value },
                Err(rejection) => ClientResponse::Rejected(rejection),
            },
        };
        let reply = Message::reply(&msg, &response).map_err(WireError::from)?;
        server.send_reply(token, reply).await?;
        Ok(())
    }

    async fn handle_node(
        self: Arc<Self>,
        server: Arc<RpcServer>,
        token: ReplyToken,
        msg: Message,
    ) -> Result<(), EngineError> {
        let request: NodeRequest<P> = msg.decode().map_err(WireError::from)?;
        let response: NodeResponse<P> = match request {
            NodeRequest::PollTask => NodeResponse::Task(self.poll_task().await),
            NodeRequest::Deliver { root, value } => {
                self.deliver(root, value).await;
                NodeResponse::Ack
            }
            NodeRequest::Exit => {
                self.exit();
                NodeResponse::Ack
            }
            _ => NodeResponse::Error("unsupported request for a gateway".to_string()),
        };
        let reply = Message::reply(&msg, &response).map_err(WireError::from)?;
        server.send_reply(token, reply).await?;
        Ok(())
    }
}

/// Parse a session budget: plain minutes (`"90"`) or hours and minutes
/// (`"1:30"`).
pub fn parse_budget(raw: &str) -> Result<u64, Rejection> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(Rejection::BadBudget(raw.to_string()));
    }
    match raw.split_once(':') {
        None => raw
            .parse()
            .map_err(|_| Rejection::BadBudget(raw.to_string())),
        Some((hours, minutes)) => {
            let hours: u64 = hours
                .parse()
                .map_err(|_| Rejection::BadBudget(raw.to_string()))?;
            let minutes: u64 = minutes
                .parse()
                .map_err(|_| Rejection::BadBudget(raw.to_string()))?;
            hours
                .checked_mul(60)
                .and_then(|h| h.checked_add(minutes))
                .ok_or_else(|| Rejection::BadBudget(raw.to_string()))
        }
    }
}
