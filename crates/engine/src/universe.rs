//! Universe: the root coordinator.
//!
//! The universe owns the coarse-grained picture of every job: root
//! tasks arrive from gateways, coarse joins park here, and finished
//! values go back out to the gateway named in the root's lineage. Each
//! registered space gets a dispatch loop and a poll loop; each
//! registered gateway gets a task-pull loop and a result-push loop.
//!
//! Results can outrun the spawns that explain them, because spaces
//! forward what they cannot settle. Such values wait on a holding queue
//! and are offered to the successor map again after every processed
//! poll, so a join registered late still fills.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use indexmap::IndexMap;
use kosmos_core::{Outcome, Problem, Rank, Segment, Target, Task, TaskId};
use kosmos_wire::{
    Message, NodeRequest, NodeResponse, PeerKind, ReplyToken, RpcServer, WireError,
};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{TimingConfig, UniverseConfig};
use crate::error::EngineError;
use crate::link::{GatewayLink, PeerLink, RemoteLink};
use crate::proxy::{GatewayProxy, PeerProxy};
use crate::snapshot::{self, UniverseSnapshot};
use crate::store::{JoinFill, SuccessorMap, TaskQueue};

pub struct Universe<P: Problem> {
    timing: TimingConfig,
    ready: TaskQueue<Task<P>>,
    successors: SuccessorMap<P>,
    /// Values whose join has not been registered yet.
    holding: TaskQueue<Outcome<P>>,
    spaces: Mutex<IndexMap<u32, Arc<PeerProxy<P>>>>,
    gateways: Mutex<IndexMap<u32, Arc<GatewayProxy<P>>>>,
    seq: AtomicU64,
    checkpoint_path: Option<PathBuf>,
    checkpoint_secs: u64,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl<P: Problem> Universe<P> {
    pub fn new(_problem: P, config: &UniverseConfig, timing: TimingConfig) -> Arc<Self> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Arc::new(Self {
            timing,
            ready: TaskQueue::unbounded(),
            successors: SuccessorMap::new(),
            holding: TaskQueue::unbounded(),
            spaces: Mutex::new(IndexMap::new()),
            gateways: Mutex::new(IndexMap::new()),
            seq: AtomicU64::new(0),
            checkpoint_path: config.checkpoint_path.as_ref().map(PathBuf::from),
            checkpoint_secs: config.checkpoint_secs,
            shutdown_tx,
            shutdown_rx,
        })
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    pub async fn space_count(&self) -> usize {
        self.spaces.lock().await.len()
    }

    pub async fn gateway_count(&self) -> usize {
        self.gateways.lock().await.len()
    }

    pub async fn pending_joins(&self) -> usize {
        self.successors.len().await
    }

    pub async fn held_results(&self) -> usize {
        self.holding.len().await
    }

    pub async fn backlog(&self) -> usize {
        self.ready.len().await
    }

    pub fn exit(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Adopt a space and start its dispatch and poll loops. A second
    /// registration under the same node number replaces the first,
    /// salvaging whatever the old incarnation still owed.
    pub async fn register_space(self: &Arc<Self>, node: u32, link: Arc<dyn PeerLink<P>>) {
        let proxy = Arc::new(PeerProxy::new(format!("space-{node}"), node, link));
        let old = self.spaces.lock().await.insert(node, proxy.clone());
        if let Some(old) = old {
            old.salvage_into(&self.ready).await;
        }
        info!(space = node, "space registered");
        let universe = self.clone();
        let peer = proxy.clone();
        tokio::spawn(async move { universe.send_loop(peer).await });
        let universe = self.clone();
        tokio::spawn(async move { universe.receive_loop(proxy).await });
    }

    async fn unregister_space(&self, proxy: &Arc<PeerProxy<P>>) {
        let mut spaces = self.spaces.lock().await;
        if let Some(current) = spaces.get(&proxy.node) {
            if Arc::ptr_eq(current, proxy) {
                spaces.shift_remove(&proxy.node);
            }
        }
    }

    /// Adopt a gateway and start its pull and push loops.
    pub async fn register_gateway(self: &Arc<Self>, node: u32, link: Arc<dyn GatewayLink<P>>) {
        let proxy = Arc::new(GatewayProxy::new(format!("gateway-{node}"), node, link));
        let old = self.gateways.lock().await.insert(node, proxy.clone());
        if let Some(old) = old {
            old.retire();
        }
        info!(gateway = node, "gateway registered");
        let universe = self.clone();
        let gw = proxy.clone();
        tokio::spawn(async move { universe.gateway_pull_loop(gw).await });
        let universe = self.clone();
        tokio::spawn(async move { universe.gateway_push_loop(proxy).await });
    }

    /// Drop a gateway and every queued task its clients submitted.
    async fn drop_gateway(&self, proxy: &Arc<GatewayProxy<P>>) {
        if !proxy.retire() {
            return;
        }
        {
            let mut gateways = self.gateways.lock().await;
            if let Some(current) = gateways.get(&proxy.node) {
                if Arc::ptr_eq(current, proxy) {
                    gateways.shift_remove(&proxy.node);
                }
            }
        }
        let node = proxy.node;
        let dropped = self
            .ready
            .purge(|task| task.id.gateway_node() == Some(node))
            .await;
        if !dropped.is_empty() {
            info!(gateway = node, dropped = dropped.len(), "dropped tasks from a lost gateway");
        }
    }

    /// Feed one space from the ready queue.
    async fn send_loop(self: Arc<Self>, proxy: Arc<PeerProxy<P>>) {
        let mut shutdown = self.shutdown_rx.clone();
        loop {
            if proxy.is_retired() {
                break;
            }
            let task = tokio::select! {
                _ = shutdown.changed() => break,
                task = self.ready.take() => task,
            };
            let untagged = task.clone();
            let mut task = task;
            if task.id.last_rank() != Rank::Space {
                task.id.push(Segment::Space {
                    node: proxy.node,
                    seq: self.next_seq(),
                });
            }
            let tagged_id = task.id.clone();
            proxy.track(task.clone()).await;
            if let Err(e) = proxy.link.add_task(task).await {
                warn!(peer = %proxy.label, error = %e, "dispatch failed, requeueing task");
                proxy.untrack(&tagged_id).await;
                self.ready.push(untagged).await;
                break;
            }
        }
        debug!(peer = %proxy.label, "send loop stopped");
    }

    /// Poll one space for outcomes and settle them, retrying held
    /// results after every pass.
    async fn receive_loop(self: Arc<Self>, proxy: Arc<PeerProxy<P>>) {
        let mut shutdown = self.shutdown_rx.clone();
        loop {
            if proxy.is_retired() {
                break;
            }
            let polled = tokio::select! {
                _ = shutdown.changed() => break,
                polled = proxy.link.poll_result() => polled,
            };
            match polled {
                Ok(Some(outcome)) => {
                    proxy.untrack(outcome.task_id()).await;
                    self.process_outcome(&proxy, outcome).await;
                    self.retry_held(&proxy).await;
                }
                Ok(None) => {
                    self.retry_held(&proxy).await;
                    tokio::time::sleep(self.timing.poll_idle()).await;
                }
                Err(e) => {
                    warn!(peer = %proxy.label, error = %e, "lost contact, salvaging");
                    self.unregister_space(&proxy).await;
                    proxy.salvage_into(&self.ready).await;
                    break;
                }
            }
        }
        debug!(peer = %proxy.label, "receive loop stopped");
    }

    async fn process_outcome(&self, proxy: &Arc<PeerProxy<P>>, outcome: Outcome<P>) {
        match outcome {
            Outcome::Value {
                task_id,
                target,
                value,
                coarse,
                started,
                finished,
            } => match target {
                Target::Final { root } => self.dispatch_result(root, value).await,
                Target::Join { id, slot } => {
                    match self.successors.fill(&id, slot, value).await {
                        Ok(JoinFill::Runnable(join)) => self.ready.push(join).await,
                        Ok(JoinFill::Pending) => {}
                        Ok(JoinFill::Unknown { value }) => {
                            debug!(join = %id, "holding a result for an unregistered join");
                            self.holding
                                .push(Outcome::Value {
                                    task_id,
                                    target: Target::Join { id, slot },
                                    value,
                                    coarse,
                                    started,
                                    finished,
                                })
                                .await;
                        }
                        Err(e) => {
                            error!(join = %id, error = %e, "discarding a malformed result");
                        }
                    }
                }
            },
            Outcome::Spawn {
                join,
                children,
                retained,
                ..
            } => {
                if join.is_runnable() {
                    self.ready.push(join).await;
                } else {
                    self.successors.register(join).await;
                }
                for child in children {
                    if retained.contains(&child.id) {
                        proxy.track(child).await;
                    } else {
                        self.ready.push(child).await;
                    }
                }
            }
        }
    }

    /// One pass over the holding queue. Values whose join is still
    /// missing go back on it.
    async fn retry_held(&self, proxy: &Arc<PeerProxy<P>>) {
        let held = self.holding.len().await;
        for _ in 0..held {
            match self.holding.try_take().await {
                Some(outcome) => self.process_outcome(proxy, outcome).await,
                None => break,
            }
        }
    }

    /// Route a finished job's value to the gateway in its lineage.
    async fn dispatch_result(&self, root: TaskId, value: P::Value) {
        let Some(node) = root.gateway_node() else {
            warn!(task = %root, "finished job has no gateway in its lineage");
            return;
        };
        let gateway = self.gateways.lock().await.get(&node).cloned();
        match gateway {
            Some(gw) => {
                info!(task = %root, gateway = node, "job finished");
                gw.results.push((root, value)).await;
            }
            None => warn!(task = %root, gateway = node, "no registered gateway for a finished job"),
        }
    }

    /// Pull client-submitted root tasks from one gateway.
    async fn gateway_pull_loop(self: Arc<Self>, proxy: Arc<GatewayProxy<P>>) {
        let mut shutdown = self.shutdown_rx.clone();
        loop {
            if proxy.is_retired() {
                break;
            }
            let polled = tokio::select! {
                _ = shutdown.changed() => break,
                polled = proxy.link.poll_task() => polled,
            };
            match polled {
                Ok(Some(task)) => {
                    debug!(task = %task.id, gateway = proxy.node, "root task accepted");
                    self.ready.push(task).await;
                }
                Ok(None) => tokio::time::sleep(self.timing.poll_idle()).await,
                Err(e) => {
                    warn!(peer = %proxy.label, error = %e, "lost contact with gateway");
                    self.drop_gateway(&proxy).await;
                    break;
                }
            }
        }
        debug!(peer = %proxy.label, "pull loop stopped");
    }

    /// Push finished values out to one gateway.
    async fn gateway_push_loop(self: Arc<Self>, proxy: Arc<GatewayProxy<P>>) {
        let mut shutdown = self.shutdown_rx.clone();
        loop {
            if proxy.is_retired() {
                break;
            }
            let (root, value) = tokio::select! {
                _ = shutdown.changed() => break,
                next = proxy.results.take() => next,
            };
            if let Err(e) = proxy.link.deliver(root.clone(), value).await {
                warn!(task = %root, error = %e, "discarding an undeliverable result");
                self.drop_gateway(&proxy).await;
                break;
            }
        }
        debug!(peer = %proxy.label, "push loop stopped");
    }

    /// Restore state from the configured checkpoint, if one exists.
    /// Anything unreadable degrades to a cold start.
    pub async fn recover_from_checkpoint(&self) {
        let Some(path) = &self.checkpoint_path else {
            return;
        };
        if !path.exists() {
            info!(path = %path.display(), "no checkpoint found, cold start");
            return;
        }
        match snapshot::read::<P>(path) {
            Ok(snap) => {
                let restored = snap.ready.len()
                    + snap.running.len()
                    + snap.successors.len()
                    + snap.holding.len();
                self.successors.restore(snap.successors).await;
                for task in snap.ready {
                    self.ready.push(task).await;
                }
                // Owed tasks go back to dispatch; their peers did not
                // survive the restart.
                for task in snap.running {
                    self.ready.push(task).await;
                }
                for outcome in snap.holding {
                    self.holding.push(outcome).await;
                }
                info!(taken_at = %snap.taken_at, restored, "recovered state from checkpoint");
            }
            Err(e) => warn!(error = %e, "checkpoint unreadable, cold start"),
        }
    }

    /// Write one snapshot now.
    pub async fn write_checkpoint(&self) -> Result<(), EngineError> {
        let Some(path) = &self.checkpoint_path else {
            return Ok(());
        };
        let mut running = Vec::new();
        for proxy in self.spaces.lock().await.values() {
            running.extend(proxy.running_snapshot().await);
        }
        let snap = UniverseSnapshot {
            taken_at: Utc::now(),
            ready: self.ready.snapshot().await,
            successors: self.successors.snapshot().await,
            holding: self.holding.snapshot().await,
            running,
        };
        snapshot::write(path, &snap)
    }

    /// Start the periodic checkpoint task. Returns `None` when no
    /// checkpoint path is configured.
    pub fn start_checkpointing(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        self.checkpoint_path.as_ref()?;
        let period = Duration::from_secs(self.checkpoint_secs);
        let universe = self.clone();
        Some(tokio::spawn(async move {
            let mut shutdown = universe.shutdown_rx.clone();
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = tokio::time::sleep(period) => {
                        if let Err(e) = universe.write_checkpoint().await {
                            warn!(error = %e, "checkpoint failed");
                        }
                    }
                }
            }
        }))
    }

    /// Answer node-service requests until shutdown.
    pub async fn serve(self: Arc<Self>, server: RpcServer) -> Result<(), EngineError> {
        let server = Arc::new(server);
        let mut shutdown = self.shutdown_rx.clone();
        loop {
            tokio::select! {
                _ = shutdown.changed() => return Ok(()),
                next = server.recv_request() => {
                    let (token, msg) = next?;
                    let universe = self.clone();
                    let server = server.clone();
                    tokio::spawn(async move {
                        if let Err(e) = universe.handle(server, token, msg).await {
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
        let request: NodeRequest<P> = msg.decode().map_err(WireError::from)?;
        let response: NodeResponse<P> = match request {
            NodeRequest::Hello {
                peer,
                node,
                endpoint,
            } => {
                let timeout = self.timing.request_timeout();
                match peer {
                    PeerKind::Space => {
                        match RemoteLink::connect(format!("space-{node}"), &endpoint, timeout).await
                        {
                            Ok(link) => {
                                self.register_space(node, Arc::new(link)).await;
                                NodeResponse::Ack
                            }
                            Err(e) => NodeResponse::Error(format!("cannot reach {endpoint}: {e}")),
                        }
                    }
                    PeerKind::Gateway => {
                        match RemoteLink::connect(format!("gateway-{node}"), &endpoint, timeout)
                            .await
                        {
                            Ok(link) => {
                                self.register_gateway(node, Arc::new(link)).await;
                                NodeResponse::Ack
                            }
                            Err(e) => NodeResponse::Error(format!("cannot reach {endpoint}: {e}")),
                        }
                    }
                    PeerKind::Computer => {
                        NodeResponse::Error("computers register with a space".to_string())
                    }
                }
            }
            NodeRequest::AddTask { task } => {
                self.ready.push(task).await;
                NodeResponse::Ack
            }
            NodeRequest::IsBusy => NodeResponse::Busy(false),
            NodeRequest::Exit => {
                self.exit();
                NodeResponse::Ack
            }
            _ => NodeResponse::Error("unsupported request for the universe".to_string()),
        };
        let reply = Message::reply(&msg, &response).map_err(WireError::from)?;
        server.send_reply(token, reply).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::time::Duration;

    use async_trait::async_trait;
    use kosmos_core::{Body, Fibonacci};
    use tokio::sync::mpsc;

    use crate::config::KosmosConfig;

    use super::*;

    struct ScriptedSpace {
        received: mpsc::UnboundedSender<Task<Fibonacci>>,
        outcomes: Mutex<VecDeque<Outcome<Fibonacci>>>,
    }

    impl ScriptedSpace {
        fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Task<Fibonacci>>) {
            let (tx, rx) = mpsc::unbounded_channel();
            (
                Arc::new(Self {
                    received: tx,
                    outcomes: Mutex::new(VecDeque::new()),
                }),
                rx,
            )
        }

        async fn script(&self, outcome: Outcome<Fibonacci>) {
            self.outcomes.lock().await.push_back(outcome);
        }
    }

    #[async_trait]
    impl PeerLink<Fibonacci> for Arc<ScriptedSpace> {
        fn label(&self) -> &str {
            "scripted-space"
        }

        async fn add_task(&self, task: Task<Fibonacci>) -> Result<(), EngineError> {
            let _ = self.received.send(task);
            Ok(())
        }

        async fn poll_result(&self) -> Result<Option<Outcome<Fibonacci>>, EngineError> {
            Ok(self.outcomes.lock().await.pop_front())
        }

        async fn is_busy(&self) -> Result<bool, EngineError> {
            Ok(false)
        }

        async fn exit(&self) -> Result<(), EngineError> {
            Ok(())
        }
    }

    struct RecordingGateway {
        tasks: Mutex<VecDeque<Task<Fibonacci>>>,
        delivered: mpsc::UnboundedSender<(TaskId, u64)>,
    }

    impl RecordingGateway {
        fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<(TaskId, u64)>) {
            let (tx, rx) = mpsc::unbounded_channel();
            (
                Arc::new(Self {
                    tasks: Mutex::new(VecDeque::new()),
                    delivered: tx,
                }),
                rx,
            )
        }

        async fn submit(&self, task: Task<Fibonacci>) {
            self.tasks.lock().await.push_back(task);
        }
    }

    #[async_trait]
    impl GatewayLink<Fibonacci> for Arc<RecordingGateway> {
        fn label(&self) -> &str {
            "recording-gateway"
        }

        async fn poll_task(&self) -> Result<Option<Task<Fibonacci>>, EngineError> {
            Ok(self.tasks.lock().await.pop_front())
        }

        async fn deliver(&self, root: TaskId, value: u64) -> Result<(), EngineError> {
            let _ = self.delivered.send((root, value));
            Ok(())
        }
    }

    fn test_universe() -> Arc<Universe<Fibonacci>> {
        let config = KosmosConfig::local();
        Universe::new(
            Fibonacci::default(),
            &config.universe,
            config.timing.clone(),
        )
    }

    fn root_task(seq: u64, n: u64) -> Task<Fibonacci> {
        let id = TaskId::root(Segment::Client {
            name: "t".to_string(),
            seq,
        })
        .child(Segment::Gateway { node: 0, seq });
        Task::root(id, n)
    }

    #[tokio::test]
    async fn root_tasks_flow_from_gateway_to_space_with_a_tag() {
        let universe = test_universe();
        let (gw, _delivered) = RecordingGateway::new();
        let (space, mut received) = ScriptedSpace::new();
        universe.register_gateway(0, Arc::new(gw.clone())).await;
        universe.register_space(1, Arc::new(space)).await;

        gw.submit(root_task(1, 10)).await;
        let handed = tokio::time::timeout(Duration::from_secs(5), received.recv())
            .await
            .expect("dispatch timed out")
            .expect("link closed");
        assert_eq!(handed.id.last_rank(), Rank::Space);
        universe.exit();
    }

    #[tokio::test]
    async fn final_values_reach_the_right_gateway() {
        let universe = test_universe();
        let (gw, mut delivered) = RecordingGateway::new();
        let (space, _received) = ScriptedSpace::new();
        universe.register_gateway(0, Arc::new(gw)).await;
        universe.register_space(1, Arc::new(space.clone())).await;

        let root = root_task(2, 1);
        space
            .script(Outcome::Value {
                task_id: root.id.clone().child(Segment::Space { node: 1, seq: 0 }),
                target: Target::Final {
                    root: root.id.clone(),
                },
                value: 1,
                coarse: true,
                started: Utc::now(),
                finished: Utc::now(),
            })
            .await;

        let (delivered_root, value) =
            tokio::time::timeout(Duration::from_secs(5), delivered.recv())
                .await
                .expect("delivery timed out")
                .expect("channel closed");
        assert_eq!(delivered_root, root.id);
        assert_eq!(value, 1);
        universe.exit();
    }

    #[tokio::test]
    async fn early_values_wait_for_their_join_to_register() {
        let universe = test_universe();
        let (space, _received) = ScriptedSpace::new();
        universe.register_space(1, Arc::new(space.clone())).await;

        // Build a coarse split by hand: a join and two slotted children.
        let parent = root_task(3, 10);
        let mut seq = 0u64;
        let spawn = parent
            .clone()
            .execute(&Fibonacci::default(), || {
                seq += 1;
                Segment::Worker {
                    computer: 1,
                    worker: 0,
                    seq,
                }
            })
            .unwrap();
        let (join, children) = match spawn {
            Outcome::Spawn { join, children, .. } => (join, children),
            _ => panic!("fib(10) should split"),
        };

        // A child's value arrives before the spawn that made its join.
        space
            .script(Outcome::Value {
                task_id: children[0].id.clone(),
                target: children[0].target.clone(),
                value: 34,
                coarse: true,
                started: Utc::now(),
                finished: Utc::now(),
            })
            .await;
        tokio::time::timeout(Duration::from_secs(5), async {
            while universe.held_results().await == 0 {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("value was never held");

        // Now the spawn shows up; the held value fills the join.
        space
            .script(Outcome::Spawn {
                task_id: parent.id.clone(),
                join: join.clone(),
                children,
                retained: vec![],
                coarse: true,
                started: Utc::now(),
                finished: Utc::now(),
            })
            .await;
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if universe.held_results().await == 0 && universe.pending_joins().await == 1 {
                    let parked = universe.successors.snapshot().await;
                    if let Body::Join { slots } = &parked[0].body {
                        if slots[0].is_some() {
                            return;
                        }
                    }
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("held value never filled the join");
        universe.exit();
    }

    #[tokio::test]
    async fn losing_a_gateway_purges_its_queued_tasks() {
        let universe = test_universe();
        let (gw, _delivered) = RecordingGateway::new();
        universe.register_gateway(0, Arc::new(gw.clone())).await;

        // Queue tasks directly; no space is registered, so they sit.
        gw.submit(root_task(4, 10)).await;
        gw.submit(root_task(5, 11)).await;
        tokio::time::timeout(Duration::from_secs(5), async {
            while universe.backlog().await < 2 {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("tasks never queued");

        let proxy = universe.gateways.lock().await.get(&0).cloned().unwrap();
        universe.drop_gateway(&proxy).await;
        assert_eq!(universe.backlog().await, 0);
        assert_eq!(universe.gateway_count().await, 0);
        universe.exit();
    }

    #[tokio::test]
    async fn checkpoints_capture_and_restore_the_backlog() {
        let path = std::env::temp_dir().join(format!(
            "kosmos-universe-ckpt-{}.bin",
            std::process::id()
        ));
        let mut config = KosmosConfig::local();
        config.universe.checkpoint_path = Some(path.display().to_string());

        let universe = Universe::new(
            Fibonacci::default(),
            &config.universe,
            config.timing.clone(),
        );
        universe.ready.push(root_task(6, 12)).await;
        universe.ready.push(root_task(7, 13)).await;
        universe.write_checkpoint().await.unwrap();

        let reborn = Universe::new(
            Fibonacci::default(),
            &config.universe,
            config.timing.clone(),
        );
        reborn.recover_from_checkpoint().await;
        assert_eq!(reborn.backlog().await, 2);

        // A corrupt file falls back to a cold start.
        std::fs::write(&path, b"garbage").unwrap();
        let cold = Universe::new(
            Fibonacci::default(),
            &config.universe,
            config.timing.clone(),
        );
        cold.recover_from_checkpoint().await;
        assert_eq!(cold.backlog().await, 0);
        std::fs::remove_file(&path).unwrap();
    }
}
