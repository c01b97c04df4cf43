//! Space: the mid-tier dispatcher.
//!
//! A space feeds registered computers from its ready queue and polls
//! them for outcomes. Fine-grained results are settled here against the
//! local successor map; coarse results are passed straight up to the
//! universe with the dispatch tag this space added stripped back off.
//! Results whose join is parked elsewhere travel up too, since only the
//! universe sees the whole picture.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use kosmos_core::{Outcome, Problem, Rank, Segment, Target, Task, TaskId};
use kosmos_wire::{
    Message, NodeRequest, NodeResponse, PeerKind, ReplyToken, RpcServer, Transport, WireError,
};
use tokio::sync::{Mutex, watch};
use tracing::{debug, error, info, warn};

use crate::config::{SpaceConfig, TimingConfig};
use crate::error::EngineError;
use crate::link::{PeerLink, RemoteLink};
use crate::proxy::PeerProxy;
use crate::store::{JoinFill, SuccessorMap, TaskQueue};

pub struct Space<P: Problem> {
    problem: P,
    node: u32,
    direct_execute: bool,
    timing: TimingConfig,
    ready: TaskQueue<Task<P>>,
    successors: SuccessorMap<P>,
    /// Outcomes bound for the universe, drained by its polls.
    outbox: TaskQueue<Outcome<P>>,
    computers: Mutex<IndexMap<u32, Arc<PeerProxy<P>>>>,
    seq: AtomicU64,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl<P: Problem> Space<P> {
    pub fn new(problem: P, config: &SpaceConfig, timing: TimingConfig) -> Arc<Self> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Arc::new(Self {
            problem,
            node: config.node,
            direct_execute: config.direct_execute,
            timing,
            ready: TaskQueue::unbounded(),
            successors: SuccessorMap::new(),
            outbox: TaskQueue::unbounded(),
            computers: Mutex::new(IndexMap::new()),
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

    /// Adopt a computer and start its dispatch and poll loops. A second
    /// registration under the same node number replaces the first,
    /// salvaging whatever the old incarnation still owed.
    pub async fn register_computer(self: &Arc<Self>, node: u32, link: Arc<dyn PeerLink<P>>) {
        let proxy = Arc::new(PeerProxy::new(format!("computer-{node}"), node, link));
        let old = self.computers.lock().await.insert(node, proxy.clone());
        if let Some(old) = old {
            old.salvage_into(&self.ready).await;
        }
        info!(space = self.node, computer = node, "computer registered");
        let space = self.clone();
        let peer = proxy.clone();
        tokio::spawn(async move { space.send_loop(peer).await });
        let space = self.clone();
        tokio::spawn(async move { space.receive_loop(proxy).await });
    }

    async fn unregister_computer(&self, proxy: &Arc<PeerProxy<P>>) {
        let mut computers = self.computers.lock().await;
        if let Some(current) = computers.get(&proxy.node) {
            if Arc::ptr_eq(current, proxy) {
                computers.shift_remove(&proxy.node);
            }
        }
    }

    pub async fn peer_count(&self) -> usize {
        self.computers.lock().await.len()
    }

    pub async fn pending_joins(&self) -> usize {
        self.successors.len().await
    }

    pub async fn backlog(&self) -> usize {
        self.ready.len().await
    }

    /// Accept a task from the universe.
    pub async fn add_task(&self, task: Task<P>) {
        self.ready.push(task).await;
    }

    /// Hand the universe the next outcome bound upward, if any.
    pub async fn poll_result(&self) -> Option<Outcome<P>> {
        self.outbox.try_take().await
    }

    pub fn exit(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Feed one computer from the ready queue.
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
            if !self.gate_on_busy(&proxy, &task).await {
                break;
            }
            if self.dispatch(&proxy, task).await.is_err() {
                break;
            }
        }
        debug!(space = self.node, peer = %proxy.label, "send loop stopped");
    }

    /// Wait for the peer to report not-busy. On a dead peer the taken
    /// task goes back on the queue and the loop ends.
    async fn gate_on_busy(&self, proxy: &Arc<PeerProxy<P>>, task: &Task<P>) -> bool {
        loop {
            if proxy.is_retired() {
                self.ready.push(task.clone()).await;
                return false;
            }
            match proxy.link.is_busy().await {
                Ok(false) => return true,
                Ok(true) => tokio::time::sleep(self.timing.send_retry()).await,
                Err(e) => {
                    warn!(peer = %proxy.label, error = %e, "busy probe failed, requeueing task");
                    self.ready.push(task.clone()).await;
                    return false;
                }
            }
        }
    }

    /// Tag, track and hand one task to the peer. The tag names this
    /// dispatch so the echoed outcome can be matched back; a task that
    /// already carries a tag of this tier's rank was salvaged and keeps
    /// the old one.
    async fn dispatch(&self, proxy: &Arc<PeerProxy<P>>, task: Task<P>) -> Result<(), ()> {
        let untagged = task.clone();
        let mut task = task;
        if task.id.last_rank() != Rank::Computer {
            task.id.push(Segment::Computer {
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
            return Err(());
        }
        Ok(())
    }

    /// Poll one computer for outcomes and settle them.
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
                }
                Ok(None) => tokio::time::sleep(self.timing.poll_idle()).await,
                Err(e) => {
                    warn!(peer = %proxy.label, error = %e, "lost contact, salvaging");
                    self.unregister_computer(&proxy).await;
                    proxy.salvage_into(&self.ready).await;
                    break;
                }
            }
        }
        debug!(space = self.node, peer = %proxy.label, "receive loop stopped");
    }

    async fn process_outcome(&self, proxy: &Arc<PeerProxy<P>>, outcome: Outcome<P>) {
        if outcome.is_coarse() {
            // Coarse work is settled at the universe. Strip the dispatch
            // tag this space added so the universe recognizes the echo.
            let mut outcome = outcome;
            outcome.truncate_task_id(Rank::Space);
            self.outbox.push(outcome).await;
            return;
        }
        match outcome {
            Outcome::Value {
                task_id,
                target,
                value,
                coarse,
                started,
                finished,
            } => {
                self.settle_value(task_id, target, value, coarse, started, finished)
                    .await
            }
            Outcome::Spawn {
                join,
                children,
                retained,
                ..
            } => {
                if join.is_runnable() {
                    self.successor_to_ready(join).await;
                } else {
                    self.successors.register(join).await;
                }
                for child in children {
                    if retained.contains(&child.id) {
                        // The worker kept this child; it stays on the
                        // peer's ledger until its own result echoes back.
                        proxy.track(child).await;
                    } else {
                        self.ready.push(child).await;
                    }
                }
            }
        }
    }

    /// Route a fine-grained value: fill a local join, or pass it up when
    /// the join lives at the universe.
    async fn settle_value(
        &self,
        task_id: TaskId,
        target: Target,
        value: P::Value,
        coarse: bool,
        started: DateTime<Utc>,
        finished: DateTime<Utc>,
    ) {
        match target {
            Target::Final { root } => {
                self.outbox
                    .push(Outcome::Value {
                        task_id,
                        target: Target::Final { root },
                        value,
                        coarse,
                        started,
                        finished,
                    })
                    .await;
            }
            Target::Join { id, slot } => match self.successors.fill(&id, slot, value).await {
                Ok(JoinFill::Runnable(join)) => self.successor_to_ready(join).await,
                Ok(JoinFill::Pending) => {}
                Ok(JoinFill::Unknown { value }) => {
                    self.outbox
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
            },
        }
    }

    /// A join whose last argument just arrived. Run it here when direct
    /// execution is on and the problem allows it, otherwise queue it for
    /// a computer.
    async fn successor_to_ready(&self, join: Task<P>) {
        if self.direct_execute && self.problem.space_runnable_joins() {
            self.run_join_chain(join).await;
        } else {
            self.ready.push(join).await;
        }
    }

    /// Execute a runnable join and chase the chain: its value may
    /// complete the next local join, which runs here too, until the
    /// chain parks or leaves for the universe.
    async fn run_join_chain(&self, mut join: Task<P>) {
        loop {
            let outcome = join.execute(&self.problem, || Segment::Space {
                node: self.node,
                seq: self.next_seq(),
            });
            let (task_id, target, value, coarse, started, finished) = match outcome {
                Ok(Outcome::Value {
                    task_id,
                    target,
                    value,
                    coarse,
                    started,
                    finished,
                }) => (task_id, target, value, coarse, started, finished),
                Ok(Outcome::Spawn { task_id, .. }) => {
                    error!(task = %task_id, "a join produced a spawn");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "join execution failed");
                    break;
                }
            };
            match target {
                Target::Final { root } => {
                    self.outbox
                        .push(Outcome::Value {
                            task_id,
                            target: Target::Final { root },
                            value,
                            coarse,
                            started,
                            finished,
                        })
                        .await;
                    break;
                }
                Target::Join { id, slot } => {
                    join = match self.successors.fill(&id, slot, value).await {
                        Ok(JoinFill::Runnable(next)) => next,
                        Ok(JoinFill::Pending) => break,
                        Ok(JoinFill::Unknown { value }) => {
                            self.outbox
                                .push(Outcome::Value {
                                    task_id,
                                    target: Target::Join { id, slot },
                                    value,
                                    coarse,
                                    started,
                                    finished,
                                })
                                .await;
                            break;
                        }
                        Err(e) => {
                            error!(join = %id, error = %e, "discarding a malformed result");
                            break;
                        }
                    };
                }
            }
        }
    }

    /// Announce this space to its universe so the universe links back.
    pub async fn register_with_universe(
        &self,
        universe: &Transport,
        listen: Transport,
    ) -> Result<(), EngineError> {
        let link = RemoteLink::connect("universe", universe, self.timing.request_timeout()).await?;
        link.hello::<P>(PeerKind::Space, self.node, listen).await?;
        info!(space = self.node, universe = %universe, "registered with universe");
        Ok(())
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
                    let space = self.clone();
                    let server = server.clone();
                    tokio::spawn(async move {
                        if let Err(e) = space.handle(server, token, msg).await {
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
                peer: PeerKind::Computer,
                node,
                endpoint,
            } => {
                let label = format!("computer-{node}");
                match RemoteLink::connect(label, &endpoint, self.timing.request_timeout()).await {
                    Ok(link) => {
                        self.register_computer(node, Arc::new(link)).await;
                        NodeResponse::Ack
                    }
                    Err(e) => NodeResponse::Error(format!("cannot reach {endpoint}: {e}")),
                }
            }
            NodeRequest::Hello { peer, .. } => {
                NodeResponse::Error(format!("a space cannot adopt a {peer}"))
            }
            NodeRequest::AddTask { task } => {
                self.add_task(task).await;
                NodeResponse::Ack
            }
            NodeRequest::PollResult => NodeResponse::Outcome(self.poll_result().await),
            NodeRequest::IsBusy => NodeResponse::Busy(false),
            NodeRequest::Exit => {
                self.exit();
                NodeResponse::Ack
            }
            _ => NodeResponse::Error("unsupported request for a space".to_string()),
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
    use kosmos_core::{Body, Fibonacci, TaskId};
    use tokio::sync::mpsc;

    use super::*;

    /// A fake computer: records what it is handed, plays back scripted
    /// outcomes, and can be told to fail.
    struct ScriptedLink {
        received: mpsc::UnboundedSender<Task<Fibonacci>>,
        outcomes: Mutex<VecDeque<Outcome<Fibonacci>>>,
        fail: std::sync::atomic::AtomicBool,
    }

    impl ScriptedLink {
        fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Task<Fibonacci>>) {
            let (tx, rx) = mpsc::unbounded_channel();
            (
                Arc::new(Self {
                    received: tx,
                    outcomes: Mutex::new(VecDeque::new()),
                    fail: std::sync::atomic::AtomicBool::new(false),
                }),
                rx,
            )
        }

        async fn script(&self, outcome: Outcome<Fibonacci>) {
            self.outcomes.lock().await.push_back(outcome);
        }

        fn kill(&self) {
            self.fail.store(true, Ordering::SeqCst);
        }

        fn dead(&self) -> bool {
            self.fail.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PeerLink<Fibonacci> for Arc<ScriptedLink> {
        fn label(&self) -> &str {
            "scripted"
        }

        async fn add_task(&self, task: Task<Fibonacci>) -> Result<(), EngineError> {
            if self.dead() {
                return Err(EngineError::Peer("down".to_string()));
            }
            let _ = self.received.send(task);
            Ok(())
        }

        async fn poll_result(&self) -> Result<Option<Outcome<Fibonacci>>, EngineError> {
            if self.dead() {
                return Err(EngineError::Peer("down".to_string()));
            }
            Ok(self.outcomes.lock().await.pop_front())
        }

        async fn is_busy(&self) -> Result<bool, EngineError> {
            if self.dead() {
                return Err(EngineError::Peer("down".to_string()));
            }
            Ok(false)
        }

        async fn exit(&self) -> Result<(), EngineError> {
            Ok(())
        }
    }

    fn fib(n: u64) -> u64 {
        if n < 2 { n } else { fib(n - 1) + fib(n - 2) }
    }

    fn test_space(direct_execute: bool) -> Arc<Space<Fibonacci>> {
        let config = SpaceConfig {
            node: 1,
            direct_execute,
            ..SpaceConfig::default()
        };
        Space::new(Fibonacci::default(), &config, TimingConfig::default())
    }

    fn fine_task(n: u64, layer: u32) -> Task<Fibonacci> {
        let id = TaskId::root(Segment::Client {
            name: "t".to_string(),
            seq: 1,
        })
        .child(Segment::Space { node: 1, seq: 0 });
        let mut task = Task::root(id, n);
        task.layer = layer;
        task
    }

    async fn next_up(space: &Arc<Space<Fibonacci>>) -> Outcome<Fibonacci> {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(outcome) = space.poll_result().await {
                    return outcome;
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("space sent nothing upward in time")
    }

    #[tokio::test]
    async fn dispatch_tags_tasks_with_a_computer_segment() {
        let space = test_space(false);
        let (link, mut received) = ScriptedLink::new();
        space.register_computer(3, Arc::new(link)).await;

        space.add_task(fine_task(9, 5)).await;
        let handed = tokio::time::timeout(Duration::from_secs(5), received.recv())
            .await
            .expect("dispatch timed out")
            .expect("link closed");
        assert_eq!(handed.id.last_rank(), Rank::Computer);
        space.exit();
    }

    #[tokio::test]
    async fn salvaged_tasks_keep_their_tag_and_requeue() {
        let space = test_space(false);
        let (link, mut received) = ScriptedLink::new();
        space.register_computer(3, Arc::new(link.clone())).await;

        space.add_task(fine_task(9, 5)).await;
        let handed = received.recv().await.expect("link closed");
        link.kill();

        // The poll loop notices, salvages, and drops the peer.
        tokio::time::timeout(Duration::from_secs(5), async {
            while space.peer_count().await > 0 {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("peer was never dropped");
        assert_eq!(space.backlog().await, 1);

        // A replacement peer receives the salvaged task, tag intact.
        let (fresh, mut fresh_received) = ScriptedLink::new();
        space.register_computer(4, Arc::new(fresh)).await;
        let requeued = tokio::time::timeout(Duration::from_secs(5), fresh_received.recv())
            .await
            .expect("redispatch timed out")
            .expect("link closed");
        assert_eq!(requeued.id, handed.id);
        space.exit();
    }

    #[tokio::test]
    async fn coarse_outcomes_travel_up_with_the_tag_stripped() {
        let space = test_space(false);
        let (link, mut received) = ScriptedLink::new();
        space.register_computer(3, Arc::new(link.clone())).await;

        space.add_task(fine_task(1, 0)).await;
        let handed = received.recv().await.expect("link closed");
        let value = Outcome::Value {
            task_id: handed.id.clone(),
            target: handed.target.clone(),
            value: 1,
            coarse: true,
            started: Utc::now(),
            finished: Utc::now(),
        };
        link.script(value).await;

        let up = next_up(&space).await;
        assert_eq!(up.task_id().last_rank(), Rank::Space);
        assert_eq!(
            up.task_id().segments().len(),
            handed.id.segments().len() - 1
        );
        space.exit();
    }

    #[tokio::test]
    async fn values_for_joins_parked_elsewhere_travel_up() {
        let space = test_space(false);
        let (link, _received) = ScriptedLink::new();
        space.register_computer(3, Arc::new(link.clone())).await;

        let stranger = TaskId::root(Segment::Client {
            name: "t".to_string(),
            seq: 9,
        });
        let value = Outcome::Value {
            task_id: stranger.child(Segment::Worker {
                computer: 3,
                worker: 0,
                seq: 0,
            }),
            target: Target::Join {
                id: stranger.clone(),
                slot: 0,
            },
            value: 21,
            coarse: false,
            started: Utc::now(),
            finished: Utc::now(),
        };
        link.script(value).await;

        let up = next_up(&space).await;
        match up {
            Outcome::Value { target, value, .. } => {
                assert_eq!(target, Target::Join { id: stranger, slot: 0 });
                assert_eq!(value, 21);
            }
            other => panic!("expected a value, got {other:?}"),
        }
        space.exit();
    }

    #[tokio::test]
    async fn direct_execution_settles_a_join_chain_locally() {
        let space = test_space(true);
        let (link, mut received) = ScriptedLink::new();
        space.register_computer(3, Arc::new(link.clone())).await;

        // A computer splits a fine task; the space parks the join and
        // dispatches both children.
        space.add_task(fine_task(3, 5)).await;
        let handed = received.recv().await.expect("link closed");
        let mut seq = 0u64;
        let spawn = handed
            .clone()
            .execute(&Fibonacci::default(), || {
                seq += 1;
                Segment::Worker {
                    computer: 3,
                    worker: 0,
                    seq,
                }
            })
            .unwrap();
        let (join_id, children) = match &spawn {
            Outcome::Spawn { join, children, .. } => (join.id.clone(), children.clone()),
            _ => panic!("fib(3) should split"),
        };
        link.script(spawn).await;
        assert_eq!(children.len(), 2);

        // The children come back as dispatched tasks; answer each with
        // its fibonacci value.
        for _ in 0..2 {
            let child = received.recv().await.expect("link closed");
            let n = match &child.body {
                Body::Decompose { input } => *input,
                _ => panic!("children are decomposes"),
            };
            link.script(Outcome::Value {
                task_id: child.id.clone(),
                target: child.target.clone(),
                value: fib(n),
                coarse: false,
                started: Utc::now(),
                finished: Utc::now(),
            })
            .await;
        }

        // The space runs the completed join itself and, with the join's
        // own target parked at the universe, sends its value upward.
        let up = next_up(&space).await;
        match up {
            Outcome::Value { task_id, value, .. } => {
                assert_eq!(task_id, join_id);
                assert_eq!(value, 2);
            }
            other => panic!("expected the join's value, got {other:?}"),
        }
        assert_eq!(space.pending_joins().await, 0);
        space.exit();
    }
}
