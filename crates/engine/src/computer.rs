//! Computer: the worker host at the bottom tier.
//!
//! A computer pulls tasks from its bounded ready queue with a pool of
//! workers, executes them against the problem, and parks every outcome
//! in an outbox for its space to poll. Splits of fine-grained tasks may
//! keep a few children on the local queue per the retention policy;
//! those children are still reported upward inside the spawn outcome so
//! the space can track and, if need be, salvage them.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use kosmos_core::{Outcome, Problem, Segment, Task};
use kosmos_wire::{
    Message, NodeRequest, NodeResponse, PeerKind, ReplyToken, RpcServer, Transport, WireError,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::{ComputerConfig, TimingConfig};
use crate::error::EngineError;
use crate::link::RemoteLink;
use crate::policy::{FixedRetention, RetentionPolicy};
use crate::store::TaskQueue;

pub struct Computer<P: Problem> {
    problem: P,
    node: u32,
    workers: usize,
    workload: usize,
    retention: Arc<dyn RetentionPolicy>,
    ready: TaskQueue<Task<P>>,
    outbox: TaskQueue<Outcome<P>>,
    seq: AtomicU64,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl<P: Problem> Computer<P> {
    /// Build a computer with the config's fixed retention count.
    pub fn new(problem: P, config: &ComputerConfig) -> Arc<Self> {
        let retain = config.retain;
        Self::with_retention(problem, config, Arc::new(FixedRetention(retain)))
    }

    /// Build a computer with a caller-supplied retention policy.
    pub fn with_retention(
        problem: P,
        config: &ComputerConfig,
        retention: Arc<dyn RetentionPolicy>,
    ) -> Arc<Self> {
        let workers = if config.workers == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            config.workers
        };
        // With retention the queue needs slack for kept children; without
        // it one slot keeps the space feeding tasks at the rate workers
        // finish them.
        let capacity = if config.retain > 0 {
            32.max(config.retain + 1)
        } else {
            1
        };
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Arc::new(Self {
            problem,
            node: config.node,
            workers,
            workload: config.workload,
            retention,
            ready: TaskQueue::bounded(capacity),
            outbox: TaskQueue::unbounded(),
            seq: AtomicU64::new(0),
            shutdown_tx,
            shutdown_rx,
        })
    }

    pub fn node(&self) -> u32 {
        self.node
    }

    /// Start the worker pool.
    pub fn spawn_workers(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        (0..self.workers)
            .map(|worker| {
                let computer = self.clone();
                tokio::spawn(async move { computer.worker_loop(worker as u32).await })
            })
            .collect()
    }

    async fn worker_loop(self: Arc<Self>, worker: u32) {
        let mut shutdown = self.shutdown_rx.clone();
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                task = self.ready.take() => self.run_task(worker, task).await,
            }
        }
        debug!(computer = self.node, worker, "worker stopped");
    }

    async fn run_task(self: &Arc<Self>, worker: u32, task: Task<P>) {
        let id = task.id.clone();
        // Decompose and join work is CPU bound; keep it off the async
        // threads so polls stay responsive.
        let computer = self.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            task.execute(&computer.problem, || Segment::Worker {
                computer: computer.node,
                worker,
                seq: computer.seq.fetch_add(1, Ordering::Relaxed),
            })
        })
        .await;
        let mut outcome = match outcome {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                error!(task = %id, error = %e, "dropping a task that failed to execute");
                return;
            }
            Err(e) => {
                error!(task = %id, error = %e, "task execution panicked");
                return;
            }
        };
        debug!(
            computer = self.node,
            worker,
            task = %id,
            kind = outcome.kind(),
            elapsed_ms = outcome.elapsed().num_milliseconds(),
            "task executed"
        );

        let mut kept: Vec<Task<P>> = Vec::new();
        if let Outcome::Spawn {
            children,
            retained,
            coarse,
            ..
        } = &mut outcome
        {
            // Children of a coarse split belong at the universe; keeping
            // them here would hide them from its bookkeeping.
            if !*coarse {
                let keep = self.retention.retain(children.len());
                if keep > 0 && self.ready.try_reserve(keep).await {
                    let tail = children.len() - keep;
                    kept = children[tail..].to_vec();
                    *retained = kept.iter().map(|child| child.id.clone()).collect();
                }
            }
        }

        // The spawn ships before any retained child can finish, so the
        // space always learns of a join before results aimed at it.
        self.outbox.push(outcome).await;
        if !kept.is_empty() {
            self.ready.push_reserved(kept).await;
        }
    }

    /// Accept a task from the space. Waits for queue room when full.
    pub async fn add_task(&self, task: Task<P>) {
        self.ready.push(task).await;
    }

    /// Hand out the next finished outcome, if any.
    pub async fn poll_result(&self) -> Option<Outcome<P>> {
        self.outbox.try_take().await
    }

    /// Backlog deep enough that the space should pause dispatch.
    pub async fn is_busy(&self) -> bool {
        self.ready.len().await > self.workload * self.workers
    }

    /// Stop the worker pool and the serve loop.
    pub fn exit(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Announce this computer to its space so the space links back.
    pub async fn register_with_space(
        &self,
        space: &Transport,
        listen: Transport,
        timing: &TimingConfig,
    ) -> Result<(), EngineError> {
        let link = RemoteLink::connect("space", space, timing.request_timeout()).await?;
        link.hello::<P>(PeerKind::Computer, self.node, listen).await?;
        info!(computer = self.node, space = %space, "registered with space");
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
                    let computer = self.clone();
                    let server = server.clone();
                    tokio::spawn(async move {
                        if let Err(e) = computer.handle(server, token, msg).await {
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
            NodeRequest::AddTask { task } => {
                self.add_task(task).await;
                NodeResponse::Ack
            }
            NodeRequest::PollResult => NodeResponse::Outcome(self.poll_result().await),
            NodeRequest::IsBusy => NodeResponse::Busy(self.is_busy().await),
            NodeRequest::Exit => {
                self.exit();
                NodeResponse::Ack
            }
            _ => NodeResponse::Error("unsupported request for a computer".to_string()),
        };
        let reply = Message::reply(&msg, &response).map_err(WireError::from)?;
        server.send_reply(token, reply).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use kosmos_core::{Body, Fibonacci, Target, TaskId};

    use super::*;

    fn config(workers: usize, retain: usize) -> ComputerConfig {
        ComputerConfig {
            workers,
            retain,
            ..ComputerConfig::default()
        }
    }

    fn root_task(n: u64) -> Task<Fibonacci> {
        let id = TaskId::root(Segment::Client {
            name: "test".to_string(),
            seq: 1,
        });
        Task::root(id, n)
    }

    fn fine_task(n: u64, layer: u32) -> Task<Fibonacci> {
        let mut task = root_task(n);
        task.layer = layer;
        task
    }

    async fn next_outcome(computer: &Arc<Computer<Fibonacci>>) -> Outcome<Fibonacci> {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(outcome) = computer.poll_result().await {
                    return outcome;
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("computer produced no outcome in time")
    }

    #[tokio::test]
    async fn executes_an_atomic_task() {
        let computer = Computer::new(Fibonacci::default(), &config(1, 0));
        computer.spawn_workers();
        computer.add_task(root_task(1)).await;

        match next_outcome(&computer).await {
            Outcome::Value { value, coarse, target, .. } => {
                assert_eq!(value, 1);
                assert!(coarse);
                assert!(target.is_final());
            }
            other => panic!("expected a value, got {other:?}"),
        }
        computer.exit();
    }

    #[tokio::test]
    async fn splits_report_every_child_upward() {
        let computer = Computer::new(Fibonacci::default(), &config(1, 0));
        computer.spawn_workers();
        computer.add_task(root_task(7)).await;

        match next_outcome(&computer).await {
            Outcome::Spawn {
                join,
                children,
                retained,
                ..
            } => {
                assert_eq!(children.len(), 2);
                assert!(retained.is_empty());
                assert!(join.is_join());
                assert_eq!(join.missing_args(), 2);
            }
            other => panic!("expected a spawn, got {other:?}"),
        }
        computer.exit();
    }

    #[tokio::test]
    async fn retention_keeps_the_tail_child_and_runs_it_locally() {
        let computer = Computer::new(Fibonacci::default(), &config(1, 1));
        computer.spawn_workers();
        computer.add_task(fine_task(5, 10)).await;

        let retained = match next_outcome(&computer).await {
            Outcome::Spawn {
                children, retained, ..
            } => {
                assert_eq!(children.len(), 2);
                assert_eq!(retained.len(), 1);
                assert_eq!(retained[0], children[1].id);
                retained
            }
            other => panic!("expected a spawn, got {other:?}"),
        };

        // The kept child runs without anyone handing it back.
        let followup = next_outcome(&computer).await;
        assert_eq!(followup.task_id(), &retained[0]);
        computer.exit();
    }

    #[tokio::test]
    async fn coarse_splits_retain_nothing() {
        let computer = Computer::new(Fibonacci::default(), &config(1, 2));
        computer.spawn_workers();
        computer.add_task(root_task(10)).await;

        match next_outcome(&computer).await {
            Outcome::Spawn { retained, coarse, .. } => {
                assert!(coarse);
                assert!(retained.is_empty());
            }
            other => panic!("expected a spawn, got {other:?}"),
        }
        computer.exit();
    }

    #[tokio::test]
    async fn busy_reflects_the_backlog_threshold() {
        let mut cfg = config(1, 1);
        cfg.workload = 2;
        let computer = Computer::new(Fibonacci::default(), &cfg);
        // No workers: the queue only fills.
        computer.add_task(fine_task(3, 9)).await;
        computer.add_task(fine_task(4, 9)).await;
        assert!(!computer.is_busy().await);
        computer.add_task(fine_task(5, 9)).await;
        assert!(computer.is_busy().await);
    }

    #[tokio::test]
    async fn starved_joins_are_dropped_not_crashed() {
        let computer = Computer::new(Fibonacci::default(), &config(1, 0));
        computer.spawn_workers();
        let mut join = root_task(0);
        join.body = Body::Join {
            slots: vec![Some(1), None],
        };
        join.target = Target::Final {
            root: join.id.clone(),
        };
        computer.add_task(join).await;
        computer.add_task(root_task(0)).await;

        // Only the healthy task comes back.
        match next_outcome(&computer).await {
            Outcome::Value { value, .. } => assert_eq!(value, 0),
            other => panic!("expected a value, got {other:?}"),
        }
        assert!(computer.poll_result().await.is_none());
        computer.exit();
    }
}
