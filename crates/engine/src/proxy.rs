//! Per-peer state a tier keeps for each registered lower-tier node.
//!
//! The running map is the crash ledger: every task handed to the peer
//! (and every child a worker reported keeping for itself) stays in it
//! until the peer echoes a result for that exact id. If the peer dies,
//! whatever the map still holds goes back on the tier's ready queue.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use indexmap::IndexMap;
use kosmos_core::{Problem, Task, TaskId};
use tokio::sync::Mutex;
use tracing::info;

use crate::link::{GatewayLink, PeerLink};
use crate::store::TaskQueue;

/// A registered space or computer, as seen from the tier above it.
pub struct PeerProxy<P: Problem> {
    pub label: String,
    pub node: u32,
    pub link: Arc<dyn PeerLink<P>>,
    running: Mutex<IndexMap<TaskId, Task<P>>>,
    retired: AtomicBool,
}

impl<P: Problem> PeerProxy<P> {
    pub fn new(label: impl Into<String>, node: u32, link: Arc<dyn PeerLink<P>>) -> Self {
        Self {
            label: label.into(),
            node,
            link,
            running: Mutex::new(IndexMap::new()),
            retired: AtomicBool::new(false),
        }
    }

    /// Record a task as owed by this peer.
    pub async fn track(&self, task: Task<P>) {
        self.running.lock().await.insert(task.id.clone(), task);
    }

    /// Clear a task the peer has answered for.
    pub async fn untrack(&self, id: &TaskId) -> Option<Task<P>> {
        self.running.lock().await.shift_remove(id)
    }

    pub async fn running_len(&self) -> usize {
        self.running.lock().await.len()
    }

    /// Copy the owed tasks, oldest first.
    pub async fn running_snapshot(&self) -> Vec<Task<P>> {
        self.running.lock().await.values().cloned().collect()
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }

    /// Mark the peer dead. Returns `true` for exactly one caller.
    fn retire(&self) -> bool {
        !self.retired.swap(true, Ordering::SeqCst)
    }

    /// Retire the peer and move everything it still owed onto `ready`.
    ///
    /// Both the send and the receive loop call this when their half of
    /// the link fails; the retire flag ensures only the first of them
    /// requeues the orphans. Returns how many tasks were recovered.
    pub async fn salvage_into(&self, ready: &TaskQueue<Task<P>>) -> usize {
        if !self.retire() {
            return 0;
        }
        let orphans: Vec<Task<P>> = self.running.lock().await.drain(..).map(|(_, t)| t).collect();
        let recovered = orphans.len();
        for task in orphans {
            ready.push(task).await;
        }
        if recovered > 0 {
            info!(peer = %self.label, recovered, "requeued tasks from a lost peer");
        }
        recovered
    }
}

/// A registered gateway, as seen from the universe.
pub struct GatewayProxy<P: Problem> {
    pub label: String,
    pub node: u32,
    pub link: Arc<dyn GatewayLink<P>>,
    /// Finished job values waiting for the receive loop to push them
    /// out to the gateway.
    pub results: TaskQueue<(TaskId, P::Value)>,
    retired: AtomicBool,
}

impl<P: Problem> GatewayProxy<P> {
    pub fn new(label: impl Into<String>, node: u32, link: Arc<dyn GatewayLink<P>>) -> Self {
        Self {
            label: label.into(),
            node,
            link,
            results: TaskQueue::unbounded(),
            retired: AtomicBool::new(false),
        }
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }

    /// Mark the gateway dead. Returns `true` for exactly one caller.
    pub fn retire(&self) -> bool {
        !self.retired.swap(true, Ordering::SeqCst)
    }
}
