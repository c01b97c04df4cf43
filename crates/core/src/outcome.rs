//! What comes back from executing a task.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::lineage::{Rank, Target, TaskId};
use crate::problem::Problem;
use crate::task::Task;

/// Result of one task execution, shipped back up through the tier that
/// dispatched the task.
///
/// `task_id` always echoes the id the task ran under, so the receiving tier
/// can clear its in-flight bookkeeping before looking at the payload.
/// `started` and `finished` bracket the execution on the executor's clock.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(bound = "")]
pub enum Outcome<P: Problem> {
    /// A computed value on its way to `target`.
    Value {
        task_id: TaskId,
        target: Target,
        value: P::Value,
        coarse: bool,
        started: DateTime<Utc>,
        finished: DateTime<Utc>,
    },

    /// A decomposition: the join to register and the children that will feed
    /// it. `retained` names the children the executing peer kept on its own
    /// queue; they still appear in `children` so an upper tier can track and,
    /// if the peer dies, resurrect them.
    Spawn {
        task_id: TaskId,
        join: Task<P>,
        children: Vec<Task<P>>,
        retained: Vec<TaskId>,
        coarse: bool,
        started: DateTime<Utc>,
        finished: DateTime<Utc>,
    },
}

impl<P: Problem> Outcome<P> {
    /// Id of the task this outcome came from, as echoed by the executor.
    pub fn task_id(&self) -> &TaskId {
        match self {
            Outcome::Value { task_id, .. } => task_id,
            Outcome::Spawn { task_id, .. } => task_id,
        }
    }

    /// True when the originating task sat in the coarse band near the root,
    /// meaning this outcome skips dispatcher bookkeeping on its way up.
    pub fn is_coarse(&self) -> bool {
        match self {
            Outcome::Value { coarse, .. } => *coarse,
            Outcome::Spawn { coarse, .. } => *coarse,
        }
    }

    /// Restore the echoed id to the form the tier above dispatched under,
    /// dropping the lineage extensions added below `max`.
    ///
    /// Only the echo is rewritten. Join ids, child ids and targets keep
    /// their full minted lineage, since successor registration and slot
    /// filling key on those exact ids.
    pub fn truncate_task_id(&mut self, max: Rank) {
        match self {
            Outcome::Value { task_id, .. } => task_id.truncate_after_rank(max),
            Outcome::Spawn { task_id, .. } => task_id.truncate_after_rank(max),
        }
    }

    /// Wall-clock time the executor spent on the task.
    pub fn elapsed(&self) -> chrono::Duration {
        match self {
            Outcome::Value {
                started, finished, ..
            }
            | Outcome::Spawn {
                started, finished, ..
            } => *finished - *started,
        }
    }

    /// Short label for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Outcome::Value { .. } => "value",
            Outcome::Spawn { .. } => "spawn",
        }
    }
}
