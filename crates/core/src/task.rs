//! Task algebra.
//!
//! A task is either a [`Decompose`](Body::Decompose) carrying a problem
//! input, or a [`Join`](Body::Join) waiting for the values of the children
//! spawned alongside it. Executing a decompose yields either a value (atomic
//! input) or a spawn of children plus their join; executing a fully argued
//! join yields the combined value.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::error::TaskError;
use crate::lineage::{Segment, Target, TaskId};
use crate::outcome::Outcome;
use crate::problem::Problem;

/// The two kinds of work a task can carry.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(bound = "")]
pub enum Body<P: Problem> {
    /// An input still to be solved or split.
    Decompose { input: P::Input },

    /// Argument slots filled by child results, one per child.
    Join { slots: Vec<Option<P::Value>> },
}

/// What happened when a join slot was filled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotFill {
    /// The slot was empty and took the value. `runnable` is true when this
    /// fill was the last one outstanding.
    Filled { runnable: bool },

    /// The slot already held a value. The duplicate is dropped so redelivered
    /// results cannot corrupt a join.
    AlreadyFilled,
}

/// One unit of work travelling through the hierarchy.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Task<P: Problem> {
    /// Append-only lineage identifying this task.
    pub id: TaskId,

    /// Where this task's value goes once computed.
    pub target: Target,

    /// Depth in the decomposition tree. A spawned join keeps its parent's
    /// layer; the children sit one below.
    pub layer: u32,

    pub body: Body<P>,
}

impl<P: Problem> Task<P> {
    /// A freshly submitted top-level task. Its value routes back to the
    /// submitting client as the job's final answer.
    pub fn root(id: TaskId, input: P::Input) -> Self {
        Self {
            target: Target::Final { root: id.clone() },
            id,
            layer: 0,
            body: Body::Decompose { input },
        }
    }

    pub fn is_join(&self) -> bool {
        matches!(self.body, Body::Join { .. })
    }

    /// True when the task can execute right now. Decomposes always can; a
    /// join can once every slot holds a value.
    pub fn is_runnable(&self) -> bool {
        match &self.body {
            Body::Decompose { .. } => true,
            Body::Join { slots } => slots.iter().all(Option::is_some),
        }
    }

    /// Number of join slots still waiting for a value. Zero for decomposes.
    pub fn missing_args(&self) -> usize {
        match &self.body {
            Body::Decompose { .. } => 0,
            Body::Join { slots } => slots.iter().filter(|s| s.is_none()).count(),
        }
    }

    /// Whether this task sits close enough to the root that its result
    /// bypasses dispatcher bookkeeping and is handled at the outermost tier.
    pub fn is_coarse(&self, problem: &P) -> bool {
        self.layer <= problem.coarse_layer()
    }

    /// Fill one argument slot of a join.
    ///
    /// Filling an already filled slot is a harmless no-op reported as
    /// [`SlotFill::AlreadyFilled`]; the stored value wins. Only genuinely
    /// malformed calls error.
    pub fn set_arg(&mut self, slot: usize, value: P::Value) -> Result<SlotFill, TaskError> {
        let slots = match &mut self.body {
            Body::Join { slots } => slots,
            Body::Decompose { .. } => return Err(TaskError::NotJoin(self.id.clone())),
        };
        if slot >= slots.len() {
            return Err(TaskError::SlotOutOfRange {
                slot,
                slots: slots.len(),
            });
        }
        if slots[slot].is_some() {
            return Ok(SlotFill::AlreadyFilled);
        }
        slots[slot] = Some(value);
        Ok(SlotFill::Filled {
            runnable: slots.iter().all(Option::is_some),
        })
    }

    /// Run the task to completion, consuming it.
    ///
    /// `stamp` mints one fresh lineage segment per call and is used to name
    /// the join and every child of a split. The join keeps this task's layer
    /// and inherits its target; children sit one layer deeper and each
    /// targets its slot of the join.
    pub fn execute(
        self,
        problem: &P,
        mut stamp: impl FnMut() -> Segment,
    ) -> Result<Outcome<P>, TaskError> {
        let coarse = self.is_coarse(problem);
        let started = Utc::now();
        match self.body {
            Body::Decompose { input } => {
                if problem.is_atomic(&input) {
                    return Ok(Outcome::Value {
                        task_id: self.id,
                        target: self.target,
                        value: problem.solve(&input),
                        coarse,
                        started,
                        finished: Utc::now(),
                    });
                }
                let inputs = problem.split(&input);
                let join_id = self.id.child(stamp());
                let join = Task {
                    id: join_id.clone(),
                    target: self.target,
                    layer: self.layer,
                    body: Body::Join {
                        slots: vec![None; inputs.len()],
                    },
                };
                let children = inputs
                    .into_iter()
                    .enumerate()
                    .map(|(slot, input)| Task {
                        id: self.id.child(stamp()),
                        target: Target::Join {
                            id: join_id.clone(),
                            slot,
                        },
                        layer: self.layer + 1,
                        body: Body::Decompose { input },
                    })
                    .collect();
                Ok(Outcome::Spawn {
                    task_id: self.id,
                    join,
                    children,
                    retained: Vec::new(),
                    coarse,
                    started,
                    finished: Utc::now(),
                })
            }
            Body::Join { slots } => {
                let missing = slots.iter().filter(|s| s.is_none()).count();
                if missing > 0 {
                    return Err(TaskError::MissingArgs(self.id, missing));
                }
                let args = slots.into_iter().flatten().collect();
                Ok(Outcome::Value {
                    task_id: self.id,
                    target: self.target,
                    value: problem.join(args),
                    coarse,
                    started,
                    finished: Utc::now(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::problems::Fibonacci;

    fn worker_stamp() -> impl FnMut() -> Segment {
        let mut seq = 0;
        move || {
            seq += 1;
            Segment::Worker {
                computer: 7,
                worker: 0,
                seq,
            }
        }
    }

    fn decompose(n: u64, layer: u32) -> Task<Fibonacci> {
        let id = TaskId::root(Segment::Client {
            name: "alice".into(),
            seq: 1,
        });
        Task {
            target: Target::Final { root: id.clone() },
            id,
            layer,
            body: Body::Decompose { input: n },
        }
    }

    #[test]
    fn atomic_input_yields_value() {
        let problem = Fibonacci::default();
        let task = decompose(1, 0);
        let target = task.target.clone();
        let id = task.id.clone();
        match task.execute(&problem, worker_stamp()).unwrap() {
            Outcome::Value {
                task_id,
                target: t,
                value,
                coarse,
                started,
                finished,
            } => {
                assert_eq!(task_id, id);
                assert_eq!(t, target);
                assert_eq!(value, 1);
                assert!(coarse);
                assert!(finished >= started);
            }
            other => panic!("expected value, got {other:?}"),
        }
    }

    #[test]
    fn split_spawns_join_and_slotted_children() {
        let problem = Fibonacci::default();
        let task = decompose(5, 2);
        let parent_id = task.id.clone();
        let parent_target = task.target.clone();
        match task.execute(&problem, worker_stamp()).unwrap() {
            Outcome::Spawn {
                task_id,
                join,
                children,
                retained,
                coarse,
                ..
            } => {
                assert_eq!(task_id, parent_id);
                assert!(retained.is_empty());
                assert!(coarse, "layer 2 is within the coarse band");

                // The join takes over the parent's place in the tree.
                assert_eq!(join.layer, 2);
                assert_eq!(join.target, parent_target);
                assert_eq!(join.id.segments().len(), parent_id.segments().len() + 1);
                assert_eq!(join.missing_args(), 2);
                assert!(!join.is_runnable());

                assert_eq!(children.len(), 2);
                for (slot, child) in children.iter().enumerate() {
                    assert_eq!(child.layer, 3);
                    assert_eq!(
                        child.target,
                        Target::Join {
                            id: join.id.clone(),
                            slot
                        }
                    );
                    assert_ne!(child.id, join.id);
                }
                assert_ne!(children[0].id, children[1].id);
            }
            other => panic!("expected spawn, got {other:?}"),
        }
    }

    #[test]
    fn layer_past_coarse_band_is_fine_grained() {
        let problem = Fibonacci::default();
        assert!(decompose(5, 3).is_coarse(&problem));
        assert!(!decompose(5, 4).is_coarse(&problem));
    }

    #[test]
    fn slot_fill_is_idempotent() {
        let problem = Fibonacci::default();
        let mut join = Task::<Fibonacci> {
            id: "alice#1:W7.0#1".parse().unwrap(),
            target: Target::Final {
                root: "alice#1".parse().unwrap(),
            },
            layer: 1,
            body: Body::Join {
                slots: vec![None, None],
            },
        };

        assert_eq!(
            join.set_arg(0, 3).unwrap(),
            SlotFill::Filled { runnable: false }
        );
        // A redelivery of slot 0 must not overwrite the stored value.
        assert_eq!(join.set_arg(0, 99).unwrap(), SlotFill::AlreadyFilled);
        assert_eq!(
            join.set_arg(1, 2).unwrap(),
            SlotFill::Filled { runnable: true }
        );
        assert!(join.is_runnable());

        match join.execute(&problem, worker_stamp()).unwrap() {
            Outcome::Value { value, .. } => assert_eq!(value, 5),
            other => panic!("expected value, got {other:?}"),
        }
    }

    #[test]
    fn slot_out_of_range_is_rejected() {
        let mut join = Task::<Fibonacci> {
            id: "alice#1:W7.0#1".parse().unwrap(),
            target: Target::Final {
                root: "alice#1".parse().unwrap(),
            },
            layer: 1,
            body: Body::Join {
                slots: vec![None, None],
            },
        };
        assert!(matches!(
            join.set_arg(2, 1),
            Err(TaskError::SlotOutOfRange { slot: 2, slots: 2 })
        ));
    }

    #[test]
    fn filling_a_decompose_is_rejected() {
        let mut task = decompose(5, 0);
        assert!(matches!(task.set_arg(0, 1), Err(TaskError::NotJoin(_))));
    }

    #[test]
    fn executing_a_starved_join_reports_missing_slots() {
        let problem = Fibonacci::default();
        let mut join = Task::<Fibonacci> {
            id: "alice#1:W7.0#1".parse().unwrap(),
            target: Target::Final {
                root: "alice#1".parse().unwrap(),
            },
            layer: 1,
            body: Body::Join {
                slots: vec![None, None, None],
            },
        };
        join.set_arg(1, 4).unwrap();
        match join.execute(&problem, worker_stamp()) {
            Err(TaskError::MissingArgs(_, missing)) => assert_eq!(missing, 2),
            other => panic!("expected missing args, got {other:?}"),
        }
    }
}
