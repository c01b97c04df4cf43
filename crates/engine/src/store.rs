//! Shared task stores: the FIFO queue every tier drains and the
//! successor map that parks joins until their argument slots fill.

use std::collections::VecDeque;

use indexmap::IndexMap;
use kosmos_core::{Problem, SlotFill, Task, TaskError, TaskId};
use tokio::sync::{Mutex, Notify};

struct QueueState<T> {
    items: VecDeque<T>,
    /// Room promised to callers of [`TaskQueue::try_reserve`] but not
    /// yet occupied.
    reserved: usize,
}

/// An async FIFO queue, optionally bounded.
///
/// A bounded queue counts reservations against its capacity, so a
/// worker can secure room for the children it wants to keep before it
/// commits to keeping them.
pub struct TaskQueue<T> {
    state: Mutex<QueueState<T>>,
    capacity: Option<usize>,
    items: Notify,
    space: Notify,
}

impl<T> TaskQueue<T> {
    pub fn unbounded() -> Self {
        Self::with_capacity(None)
    }

    pub fn bounded(capacity: usize) -> Self {
        Self::with_capacity(Some(capacity))
    }

    fn with_capacity(capacity: Option<usize>) -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                reserved: 0,
            }),
            capacity,
            items: Notify::new(),
            space: Notify::new(),
        }
    }

    fn has_room(&self, state: &QueueState<T>, extra: usize) -> bool {
        match self.capacity {
            None => true,
            Some(cap) => state.items.len() + state.reserved + extra <= cap,
        }
    }

    /// Append an item, waiting for room on a bounded queue.
    pub async fn push(&self, item: T) {
        let mut item = Some(item);
        loop {
            let space = self.space.notified();
            {
                let mut state = self.state.lock().await;
                if self.has_room(&state, 1) {
                    if let Some(item) = item.take() {
                        state.items.push_back(item);
                    }
                    drop(state);
                    self.items.notify_one();
                    return;
                }
            }
            space.await;
        }
    }

    /// Append an item if there is room, handing it back otherwise.
    pub async fn try_push(&self, item: T) -> Result<(), T> {
        let mut state = self.state.lock().await;
        if self.has_room(&state, 1) {
            state.items.push_back(item);
            drop(state);
            self.items.notify_one();
            Ok(())
        } else {
            Err(item)
        }
    }

    /// Claim room for `extra` future items. Returns `false` without
    /// reserving anything when the queue cannot hold them.
    pub async fn try_reserve(&self, extra: usize) -> bool {
        let mut state = self.state.lock().await;
        if self.has_room(&state, extra) {
            state.reserved += extra;
            true
        } else {
            false
        }
    }

    /// Fill room claimed by an earlier [`try_reserve`](Self::try_reserve).
    pub async fn push_reserved(&self, items: impl IntoIterator<Item = T>) {
        let mut state = self.state.lock().await;
        let mut pushed = 0;
        for item in items {
            state.items.push_back(item);
            pushed += 1;
        }
        state.reserved = state.reserved.saturating_sub(pushed);
        drop(state);
        for _ in 0..pushed {
            self.items.notify_one();
        }
    }

    /// Pop the oldest item, waiting until one arrives.
    pub async fn take(&self) -> T {
        loop {
            let items = self.items.notified();
            {
                let mut state = self.state.lock().await;
                if let Some(item) = state.items.pop_front() {
                    drop(state);
                    self.space.notify_one();
                    return item;
                }
            }
            items.await;
        }
    }

    /// Pop the oldest item if one is queued.
    pub async fn try_take(&self) -> Option<T> {
        let mut state = self.state.lock().await;
        let item = state.items.pop_front();
        if item.is_some() {
            drop(state);
            self.space.notify_one();
        }
        item
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.items.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Remove and return every queued item matching `evict`, keeping
    /// the rest in order.
    pub async fn purge<F>(&self, mut evict: F) -> Vec<T>
    where
        F: FnMut(&T) -> bool,
    {
        let mut state = self.state.lock().await;
        let mut kept = VecDeque::with_capacity(state.items.len());
        let mut removed = Vec::new();
        while let Some(item) = state.items.pop_front() {
            if evict(&item) {
                removed.push(item);
            } else {
                kept.push_back(item);
            }
        }
        state.items = kept;
        drop(state);
        for _ in 0..removed.len() {
            self.space.notify_one();
        }
        removed
    }

    /// Empty the queue, returning its items in order.
    pub async fn drain(&self) -> Vec<T> {
        self.purge(|_| true).await
    }
}

impl<T: Clone> TaskQueue<T> {
    /// Copy the queued items without disturbing them.
    pub async fn snapshot(&self) -> Vec<T> {
        self.state.lock().await.items.iter().cloned().collect()
    }
}

/// What happened when a result value was offered to the successor map.
pub enum JoinFill<P: Problem> {
    /// No join with that id is parked here. The value travels back out
    /// so the caller can route it elsewhere.
    Unknown { value: P::Value },
    /// The slot was filled (or already held a value) and the join still
    /// waits on others.
    Pending,
    /// The fill completed the join's argument list. The join has been
    /// removed from the map and is ready to run.
    Runnable(Task<P>),
}

/// Parked joins, keyed by task id, waiting for their argument slots.
pub struct SuccessorMap<P: Problem> {
    inner: Mutex<IndexMap<TaskId, Task<P>>>,
}

impl<P: Problem> SuccessorMap<P> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(IndexMap::new()),
        }
    }

    /// Park a join until its slots fill.
    pub async fn register(&self, join: Task<P>) {
        self.inner.lock().await.insert(join.id.clone(), join);
    }

    /// Offer a result value to the join slot it targets.
    ///
    /// A completed join leaves the map and comes back as
    /// [`JoinFill::Runnable`] in the same locked step, so exactly one
    /// fill can win it. A duplicate delivery to an occupied slot is
    /// absorbed as [`JoinFill::Pending`].
    pub async fn fill(
        &self,
        target: &TaskId,
        slot: usize,
        value: P::Value,
    ) -> Result<JoinFill<P>, TaskError> {
        let mut map = self.inner.lock().await;
        let fill = match map.get_mut(target) {
            None => return Ok(JoinFill::Unknown { value }),
            Some(join) => join.set_arg(slot, value)?,
        };
        match fill {
            SlotFill::Filled { runnable: true } => match map.shift_remove(target) {
                Some(join) => Ok(JoinFill::Runnable(join)),
                None => Ok(JoinFill::Pending),
            },
            SlotFill::Filled { runnable: false } | SlotFill::AlreadyFilled => {
                Ok(JoinFill::Pending)
            }
        }
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Copy the parked joins in registration order.
    pub async fn snapshot(&self) -> Vec<Task<P>> {
        self.inner.lock().await.values().cloned().collect()
    }

    /// Re-park joins captured by an earlier snapshot.
    pub async fn restore(&self, joins: Vec<Task<P>>) {
        let mut map = self.inner.lock().await;
        for join in joins {
            map.insert(join.id.clone(), join);
        }
    }
}

impl<P: Problem> Default for SuccessorMap<P> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use kosmos_core::{Fibonacci, Segment, Target};

    use super::*;

    fn segment(seq: u64) -> Segment {
        Segment::Worker {
            computer: 1,
            worker: 0,
            seq,
        }
    }

    fn join_task(id: TaskId, slots: usize) -> Task<Fibonacci> {
        let mut task = Task::root(id.clone(), 0);
        task.body = kosmos_core::Body::Join {
            slots: vec![None; slots],
        };
        task.target = Target::Final { root: id };
        task
    }

    #[tokio::test]
    async fn take_waits_for_a_push() {
        let queue = Arc::new(TaskQueue::unbounded());
        let taker = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.take().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.push(7u64).await;
        let got = tokio::time::timeout(Duration::from_secs(1), taker)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, 7);
    }

    #[tokio::test]
    async fn bounded_queue_rejects_overflow_and_frees_on_take() {
        let queue = TaskQueue::bounded(2);
        assert!(queue.try_push(1u64).await.is_ok());
        assert!(queue.try_push(2).await.is_ok());
        assert_eq!(queue.try_push(3).await, Err(3));
        assert_eq!(queue.try_take().await, Some(1));
        assert!(queue.try_push(3).await.is_ok());
        assert_eq!(queue.len().await, 2);
    }

    #[tokio::test]
    async fn reservations_count_against_capacity() {
        let queue = TaskQueue::bounded(3);
        queue.push(1u64).await;
        assert!(queue.try_reserve(2).await);
        assert_eq!(queue.try_push(9).await, Err(9));
        assert!(!queue.try_reserve(1).await);
        queue.push_reserved([2, 3]).await;
        assert_eq!(queue.len().await, 3);
        assert_eq!(queue.try_take().await, Some(1));
        assert!(queue.try_push(4).await.is_ok());
    }

    #[tokio::test]
    async fn purge_removes_matching_items_in_order() {
        let queue = TaskQueue::unbounded();
        for n in 0u64..6 {
            queue.push(n).await;
        }
        let evicted = queue.purge(|n| n % 2 == 0).await;
        assert_eq!(evicted, vec![0, 2, 4]);
        assert_eq!(queue.drain().await, vec![1, 3, 5]);
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn fill_tracks_a_join_to_runnable_exactly_once() {
        let map: SuccessorMap<Fibonacci> = SuccessorMap::new();
        let id = TaskId::root(segment(1));
        map.register(join_task(id.clone(), 2)).await;

        assert!(matches!(
            map.fill(&id, 0, 8).await.unwrap(),
            JoinFill::Pending
        ));
        // A redelivered result lands in the same slot and changes nothing.
        assert!(matches!(
            map.fill(&id, 0, 999).await.unwrap(),
            JoinFill::Pending
        ));
        let runnable = match map.fill(&id, 1, 5).await.unwrap() {
            JoinFill::Runnable(join) => join,
            _ => panic!("second slot should complete the join"),
        };
        assert!(runnable.is_runnable());
        assert!(map.is_empty().await);
        // The first delivery won the slot.
        match runnable.body {
            kosmos_core::Body::Join { slots } => {
                assert_eq!(slots, vec![Some(8), Some(5)]);
            }
            _ => panic!("expected a join body"),
        }
    }

    #[tokio::test]
    async fn fill_hands_back_values_for_unknown_joins() {
        let map: SuccessorMap<Fibonacci> = SuccessorMap::new();
        let id = TaskId::root(segment(2));
        match map.fill(&id, 0, 13).await.unwrap() {
            JoinFill::Unknown { value } => assert_eq!(value, 13),
            _ => panic!("an unregistered join should report unknown"),
        }
    }

    #[tokio::test]
    async fn fill_rejects_a_slot_past_the_argument_list() {
        let map: SuccessorMap<Fibonacci> = SuccessorMap::new();
        let id = TaskId::root(segment(3));
        map.register(join_task(id.clone(), 1)).await;
        assert!(map.fill(&id, 4, 1).await.is_err());
    }

    #[tokio::test]
    async fn snapshot_and_restore_round_trip_parked_joins() {
        let map: SuccessorMap<Fibonacci> = SuccessorMap::new();
        map.register(join_task(TaskId::root(segment(4)), 2)).await;
        map.register(join_task(TaskId::root(segment(5)), 3)).await;
        let parked = map.snapshot().await;
        assert_eq!(parked.len(), 2);

        let rebuilt: SuccessorMap<Fibonacci> = SuccessorMap::new();
        rebuilt.restore(parked).await;
        assert_eq!(rebuilt.len().await, 2);
    }
}
