//! Retention policy: how much of a freshly split task a worker keeps.
//!
//! When a worker splits a task it normally ships every child back up to
//! its space for dispatch. Keeping a few children on the worker's own
//! queue skips two network hops for work the computer would likely be
//! handed anyway. The policy only picks a count; the computer still
//! reports every child upward so the space can recover them if the
//! computer dies.

/// Picks how many children of a split stay on the executing computer.
pub trait RetentionPolicy: Send + Sync + 'static {
    /// Number of children to keep, given how many the split produced.
    /// Implementations must not return more than `spawned`.
    fn retain(&self, spawned: usize) -> usize;
}

/// Keep a fixed number of children from every split.
pub struct FixedRetention(pub usize);

impl RetentionPolicy for FixedRetention {
    fn retain(&self, spawned: usize) -> usize {
        self.0.min(spawned)
    }
}

/// Keep nothing, always dispatching through the space.
pub struct NoRetention;

impl RetentionPolicy for NoRetention {
    fn retain(&self, _spawned: usize) -> usize {
        0
    }
}
