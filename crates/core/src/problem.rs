use std::fmt::Debug;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// The capability interface a divide-and-conquer problem implements.
///
/// The engine never looks inside a problem's data: it decomposes work through
/// `split`, runs leaves through `solve`, and recombines through `join`. The
/// problem instance itself holds only tuning thresholds; per-job data travels
/// inside [`Input`](Problem::Input) so tasks stay self-contained on the wire.
pub trait Problem: Clone + Send + Sync + 'static {
    /// Payload of a decompose task.
    type Input: Clone + Debug + Send + Sync + Serialize + DeserializeOwned + 'static;

    /// Computed value flowing back through joins.
    type Value: Clone + Debug + PartialEq + Send + Sync + Serialize + DeserializeOwned + 'static;

    /// Stable name used by the CLI and logs.
    fn name(&self) -> &'static str;

    /// True when `input` cannot be decomposed further and must be solved
    /// directly.
    fn is_atomic(&self, input: &Self::Input) -> bool;

    /// Solve an atomic input.
    fn solve(&self, input: &Self::Input) -> Self::Value;

    /// Decompose a non-atomic input into child inputs. Child `i` feeds slot
    /// `i` of the join created alongside the children.
    fn split(&self, input: &Self::Input) -> Vec<Self::Input>;

    /// Combine the values of all children into one value.
    fn join(&self, args: Vec<Self::Value>) -> Self::Value;

    /// Recursion depth at or below which a join counts as coarse. Coarse
    /// joins sit near the root of the decomposition tree and are kept at the
    /// outermost tier, so results feeding them bypass dispatcher bookkeeping.
    fn coarse_layer(&self) -> u32;

    /// Whether joins of this problem are cheap enough for a dispatcher tier
    /// to run in place instead of shipping them to a worker.
    fn space_runnable_joins(&self) -> bool {
        true
    }
}
