use serde::{Deserialize, Serialize};

use crate::problem::Problem;

/// Naive two-branch Fibonacci recursion.
///
/// Deliberately unmemoized: even a small `n` fans out into a deep task tree,
/// which is exactly what makes it the standard smoke test for the hierarchy.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Fibonacci {
    /// Depth down to which joins count as coarse and stay at the outermost
    /// tier.
    pub coarse_layer: u32,
}

impl Default for Fibonacci {
    fn default() -> Self {
        Self { coarse_layer: 3 }
    }
}

impl Problem for Fibonacci {
    type Input = u64;
    type Value = u64;

    fn name(&self) -> &'static str {
        "fibonacci"
    }

    fn is_atomic(&self, n: &u64) -> bool {
        *n < 2
    }

    fn solve(&self, n: &u64) -> u64 {
        *n
    }

    fn split(&self, n: &u64) -> Vec<u64> {
        vec![n - 1, n - 2]
    }

    fn join(&self, args: Vec<u64>) -> u64 {
        args.into_iter().sum()
    }

    fn coarse_layer(&self) -> u32 {
        self.coarse_layer
    }
}
