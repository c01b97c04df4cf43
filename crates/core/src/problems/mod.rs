//! Built-in divide-and-conquer problems.

mod fibonacci;
mod tsp;

pub use fibonacci::Fibonacci;
pub use tsp::{Route, Tsp, TspInput};
