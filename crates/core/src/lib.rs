pub mod error;
pub mod lineage;
pub mod outcome;
pub mod problem;
pub mod problems;
pub mod task;

pub use error::{LineageError, TaskError};
pub use lineage::{Rank, Segment, Target, TaskId};
pub use outcome::Outcome;
pub use problem::Problem;
pub use problems::{Fibonacci, Route, Tsp, TspInput};
pub use task::{Body, SlotFill, Task};
