use thiserror::Error;

use crate::lineage::TaskId;

/// Errors from task algebra operations.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("slot {slot} out of range for join with {slots} slots")]
    SlotOutOfRange { slot: usize, slots: usize },

    #[error("task {0} is not a join")]
    NotJoin(TaskId),

    #[error("join {0} executed with {1} missing arguments")]
    MissingArgs(TaskId, usize),
}

/// Errors from parsing the textual lineage form.
#[derive(Debug, Error)]
pub enum LineageError {
    #[error("empty lineage")]
    Empty,

    #[error("malformed lineage segment: {0:?}")]
    BadSegment(String),
}
