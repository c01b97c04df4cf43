//! Whole-state snapshots of the universe for crash recovery.
//!
//! A snapshot captures the ready queue, the parked joins, the held
//! results and everything registered peers still owed at one moment.
//! Restoring pushes owed tasks back on the ready queue, since the peers
//! that held them are gone after a restart. Results in flight between
//! two polls are lost; the join-slot idempotence upstream makes the
//! matching redeliveries harmless.

use std::path::Path;

use chrono::{DateTime, Utc};
use kosmos_core::{Outcome, Problem, Task};
use serde::{Deserialize, Serialize};

use crate::error::EngineError;

#[derive(Debug, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct UniverseSnapshot<P: Problem> {
    pub taken_at: DateTime<Utc>,
    pub ready: Vec<Task<P>>,
    pub successors: Vec<Task<P>>,
    pub holding: Vec<Outcome<P>>,
    /// Tasks registered peers had not answered for when the snapshot
    /// was taken.
    pub running: Vec<Task<P>>,
}

impl<P: Problem> UniverseSnapshot<P> {
    pub fn is_empty(&self) -> bool {
        self.ready.is_empty()
            && self.successors.is_empty()
            && self.holding.is_empty()
            && self.running.is_empty()
    }
}

/// Write a snapshot, replacing `path` atomically via a sibling temp file.
pub fn write<P: Problem>(path: &Path, snapshot: &UniverseSnapshot<P>) -> Result<(), EngineError> {
    let bytes = rmp_serde::to_vec(snapshot).map_err(|e| EngineError::Snapshot(e.to_string()))?;
    if let Some(dir) = path.parent() {
        if !dir.as_os_str().is_empty() {
            std::fs::create_dir_all(dir)?;
        }
    }
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, &bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Read a snapshot back. Any decoding failure is reported, so a corrupt
/// file degrades to a cold start.
pub fn read<P: Problem>(path: &Path) -> Result<UniverseSnapshot<P>, EngineError> {
    let bytes = std::fs::read(path)?;
    rmp_serde::from_slice(&bytes).map_err(|e| EngineError::Snapshot(e.to_string()))
}
