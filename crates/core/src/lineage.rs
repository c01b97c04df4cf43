//! Hierarchical task identity.
//!
//! Every task carries a lineage: the ordered list of spawn and dispatch hops
//! that produced it. Each tier appends exactly one segment when it first
//! touches a task and never rewrites earlier ones, so a result's id alone is
//! enough to route it back through the hierarchy.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::LineageError;

/// Tier rank of a lineage segment, ordered from the injecting client down to
/// the executing worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Rank {
    Client,
    Gateway,
    Space,
    Computer,
    Worker,
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rank::Client => write!(f, "client"),
            Rank::Gateway => write!(f, "gateway"),
            Rank::Space => write!(f, "space"),
            Rank::Computer => write!(f, "computer"),
            Rank::Worker => write!(f, "worker"),
        }
    }
}

/// One hop in a task's lineage.
///
/// `node` is the identity the coordinating tier assigned to the peer, `seq`
/// a per-source counter making sibling segments distinct.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Segment {
    Client { name: String, seq: u64 },
    Gateway { node: u32, seq: u64 },
    Space { node: u32, seq: u64 },
    Computer { node: u32, seq: u64 },
    Worker { computer: u32, worker: u32, seq: u64 },
}

impl Segment {
    pub fn rank(&self) -> Rank {
        match self {
            Segment::Client { .. } => Rank::Client,
            Segment::Gateway { .. } => Rank::Gateway,
            Segment::Space { .. } => Rank::Space,
            Segment::Computer { .. } => Rank::Computer,
            Segment::Worker { .. } => Rank::Worker,
        }
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Client { name, seq } => write!(f, "{name}#{seq}"),
            Segment::Gateway { node, seq } => write!(f, "G{node}#{seq}"),
            Segment::Space { node, seq } => write!(f, "S{node}#{seq}"),
            Segment::Computer { node, seq } => write!(f, "C{node}#{seq}"),
            Segment::Worker {
                computer,
                worker,
                seq,
            } => write!(f, "W{computer}.{worker}#{seq}"),
        }
    }
}

impl FromStr for Segment {
    type Err = LineageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || LineageError::BadSegment(s.to_string());
        let (head, seq) = s.rsplit_once('#').ok_or_else(bad)?;
        let seq: u64 = seq.parse().map_err(|_| bad())?;

        if let Some(rest) = head.strip_prefix('W') {
            if let Some((computer, worker)) = rest.split_once('.') {
                if let (Ok(computer), Ok(worker)) = (computer.parse(), worker.parse()) {
                    return Ok(Segment::Worker {
                        computer,
                        worker,
                        seq,
                    });
                }
            }
        }
        if let Some(rest) = head.strip_prefix('G') {
            if let Ok(node) = rest.parse() {
                return Ok(Segment::Gateway { node, seq });
            }
        }
        if let Some(rest) = head.strip_prefix('S') {
            if let Ok(node) = rest.parse() {
                return Ok(Segment::Space { node, seq });
            }
        }
        if let Some(rest) = head.strip_prefix('C') {
            if let Ok(node) = rest.parse() {
                return Ok(Segment::Computer { node, seq });
            }
        }
        // Anything else is a client name, which may not contain the
        // separator characters.
        if head.is_empty() || head.contains(':') {
            return Err(bad());
        }
        Ok(Segment::Client {
            name: head.to_string(),
            seq,
        })
    }
}

/// Hierarchical task identifier: a non-empty, append-only list of segments.
///
/// The same value identifies a task and the result of executing it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId {
    segments: Vec<Segment>,
}

impl TaskId {
    /// Start a lineage from its first segment.
    pub fn root(segment: Segment) -> Self {
        Self {
            segments: vec![segment],
        }
    }

    /// The lineage extended by one more segment.
    pub fn child(&self, segment: Segment) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment);
        Self { segments }
    }

    /// Append a segment in place.
    pub fn push(&mut self, segment: Segment) {
        self.segments.push(segment);
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn first(&self) -> &Segment {
        &self.segments[0]
    }

    pub fn last(&self) -> &Segment {
        self.segments.last().expect("lineage is never empty")
    }

    pub fn last_rank(&self) -> Rank {
        self.last().rank()
    }

    /// Drop trailing segments of rank deeper than `max`.
    ///
    /// Restores the id a requesting tier dispatched under, undoing the
    /// extensions added below it. The first segment is always kept.
    pub fn truncate_after_rank(&mut self, max: Rank) {
        while self.segments.len() > 1 && self.last_rank() > max {
            self.segments.pop();
        }
    }

    /// Non-mutating form of [`truncate_after_rank`](Self::truncate_after_rank).
    pub fn truncated_after_rank(&self, max: Rank) -> Self {
        let mut id = self.clone();
        id.truncate_after_rank(max);
        id
    }

    /// The submitting client's name, if this lineage records one.
    pub fn client_name(&self) -> Option<&str> {
        self.segments.iter().find_map(|s| match s {
            Segment::Client { name, .. } => Some(name.as_str()),
            _ => None,
        })
    }

    /// The gateway node this lineage entered the hierarchy through, if any.
    pub fn gateway_node(&self) -> Option<u32> {
        self.segments.iter().find_map(|s| match s {
            Segment::Gateway { node, .. } => Some(*node),
            _ => None,
        })
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, ":")?;
            }
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

impl FromStr for TaskId {
    type Err = LineageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(LineageError::Empty);
        }
        let segments = s
            .split(':')
            .map(Segment::from_str)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { segments })
    }
}

/// Where the value of a completed task goes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Target {
    /// The value is a job's final answer, routed back to the submitting
    /// client. `root` is the id the job was submitted under.
    Final { root: TaskId },

    /// The value fills one argument slot of a pending join.
    Join { id: TaskId, slot: usize },
}

impl Target {
    pub fn is_final(&self) -> bool {
        matches!(self, Target::Final { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_id() -> TaskId {
        TaskId::root(Segment::Client {
            name: "alice".into(),
            seq: 1,
        })
        .child(Segment::Gateway { node: 0, seq: 7 })
        .child(Segment::Space { node: 1, seq: 3 })
        .child(Segment::Computer { node: 2, seq: 9 })
        .child(Segment::Worker {
            computer: 2,
            worker: 0,
            seq: 14,
        })
    }

    #[test]
    fn display_roundtrip() {
        let id = sample_id();
        let text = id.to_string();
        assert_eq!(text, "alice#1:G0#7:S1#3:C2#9:W2.0#14");
        assert_eq!(text.parse::<TaskId>().unwrap(), id);
    }

    #[test]
    fn truncate_restores_dispatch_boundary() {
        let mut id = sample_id();
        id.truncate_after_rank(Rank::Space);
        assert_eq!(id.to_string(), "alice#1:G0#7:S1#3");
        // Idempotent once at the boundary.
        id.truncate_after_rank(Rank::Space);
        assert_eq!(id.segments().len(), 3);
    }

    #[test]
    fn truncate_never_empties() {
        let mut id = TaskId::root(Segment::Worker {
            computer: 1,
            worker: 1,
            seq: 1,
        });
        id.truncate_after_rank(Rank::Client);
        assert_eq!(id.segments().len(), 1);
    }

    #[test]
    fn routing_accessors() {
        let id = sample_id();
        assert_eq!(id.client_name(), Some("alice"));
        assert_eq!(id.gateway_node(), Some(0));
        assert_eq!(id.last_rank(), Rank::Worker);
    }

    #[test]
    fn ranks_order_by_depth() {
        assert!(Rank::Client < Rank::Gateway);
        assert!(Rank::Gateway < Rank::Space);
        assert!(Rank::Space < Rank::Computer);
        assert!(Rank::Computer < Rank::Worker);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!("".parse::<TaskId>().is_err());
        assert!("no-seq-marker".parse::<TaskId>().is_err());
        assert!("a#1::b#2".parse::<TaskId>().is_err());
    }

    #[test]
    fn client_names_with_separators_rejected() {
        assert!("a:b#1".parse::<Segment>().is_err());
    }
}
