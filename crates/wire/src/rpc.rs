//! Typed payloads for the two RPC surfaces.
//!
//! Tier-to-tier traffic (dispatchers, workers, gateways announcing
//! themselves and moving tasks) speaks [`NodeRequest`]/[`NodeResponse`] on
//! [`topics::NODE_SERVICE`]. Client traffic against a gateway speaks
//! [`ClientRequest`]/[`ClientResponse`] on [`topics::CLIENT_SERVICE`].
//! Payloads ride inside a [`Message`](crate::Message) envelope as
//! MessagePack.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use kosmos_core::{Outcome, Problem, Task, TaskId};

use crate::transport::Transport;

/// Service topics for envelope routing.
pub mod topics {
    /// Tier-to-tier node operations.
    pub const NODE_SERVICE: &str = "kosmos.service.node";

    /// Client-to-gateway operations.
    pub const CLIENT_SERVICE: &str = "kosmos.service.client";
}

/// What kind of peer is announcing itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerKind {
    Space,
    Computer,
    Gateway,
}

impl std::fmt::Display for PeerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PeerKind::Space => "space",
            PeerKind::Computer => "computer",
            PeerKind::Gateway => "gateway",
        };
        write!(f, "{name}")
    }
}

/// One tier-to-tier operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "")]
pub enum NodeRequest<P: Problem> {
    /// A peer announcing itself to the tier above, naming the endpoint
    /// that tier should connect back to.
    Hello {
        peer: PeerKind,
        node: u32,
        endpoint: Transport,
    },

    /// Push one task onto the receiver's ready queue.
    AddTask { task: Task<P> },

    /// Drain one outcome from the receiver's outbox, if any.
    PollResult,

    /// Pull one submitted task from a gateway's forwarding queue, if any.
    PollTask,

    /// Deliver a finished job's value to the gateway it entered through.
    Deliver { root: TaskId, value: P::Value },

    /// Probe the receiver's backlog before pushing more work.
    IsBusy,

    /// Ask the receiver to shut down.
    Exit,
}

/// Reply to a [`NodeRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "")]
pub enum NodeResponse<P: Problem> {
    Ack,
    Outcome(Option<Outcome<P>>),
    Task(Option<Task<P>>),
    Busy(bool),
    Error(String),
}

/// One client operation against a gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "")]
pub enum ClientRequest<P: Problem> {
    /// Open a session. `budget` is a wall-clock allowance written as
    /// minutes (`"90"`) or hours and minutes (`"1:30"`); omitted means the
    /// gateway default.
    Register { name: String, budget: Option<String> },

    /// Close a session and discard its queued work.
    Unregister { name: String },

    /// Submit one job under an open session.
    Submit { name: String, input: P::Input },

    /// Block until the session's next finished job value is available.
    GetResult { name: String },
}

/// Reply to a [`ClientRequest`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "")]
pub enum ClientResponse<P: Problem> {
    Registered { minutes: u64 },
    Unregistered,
    Submitted { task_id: TaskId },
    Value { root: TaskId, value: P::Value },
    Rejected(Rejection),
}

/// Why a gateway turned a client operation down.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
pub enum Rejection {
    #[error("client {0:?} is not registered")]
    UnknownClient(String),

    #[error("client {0:?} is already registered")]
    DuplicateClient(String),

    #[error("client name must not be empty")]
    EmptyName,

    #[error("bad budget {0:?}, expected minutes or h:mm")]
    BadBudget(String),

    #[error("budget of {asked} minutes exceeds the {limit} minute limit")]
    BudgetTooLarge { asked: u64, limit: u64 },
}

#[cfg(test)]
mod tests {
    use kosmos_core::{Body, Fibonacci};

    use super::*;
    use crate::message::Message;

    #[test]
    fn add_task_round_trips_through_an_envelope() {
        let task = Task::<Fibonacci>::root("alice#1:G0#1".parse().unwrap(), 10);
        let request = NodeRequest::AddTask { task };
        let msg = Message::new(topics::NODE_SERVICE, &request).unwrap();

        match msg.decode::<NodeRequest<Fibonacci>>().unwrap() {
            NodeRequest::AddTask { task } => {
                assert_eq!(task.id.to_string(), "alice#1:G0#1");
                assert_eq!(task.layer, 0);
                assert!(matches!(task.body, Body::Decompose { input: 10 }));
            }
            other => panic!("expected AddTask, got {other:?}"),
        }
    }

    #[test]
    fn hello_names_the_callback_endpoint() {
        let request = NodeRequest::<Fibonacci>::Hello {
            peer: PeerKind::Computer,
            node: 3,
            endpoint: Transport::tcp("127.0.0.1", 7103),
        };
        let msg = Message::new(topics::NODE_SERVICE, &request).unwrap();

        match msg.decode::<NodeRequest<Fibonacci>>().unwrap() {
            NodeRequest::Hello {
                peer,
                node,
                endpoint,
            } => {
                assert_eq!(peer, PeerKind::Computer);
                assert_eq!(node, 3);
                assert_eq!(endpoint.endpoint(), "tcp://127.0.0.1:7103");
            }
            other => panic!("expected Hello, got {other:?}"),
        }
    }

    #[test]
    fn register_round_trips_with_budget() {
        let request = ClientRequest::<Fibonacci>::Register {
            name: "alice".into(),
            budget: Some("1:30".into()),
        };
        let msg = Message::new(topics::CLIENT_SERVICE, &request).unwrap();

        match msg.decode::<ClientRequest<Fibonacci>>().unwrap() {
            ClientRequest::Register { name, budget } => {
                assert_eq!(name, "alice");
                assert_eq!(budget.as_deref(), Some("1:30"));
            }
            other => panic!("expected Register, got {other:?}"),
        }
    }

    #[test]
    fn rejections_explain_themselves() {
        let rejection = Rejection::BudgetTooLarge {
            asked: 4000,
            limit: 3600,
        };
        assert_eq!(
            rejection.to_string(),
            "budget of 4000 minutes exceeds the 3600 minute limit"
        );
        assert_eq!(
            Rejection::UnknownClient("bob".into()).to_string(),
            "client \"bob\" is not registered"
        );
    }
}
