//! Error taxonomy for the ledger.
//!
//! Guard violations are not errors: a withdraw against an insufficient
//! balance is a terminal `Outcome::Rejected` recorded on the receipt.
//! Replication faults surface per peer as [`TransportError`] and turn the
//! originating request into `Outcome::Failed`. Everything here is either a
//! peer-side processing fault or a fatal startup condition.

use crate::ledger::{ActorId, ActorKind, Interface};
use std::io::Error as IoError;

/// Top-level error for startup, orchestration and output.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("malformed input: {0}")]
    Malformed(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("aggregation failed: {0}")]
    Aggregate(#[from] AggregateError),

    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Raised by a replica that refuses to process an envelope.
///
/// Envelope-shape errors are detected before the logical clock or balance is
/// touched. `Overflow` comes from a propagation apply, after the receive tick;
/// the balance is left as it was and the originating branch records the
/// rejection as a replication fault. An overflow on the originating branch's
/// own apply is not raised here but turned into a `failed` receipt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("envelope from {sender_kind} {sender_id} carries no requests")]
    EmptyEnvelope { sender_id: ActorId, sender_kind: ActorKind },

    #[error("{sender_kind} {sender_id} may not invoke {interface}")]
    UnexpectedInterface {
        sender_id: ActorId,
        sender_kind: ActorKind,
        interface: Interface,
    },

    #[error("request {customer_request_id} carries negative amount {amount}")]
    NegativeAmount { customer_request_id: u64, amount: i64 },

    #[error("balance overflow applying {interface} of {amount}")]
    Overflow { interface: Interface, amount: i64 },
}

/// RPC-level failure between two parties.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("no route to branch {0}")]
    UnknownPeer(ActorId),

    #[error("connection to branch {target} failed: {source}")]
    Io {
        target: ActorId,
        #[source]
        source: IoError,
    },

    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("call to branch {target} timed out after {millis}ms")]
    Timeout { target: ActorId, millis: u64 },

    #[error("branch {0} closed the connection without replying")]
    Closed(ActorId),

    #[error("branch {target} rejected delivery: {reason}")]
    Rejected { target: ActorId, reason: String },

    #[error("injected fault on call to branch {0}")]
    Injected(ActorId),
}

/// Failure building the causal history from pooled events.
#[derive(Debug, thiserror::Error)]
pub enum AggregateError {
    #[error("event pool is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("event #{index} is malformed: {reason}")]
    MalformedEvent { index: usize, reason: String },
}
