//! RPC plumbing for the single `Deliver(envelope) -> Delivery` operation.
//!
//! - `tcp`: length-delimited JSON frames over TCP, one connection per call
//! - `local`: in-process routing between `Branch` instances, with seeded
//!   fault injection for deterministic tests

pub mod fault;
pub mod local;
pub mod tcp;

use crate::error::TransportError;
use crate::ledger::{ActorId, Delivery, Envelope};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

pub use fault::FaultInjector;
pub use local::LocalNetwork;
pub use tcp::{AddressBook, TcpTransport};

/// Outbound side of `Deliver`, used by branches to reach peers and by
/// customers to reach branches.
///
/// The call blocks the caller until the callee has fully processed the
/// envelope, including any replication it triggers.
pub trait PeerTransport: Send + Sync + 'static {
    fn deliver(
        &self,
        target: ActorId,
        envelope: Envelope,
    ) -> BoxFuture<'_, Result<Delivery, TransportError>>;
}

/// Response frame of a `Deliver` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Reply {
    Delivered { delivery: Delivery },
    Rejected { reason: String },
}

impl Reply {
    pub fn into_result(self, target: ActorId) -> Result<Delivery, TransportError> {
        match self {
            Reply::Delivered { delivery } => Ok(delivery),
            Reply::Rejected { reason } => Err(TransportError::Rejected { target, reason }),
        }
    }

    pub fn serialize(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(data)
    }
}
