pub mod error;
pub mod ledger;
pub mod replication;
pub mod branch;
pub mod transport;
pub mod server;
pub mod customer;
pub mod history;
pub mod roster;
pub mod config;
pub mod observability;
pub mod runtime;

#[cfg(test)]
mod stateright;

pub use error::LedgerError;
pub use ledger::{ActorId, ActorKind, CustomerRequest, Delivery, Envelope, Event, Interface, Outcome, Receipt};
pub use replication::{LamportClock, ReplicationConfig};
pub use branch::Branch;
pub use customer::{CustomerDriver, CustomerRun, ScheduledRequest};
pub use history::{AggregatedReport, Aggregator};
pub use roster::Roster;
pub use config::LedgerConfig;
