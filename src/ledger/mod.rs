//! Shared data model: requests, envelopes, events and receipts.

pub mod types;

pub use types::{
    ActorId, ActorKind, CustomerRequest, Delivery, Envelope, Event, Interface, Outcome, Receipt,
};
