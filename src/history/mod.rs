//! Causal history aggregation.
//!
//! Runs once over the pooled events of every customer after the last one
//! has finished. Produces three views: per customer, per branch, and the
//! flat causal trace keyed by (request id, logical clock).

use crate::error::{AggregateError, LedgerError};
use crate::ledger::{ActorId, ActorKind, Event, Interface};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::info;

/// One line of an actor's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(rename = "customer-request-id")]
    pub customer_request_id: u64,
    pub logical_clock: u64,
    pub interface: Interface,
    pub comment: String,
}

impl From<&Event> for HistoryEntry {
    fn from(event: &Event) -> Self {
        HistoryEntry {
            customer_request_id: event.customer_request_id,
            logical_clock: event.logical_clock,
            interface: event.interface,
            comment: event.comment.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorHistory {
    pub id: ActorId,
    #[serde(rename = "type")]
    pub kind: ActorKind,
    pub events: Vec<HistoryEntry>,
}

/// The three views, serialised as one document with labelled sections.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatedReport {
    pub customers: Vec<ActorHistory>,
    pub branches: Vec<ActorHistory>,
    pub events: Vec<Event>,
}

impl AggregatedReport {
    pub fn customer(&self, id: ActorId) -> Option<&ActorHistory> {
        self.customers.iter().find(|h| h.id == id)
    }

    pub fn branch(&self, id: ActorId) -> Option<&ActorHistory> {
        self.branches.iter().find(|h| h.id == id)
    }

    /// The causal chain of one request, in trace order.
    pub fn trace_of(&self, customer_request_id: u64) -> impl Iterator<Item = &Event> + '_ {
        self.events
            .iter()
            .filter(move |e| e.customer_request_id == customer_request_id)
    }

    pub fn to_json_pretty(&self) -> Result<String, LedgerError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the report, creating parent directories as needed.
    pub fn write_to(&self, path: &Path) -> Result<(), LedgerError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, self.to_json_pretty()?)?;
        info!(path = %path.display(), events = self.events.len(), "report written");
        Ok(())
    }
}

/// Event pool as read back from disk: either one flat list or one list per
/// customer.
#[derive(Deserialize)]
#[serde(untagged)]
enum PooledEvents {
    Flat(Vec<Event>),
    PerCustomer(Vec<Vec<Event>>),
}

#[derive(Debug, Clone, Default)]
pub struct Aggregator {
    pool: Vec<Event>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_events(events: Vec<Event>) -> Self {
        Aggregator { pool: events }
    }

    pub fn extend(&mut self, events: impl IntoIterator<Item = Event>) {
        self.pool.extend(events);
    }

    pub fn len(&self) -> usize {
        self.pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    /// Add events from a JSON document. Nothing is added if any event is
    /// malformed.
    pub fn ingest_json(&mut self, json: &str) -> Result<usize, AggregateError> {
        let events = match serde_json::from_str::<PooledEvents>(json)? {
            PooledEvents::Flat(events) => events,
            PooledEvents::PerCustomer(lists) => lists.into_iter().flatten().collect(),
        };
        for (index, event) in events.iter().enumerate() {
            if event.logical_clock == 0 {
                return Err(AggregateError::MalformedEvent {
                    index,
                    reason: "logical_clock must be at least 1".into(),
                });
            }
        }
        let added = events.len();
        self.pool.extend(events);
        Ok(added)
    }

    /// Build the three views. The pool is left untouched, so calling this
    /// twice yields the same report.
    pub fn report(&self) -> AggregatedReport {
        let mut customers: BTreeMap<ActorId, Vec<&Event>> = BTreeMap::new();
        let mut branches: BTreeMap<ActorId, Vec<&Event>> = BTreeMap::new();
        for event in &self.pool {
            match event.kind {
                ActorKind::Customer => customers.entry(event.id).or_default().push(event),
                ActorKind::Branch => branches.entry(event.id).or_default().push(event),
            }
        }

        let customers = customers
            .into_iter()
            .map(|(id, mut events)| {
                events.sort_by_key(|e| e.customer_request_id);
                history(id, ActorKind::Customer, &events)
            })
            .collect();

        let branches = branches
            .into_iter()
            .map(|(id, mut events)| {
                events.sort_by_key(|e| e.logical_clock);
                history(id, ActorKind::Branch, &events)
            })
            .collect();

        // Ties on (request, clock) fall back to customer before branch, then
        // lower actor id; `sort_by` is stable for anything left.
        let mut events = self.pool.clone();
        events.sort_by(|a, b| trace_key(a).cmp(&trace_key(b)));

        AggregatedReport {
            customers,
            branches,
            events,
        }
    }
}

fn trace_key(event: &Event) -> (u64, u64, ActorKind, ActorId) {
    (
        event.customer_request_id,
        event.logical_clock,
        event.kind,
        event.id,
    )
}

fn history(id: ActorId, kind: ActorKind, events: &[&Event]) -> ActorHistory {
    ActorHistory {
        id,
        kind,
        events: events.iter().map(|e| HistoryEntry::from(*e)).collect(),
    }
}
