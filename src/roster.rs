//! Roster file: the branches to boot and the customers to drive.
//!
//! A JSON list of entries tagged by `type`:
//!
//! ```json
//! [
//!   {"type": "branch", "id": 1, "balance": 100},
//!   {"type": "customer", "id": 1, "customer-requests": [
//!     {"customer_request_id": 1, "interface": "deposit", "amount": 50}
//!   ]}
//! ]
//! ```

use crate::customer::ScheduledRequest;
use crate::error::LedgerError;
use crate::ledger::{ActorId, ActorKind, CustomerRequest, Interface};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RosterEntry {
    Branch(BranchSpec),
    Customer(CustomerSpec),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchSpec {
    pub id: ActorId,
    pub balance: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerSpec {
    pub id: ActorId,
    #[serde(rename = "customer-requests", alias = "requests", alias = "events")]
    pub requests: Vec<RequestSpec>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestSpec {
    #[serde(alias = "customer-request-id", alias = "id")]
    pub customer_request_id: u64,
    pub interface: Interface,
    #[serde(default, alias = "money")]
    pub amount: i64,
    /// Target branch; the customer's own id when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<ActorId>,
}

impl CustomerSpec {
    /// Requests in submission order, each paired with its target branch.
    pub fn schedule(&self) -> Vec<ScheduledRequest> {
        self.requests
            .iter()
            .map(|spec| ScheduledRequest {
                request: CustomerRequest::new(spec.customer_request_id, spec.interface, spec.amount),
                branch: spec.branch.unwrap_or(self.id),
            })
            .collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Roster {
    /// In file order, which is also the fan-out order of every branch.
    pub branches: Vec<BranchSpec>,
    pub customers: Vec<CustomerSpec>,
}

impl Roster {
    pub fn new(entries: Vec<RosterEntry>) -> Self {
        let mut roster = Roster::default();
        for entry in entries {
            match entry {
                RosterEntry::Branch(branch) => roster.branches.push(branch),
                RosterEntry::Customer(customer) => roster.customers.push(customer),
            }
        }
        roster
    }

    /// Parse and validate.
    pub fn from_json(json: &str) -> Result<Self, LedgerError> {
        let entries: Vec<RosterEntry> = serde_json::from_str(json)
            .map_err(|e| LedgerError::Malformed(format!("roster: {}", e)))?;
        let roster = Roster::new(entries);
        roster.validate()?;
        Ok(roster)
    }

    pub fn load(path: &Path) -> Result<Self, LedgerError> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            LedgerError::Malformed(format!("cannot read roster {}: {}", path.display(), e))
        })?;
        Self::from_json(&json)
    }

    pub fn branch_ids(&self) -> Vec<ActorId> {
        self.branches.iter().map(|b| b.id).collect()
    }

    pub fn validate(&self) -> Result<(), LedgerError> {
        let mut branch_ids = HashSet::new();
        for branch in &self.branches {
            if !branch_ids.insert(branch.id) {
                return Err(duplicate(ActorKind::Branch, branch.id));
            }
            if branch.balance < 0 {
                return Err(LedgerError::Malformed(format!(
                    "branch {} starts with negative balance {}",
                    branch.id, branch.balance
                )));
            }
        }

        let mut customer_ids = HashSet::new();
        for customer in &self.customers {
            if !customer_ids.insert(customer.id) {
                return Err(duplicate(ActorKind::Customer, customer.id));
            }
            let mut request_ids = HashSet::new();
            for spec in &customer.requests {
                if !request_ids.insert(spec.customer_request_id) {
                    return Err(LedgerError::Malformed(format!(
                        "customer {} repeats request id {}",
                        customer.id, spec.customer_request_id
                    )));
                }
                if spec.interface.origin() != ActorKind::Customer {
                    return Err(LedgerError::Malformed(format!(
                        "customer {} request {} uses branch-only interface {}",
                        customer.id, spec.customer_request_id, spec.interface
                    )));
                }
                if spec.amount < 0 {
                    return Err(LedgerError::Malformed(format!(
                        "customer {} request {} has negative amount {}",
                        customer.id, spec.customer_request_id, spec.amount
                    )));
                }
                let target = spec.branch.unwrap_or(customer.id);
                if !branch_ids.contains(&target) {
                    return Err(LedgerError::Malformed(format!(
                        "customer {} request {} targets unknown branch {}",
                        customer.id, spec.customer_request_id, target
                    )));
                }
            }
        }
        Ok(())
    }
}

fn duplicate(kind: ActorKind, id: ActorId) -> LedgerError {
    LedgerError::Malformed(format!("duplicate {} id {}", kind, id))
}
