use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a customer or branch, unique within its kind.
pub type ActorId = u32;

/// Which side of the system performed an action.
///
/// Declaration order is the tie-break order of the causal trace:
/// customer events sort ahead of branch events sharing a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorKind {
    Customer,
    Branch,
}

impl ActorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActorKind::Customer => "customer",
            ActorKind::Branch => "branch",
        }
    }
}

impl fmt::Display for ActorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed set of operations a replica understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Interface {
    Query,
    Deposit,
    Withdraw,
    PropagateDeposit,
    PropagateWithdraw,
}

impl Interface {
    pub fn as_str(&self) -> &'static str {
        match self {
            Interface::Query => "query",
            Interface::Deposit => "deposit",
            Interface::Withdraw => "withdraw",
            Interface::PropagateDeposit => "propagate_deposit",
            Interface::PropagateWithdraw => "propagate_withdraw",
        }
    }

    /// The kind of sender allowed to invoke this interface.
    pub fn origin(&self) -> ActorKind {
        match self {
            Interface::Query | Interface::Deposit | Interface::Withdraw => ActorKind::Customer,
            Interface::PropagateDeposit | Interface::PropagateWithdraw => ActorKind::Branch,
        }
    }

    /// The propagate-kind interface a peer receives for this mutation.
    /// Queries are never replicated.
    pub fn propagated(&self) -> Option<Interface> {
        match self {
            Interface::Deposit => Some(Interface::PropagateDeposit),
            Interface::Withdraw => Some(Interface::PropagateWithdraw),
            Interface::Query | Interface::PropagateDeposit | Interface::PropagateWithdraw => None,
        }
    }

    pub fn is_mutation(&self) -> bool {
        !matches!(self, Interface::Query)
    }
}

impl fmt::Display for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of work from a customer, or its propagated copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerRequest {
    pub customer_request_id: u64,
    pub interface: Interface,
    pub amount: i64,
    /// Sender's clock at the moment this request left it.
    pub logical_clock: u64,
}

impl CustomerRequest {
    pub fn new(customer_request_id: u64, interface: Interface, amount: i64) -> Self {
        CustomerRequest {
            customer_request_id,
            interface,
            amount,
            logical_clock: 0,
        }
    }

    pub fn stamped(mut self, logical_clock: u64) -> Self {
        self.logical_clock = logical_clock;
        self
    }
}

/// Immutable audit record of one action taken anywhere in the system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: ActorId,
    #[serde(rename = "customer-request-id", alias = "customer_request_id")]
    pub customer_request_id: u64,
    #[serde(rename = "type")]
    pub kind: ActorKind,
    pub logical_clock: u64,
    pub interface: Interface,
    pub comment: String,
}

impl Event {
    /// Recorded by a customer right before a request leaves it.
    pub fn customer_sent(customer: ActorId, request: &CustomerRequest, clock: u64) -> Self {
        Event {
            id: customer,
            customer_request_id: request.customer_request_id,
            kind: ActorKind::Customer,
            logical_clock: clock,
            interface: request.interface,
            comment: format!("event_sent from customer {}", customer),
        }
    }

    /// Recorded by a branch on every inbound call, after the receive tick.
    pub fn received(
        branch: ActorId,
        request: &CustomerRequest,
        sender_kind: ActorKind,
        sender_id: ActorId,
        clock: u64,
    ) -> Self {
        Event {
            id: branch,
            customer_request_id: request.customer_request_id,
            kind: ActorKind::Branch,
            logical_clock: clock,
            interface: request.interface,
            comment: format!("event_received from {} {}", sender_kind, sender_id),
        }
    }

    /// Recorded by an originating branch for each propagation it sends.
    pub fn propagation_sent(branch: ActorId, request: &CustomerRequest, peer: ActorId) -> Self {
        Event {
            id: branch,
            customer_request_id: request.customer_request_id,
            kind: ActorKind::Branch,
            logical_clock: request.logical_clock,
            interface: request.interface,
            comment: format!("event_sent to branch {}", peer),
        }
    }

    /// Same as [`Event::propagation_sent`] but for a call that did not complete.
    pub fn propagation_failed(
        branch: ActorId,
        request: &CustomerRequest,
        peer: ActorId,
        cause: &dyn fmt::Display,
    ) -> Self {
        let mut event = Self::propagation_sent(branch, request, peer);
        event.mark_failed(cause);
        event
    }

    /// Append the failure cause to this event's comment.
    pub fn mark_failed(&mut self, cause: &dyn fmt::Display) {
        self.comment = format!("{} (failed: {})", self.comment, cause);
    }
}

/// The payload of every `Deliver` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub sender_id: ActorId,
    pub sender_kind: ActorKind,
    pub requests: Vec<CustomerRequest>,
}

impl Envelope {
    pub fn from_customer(customer: ActorId, request: CustomerRequest) -> Self {
        Envelope {
            sender_id: customer,
            sender_kind: ActorKind::Customer,
            requests: vec![request],
        }
    }

    pub fn from_branch(branch: ActorId, request: CustomerRequest) -> Self {
        Envelope {
            sender_id: branch,
            sender_kind: ActorKind::Branch,
            requests: vec![request],
        }
    }
}

/// Terminal result of one request at the replica that handled it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    /// Replication or the local apply did not complete; the local balance
    /// was left unchanged.
    Failed,
    /// Withdraw guard did not pass; nothing was sent.
    Rejected,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Outcome::Success => "success",
            Outcome::Failed => "failed",
            Outcome::Rejected => "rejected",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    #[serde(rename = "customer-request-id", alias = "customer_request_id")]
    pub customer_request_id: u64,
    pub interface: Interface,
    pub result: Outcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance: Option<i64>,
}

impl Receipt {
    pub fn new(request: &CustomerRequest, result: Outcome) -> Self {
        Receipt {
            customer_request_id: request.customer_request_id,
            interface: request.interface,
            result,
            balance: None,
        }
    }

    pub fn with_balance(mut self, balance: i64) -> Self {
        self.balance = Some(balance);
        self
    }
}

/// Response to a `Deliver` call: the ordered event trace plus one receipt
/// per request processed by the callee.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    pub events: Vec<Event>,
    #[serde(default)]
    pub receipts: Vec<Receipt>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_propagated_interface() {
        assert_eq!(Interface::Deposit.propagated(), Some(Interface::PropagateDeposit));
        assert_eq!(Interface::Withdraw.propagated(), Some(Interface::PropagateWithdraw));
        assert_eq!(Interface::Query.propagated(), None);
        assert_eq!(Interface::PropagateDeposit.propagated(), None);
    }

    #[test]
    fn test_interface_origin() {
        assert_eq!(Interface::Withdraw.origin(), ActorKind::Customer);
        assert_eq!(Interface::PropagateWithdraw.origin(), ActorKind::Branch);
    }

    #[test]
    fn test_event_wire_names() {
        let request = CustomerRequest::new(7, Interface::Deposit, 50).stamped(3);
        let event = Event::customer_sent(1, &request, 3);
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["customer-request-id"], 7);
        assert_eq!(json["type"], "customer");
        assert_eq!(json["interface"], "deposit");
        assert_eq!(json["comment"], "event_sent from customer 1");
    }

    #[test]
    fn test_event_accepts_underscore_request_id() {
        let json = r#"{"id":2,"customer_request_id":4,"type":"branch",
            "logical_clock":9,"interface":"propagate_withdraw","comment":"x"}"#;
        let event: Event = serde_json::from_str(json).unwrap();
        assert_eq!(event.customer_request_id, 4);
        assert_eq!(event.kind, ActorKind::Branch);
        assert_eq!(event.interface, Interface::PropagateWithdraw);
    }

    #[test]
    fn test_failed_propagation_comment() {
        let request = CustomerRequest::new(1, Interface::PropagateDeposit, 10).stamped(4);
        let event = Event::propagation_failed(1, &request, 3, &"timed out");
        assert_eq!(event.comment, "event_sent to branch 3 (failed: timed out)");
        assert_eq!(event.logical_clock, 4);
    }

    #[test]
    fn test_query_receipt_omits_balance_when_absent() {
        let request = CustomerRequest::new(1, Interface::Deposit, 10);
        let receipt = Receipt::new(&request, Outcome::Success);
        let json = serde_json::to_string(&receipt).unwrap();
        assert!(!json.contains("balance"));
    }
}
