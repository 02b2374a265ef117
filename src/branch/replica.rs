use super::state::LedgerState;
use crate::error::DeliveryError;
use crate::ledger::{
    ActorId, ActorKind, CustomerRequest, Delivery, Envelope, Event, Interface, Outcome, Receipt,
};
use crate::transport::PeerTransport;
use parking_lot::Mutex;
use tracing::{debug, warn};

/// One ledger replica.
///
/// Balance and clock sit behind one `parking_lot::Mutex` and are only
/// locked for short, non-awaiting sections. Customer-origin deliveries are
/// additionally serialised end to end by `origin_gate`, which is held across
/// guard check, fan-out and local apply. Propagations from peers never take
/// the gate, so two branches replicating to each other cannot deadlock.
pub struct Branch<T> {
    id: ActorId,
    /// Roster order, self excluded.
    peers: Vec<ActorId>,
    state: Mutex<LedgerState>,
    origin_gate: tokio::sync::Mutex<()>,
    transport: T,
}

impl<T> std::fmt::Debug for Branch<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Branch")
            .field("id", &self.id)
            .field("peers", &self.peers)
            .field("balance", &state.balance())
            .field("clock", &state.clock())
            .finish()
    }
}

impl<T: PeerTransport> Branch<T> {
    /// `roster` lists every branch id in roster order; this replica's own
    /// id is filtered out.
    pub fn new(id: ActorId, balance: i64, roster: &[ActorId], transport: T) -> Self {
        let peers = roster.iter().copied().filter(|peer| *peer != id).collect();
        Branch {
            id,
            peers,
            state: Mutex::new(LedgerState::new(balance)),
            origin_gate: tokio::sync::Mutex::new(()),
            transport,
        }
    }

    pub fn id(&self) -> ActorId {
        self.id
    }

    pub fn peers(&self) -> &[ActorId] {
        &self.peers
    }

    pub fn balance(&self) -> i64 {
        self.state.lock().balance()
    }

    pub fn clock(&self) -> u64 {
        self.state.lock().clock()
    }

    /// Entry point of the `Deliver` RPC.
    pub async fn handle_delivery(&self, envelope: Envelope) -> Result<Delivery, DeliveryError> {
        let first = self.validate(&envelope)?;

        match envelope.sender_kind {
            ActorKind::Customer => {
                let _gate = self.origin_gate.lock().await;
                let mut delivery = Delivery::default();
                delivery.events.push(self.record_reception(&envelope, &first));

                for request in &envelope.requests {
                    let receipt = self.dispatch_customer(request, &mut delivery).await?;
                    delivery.receipts.push(receipt);
                }
                Ok(delivery)
            }
            ActorKind::Branch => {
                let mut delivery = Delivery::default();
                delivery.events.push(self.record_reception(&envelope, &first));

                for request in &envelope.requests {
                    let receipt = self.dispatch_propagation(request)?;
                    delivery.receipts.push(receipt);
                }
                Ok(delivery)
            }
        }
    }

    /// Rejects envelopes this replica cannot process before any state moves.
    fn validate(&self, envelope: &Envelope) -> Result<CustomerRequest, DeliveryError> {
        let first = envelope
            .requests
            .first()
            .copied()
            .ok_or(DeliveryError::EmptyEnvelope {
                sender_id: envelope.sender_id,
                sender_kind: envelope.sender_kind,
            })?;

        for request in &envelope.requests {
            if request.interface.origin() != envelope.sender_kind {
                return Err(DeliveryError::UnexpectedInterface {
                    sender_id: envelope.sender_id,
                    sender_kind: envelope.sender_kind,
                    interface: request.interface,
                });
            }
            if request.amount < 0 {
                return Err(DeliveryError::NegativeAmount {
                    customer_request_id: request.customer_request_id,
                    amount: request.amount,
                });
            }
        }
        Ok(first)
    }

    fn record_reception(&self, envelope: &Envelope, first: &CustomerRequest) -> Event {
        let clock = self.state.lock().tick_on_receive(first.logical_clock);
        debug!(
            branch = self.id,
            from = %envelope.sender_kind,
            sender = envelope.sender_id,
            request = first.customer_request_id,
            clock,
            "delivery received"
        );
        Event::received(
            self.id,
            first,
            envelope.sender_kind,
            envelope.sender_id,
            clock,
        )
    }

    async fn dispatch_customer(
        &self,
        request: &CustomerRequest,
        delivery: &mut Delivery,
    ) -> Result<Receipt, DeliveryError> {
        match request.interface {
            Interface::Query => Ok(self.query(request)),
            Interface::Deposit => self.deposit(request, delivery).await,
            Interface::Withdraw => self.withdraw(request, delivery).await,
            Interface::PropagateDeposit | Interface::PropagateWithdraw => {
                Err(DeliveryError::UnexpectedInterface {
                    sender_id: self.id,
                    sender_kind: ActorKind::Customer,
                    interface: request.interface,
                })
            }
        }
    }

    fn query(&self, request: &CustomerRequest) -> Receipt {
        let balance = self.balance();
        Receipt::new(request, Outcome::Success).with_balance(balance)
    }

    async fn deposit(
        &self,
        request: &CustomerRequest,
        delivery: &mut Delivery,
    ) -> Result<Receipt, DeliveryError> {
        let faults = self.replicate(request, delivery).await;
        if faults > 0 {
            warn!(
                branch = self.id,
                request = request.customer_request_id,
                faults,
                "deposit not applied locally after replication fault"
            );
            return Ok(Receipt::new(request, Outcome::Failed));
        }

        let applied = self.state.lock().credit(request.amount, request.interface);
        match applied {
            Ok(balance) => Ok(Receipt::new(request, Outcome::Success).with_balance(balance)),
            Err(e) => Ok(self.apply_failed(request, delivery, &e)),
        }
    }

    async fn withdraw(
        &self,
        request: &CustomerRequest,
        delivery: &mut Delivery,
    ) -> Result<Receipt, DeliveryError> {
        if !self.state.lock().covers(request.amount) {
            warn!(
                branch = self.id,
                request = request.customer_request_id,
                amount = request.amount,
                "withdraw rejected: insufficient balance"
            );
            return Ok(Receipt::new(request, Outcome::Rejected));
        }

        let faults = self.replicate(request, delivery).await;
        if faults > 0 {
            warn!(
                branch = self.id,
                request = request.customer_request_id,
                faults,
                "withdraw not applied locally after replication fault"
            );
            return Ok(Receipt::new(request, Outcome::Failed));
        }

        // Peers may have propagated their own withdraws while we were
        // replicating; the local balance still never goes below zero.
        let applied = self.state.lock().debit_guarded(request.amount);
        match applied {
            Some(balance) => Ok(Receipt::new(request, Outcome::Success).with_balance(balance)),
            None => Ok(self.apply_failed(request, delivery, &"balance dropped during replication")),
        }
    }

    /// Local apply refused after peers already applied. The refusal is
    /// written onto this branch's reception event for the request.
    fn apply_failed(
        &self,
        request: &CustomerRequest,
        delivery: &mut Delivery,
        cause: &dyn std::fmt::Display,
    ) -> Receipt {
        warn!(
            branch = self.id,
            request = request.customer_request_id,
            interface = %request.interface,
            %cause,
            "not applied locally after replication"
        );
        let reception = delivery.events.iter_mut().find(|e| {
            e.id == self.id
                && e.kind == ActorKind::Branch
                && e.customer_request_id == request.customer_request_id
        });
        if let Some(event) = reception {
            event.mark_failed(cause);
        }
        Receipt::new(request, Outcome::Failed)
    }

    /// Sequential, synchronous fan-out to every peer in roster order.
    ///
    /// Returns the number of peers that did not acknowledge. A fault is
    /// logged and recorded on that peer's "sent" event; remaining peers are
    /// still contacted and peers that already applied are not rolled back.
    async fn replicate(&self, request: &CustomerRequest, delivery: &mut Delivery) -> usize {
        let Some(propagated) = request.interface.propagated() else {
            return 0;
        };
        let mut faults = 0;

        for &peer in &self.peers {
            let clock = self.state.lock().tick_on_send();
            let outgoing = CustomerRequest {
                interface: propagated,
                ..*request
            }
            .stamped(clock);
            let envelope = Envelope::from_branch(self.id, outgoing);

            match self.transport.deliver(peer, envelope).await {
                Ok(reply) => {
                    debug!(branch = self.id, peer, clock, %propagated, "propagation acknowledged");
                    delivery
                        .events
                        .push(Event::propagation_sent(self.id, &outgoing, peer));
                    delivery.events.extend(reply.events);
                }
                Err(e) => {
                    warn!(branch = self.id, peer, clock, error = %e, "replication fault");
                    faults += 1;
                    delivery
                        .events
                        .push(Event::propagation_failed(self.id, &outgoing, peer, &e));
                }
            }
        }
        faults
    }

    /// Single-hop apply of a peer's mutation; never replicates further.
    fn dispatch_propagation(&self, request: &CustomerRequest) -> Result<Receipt, DeliveryError> {
        let balance = match request.interface {
            Interface::PropagateDeposit => self.propagate_deposit(request)?,
            Interface::PropagateWithdraw => self.propagate_withdraw(request)?,
            Interface::Query | Interface::Deposit | Interface::Withdraw => {
                return Err(DeliveryError::UnexpectedInterface {
                    sender_id: self.id,
                    sender_kind: ActorKind::Branch,
                    interface: request.interface,
                });
            }
        };
        Ok(Receipt::new(request, Outcome::Success).with_balance(balance))
    }

    fn propagate_deposit(&self, request: &CustomerRequest) -> Result<i64, DeliveryError> {
        self.state.lock().credit(request.amount, request.interface)
    }

    fn propagate_withdraw(&self, request: &CustomerRequest) -> Result<i64, DeliveryError> {
        self.state.lock().debit(request.amount, request.interface)
    }
}
