//! Customer driver: issues a fixed list of requests, one at a time, and
//! captures the events and receipts each call produces.

use crate::ledger::{ActorId, CustomerRequest, Envelope, Event, Outcome, Receipt};
use crate::replication::LamportClock;
use crate::transport::PeerTransport;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// A request together with the branch it is sent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduledRequest {
    pub request: CustomerRequest,
    pub branch: ActorId,
}

/// Everything a customer observed over its run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerRun {
    pub customer_id: ActorId,
    /// Own sent events followed, per request, by the trail returned by
    /// the branch.
    pub events: Vec<Event>,
    pub receipts: Vec<Receipt>,
}

impl CustomerRun {
    pub fn outcomes(&self) -> impl Iterator<Item = Outcome> + '_ {
        self.receipts.iter().map(|r| r.result)
    }
}

pub struct CustomerDriver<T> {
    id: ActorId,
    requests: Vec<ScheduledRequest>,
    clock: LamportClock,
    transport: T,
}

impl<T: PeerTransport> CustomerDriver<T> {
    pub fn new(id: ActorId, requests: Vec<ScheduledRequest>, transport: T) -> Self {
        CustomerDriver {
            id,
            requests,
            clock: LamportClock::new(),
            transport,
        }
    }

    pub fn id(&self) -> ActorId {
        self.id
    }

    /// Send every request in order, waiting for each reply before the next.
    ///
    /// A request whose call fails gets a `failed` receipt and the cause on
    /// its sent event; the run carries on with the next one.
    pub async fn run(mut self) -> CustomerRun {
        info!(customer = self.id, requests = self.requests.len(), "customer started");
        let mut run = CustomerRun {
            customer_id: self.id,
            ..CustomerRun::default()
        };

        for scheduled in std::mem::take(&mut self.requests) {
            let clock = self.clock.tick_on_send();
            let request = scheduled.request.stamped(clock);
            run.events.push(Event::customer_sent(self.id, &request, clock));
            debug!(
                customer = self.id,
                branch = scheduled.branch,
                request = request.customer_request_id,
                interface = %request.interface,
                clock,
                "sending request"
            );

            match self
                .transport
                .deliver(scheduled.branch, Envelope::from_customer(self.id, request))
                .await
            {
                Ok(delivery) => {
                    run.events.extend(delivery.events);
                    run.receipts.extend(delivery.receipts);
                }
                Err(e) => {
                    warn!(
                        customer = self.id,
                        branch = scheduled.branch,
                        request = request.customer_request_id,
                        error = %e,
                        "request failed"
                    );
                    if let Some(sent) = run.events.last_mut() {
                        sent.mark_failed(&e);
                    }
                    run.receipts.push(Receipt::new(&request, Outcome::Failed));
                }
            }
        }

        info!(customer = self.id, events = run.events.len(), "customer finished");
        run
    }
}
