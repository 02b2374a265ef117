use super::{PeerTransport, Reply};
use crate::error::{LedgerError, TransportError};
use crate::ledger::{ActorId, ActorKind, Delivery, Envelope};
use crate::replication::ReplicationConfig;
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};

/// Branch id to socket address.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressBook {
    addrs: HashMap<ActorId, SocketAddr>,
}

impl AddressBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Addresses derived as `host:base_port + id`.
    pub fn derived(config: &ReplicationConfig, ids: &[ActorId]) -> Result<Self, LedgerError> {
        let mut book = AddressBook::new();
        for &id in ids {
            book.insert(id, config.addr_for(id)?);
        }
        Ok(book)
    }

    pub fn insert(&mut self, id: ActorId, addr: SocketAddr) {
        self.addrs.insert(id, addr);
    }

    pub fn get(&self, id: ActorId) -> Option<SocketAddr> {
        self.addrs.get(&id).copied()
    }

    pub fn len(&self) -> usize {
        self.addrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addrs.is_empty()
    }
}

/// Length-delimited codec shared by client and server.
///
/// Frame layout: [4 bytes big-endian length][JSON payload]
pub fn frame_codec(max_frame_bytes: usize) -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_length(4)
        .big_endian()
        .max_frame_length(max_frame_bytes)
        .new_codec()
}

/// `Deliver` over TCP. Opens one connection per call and waits for the
/// single reply frame.
///
/// A propagation is bounded by the configured RPC timeout. A customer call
/// also waits out the origin's fan-out, where every peer gets its own RPC
/// timeout, so it is bounded by one timeout per branch in the book. A
/// customer queued behind other customers at the same branch can still
/// outlast that; it then records the request as failed even though the
/// origin may go on to commit it.
#[derive(Debug, Clone)]
pub struct TcpTransport {
    book: Arc<AddressBook>,
    timeout: Duration,
    max_frame_bytes: usize,
}

impl TcpTransport {
    pub fn new(book: AddressBook, config: &ReplicationConfig) -> Self {
        TcpTransport {
            book: Arc::new(book),
            timeout: config.rpc_timeout,
            max_frame_bytes: config.max_frame_bytes,
        }
    }

    pub fn book(&self) -> &AddressBook {
        &self.book
    }

    /// How long a single call may take end to end.
    pub fn budget(&self, sender_kind: ActorKind) -> Duration {
        match sender_kind {
            ActorKind::Branch => self.timeout,
            ActorKind::Customer => {
                let branches = u32::try_from(self.book.len()).unwrap_or(u32::MAX).max(1);
                self.timeout.saturating_mul(branches)
            }
        }
    }

    async fn call(&self, target: ActorId, addr: SocketAddr, envelope: &Envelope) -> Result<Delivery, TransportError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| TransportError::Io { target, source })?;
        stream
            .set_nodelay(true)
            .map_err(|source| TransportError::Io { target, source })?;
        let mut framed = Framed::new(stream, frame_codec(self.max_frame_bytes));

        let payload = serde_json::to_vec(envelope)?;
        framed
            .send(Bytes::from(payload))
            .await
            .map_err(|source| TransportError::Io { target, source })?;

        let frame = match framed.next().await {
            Some(frame) => frame.map_err(|source| TransportError::Io { target, source })?,
            None => return Err(TransportError::Closed(target)),
        };
        Reply::deserialize(&frame)?.into_result(target)
    }
}

impl PeerTransport for TcpTransport {
    fn deliver(
        &self,
        target: ActorId,
        envelope: Envelope,
    ) -> BoxFuture<'_, Result<Delivery, TransportError>> {
        Box::pin(async move {
            let addr = self.book.get(target).ok_or(TransportError::UnknownPeer(target))?;
            let budget = self.budget(envelope.sender_kind);
            match tokio::time::timeout(budget, self.call(target, addr, &envelope)).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout {
                    target,
                    millis: budget.as_millis() as u64,
                }),
            }
        })
    }
}
