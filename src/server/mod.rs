//! TCP front end of a branch replica.
//!
//! Each accepted connection gets its own task. Deliveries are admitted
//! through two pools of `max_workers` permits each, one for customer traffic
//! and one for propagations. A propagation never waits on anything once
//! admitted, so keeping it out of the customer pool means two branches
//! replicating to each other cannot starve one another of permits.
//! Mutual exclusion on balance and clock is the branch's own concern.

use crate::branch::Branch;
use crate::ledger::{ActorId, ActorKind, Envelope};
use crate::replication::ReplicationConfig;
use crate::transport::tcp::frame_codec;
use crate::transport::{PeerTransport, Reply};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub struct BranchServer<T> {
    branch: Arc<Branch<T>>,
    listener: TcpListener,
    workers: Arc<WorkerPools>,
    max_frame_bytes: usize,
}

struct WorkerPools {
    customer: Semaphore,
    propagation: Semaphore,
}

impl WorkerPools {
    fn new(max_workers: usize) -> Self {
        WorkerPools {
            customer: Semaphore::new(max_workers),
            propagation: Semaphore::new(max_workers),
        }
    }

    fn for_sender(&self, kind: ActorKind) -> &Semaphore {
        match kind {
            ActorKind::Customer => &self.customer,
            ActorKind::Branch => &self.propagation,
        }
    }
}

impl<T: PeerTransport> BranchServer<T> {
    /// Wrap an already bound listener. Binding happens first so that the
    /// address book can be built from the real local addresses.
    pub fn new(branch: Arc<Branch<T>>, listener: TcpListener, config: &ReplicationConfig) -> Self {
        BranchServer {
            branch,
            listener,
            workers: Arc::new(WorkerPools::new(config.max_workers)),
            max_frame_bytes: config.max_frame_bytes,
        }
    }

    pub fn branch_id(&self) -> ActorId {
        self.branch.id()
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `shutdown` fires.
    pub async fn serve(self, shutdown: CancellationToken) {
        let id = self.branch.id();
        match self.listener.local_addr() {
            Ok(addr) => info!(branch = id, %addr, "branch server listening"),
            Err(e) => warn!(branch = id, error = %e, "branch server listening on unknown address"),
        }

        loop {
            let accepted = tokio::select! {
                accepted = self.listener.accept() => accepted,
                () = shutdown.cancelled() => break,
            };

            match accepted {
                Ok((stream, peer_addr)) => {
                    debug!(branch = id, %peer_addr, "connection accepted");
                    let branch = self.branch.clone();
                    let workers = self.workers.clone();
                    let max_frame_bytes = self.max_frame_bytes;
                    let shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        tokio::select! {
                            result = handle_connection(stream, branch, workers, max_frame_bytes) => {
                                if let Err(e) = result {
                                    warn!(branch = id, %peer_addr, error = %e, "connection error");
                                }
                            }
                            () = shutdown.cancelled() => {}
                        }
                    });
                }
                Err(e) => {
                    error!(branch = id, error = %e, "failed to accept connection");
                }
            }
        }
        info!(branch = id, "branch server stopped");
    }
}

async fn handle_connection<T: PeerTransport>(
    stream: TcpStream,
    branch: Arc<Branch<T>>,
    workers: Arc<WorkerPools>,
    max_frame_bytes: usize,
) -> std::io::Result<()> {
    stream.set_nodelay(true)?;
    let mut framed = tokio_util::codec::Framed::new(stream, frame_codec(max_frame_bytes));

    while let Some(frame) = framed.next().await {
        let frame = frame?;
        let reply = match serde_json::from_slice::<Envelope>(&frame) {
            Ok(envelope) => {
                let _permit = workers
                    .for_sender(envelope.sender_kind)
                    .acquire()
                    .await
                    .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
                match branch.handle_delivery(envelope).await {
                    Ok(delivery) => Reply::Delivered { delivery },
                    Err(e) => {
                        warn!(branch = branch.id(), error = %e, "delivery rejected");
                        Reply::Rejected {
                            reason: e.to_string(),
                        }
                    }
                }
            }
            Err(e) => {
                warn!(branch = branch.id(), error = %e, "undecodable envelope");
                Reply::Rejected {
                    reason: format!("undecodable envelope: {}", e),
                }
            }
        };

        let payload = reply
            .serialize()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        framed.send(Bytes::from(payload)).await?;
    }
    Ok(())
}
