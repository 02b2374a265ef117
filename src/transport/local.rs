use super::{FaultInjector, PeerTransport};
use crate::branch::Branch;
use crate::error::TransportError;
use crate::ledger::{ActorId, Delivery, Envelope};
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::{Arc, Weak};

pub type LocalBranch = Branch<LocalNetwork>;

/// In-process network connecting branches that live in the same runtime.
///
/// Holds weak references only; whoever spawned the branches owns them.
/// Calls are routed straight into `Branch::handle_delivery`, so delivery is
/// reliable and in order unless the fault injector says otherwise.
#[derive(Clone, Default)]
pub struct LocalNetwork {
    inner: Arc<NetworkInner>,
}

#[derive(Default)]
struct NetworkInner {
    branches: RwLock<HashMap<ActorId, Weak<LocalBranch>>>,
    faults: Mutex<FaultInjector>,
}

impl std::fmt::Debug for LocalNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<ActorId> = self.inner.branches.read().keys().copied().collect();
        ids.sort_unstable();
        f.debug_struct("LocalNetwork").field("branches", &ids).finish()
    }
}

impl LocalNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_faults(faults: FaultInjector) -> Self {
        LocalNetwork {
            inner: Arc::new(NetworkInner {
                branches: RwLock::new(HashMap::new()),
                faults: Mutex::new(faults),
            }),
        }
    }

    /// Create a branch wired to this network and register it.
    pub fn spawn_branch(&self, id: ActorId, balance: i64, roster: &[ActorId]) -> Arc<LocalBranch> {
        let branch = Arc::new(Branch::new(id, balance, roster, self.clone()));
        self.inner
            .branches
            .write()
            .insert(id, Arc::downgrade(&branch));
        branch
    }

    pub fn branch(&self, id: ActorId) -> Option<Arc<LocalBranch>> {
        self.inner.branches.read().get(&id).and_then(Weak::upgrade)
    }

    /// Every subsequent call to `id` fails until [`LocalNetwork::restore`].
    pub fn isolate(&self, id: ActorId) {
        self.inner.faults.lock().isolate(id);
    }

    pub fn restore(&self, id: ActorId) {
        self.inner.faults.lock().restore(id);
    }

    pub fn injected_faults(&self) -> u64 {
        self.inner.faults.lock().injected()
    }
}

impl PeerTransport for LocalNetwork {
    fn deliver(
        &self,
        target: ActorId,
        envelope: Envelope,
    ) -> BoxFuture<'_, Result<Delivery, TransportError>> {
        Box::pin(async move {
            if self.inner.faults.lock().should_fail(target) {
                return Err(TransportError::Injected(target));
            }
            let branch = self
                .branch(target)
                .ok_or(TransportError::UnknownPeer(target))?;
            branch
                .handle_delivery(envelope)
                .await
                .map_err(|e| TransportError::Rejected {
                    target,
                    reason: e.to_string(),
                })
        })
    }
}
