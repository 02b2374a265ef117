use crate::error::LedgerError;
use crate::ledger::ActorId;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

/// Fixed base port; branch `id` listens on `DEFAULT_BASE_PORT + id`.
pub const DEFAULT_BASE_PORT: u16 = 50050;
pub const DEFAULT_RPC_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_MAX_WORKERS: usize = 10;
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024;

/// Network and concurrency settings shared by branches and drivers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationConfig {
    pub host: IpAddr,
    /// Zero binds every branch on an ephemeral port (tests).
    pub base_port: u16,
    pub rpc_timeout: Duration,
    /// Concurrent deliveries a branch server executes at once.
    pub max_workers: usize,
    pub max_frame_bytes: usize,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        ReplicationConfig {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            base_port: DEFAULT_BASE_PORT,
            rpc_timeout: Duration::from_millis(DEFAULT_RPC_TIMEOUT_MS),
            max_workers: DEFAULT_MAX_WORKERS,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

impl ReplicationConfig {
    /// Loopback config with ephemeral ports, for tests.
    pub fn ephemeral() -> Self {
        ReplicationConfig {
            base_port: 0,
            ..Self::default()
        }
    }

    /// Address a branch listens on, derived from the base port.
    pub fn addr_for(&self, id: ActorId) -> Result<SocketAddr, LedgerError> {
        if self.base_port == 0 {
            return Ok(SocketAddr::new(self.host, 0));
        }
        let port = u16::try_from(id)
            .ok()
            .and_then(|id| self.base_port.checked_add(id))
            .ok_or_else(|| {
                LedgerError::Config(format!(
                    "branch {} does not fit above base port {}",
                    id, self.base_port
                ))
            })?;
        Ok(SocketAddr::new(self.host, port))
    }

    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.max_workers == 0 {
            return Err(LedgerError::Config("max_workers must be at least 1".into()));
        }
        if self.rpc_timeout.is_zero() {
            return Err(LedgerError::Config("rpc_timeout must be non-zero".into()));
        }
        if self.max_frame_bytes < 64 {
            return Err(LedgerError::Config(format!(
                "max_frame_bytes {} is too small",
                self.max_frame_bytes
            )));
        }
        Ok(())
    }
}
