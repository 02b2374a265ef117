//! Runtime configuration.
//!
//! Loaded from an optional TOML file, then overridden from the environment:
//! - `LEDGER_BASE_PORT`: first port of the branch range (default: 50050)
//! - `LEDGER_HOST`: address branches bind and dial (default: 127.0.0.1)
//! - `LEDGER_RPC_TIMEOUT_MS`: per-call timeout (default: 5000)
//! - `LEDGER_MAX_WORKERS`: concurrent deliveries per branch (default: 10)
//! - `LEDGER_OUTPUT`: where the aggregated report is written

use crate::error::LedgerError;
use crate::ledger::ActorId;
use crate::replication::config::{
    DEFAULT_BASE_PORT, DEFAULT_MAX_FRAME_BYTES, DEFAULT_MAX_WORKERS, DEFAULT_RPC_TIMEOUT_MS,
};
use crate::replication::ReplicationConfig;
use serde::Deserialize;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_OUTPUT_PATH: &str = "./output/output.json";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LedgerConfig {
    pub host: IpAddr,
    /// Branch `id` listens on `base_port + id`. Zero picks ephemeral ports.
    pub base_port: u16,
    pub rpc_timeout_ms: u64,
    pub max_workers: usize,
    pub max_frame_bytes: usize,
    pub output_path: PathBuf,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        let replication = ReplicationConfig::default();
        LedgerConfig {
            host: replication.host,
            base_port: DEFAULT_BASE_PORT,
            rpc_timeout_ms: DEFAULT_RPC_TIMEOUT_MS,
            max_workers: DEFAULT_MAX_WORKERS,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            output_path: PathBuf::from(DEFAULT_OUTPUT_PATH),
        }
    }
}

impl LedgerConfig {
    pub fn from_toml(text: &str) -> Result<Self, LedgerError> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, LedgerError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            LedgerError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&text)
    }

    /// File (if any), then environment.
    pub fn load(path: Option<&Path>) -> Result<Self, LedgerError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env()?;
        Ok(config)
    }

    pub fn apply_env(&mut self) -> Result<(), LedgerError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply `LEDGER_*` overrides from any key lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), LedgerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("LEDGER_HOST") {
            self.host = parse_var("LEDGER_HOST", &v)?;
        }
        if let Some(v) = lookup("LEDGER_BASE_PORT") {
            self.base_port = parse_var("LEDGER_BASE_PORT", &v)?;
        }
        if let Some(v) = lookup("LEDGER_RPC_TIMEOUT_MS") {
            self.rpc_timeout_ms = parse_var("LEDGER_RPC_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("LEDGER_MAX_WORKERS") {
            self.max_workers = parse_var("LEDGER_MAX_WORKERS", &v)?;
        }
        if let Some(v) = lookup("LEDGER_OUTPUT") {
            self.output_path = PathBuf::from(v);
        }
        Ok(())
    }

    /// Validated network settings.
    pub fn replication(&self) -> Result<ReplicationConfig, LedgerError> {
        let config = ReplicationConfig {
            host: self.host,
            base_port: self.base_port,
            rpc_timeout: Duration::from_millis(self.rpc_timeout_ms),
            max_workers: self.max_workers,
            max_frame_bytes: self.max_frame_bytes,
        };
        config.validate()?;
        Ok(config)
    }

    /// Network settings checked against every branch id of a roster.
    pub fn replication_for(&self, branch_ids: &[ActorId]) -> Result<ReplicationConfig, LedgerError> {
        let config = self.replication()?;
        for &id in branch_ids {
            config.addr_for(id)?;
        }
        Ok(config)
    }
}

fn parse_var<T: FromStr>(key: &str, value: &str) -> Result<T, LedgerError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| LedgerError::Config(format!("{}={:?}: {}", key, value, e)))
}
