//! Orchestration: boot the branches, run every customer concurrently, wait
//! for all of them, then aggregate.

use crate::branch::Branch;
use crate::config::LedgerConfig;
use crate::customer::{CustomerDriver, CustomerRun};
use crate::error::LedgerError;
use crate::history::{AggregatedReport, Aggregator};
use crate::ledger::{ActorId, Receipt};
use crate::replication::ReplicationConfig;
use crate::roster::Roster;
use crate::server::BranchServer;
use crate::transport::{AddressBook, LocalNetwork, PeerTransport, TcpTransport};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub const DEFAULT_ROSTER_PATH: &str = "./input/input.json";

/// Everything a finished run produced.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub report: AggregatedReport,
    /// Final balance per branch, read after the last customer finished.
    pub balances: BTreeMap<ActorId, i64>,
    /// One entry per customer, ordered by customer id.
    pub runs: Vec<CustomerRun>,
}

impl RunSummary {
    pub fn receipts(&self) -> impl Iterator<Item = &Receipt> + '_ {
        self.runs.iter().flat_map(|run| run.receipts.iter())
    }

    pub fn log_balances(&self) {
        for (id, balance) in &self.balances {
            info!(branch = id, balance, "final balance");
        }
    }
}

/// Roster path from the first argument, config path from `LEDGER_CONFIG`.
pub fn load_inputs(args: impl IntoIterator<Item = String>) -> Result<(Roster, LedgerConfig), LedgerError> {
    let roster_path = args
        .into_iter()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ROSTER_PATH));
    let config_path = std::env::var("LEDGER_CONFIG").ok().map(PathBuf::from);

    let config = LedgerConfig::load(config_path.as_deref())?;
    let roster = Roster::load(&roster_path)?;
    info!(
        roster = %roster_path.display(),
        branches = roster.branches.len(),
        customers = roster.customers.len(),
        "inputs loaded"
    );
    Ok((roster, config))
}

/// Run every customer as its own task and wait for all of them.
pub async fn drive_customers<T>(roster: &Roster, transport: T) -> Result<Vec<CustomerRun>, LedgerError>
where
    T: PeerTransport + Clone,
{
    let mut tasks = JoinSet::new();
    for customer in &roster.customers {
        let driver = CustomerDriver::new(customer.id, customer.schedule(), transport.clone());
        tasks.spawn(driver.run());
    }

    let mut runs = Vec::with_capacity(roster.customers.len());
    while let Some(joined) = tasks.join_next().await {
        runs.push(joined?);
    }
    runs.sort_by_key(|run| run.customer_id);
    Ok(runs)
}

pub fn aggregate(runs: &[CustomerRun]) -> AggregatedReport {
    let mut aggregator = Aggregator::new();
    for run in runs {
        aggregator.extend(run.events.iter().cloned());
    }
    aggregator.report()
}

/// Whole run in process, over a [`LocalNetwork`].
pub async fn run_local(roster: &Roster) -> Result<RunSummary, LedgerError> {
    run_on(roster, LocalNetwork::new()).await
}

/// Whole run over a caller-supplied network, e.g. one with faults injected.
pub async fn run_on(roster: &Roster, network: LocalNetwork) -> Result<RunSummary, LedgerError> {
    roster.validate()?;
    let ids = roster.branch_ids();
    let branches: Vec<_> = roster
        .branches
        .iter()
        .map(|spec| network.spawn_branch(spec.id, spec.balance, &ids))
        .collect();

    let runs = drive_customers(roster, network).await?;
    let balances = branches.iter().map(|b| (b.id(), b.balance())).collect();
    Ok(RunSummary {
        report: aggregate(&runs),
        balances,
        runs,
    })
}

/// Every roster branch served over TCP from this process.
pub struct TcpCluster {
    branches: Vec<Arc<Branch<TcpTransport>>>,
    transport: TcpTransport,
    shutdown: CancellationToken,
    servers: JoinSet<()>,
}

impl TcpCluster {
    /// Bind every listener first, then build the address book from the
    /// bound addresses, so ephemeral ports work the same as derived ones.
    pub async fn boot(roster: &Roster, config: &ReplicationConfig) -> Result<Self, LedgerError> {
        let ids = roster.branch_ids();
        let mut book = AddressBook::new();
        let mut listeners = Vec::with_capacity(ids.len());
        for spec in &roster.branches {
            let addr = config.addr_for(spec.id)?;
            let listener = TcpListener::bind(addr).await?;
            book.insert(spec.id, listener.local_addr()?);
            listeners.push((*spec, listener));
        }

        let transport = TcpTransport::new(book, config);
        let shutdown = CancellationToken::new();
        let mut servers = JoinSet::new();
        let mut branches = Vec::with_capacity(listeners.len());
        for (spec, listener) in listeners {
            let branch = Arc::new(Branch::new(spec.id, spec.balance, &ids, transport.clone()));
            info!(branch = spec.id, balance = spec.balance, "branch started");
            let server = BranchServer::new(branch.clone(), listener, config);
            servers.spawn(server.serve(shutdown.clone()));
            branches.push(branch);
        }

        Ok(TcpCluster {
            branches,
            transport,
            shutdown,
            servers,
        })
    }

    pub fn transport(&self) -> TcpTransport {
        self.transport.clone()
    }

    pub fn book(&self) -> &AddressBook {
        self.transport.book()
    }

    pub fn balances(&self) -> BTreeMap<ActorId, i64> {
        self.branches.iter().map(|b| (b.id(), b.balance())).collect()
    }

    /// Stop accepting and wait for every server task.
    pub async fn shutdown(mut self) -> Result<(), LedgerError> {
        self.shutdown.cancel();
        while let Some(joined) = self.servers.join_next().await {
            joined?;
        }
        Ok(())
    }
}

/// Whole run over TCP: boot, drive, barrier, aggregate, stop.
pub async fn run_tcp(roster: &Roster, config: &ReplicationConfig) -> Result<RunSummary, LedgerError> {
    roster.validate()?;
    let cluster = TcpCluster::boot(roster, config).await?;
    let runs = drive_customers(roster, cluster.transport()).await?;
    let balances = cluster.balances();
    cluster.shutdown().await?;

    Ok(RunSummary {
        report: aggregate(&runs),
        balances,
        runs,
    })
}

/// Drive the roster's customers against branches already running elsewhere
/// at their derived addresses.
pub async fn run_against(roster: &Roster, config: &ReplicationConfig) -> Result<AggregatedReport, LedgerError> {
    let book = AddressBook::derived(config, &roster.branch_ids())?;
    let runs = drive_customers(roster, TcpTransport::new(book, config)).await?;
    Ok(aggregate(&runs))
}
