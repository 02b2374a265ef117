//! Serve every roster branch at `host:base_port + id` until Ctrl-C.
//!
//! Usage: `branch-server [ROSTER]`. Customers are ignored; run
//! `customer-driver` against the same roster to drive them.

use ledger_sim::observability::init_tracing;
use ledger_sim::runtime::{load_inputs, TcpCluster};
use ledger_sim::LedgerError;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(e) = run().await {
        error!(error = %e, "branch-server failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), LedgerError> {
    let (roster, config) = load_inputs(std::env::args())?;
    let replication = config.replication_for(&roster.branch_ids())?;

    let cluster = TcpCluster::boot(&roster, &replication).await?;
    info!(branches = cluster.book().len(), "serving; Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    for (id, balance) in cluster.balances() {
        info!(branch = id, balance, "final balance");
    }
    cluster.shutdown().await
}
