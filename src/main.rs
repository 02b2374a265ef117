//! All-in-one run: serve every roster branch over TCP, drive every customer
//! against them, then write the aggregated report.
//!
//! Usage: `ledger-sim [ROSTER]` (default `./input/input.json`). Settings come
//! from the TOML file named by `LEDGER_CONFIG` and `LEDGER_*` variables.

use ledger_sim::observability::init_tracing;
use ledger_sim::runtime::{load_inputs, run_tcp};
use ledger_sim::LedgerError;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(e) = run().await {
        error!(error = %e, "ledger-sim failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), LedgerError> {
    let (roster, config) = load_inputs(std::env::args())?;
    let replication = config.replication_for(&roster.branch_ids())?;

    let summary = run_tcp(&roster, &replication).await?;
    summary.log_balances();
    summary.report.write_to(&config.output_path)?;
    info!(
        customers = summary.report.customers.len(),
        branches = summary.report.branches.len(),
        "run complete"
    );
    Ok(())
}
