//! Drive every roster customer against branches served by `branch-server`,
//! then write the aggregated report.
//!
//! Usage: `customer-driver [ROSTER]`.

use ledger_sim::observability::init_tracing;
use ledger_sim::runtime::{load_inputs, run_against};
use ledger_sim::LedgerError;
use tracing::error;

#[tokio::main]
async fn main() {
    init_tracing();
    if let Err(e) = run().await {
        error!(error = %e, "customer-driver failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), LedgerError> {
    let (roster, config) = load_inputs(std::env::args())?;
    let replication = config.replication_for(&roster.branch_ids())?;

    let report = run_against(&roster, &replication).await?;
    report.write_to(&config.output_path)
}
