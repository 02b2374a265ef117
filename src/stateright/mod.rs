//! Stateright models for the ledger.
//!
//! - `ledger`: guarded withdraw interleaved with propagations from peers
//!
//! ```bash
//! # Larger configurations are marked #[ignore]
//! cargo test stateright -- --ignored --nocapture
//! ```

pub mod ledger;
