mod replica;
pub mod state;

pub use replica::Branch;
pub use state::LedgerState;
