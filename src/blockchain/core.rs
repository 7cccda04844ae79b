// Ledger responsibilities: block storage and queries, consensus rules, balances.
pub mod chain;
pub mod state;
pub mod validation;

pub use chain::*;
pub use state::*;
pub use validation::*;
