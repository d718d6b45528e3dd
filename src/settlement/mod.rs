// Campaign settlement: the executor settles one campaign, the scheduler
// finds expired ones and drives the executor
pub mod executor;
pub mod scheduler;

pub use executor::{SettleOutcome, SettlementExecutor, SettlementReport};
pub use scheduler::{SettlementScheduler, TickOutcome, TickSummary};
