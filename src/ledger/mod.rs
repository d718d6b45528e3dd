// Ledger storage and the unit-of-work coordinator
pub mod audit;
pub mod memory;
pub mod models;
pub mod posting;
pub mod postgres;
pub mod registry;
pub mod store;
pub mod unit_of_work;

pub use store::{LedgerReader, LedgerStore, LedgerTx};
pub use unit_of_work::{UnitOfWork, UnitPolicy, Work};
