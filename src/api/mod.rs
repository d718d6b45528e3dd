// HTTP adapter over the pledge processor, settlement scheduler and ledger reads
pub mod handler;
pub mod models;

pub use handler::AppState;
