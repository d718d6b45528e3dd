pub mod api;
pub mod bootstrap;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod ledger;
pub mod pledge;
pub mod server;
pub mod settlement;

#[cfg(test)]
pub(crate) mod testing;
