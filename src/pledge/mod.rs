// Pledge acceptance
pub mod models;
pub mod processor;

pub use models::{PledgeReceipt, PledgeRequest};
pub use processor::PledgeProcessor;
