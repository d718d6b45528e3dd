use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use crate::ledger::models::{Account, Campaign, CampaignStatus, LedgerEntry, SettlementRecord};

/// Account with its ledger reconciliation result
#[derive(Debug, Serialize)]
pub struct AccountResponse {
    #[serde(flatten)]
    pub account: Account,
    /// Stored balance equals the balance rebuilt from entries
    pub ledger_consistent: bool,
}

#[derive(Debug, Serialize)]
pub struct EntriesResponse {
    pub account_id: Uuid,
    pub entries: Vec<LedgerEntry>,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_debits: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_credits: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub total_refunds: Decimal,
}

#[derive(Debug, Serialize)]
pub struct CampaignResponse {
    #[serde(flatten)]
    pub campaign: Campaign,
    /// Sum of pending and committed pledges
    #[serde(with = "rust_decimal::serde::float")]
    pub pledged_funds: Decimal,
}

#[derive(Debug, Serialize)]
pub struct SettlementStatusResponse {
    pub campaign_id: Uuid,
    pub status: CampaignStatus,
    pub record: Option<SettlementRecord>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: DateTime<Utc>,
    pub store: String,
    pub scheduler_running: bool,
    /// Expired campaigns still waiting for a settlement pass
    pub awaiting_settlement: Option<usize>,
}
