use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::Type;
use std::fmt;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// Money columns are `NUMERIC(20, 2)`: every amount stays below 10^18
pub fn money_limit() -> Decimal {
    Decimal::from(1_000_000_000_000_000_000_i64)
}

/// Campaign lifecycle; leaves `Active` at most once
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "campaign_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    Active,
    Successful,
    Failed,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Active => "active",
            CampaignStatus::Successful => "successful",
            CampaignStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, CampaignStatus::Active)
    }
}

impl fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "pledge_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PledgeStatus {
    Pending,
    Committed,
    Refunded,
}

impl PledgeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PledgeStatus::Pending => "pending",
            PledgeStatus::Committed => "committed",
            PledgeStatus::Refunded => "refunded",
        }
    }

    /// Pledges whose amount still counts toward the campaign total
    pub fn counts_toward_total(&self) -> bool {
        matches!(self, PledgeStatus::Pending | PledgeStatus::Committed)
    }
}

impl fmt::Display for PledgeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "ledger_entry_kind", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Debit,
    Credit,
    Refund,
}

impl EntryKind {
    /// Signed effect of `amount` on the account balance
    pub fn apply(&self, balance: Decimal, amount: Decimal) -> AppResult<Decimal> {
        let applied = match self {
            EntryKind::Debit => balance.checked_sub(amount),
            EntryKind::Credit | EntryKind::Refund => balance.checked_add(amount),
        };
        applied.ok_or_else(|| {
            AppError::ConstraintViolation(format!(
                "{:?} of {} on balance {} overflows",
                self, amount, balance
            ))
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "settlement_outcome", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SettlementOutcome {
    Released,
    Refunded,
}

/// Backer or creator wallet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub owner_id: Uuid,
    #[serde(with = "rust_decimal::serde::float")]
    pub balance: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub initial_balance: Decimal,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn can_cover(&self, amount: Decimal) -> bool {
        self.balance >= amount
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Campaign {
    pub id: Uuid,
    pub creator_account_id: Uuid,
    #[serde(with = "rust_decimal::serde::float")]
    pub goal_amount: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub accumulated_funds: Decimal,
    pub deadline: DateTime<Utc>,
    pub status: CampaignStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    /// Pledges are accepted only while active and strictly before the deadline
    pub fn accepts_pledges_at(&self, now: DateTime<Utc>) -> bool {
        self.status == CampaignStatus::Active && now < self.deadline
    }

    /// Due for settlement once the deadline is reached
    pub fn is_due_at(&self, now: DateTime<Utc>) -> bool {
        self.status == CampaignStatus::Active && self.deadline <= now
    }

    pub fn goal_met(&self) -> bool {
        self.accumulated_funds >= self.goal_amount
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pledge {
    pub id: Uuid,
    pub backer_account_id: Uuid,
    pub campaign_id: Uuid,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub status: PledgeStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Append-only record of one balance change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    pub account_id: Uuid,
    pub kind: EntryKind,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub balance_before: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub balance_after: Decimal,
    /// Pledge id for debits and refunds, campaign id for credits
    pub reference: Uuid,
    pub created_at: DateTime<Utc>,
}

/// Written once per campaign; its presence proves the campaign was settled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementRecord {
    pub campaign_id: Uuid,
    pub outcome: SettlementOutcome,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
    pub settled_at: DateTime<Utc>,
}
