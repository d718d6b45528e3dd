use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use super::models::*;
use crate::error::{AppError, AppResult};

/// Read-only projections handed to reporting collaborators.
///
/// Reads here see committed state only and take no locks.
#[async_trait]
pub trait LedgerReader: Send + Sync {
    async fn get_account(&self, account_id: Uuid) -> AppResult<Option<Account>>;

    async fn get_campaign(&self, campaign_id: Uuid) -> AppResult<Option<Campaign>>;

    async fn get_pledge(&self, pledge_id: Uuid) -> AppResult<Option<Pledge>>;

    /// All pledges of a campaign, oldest first
    async fn list_campaign_pledges(&self, campaign_id: Uuid) -> AppResult<Vec<Pledge>>;

    /// Ledger history of an account in append order
    async fn list_account_entries(&self, account_id: Uuid) -> AppResult<Vec<LedgerEntry>>;

    async fn get_settlement_record(&self, campaign_id: Uuid)
        -> AppResult<Option<SettlementRecord>>;

    /// Campaigns with `status = active AND deadline <= now`, earliest deadline first
    async fn list_expired_active_campaigns(&self, now: DateTime<Utc>) -> AppResult<Vec<Campaign>>;
}

/// A ledger store that can open units of work.
///
/// Only [`crate::ledger::unit_of_work::UnitOfWork`] should call `begin`.
#[async_trait]
pub trait LedgerStore: LedgerReader {
    async fn begin(&self) -> AppResult<Box<dyn LedgerTx>>;
}

/// One open unit of work against the store.
///
/// Dropping a transaction without calling `commit` discards every effect.
#[async_trait]
pub trait LedgerTx: Send {
    // ========== LOCKING READS ==========

    async fn account_for_update(&mut self, account_id: Uuid) -> AppResult<Option<Account>>;

    async fn campaign_for_update(&mut self, campaign_id: Uuid) -> AppResult<Option<Campaign>>;

    /// Pending pledges of a campaign, locked, oldest first
    async fn pending_pledges_for_update(&mut self, campaign_id: Uuid) -> AppResult<Vec<Pledge>>;

    async fn settlement_record(&mut self, campaign_id: Uuid) -> AppResult<Option<SettlementRecord>>;

    // ========== MUTATIONS ==========

    async fn insert_account(&mut self, account: &Account) -> AppResult<()>;

    async fn insert_campaign(&mut self, campaign: &Campaign) -> AppResult<()>;

    async fn insert_pledge(&mut self, pledge: &Pledge) -> AppResult<()>;

    async fn update_balance(&mut self, account_id: Uuid, balance: Decimal) -> AppResult<()>;

    async fn update_accumulated_funds(&mut self, campaign_id: Uuid, funds: Decimal)
        -> AppResult<()>;

    /// Compare-and-set on the campaign status
    async fn transition_campaign(
        &mut self,
        campaign_id: Uuid,
        from: CampaignStatus,
        to: CampaignStatus,
    ) -> AppResult<()>;

    /// Compare-and-set on the pledge status
    async fn transition_pledge(
        &mut self,
        pledge_id: Uuid,
        from: PledgeStatus,
        to: PledgeStatus,
    ) -> AppResult<()>;

    async fn append_entry(&mut self, entry: &LedgerEntry) -> AppResult<()>;

    async fn insert_settlement_record(&mut self, record: &SettlementRecord) -> AppResult<()>;

    async fn commit(self: Box<Self>) -> AppResult<()>;

    async fn rollback(self: Box<Self>) -> AppResult<()>;
}

// Column-level rules shared by every store implementation. The Postgres
// schema declares the same rules as CHECK constraints.

fn check_fits_column(column: &str, value: Decimal) -> AppResult<()> {
    if value >= money_limit() {
        return Err(AppError::ConstraintViolation(format!(
            "{} out of range for NUMERIC(20, 2), got {}",
            column, value
        )));
    }
    Ok(())
}

pub(crate) fn check_non_negative(column: &str, value: Decimal) -> AppResult<()> {
    check_fits_column(column, value)?;
    if value < Decimal::ZERO {
        return Err(AppError::ConstraintViolation(format!(
            "{} must not be negative, got {}",
            column, value
        )));
    }
    Ok(())
}

pub(crate) fn check_positive(column: &str, value: Decimal) -> AppResult<()> {
    check_fits_column(column, value)?;
    if value <= Decimal::ZERO {
        return Err(AppError::ConstraintViolation(format!(
            "{} must be positive, got {}",
            column, value
        )));
    }
    Ok(())
}

/// Campaign status may only leave `Active`
pub(crate) fn check_campaign_transition(from: CampaignStatus, to: CampaignStatus) -> AppResult<()> {
    match (from, to) {
        (CampaignStatus::Active, CampaignStatus::Successful)
        | (CampaignStatus::Active, CampaignStatus::Failed) => Ok(()),
        _ => Err(AppError::ConstraintViolation(format!(
            "campaign status cannot move from {} to {}",
            from, to
        ))),
    }
}

/// Pledge status may only leave `Pending`
pub(crate) fn check_pledge_transition(from: PledgeStatus, to: PledgeStatus) -> AppResult<()> {
    match (from, to) {
        (PledgeStatus::Pending, PledgeStatus::Committed)
        | (PledgeStatus::Pending, PledgeStatus::Refunded) => Ok(()),
        _ => Err(AppError::ConstraintViolation(format!(
            "pledge status cannot move from {} to {}",
            from, to
        ))),
    }
}

pub(crate) fn check_entry(entry: &LedgerEntry) -> AppResult<()> {
    check_positive("ledger_entries.amount", entry.amount)?;
    check_non_negative("ledger_entries.balance_after", entry.balance_after)?;
    if entry.kind.apply(entry.balance_before, entry.amount)? != entry.balance_after {
        return Err(AppError::ConstraintViolation(format!(
            "ledger entry {} does not balance: {} {:?} {} != {}",
            entry.id, entry.balance_before, entry.kind, entry.amount, entry.balance_after
        )));
    }
    Ok(())
}
