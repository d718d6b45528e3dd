// In-memory ledger store for tests and local development.
//
// A unit of work holds the table lock for its whole lifetime and mutates a
// private copy of the tables. `commit` publishes the copy; dropping the
// transaction (error, timeout, cancellation) throws it away. Units are
// therefore fully serialized, which is the strongest isolation the Postgres
// store is asked to approximate with row locks.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::models::*;
use super::store::*;
use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, Default)]
struct Tables {
    accounts: HashMap<Uuid, Account>,
    campaigns: HashMap<Uuid, Campaign>,
    pledges: HashMap<Uuid, Pledge>,
    entries: Vec<LedgerEntry>,
    settlements: HashMap<Uuid, SettlementRecord>,
}

impl Tables {
    fn pledges_of(&self, campaign_id: Uuid) -> Vec<Pledge> {
        let mut pledges: Vec<Pledge> = self
            .pledges
            .values()
            .filter(|p| p.campaign_id == campaign_id)
            .cloned()
            .collect();
        pledges.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        pledges
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryLedgerStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerReader for MemoryLedgerStore {
    async fn get_account(&self, account_id: Uuid) -> AppResult<Option<Account>> {
        Ok(self.tables.lock().await.accounts.get(&account_id).cloned())
    }

    async fn get_campaign(&self, campaign_id: Uuid) -> AppResult<Option<Campaign>> {
        Ok(self.tables.lock().await.campaigns.get(&campaign_id).cloned())
    }

    async fn get_pledge(&self, pledge_id: Uuid) -> AppResult<Option<Pledge>> {
        Ok(self.tables.lock().await.pledges.get(&pledge_id).cloned())
    }

    async fn list_campaign_pledges(&self, campaign_id: Uuid) -> AppResult<Vec<Pledge>> {
        Ok(self.tables.lock().await.pledges_of(campaign_id))
    }

    async fn list_account_entries(&self, account_id: Uuid) -> AppResult<Vec<LedgerEntry>> {
        Ok(self
            .tables
            .lock()
            .await
            .entries
            .iter()
            .filter(|e| e.account_id == account_id)
            .cloned()
            .collect())
    }

    async fn get_settlement_record(
        &self,
        campaign_id: Uuid,
    ) -> AppResult<Option<SettlementRecord>> {
        Ok(self.tables.lock().await.settlements.get(&campaign_id).cloned())
    }

    async fn list_expired_active_campaigns(&self, now: DateTime<Utc>) -> AppResult<Vec<Campaign>> {
        let tables = self.tables.lock().await;
        let mut due: Vec<Campaign> = tables
            .campaigns
            .values()
            .filter(|c| c.is_due_at(now))
            .cloned()
            .collect();
        due.sort_by(|a, b| a.deadline.cmp(&b.deadline).then(a.id.cmp(&b.id)));
        Ok(due)
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn begin(&self) -> AppResult<Box<dyn LedgerTx>> {
        let guard = self.tables.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryLedgerTx { guard, working }))
    }
}

struct MemoryLedgerTx {
    guard: OwnedMutexGuard<Tables>,
    working: Tables,
}

fn missing(table: &str, id: Uuid) -> AppError {
    AppError::ConstraintViolation(format!("{} row {} does not exist", table, id))
}

#[async_trait]
impl LedgerTx for MemoryLedgerTx {
    async fn account_for_update(&mut self, account_id: Uuid) -> AppResult<Option<Account>> {
        Ok(self.working.accounts.get(&account_id).cloned())
    }

    async fn campaign_for_update(&mut self, campaign_id: Uuid) -> AppResult<Option<Campaign>> {
        Ok(self.working.campaigns.get(&campaign_id).cloned())
    }

    async fn pending_pledges_for_update(&mut self, campaign_id: Uuid) -> AppResult<Vec<Pledge>> {
        Ok(self
            .working
            .pledges_of(campaign_id)
            .into_iter()
            .filter(|p| p.status == PledgeStatus::Pending)
            .collect())
    }

    async fn settlement_record(&mut self, campaign_id: Uuid) -> AppResult<Option<SettlementRecord>> {
        Ok(self.working.settlements.get(&campaign_id).cloned())
    }

    async fn insert_account(&mut self, account: &Account) -> AppResult<()> {
        check_non_negative("accounts.balance", account.balance)?;
        check_non_negative("accounts.initial_balance", account.initial_balance)?;
        if self.working.accounts.contains_key(&account.id) {
            return Err(AppError::ConstraintViolation(format!(
                "account {} already exists",
                account.id
            )));
        }
        self.working.accounts.insert(account.id, account.clone());
        Ok(())
    }

    async fn insert_campaign(&mut self, campaign: &Campaign) -> AppResult<()> {
        check_positive("campaigns.goal_amount", campaign.goal_amount)?;
        check_non_negative("campaigns.accumulated_funds", campaign.accumulated_funds)?;
        if !self.working.accounts.contains_key(&campaign.creator_account_id) {
            return Err(missing("accounts", campaign.creator_account_id));
        }
        if self.working.campaigns.contains_key(&campaign.id) {
            return Err(AppError::ConstraintViolation(format!(
                "campaign {} already exists",
                campaign.id
            )));
        }
        self.working.campaigns.insert(campaign.id, campaign.clone());
        Ok(())
    }

    async fn insert_pledge(&mut self, pledge: &Pledge) -> AppResult<()> {
        check_positive("pledges.amount", pledge.amount)?;
        if !self.working.accounts.contains_key(&pledge.backer_account_id) {
            return Err(missing("accounts", pledge.backer_account_id));
        }
        if !self.working.campaigns.contains_key(&pledge.campaign_id) {
            return Err(missing("campaigns", pledge.campaign_id));
        }
        if self.working.pledges.contains_key(&pledge.id) {
            return Err(AppError::ConstraintViolation(format!(
                "pledge {} already exists",
                pledge.id
            )));
        }
        self.working.pledges.insert(pledge.id, pledge.clone());
        Ok(())
    }

    async fn update_balance(&mut self, account_id: Uuid, balance: Decimal) -> AppResult<()> {
        check_non_negative("accounts.balance", balance)?;
        let account = self
            .working
            .accounts
            .get_mut(&account_id)
            .ok_or_else(|| missing("accounts", account_id))?;
        account.balance = balance;
        account.updated_at = Utc::now();
        Ok(())
    }

    async fn update_accumulated_funds(
        &mut self,
        campaign_id: Uuid,
        funds: Decimal,
    ) -> AppResult<()> {
        check_non_negative("campaigns.accumulated_funds", funds)?;
        let campaign = self
            .working
            .campaigns
            .get_mut(&campaign_id)
            .ok_or_else(|| missing("campaigns", campaign_id))?;
        campaign.accumulated_funds = funds;
        campaign.updated_at = Utc::now();
        Ok(())
    }

    async fn transition_campaign(
        &mut self,
        campaign_id: Uuid,
        from: CampaignStatus,
        to: CampaignStatus,
    ) -> AppResult<()> {
        check_campaign_transition(from, to)?;
        let campaign = self
            .working
            .campaigns
            .get_mut(&campaign_id)
            .ok_or_else(|| missing("campaigns", campaign_id))?;
        if campaign.status != from {
            return Err(AppError::ConstraintViolation(format!(
                "campaign {} is {}, expected {}",
                campaign_id, campaign.status, from
            )));
        }
        campaign.status = to;
        campaign.updated_at = Utc::now();
        Ok(())
    }

    async fn transition_pledge(
        &mut self,
        pledge_id: Uuid,
        from: PledgeStatus,
        to: PledgeStatus,
    ) -> AppResult<()> {
        check_pledge_transition(from, to)?;
        let pledge = self
            .working
            .pledges
            .get_mut(&pledge_id)
            .ok_or_else(|| missing("pledges", pledge_id))?;
        if pledge.status != from {
            return Err(AppError::ConstraintViolation(format!(
                "pledge {} is {}, expected {}",
                pledge_id, pledge.status, from
            )));
        }
        pledge.status = to;
        pledge.updated_at = Utc::now();
        Ok(())
    }

    async fn append_entry(&mut self, entry: &LedgerEntry) -> AppResult<()> {
        check_entry(entry)?;
        if !self.working.accounts.contains_key(&entry.account_id) {
            return Err(missing("accounts", entry.account_id));
        }
        self.working.entries.push(entry.clone());
        Ok(())
    }

    async fn insert_settlement_record(&mut self, record: &SettlementRecord) -> AppResult<()> {
        check_non_negative("settlement_records.amount", record.amount)?;
        if !self.working.campaigns.contains_key(&record.campaign_id) {
            return Err(missing("campaigns", record.campaign_id));
        }
        if self.working.settlements.contains_key(&record.campaign_id) {
            return Err(AppError::ConstraintViolation(format!(
                "campaign {} already has a settlement record",
                record.campaign_id
            )));
        }
        self.working
            .settlements
            .insert(record.campaign_id, record.clone());
        Ok(())
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        let MemoryLedgerTx { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> AppResult<()> {
        Ok(())
    }
}
