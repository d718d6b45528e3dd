use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{postgres::PgPoolOptions, prelude::FromRow, types::BigDecimal, PgPool, Postgres, Transaction};
use std::str::FromStr;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use super::models::*;
use super::store::*;
use crate::config::Config;
use crate::error::{AppError, AppResult};

/// Postgres ledger store - THE source of truth for all balances
pub struct PgLedgerStore {
    pub pool: PgPool,
    lock_timeout_ms: u64,
}

impl PgLedgerStore {
    pub fn new(pool: PgPool, lock_timeout_ms: u64) -> Self {
        Self {
            pool,
            lock_timeout_ms,
        }
    }

    pub async fn connect(config: &Config) -> AppResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.db_max_connections)
            .acquire_timeout(Duration::from_millis(config.unit_timeout_ms))
            .connect(&config.database_url)
            .await?;

        info!("✅ Connected to ledger database");
        Ok(Self::new(pool, config.lock_timeout_ms))
    }

    pub async fn migrate(&self) -> AppResult<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("✅ Ledger migrations applied");
        Ok(())
    }
}

// ========== ROW MAPPING ==========

fn to_big(value: Decimal) -> AppResult<BigDecimal> {
    BigDecimal::from_str(&value.to_string())
        .map_err(|e| AppError::Internal(format!("Decimal conversion error: {:?}", e)))
}

fn to_decimal(value: &BigDecimal) -> AppResult<Decimal> {
    Ok(Decimal::from_str(&value.to_string())?)
}

#[derive(FromRow)]
struct AccountRow {
    id: Uuid,
    owner_id: Uuid,
    balance: BigDecimal,
    initial_balance: BigDecimal,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<AccountRow> for Account {
    type Error = AppError;

    fn try_from(row: AccountRow) -> AppResult<Self> {
        Ok(Account {
            id: row.id,
            owner_id: row.owner_id,
            balance: to_decimal(&row.balance)?,
            initial_balance: to_decimal(&row.initial_balance)?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct CampaignRow {
    id: Uuid,
    creator_account_id: Uuid,
    goal_amount: BigDecimal,
    accumulated_funds: BigDecimal,
    deadline: DateTime<Utc>,
    status: CampaignStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<CampaignRow> for Campaign {
    type Error = AppError;

    fn try_from(row: CampaignRow) -> AppResult<Self> {
        Ok(Campaign {
            id: row.id,
            creator_account_id: row.creator_account_id,
            goal_amount: to_decimal(&row.goal_amount)?,
            accumulated_funds: to_decimal(&row.accumulated_funds)?,
            deadline: row.deadline,
            status: row.status,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct PledgeRow {
    id: Uuid,
    backer_account_id: Uuid,
    campaign_id: Uuid,
    amount: BigDecimal,
    status: PledgeStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PledgeRow> for Pledge {
    type Error = AppError;

    fn try_from(row: PledgeRow) -> AppResult<Self> {
        Ok(Pledge {
            id: row.id,
            backer_account_id: row.backer_account_id,
            campaign_id: row.campaign_id,
            amount: to_decimal(&row.amount)?,
            status: row.status,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct LedgerEntryRow {
    id: Uuid,
    account_id: Uuid,
    kind: EntryKind,
    amount: BigDecimal,
    balance_before: BigDecimal,
    balance_after: BigDecimal,
    reference: Uuid,
    created_at: DateTime<Utc>,
}

impl TryFrom<LedgerEntryRow> for LedgerEntry {
    type Error = AppError;

    fn try_from(row: LedgerEntryRow) -> AppResult<Self> {
        Ok(LedgerEntry {
            id: row.id,
            account_id: row.account_id,
            kind: row.kind,
            amount: to_decimal(&row.amount)?,
            balance_before: to_decimal(&row.balance_before)?,
            balance_after: to_decimal(&row.balance_after)?,
            reference: row.reference,
            created_at: row.created_at,
        })
    }
}

#[derive(FromRow)]
struct SettlementRecordRow {
    campaign_id: Uuid,
    outcome: SettlementOutcome,
    amount: BigDecimal,
    settled_at: DateTime<Utc>,
}

impl TryFrom<SettlementRecordRow> for SettlementRecord {
    type Error = AppError;

    fn try_from(row: SettlementRecordRow) -> AppResult<Self> {
        Ok(SettlementRecord {
            campaign_id: row.campaign_id,
            outcome: row.outcome,
            amount: to_decimal(&row.amount)?,
            settled_at: row.settled_at,
        })
    }
}

fn convert_all<R, T>(rows: Vec<R>) -> AppResult<Vec<T>>
where
    T: TryFrom<R, Error = AppError>,
{
    rows.into_iter().map(T::try_from).collect()
}

const ACCOUNT_COLUMNS: &str = "id, owner_id, balance, initial_balance, created_at, updated_at";
const CAMPAIGN_COLUMNS: &str = "id, creator_account_id, goal_amount, accumulated_funds, deadline, status, created_at, updated_at";
const PLEDGE_COLUMNS: &str =
    "id, backer_account_id, campaign_id, amount, status, created_at, updated_at";
const ENTRY_COLUMNS: &str =
    "id, account_id, kind, amount, balance_before, balance_after, reference, created_at";
const SETTLEMENT_COLUMNS: &str = "campaign_id, outcome, amount, settled_at";

// ========== READ-ONLY PROJECTIONS ==========

#[async_trait]
impl LedgerReader for PgLedgerStore {
    async fn get_account(&self, account_id: Uuid) -> AppResult<Option<Account>> {
        sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {} FROM accounts WHERE id = $1",
            ACCOUNT_COLUMNS
        ))
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?
        .map(Account::try_from)
        .transpose()
    }

    async fn get_campaign(&self, campaign_id: Uuid) -> AppResult<Option<Campaign>> {
        sqlx::query_as::<_, CampaignRow>(&format!(
            "SELECT {} FROM campaigns WHERE id = $1",
            CAMPAIGN_COLUMNS
        ))
        .bind(campaign_id)
        .fetch_optional(&self.pool)
        .await?
        .map(Campaign::try_from)
        .transpose()
    }

    async fn get_pledge(&self, pledge_id: Uuid) -> AppResult<Option<Pledge>> {
        sqlx::query_as::<_, PledgeRow>(&format!(
            "SELECT {} FROM pledges WHERE id = $1",
            PLEDGE_COLUMNS
        ))
        .bind(pledge_id)
        .fetch_optional(&self.pool)
        .await?
        .map(Pledge::try_from)
        .transpose()
    }

    async fn list_campaign_pledges(&self, campaign_id: Uuid) -> AppResult<Vec<Pledge>> {
        let rows = sqlx::query_as::<_, PledgeRow>(&format!(
            "SELECT {} FROM pledges WHERE campaign_id = $1 ORDER BY created_at, id",
            PLEDGE_COLUMNS
        ))
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await?;

        convert_all(rows)
    }

    async fn list_account_entries(&self, account_id: Uuid) -> AppResult<Vec<LedgerEntry>> {
        let rows = sqlx::query_as::<_, LedgerEntryRow>(&format!(
            "SELECT {} FROM ledger_entries WHERE account_id = $1 ORDER BY seq",
            ENTRY_COLUMNS
        ))
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        convert_all(rows)
    }

    async fn get_settlement_record(
        &self,
        campaign_id: Uuid,
    ) -> AppResult<Option<SettlementRecord>> {
        sqlx::query_as::<_, SettlementRecordRow>(&format!(
            "SELECT {} FROM settlement_records WHERE campaign_id = $1",
            SETTLEMENT_COLUMNS
        ))
        .bind(campaign_id)
        .fetch_optional(&self.pool)
        .await?
        .map(SettlementRecord::try_from)
        .transpose()
    }

    async fn list_expired_active_campaigns(&self, now: DateTime<Utc>) -> AppResult<Vec<Campaign>> {
        let rows = sqlx::query_as::<_, CampaignRow>(&format!(
            "SELECT {} FROM campaigns WHERE status = $1 AND deadline <= $2 ORDER BY deadline, id",
            CAMPAIGN_COLUMNS
        ))
        .bind(CampaignStatus::Active)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;

        convert_all(rows)
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn begin(&self) -> AppResult<Box<dyn LedgerTx>> {
        let mut tx = self.pool.begin().await?;

        // SET cannot take bind parameters; the value is an integer from config
        sqlx::query(&format!("SET LOCAL lock_timeout = '{}ms'", self.lock_timeout_ms))
            .execute(&mut *tx)
            .await?;

        Ok(Box::new(PgLedgerTx { tx }))
    }
}

// ========== UNIT OF WORK ==========

struct PgLedgerTx {
    tx: Transaction<'static, Postgres>,
}

fn expect_one(rows_affected: u64, what: &str, id: Uuid) -> AppResult<()> {
    if rows_affected == 0 {
        return Err(AppError::ConstraintViolation(format!(
            "{} {} was not updated",
            what, id
        )));
    }
    Ok(())
}

#[async_trait]
impl LedgerTx for PgLedgerTx {
    async fn account_for_update(&mut self, account_id: Uuid) -> AppResult<Option<Account>> {
        sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {} FROM accounts WHERE id = $1 FOR UPDATE",
            ACCOUNT_COLUMNS
        ))
        .bind(account_id)
        .fetch_optional(&mut *self.tx)
        .await?
        .map(Account::try_from)
        .transpose()
    }

    async fn campaign_for_update(&mut self, campaign_id: Uuid) -> AppResult<Option<Campaign>> {
        sqlx::query_as::<_, CampaignRow>(&format!(
            "SELECT {} FROM campaigns WHERE id = $1 FOR UPDATE",
            CAMPAIGN_COLUMNS
        ))
        .bind(campaign_id)
        .fetch_optional(&mut *self.tx)
        .await?
        .map(Campaign::try_from)
        .transpose()
    }

    async fn pending_pledges_for_update(&mut self, campaign_id: Uuid) -> AppResult<Vec<Pledge>> {
        let rows = sqlx::query_as::<_, PledgeRow>(&format!(
            "SELECT {} FROM pledges WHERE campaign_id = $1 AND status = $2 ORDER BY created_at, id FOR UPDATE",
            PLEDGE_COLUMNS
        ))
        .bind(campaign_id)
        .bind(PledgeStatus::Pending)
        .fetch_all(&mut *self.tx)
        .await?;

        convert_all(rows)
    }

    async fn settlement_record(&mut self, campaign_id: Uuid) -> AppResult<Option<SettlementRecord>> {
        sqlx::query_as::<_, SettlementRecordRow>(&format!(
            "SELECT {} FROM settlement_records WHERE campaign_id = $1",
            SETTLEMENT_COLUMNS
        ))
        .bind(campaign_id)
        .fetch_optional(&mut *self.tx)
        .await?
        .map(SettlementRecord::try_from)
        .transpose()
    }

    async fn insert_account(&mut self, account: &Account) -> AppResult<()> {
        check_non_negative("accounts.balance", account.balance)?;

        sqlx::query(
            r#"
            INSERT INTO accounts (id, owner_id, balance, initial_balance, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(account.id)
        .bind(account.owner_id)
        .bind(to_big(account.balance)?)
        .bind(to_big(account.initial_balance)?)
        .bind(account.created_at)
        .bind(account.updated_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn insert_campaign(&mut self, campaign: &Campaign) -> AppResult<()> {
        check_positive("campaigns.goal_amount", campaign.goal_amount)?;

        sqlx::query(
            r#"
            INSERT INTO campaigns (
                id, creator_account_id, goal_amount, accumulated_funds,
                deadline, status, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(campaign.id)
        .bind(campaign.creator_account_id)
        .bind(to_big(campaign.goal_amount)?)
        .bind(to_big(campaign.accumulated_funds)?)
        .bind(campaign.deadline)
        .bind(campaign.status)
        .bind(campaign.created_at)
        .bind(campaign.updated_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn insert_pledge(&mut self, pledge: &Pledge) -> AppResult<()> {
        check_positive("pledges.amount", pledge.amount)?;

        sqlx::query(
            r#"
            INSERT INTO pledges (id, backer_account_id, campaign_id, amount, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(pledge.id)
        .bind(pledge.backer_account_id)
        .bind(pledge.campaign_id)
        .bind(to_big(pledge.amount)?)
        .bind(pledge.status)
        .bind(pledge.created_at)
        .bind(pledge.updated_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn update_balance(&mut self, account_id: Uuid, balance: Decimal) -> AppResult<()> {
        check_non_negative("accounts.balance", balance)?;

        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET balance = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(account_id)
        .bind(to_big(balance)?)
        .execute(&mut *self.tx)
        .await?;

        expect_one(result.rows_affected(), "account", account_id)
    }

    async fn update_accumulated_funds(
        &mut self,
        campaign_id: Uuid,
        funds: Decimal,
    ) -> AppResult<()> {
        check_non_negative("campaigns.accumulated_funds", funds)?;

        let result = sqlx::query(
            r#"
            UPDATE campaigns
            SET accumulated_funds = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(campaign_id)
        .bind(to_big(funds)?)
        .execute(&mut *self.tx)
        .await?;

        expect_one(result.rows_affected(), "campaign", campaign_id)
    }

    async fn transition_campaign(
        &mut self,
        campaign_id: Uuid,
        from: CampaignStatus,
        to: CampaignStatus,
    ) -> AppResult<()> {
        check_campaign_transition(from, to)?;

        let result = sqlx::query(
            r#"
            UPDATE campaigns
            SET status = $3, updated_at = NOW()
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(campaign_id)
        .bind(from)
        .bind(to)
        .execute(&mut *self.tx)
        .await?;

        expect_one(result.rows_affected(), "campaign status of", campaign_id)
    }

    async fn transition_pledge(
        &mut self,
        pledge_id: Uuid,
        from: PledgeStatus,
        to: PledgeStatus,
    ) -> AppResult<()> {
        check_pledge_transition(from, to)?;

        let result = sqlx::query(
            r#"
            UPDATE pledges
            SET status = $3, updated_at = NOW()
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(pledge_id)
        .bind(from)
        .bind(to)
        .execute(&mut *self.tx)
        .await?;

        expect_one(result.rows_affected(), "pledge status of", pledge_id)
    }

    async fn append_entry(&mut self, entry: &LedgerEntry) -> AppResult<()> {
        check_entry(entry)?;

        sqlx::query(
            r#"
            INSERT INTO ledger_entries (
                id, account_id, kind, amount, balance_before, balance_after, reference, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(entry.id)
        .bind(entry.account_id)
        .bind(entry.kind)
        .bind(to_big(entry.amount)?)
        .bind(to_big(entry.balance_before)?)
        .bind(to_big(entry.balance_after)?)
        .bind(entry.reference)
        .bind(entry.created_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn insert_settlement_record(&mut self, record: &SettlementRecord) -> AppResult<()> {
        check_non_negative("settlement_records.amount", record.amount)?;

        sqlx::query(
            r#"
            INSERT INTO settlement_records (campaign_id, outcome, amount, settled_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(record.campaign_id)
        .bind(record.outcome)
        .bind(to_big(record.amount)?)
        .bind(record.settled_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn commit(self: Box<Self>) -> AppResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> AppResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
