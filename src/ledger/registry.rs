use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use super::models::{money_limit, Account, Campaign, CampaignStatus};
use super::store::LedgerTx;
use super::unit_of_work::{UnitOfWork, Work};
use crate::clock::Clock;
use crate::error::{AppError, AppResult, BusinessRuleViolation};

pub(crate) fn validate_not_nil(id: &Uuid) -> Result<(), ValidationError> {
    if id.is_nil() {
        return Err(ValidationError::new("nil_id"));
    }
    Ok(())
}

/// Money carries at most two decimal places and fits the money columns
pub(crate) fn validate_money_scale(amount: &Decimal) -> Result<(), ValidationError> {
    if amount.normalize().scale() > 2 {
        return Err(ValidationError::new("too_many_decimal_places"));
    }
    if *amount >= money_limit() {
        return Err(ValidationError::new("exceeds_money_limit"));
    }
    Ok(())
}

pub(crate) fn validate_positive(amount: &Decimal) -> Result<(), ValidationError> {
    if *amount <= Decimal::ZERO {
        return Err(ValidationError::new("must_be_positive"));
    }
    validate_money_scale(amount)
}

fn validate_non_negative(amount: &Decimal) -> Result<(), ValidationError> {
    if *amount < Decimal::ZERO {
        return Err(ValidationError::new("must_not_be_negative"));
    }
    validate_money_scale(amount)
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct OpenAccountRequest {
    #[validate(custom = "validate_not_nil")]
    pub owner_id: Uuid,
    #[validate(custom = "validate_non_negative")]
    pub initial_balance: Decimal,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateCampaignRequest {
    #[validate(custom = "validate_not_nil")]
    pub creator_account_id: Uuid,
    #[validate(custom = "validate_positive")]
    pub goal_amount: Decimal,
    pub deadline: DateTime<Utc>,
}

struct OpenAccount {
    owner_id: Uuid,
    initial_balance: Decimal,
    now: DateTime<Utc>,
}

#[async_trait]
impl Work for OpenAccount {
    type Output = Account;

    fn name(&self) -> &'static str {
        "open_account"
    }

    async fn run(&self, tx: &mut dyn LedgerTx) -> AppResult<Account> {
        let account = Account {
            id: Uuid::new_v4(),
            owner_id: self.owner_id,
            balance: self.initial_balance,
            initial_balance: self.initial_balance,
            created_at: self.now,
            updated_at: self.now,
        };
        tx.insert_account(&account).await?;
        Ok(account)
    }
}

struct CreateCampaign {
    request: CreateCampaignRequest,
    now: DateTime<Utc>,
}

#[async_trait]
impl Work for CreateCampaign {
    type Output = Campaign;

    fn name(&self) -> &'static str {
        "create_campaign"
    }

    async fn run(&self, tx: &mut dyn LedgerTx) -> AppResult<Campaign> {
        let creator = self.request.creator_account_id;
        if tx.account_for_update(creator).await?.is_none() {
            return Err(BusinessRuleViolation::AccountNotFound(creator).into());
        }

        let campaign = Campaign {
            id: Uuid::new_v4(),
            creator_account_id: creator,
            goal_amount: self.request.goal_amount,
            accumulated_funds: Decimal::ZERO,
            deadline: self.request.deadline,
            status: CampaignStatus::Active,
            created_at: self.now,
            updated_at: self.now,
        };
        tx.insert_campaign(&campaign).await?;
        Ok(campaign)
    }
}

/// Opens wallets and campaigns; the entry points that create ledger rows
pub struct LedgerRegistry {
    uow: Arc<UnitOfWork>,
    clock: Arc<dyn Clock>,
}

impl LedgerRegistry {
    pub fn new(uow: Arc<UnitOfWork>, clock: Arc<dyn Clock>) -> Self {
        Self { uow, clock }
    }

    pub async fn open_account(&self, request: OpenAccountRequest) -> AppResult<Account> {
        request.validate()?;

        let account = self
            .uow
            .execute(&OpenAccount {
                owner_id: request.owner_id,
                initial_balance: request.initial_balance,
                now: self.clock.now(),
            })
            .await?;

        info!(
            "✅ Account {} opened for owner {} with balance {}",
            account.id, account.owner_id, account.balance
        );
        Ok(account)
    }

    pub async fn create_campaign(&self, request: CreateCampaignRequest) -> AppResult<Campaign> {
        request.validate()?;

        let now = self.clock.now();
        if request.deadline <= now {
            return Err(AppError::Validation(
                "deadline: must be in the future".to_string(),
            ));
        }

        let campaign = self.uow.execute(&CreateCampaign { request, now }).await?;

        info!(
            "✅ Campaign {} created: goal {} by {}",
            campaign.id, campaign.goal_amount, campaign.deadline
        );
        Ok(campaign)
    }
}
