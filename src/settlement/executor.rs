use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{AppError, AppResult, BusinessRuleViolation};
use crate::events::{EventBus, LedgerEvent};
use crate::ledger::{
    models::{CampaignStatus, EntryKind, PledgeStatus, SettlementOutcome, SettlementRecord},
    posting::{lock_accounts, post},
    store::LedgerTx,
    unit_of_work::{UnitOfWork, Work},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SettleOutcome {
    Released,
    Refunded,
    /// Campaign was already settled; nothing changed
    Noop,
}

impl From<SettlementOutcome> for SettleOutcome {
    fn from(outcome: SettlementOutcome) -> Self {
        match outcome {
            SettlementOutcome::Released => SettleOutcome::Released,
            SettlementOutcome::Refunded => SettleOutcome::Refunded,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SettlementReport {
    pub campaign_id: Uuid,
    pub outcome: SettleOutcome,
    #[serde(with = "rust_decimal::serde::float")]
    pub amount: Decimal,
}

impl SettlementReport {
    fn noop(campaign_id: Uuid) -> Self {
        Self {
            campaign_id,
            outcome: SettleOutcome::Noop,
            amount: Decimal::ZERO,
        }
    }
}

struct SettleCampaign {
    campaign_id: Uuid,
    clock: Arc<dyn Clock>,
}

#[async_trait]
impl Work for SettleCampaign {
    type Output = SettlementReport;

    fn name(&self) -> &'static str {
        "settle_campaign"
    }

    async fn run(&self, tx: &mut dyn LedgerTx) -> AppResult<SettlementReport> {
        let campaign_id = self.campaign_id;
        let campaign = tx
            .campaign_for_update(campaign_id)
            .await?
            .ok_or(BusinessRuleViolation::CampaignNotFound(campaign_id))?;

        // Idempotency gate: only an active campaign can be settled
        if campaign.status.is_terminal() {
            return Ok(SettlementReport::noop(campaign_id));
        }
        if tx.settlement_record(campaign_id).await?.is_some() {
            return Err(AppError::ConstraintViolation(format!(
                "campaign {} is active but already has a settlement record",
                campaign_id
            )));
        }

        let now = self.clock.now();
        if !campaign.is_due_at(now) {
            return Err(BusinessRuleViolation::DeadlineNotReached(campaign_id).into());
        }

        let pledges = tx.pending_pledges_for_update(campaign_id).await?;

        let (status, outcome, amount) = if campaign.goal_met() {
            let mut accounts = lock_accounts(tx, [campaign.creator_account_id]).await?;
            tx.transition_campaign(campaign_id, CampaignStatus::Active, CampaignStatus::Successful)
                .await?;

            let released = campaign.accumulated_funds;
            if let Some(creator) = accounts.remove(&campaign.creator_account_id) {
                post(tx, &creator, EntryKind::Credit, released, campaign_id, now).await?;
            }
            for pledge in &pledges {
                tx.transition_pledge(pledge.id, PledgeStatus::Pending, PledgeStatus::Committed)
                    .await?;
            }

            (CampaignStatus::Successful, SettlementOutcome::Released, released)
        } else {
            let mut accounts =
                lock_accounts(tx, pledges.iter().map(|p| p.backer_account_id)).await?;
            tx.transition_campaign(campaign_id, CampaignStatus::Active, CampaignStatus::Failed)
                .await?;

            let mut refunded = Decimal::ZERO;
            for pledge in &pledges {
                let backer = accounts
                    .get_mut(&pledge.backer_account_id)
                    .ok_or(BusinessRuleViolation::AccountNotFound(pledge.backer_account_id))?;
                let entry =
                    post(tx, backer, EntryKind::Refund, pledge.amount, pledge.id, now).await?;
                // A backer with several pledges is refunded from the running balance
                backer.balance = entry.balance_after;

                tx.transition_pledge(pledge.id, PledgeStatus::Pending, PledgeStatus::Refunded)
                    .await?;
                refunded += pledge.amount;
            }
            tx.update_accumulated_funds(campaign_id, Decimal::ZERO).await?;

            (CampaignStatus::Failed, SettlementOutcome::Refunded, refunded)
        };

        tx.insert_settlement_record(&SettlementRecord {
            campaign_id,
            outcome,
            amount,
            settled_at: now,
        })
        .await?;

        info!(
            "🏁 Campaign {} -> {} ({} pledges, {})",
            campaign_id,
            status,
            pledges.len(),
            amount
        );

        Ok(SettlementReport {
            campaign_id,
            outcome: outcome.into(),
            amount,
        })
    }
}

/// Settles one campaign at a time: release to the creator when the goal was
/// met, refund every pending pledge otherwise
pub struct SettlementExecutor {
    uow: Arc<UnitOfWork>,
    clock: Arc<dyn Clock>,
    events: EventBus,
}

impl SettlementExecutor {
    pub fn new(uow: Arc<UnitOfWork>, clock: Arc<dyn Clock>, events: EventBus) -> Self {
        Self { uow, clock, events }
    }

    /// Safe to call any number of times; a settled campaign yields `Noop`
    pub async fn settle(&self, campaign_id: Uuid) -> AppResult<SettlementReport> {
        let work = SettleCampaign {
            campaign_id,
            clock: self.clock.clone(),
        };
        let report = self
            .uow
            .execute(&work)
            .instrument(info_span!("settle", campaign = %campaign_id))
            .await?;

        if report.outcome != SettleOutcome::Noop {
            self.events.publish(LedgerEvent::CampaignSettled {
                campaign_id,
                outcome: report.outcome,
                amount: report.amount,
            });
        }

        Ok(report)
    }
}
