use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;
use validator::Validate;

use super::models::{PledgeReceipt, PledgeRequest};
use crate::clock::Clock;
use crate::error::{AppError, AppResult, BusinessRuleViolation};
use crate::events::{EventBus, LedgerEvent};
use crate::ledger::{
    models::{Account, Campaign, EntryKind, Pledge, PledgeStatus},
    posting::{lock_accounts, post},
    store::{LedgerReader, LedgerTx},
    unit_of_work::{UnitOfWork, Work},
};

/// Campaign preconditions, checked before any account is touched
fn check_campaign_open(campaign: &Campaign, now: DateTime<Utc>) -> Result<(), BusinessRuleViolation> {
    if campaign.status.is_terminal() {
        return Err(BusinessRuleViolation::CampaignNotActive(campaign.id));
    }
    if !campaign.accepts_pledges_at(now) {
        return Err(BusinessRuleViolation::DeadlinePassed(campaign.id));
    }
    Ok(())
}

fn check_backer(
    backer: &Account,
    creator: &Account,
    amount: Decimal,
) -> Result<(), BusinessRuleViolation> {
    if backer.id == creator.id || backer.owner_id == creator.owner_id {
        return Err(BusinessRuleViolation::SelfPledge);
    }
    if !backer.can_cover(amount) {
        return Err(BusinessRuleViolation::InsufficientFunds {
            required: amount.to_string(),
            available: backer.balance.to_string(),
        });
    }
    Ok(())
}

struct AcceptedPledge {
    pledge: Pledge,
    new_balance: Decimal,
    creator_account_id: Uuid,
}

struct AcceptPledge {
    request: PledgeRequest,
    clock: Arc<dyn Clock>,
}

#[async_trait]
impl Work for AcceptPledge {
    type Output = AcceptedPledge;

    fn name(&self) -> &'static str {
        "accept_pledge"
    }

    async fn run(&self, tx: &mut dyn LedgerTx) -> AppResult<AcceptedPledge> {
        let backer_id = self.request.backer_id;
        let campaign_id = self.request.campaign_id;
        let amount = self.request.amount;

        // Campaign row first, then accounts in id order
        let campaign = tx
            .campaign_for_update(campaign_id)
            .await?
            .ok_or(BusinessRuleViolation::CampaignNotFound(campaign_id))?;
        let now = self.clock.now();
        check_campaign_open(&campaign, now)?;

        let accounts = lock_accounts(tx, [backer_id, campaign.creator_account_id]).await?;
        let backer = &accounts[&backer_id];
        let creator = &accounts[&campaign.creator_account_id];
        check_backer(backer, creator, amount)?;

        let pledge = Pledge {
            id: Uuid::new_v4(),
            backer_account_id: backer_id,
            campaign_id,
            amount,
            status: PledgeStatus::Pending,
            created_at: now,
            updated_at: now,
        };

        let entry = post(tx, backer, EntryKind::Debit, amount, pledge.id, now).await?;
        tx.insert_pledge(&pledge).await?;
        let funds = campaign.accumulated_funds.checked_add(amount).ok_or_else(|| {
            AppError::ConstraintViolation(format!(
                "campaign {} total overflows adding {}",
                campaign_id, amount
            ))
        })?;
        tx.update_accumulated_funds(campaign_id, funds).await?;

        Ok(AcceptedPledge {
            pledge,
            new_balance: entry.balance_after,
            creator_account_id: campaign.creator_account_id,
        })
    }
}

/// Accepts pledges: debits the backer, records the pledge and grows the
/// campaign total, all in one unit of work
pub struct PledgeProcessor {
    uow: Arc<UnitOfWork>,
    reader: Arc<dyn LedgerReader>,
    clock: Arc<dyn Clock>,
    events: EventBus,
    precheck: bool,
}

impl PledgeProcessor {
    pub fn new(
        uow: Arc<UnitOfWork>,
        reader: Arc<dyn LedgerReader>,
        clock: Arc<dyn Clock>,
        events: EventBus,
    ) -> Self {
        Self {
            uow,
            reader,
            clock,
            events,
            precheck: true,
        }
    }

    /// Enable or disable the fast-path check against committed state
    pub fn with_precheck(mut self, precheck: bool) -> Self {
        self.precheck = precheck;
        self
    }

    pub async fn submit_pledge(&self, request: PledgeRequest) -> AppResult<PledgeReceipt> {
        request.validate()?;

        info!(
            "💸 Pledge of {} from {} to campaign {}",
            request.amount, request.backer_id, request.campaign_id
        );

        let span = info_span!(
            "pledge",
            backer = %request.backer_id,
            campaign = %request.campaign_id
        );
        let result = self.accept(request).instrument(span).await;

        match result {
            Ok(accepted) => {
                info!(
                    "✓ Pledge {} accepted, backer balance now {}",
                    accepted.pledge.id, accepted.new_balance
                );

                self.events.publish(LedgerEvent::PledgeAccepted {
                    pledge_id: accepted.pledge.id,
                    campaign_id: accepted.pledge.campaign_id,
                    backer_account_id: accepted.pledge.backer_account_id,
                    creator_account_id: accepted.creator_account_id,
                    amount: accepted.pledge.amount,
                });

                Ok(PledgeReceipt {
                    pledge_id: accepted.pledge.id,
                    new_balance: accepted.new_balance,
                })
            }
            Err(e) => {
                warn!("⚠️ Pledge rejected: {}", e);
                Err(e)
            }
        }
    }

    async fn accept(&self, request: PledgeRequest) -> AppResult<AcceptedPledge> {
        if self.precheck {
            self.precheck(&request).await?;
        }

        self.uow
            .execute(&AcceptPledge {
                request,
                clock: self.clock.clone(),
            })
            .await
    }

    /// Fast rejection against committed state. Not authoritative: the unit of
    /// work checks every rule again under lock.
    async fn precheck(&self, request: &PledgeRequest) -> AppResult<()> {
        let campaign = self
            .reader
            .get_campaign(request.campaign_id)
            .await?
            .ok_or(BusinessRuleViolation::CampaignNotFound(request.campaign_id))?;
        check_campaign_open(&campaign, self.clock.now())?;

        let backer = self
            .reader
            .get_account(request.backer_id)
            .await?
            .ok_or(BusinessRuleViolation::AccountNotFound(request.backer_id))?;
        let creator = self
            .reader
            .get_account(campaign.creator_account_id)
            .await?
            .ok_or(BusinessRuleViolation::AccountNotFound(
                campaign.creator_account_id,
            ))?;

        check_backer(&backer, &creator, request.amount)?;
        Ok(())
    }
}
