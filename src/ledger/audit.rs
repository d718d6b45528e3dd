use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

use super::models::{EntryKind, LedgerEntry, Pledge};
use super::store::LedgerReader;
use crate::error::{AppResult, BusinessRuleViolation};

/// Balance recomputed from ledger history next to the stored balance
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountAudit {
    pub account_id: Uuid,
    pub stored_balance: Decimal,
    pub reconstructed_balance: Decimal,
    pub entries: usize,
    /// Every entry's balance_before matches the previous entry's balance_after
    pub chain_intact: bool,
}

impl AccountAudit {
    pub fn is_consistent(&self) -> bool {
        self.chain_intact
            && self.stored_balance == self.reconstructed_balance
            && self.stored_balance >= Decimal::ZERO
    }
}

/// Campaign total recomputed from its pledges next to the stored total
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CampaignAudit {
    pub campaign_id: Uuid,
    pub stored_funds: Decimal,
    pub pledged_funds: Decimal,
}

impl CampaignAudit {
    pub fn is_consistent(&self) -> bool {
        self.stored_funds == self.pledged_funds
    }
}

/// `initial + Σcredits + Σrefunds − Σdebits`
pub fn reconstruct_balance(initial_balance: Decimal, entries: &[LedgerEntry]) -> AppResult<Decimal> {
    entries
        .iter()
        .try_fold(initial_balance, |balance, entry| entry.kind.apply(balance, entry.amount))
}

fn chain_intact(initial_balance: Decimal, entries: &[LedgerEntry]) -> bool {
    let mut expected = initial_balance;
    for entry in entries {
        if entry.balance_before != expected
            || entry.kind.apply(entry.balance_before, entry.amount).ok() != Some(entry.balance_after)
        {
            return false;
        }
        expected = entry.balance_after;
    }
    true
}

pub fn pledged_total(pledges: &[Pledge]) -> Decimal {
    pledges
        .iter()
        .filter(|p| p.status.counts_toward_total())
        .map(|p| p.amount)
        .sum()
}

pub async fn audit_account(reader: &dyn LedgerReader, account_id: Uuid) -> AppResult<AccountAudit> {
    let account = reader
        .get_account(account_id)
        .await?
        .ok_or(BusinessRuleViolation::AccountNotFound(account_id))?;
    let entries = reader.list_account_entries(account_id).await?;

    Ok(AccountAudit {
        account_id,
        stored_balance: account.balance,
        reconstructed_balance: reconstruct_balance(account.initial_balance, &entries)?,
        entries: entries.len(),
        chain_intact: chain_intact(account.initial_balance, &entries),
    })
}

pub async fn audit_campaign(
    reader: &dyn LedgerReader,
    campaign_id: Uuid,
) -> AppResult<CampaignAudit> {
    let campaign = reader
        .get_campaign(campaign_id)
        .await?
        .ok_or(BusinessRuleViolation::CampaignNotFound(campaign_id))?;
    let pledges = reader.list_campaign_pledges(campaign_id).await?;

    Ok(CampaignAudit {
        campaign_id,
        stored_funds: campaign.accumulated_funds,
        pledged_funds: pledged_total(&pledges),
    })
}

/// Sums per entry kind, for reporting
pub fn totals_by_kind(entries: &[LedgerEntry]) -> (Decimal, Decimal, Decimal) {
    entries.iter().fold(
        (Decimal::ZERO, Decimal::ZERO, Decimal::ZERO),
        |(debits, credits, refunds), e| match e.kind {
            EntryKind::Debit => (debits + e.amount, credits, refunds),
            EntryKind::Credit => (debits, credits + e.amount, refunds),
            EntryKind::Refund => (debits, credits, refunds + e.amount),
        },
    )
}
