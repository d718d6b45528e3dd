use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

use super::models::{Account, EntryKind, LedgerEntry};
use super::store::{check_non_negative, check_positive, LedgerTx};
use crate::error::{AppResult, BusinessRuleViolation};

/// Lock a set of accounts in ascending id order.
///
/// Every unit locks its campaign first and then its accounts through here, so
/// two units never wait on each other's rows in opposite orders.
pub async fn lock_accounts(
    tx: &mut dyn LedgerTx,
    ids: impl IntoIterator<Item = Uuid>,
) -> AppResult<HashMap<Uuid, Account>> {
    let ordered: BTreeSet<Uuid> = ids.into_iter().collect();
    let mut locked = HashMap::with_capacity(ordered.len());

    for id in ordered {
        let account = tx
            .account_for_update(id)
            .await?
            .ok_or(BusinessRuleViolation::AccountNotFound(id))?;
        locked.insert(id, account);
    }

    Ok(locked)
}

/// Apply one balance change to a locked account and append its ledger entry.
///
/// `account` must have been read with `account_for_update` in the same unit.
/// Returns the entry; the new balance is `entry.balance_after`.
pub async fn post(
    tx: &mut dyn LedgerTx,
    account: &Account,
    kind: EntryKind,
    amount: Decimal,
    reference: Uuid,
    at: DateTime<Utc>,
) -> AppResult<LedgerEntry> {
    check_positive("posting amount", amount)?;

    let balance_after = kind.apply(account.balance, amount)?;
    check_non_negative("accounts.balance", balance_after)?;

    tx.update_balance(account.id, balance_after).await?;

    let entry = LedgerEntry {
        id: Uuid::new_v4(),
        account_id: account.id,
        kind,
        amount,
        balance_before: account.balance,
        balance_after,
        reference,
        created_at: at,
    };
    tx.append_entry(&entry).await?;

    Ok(entry)
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;
    use crate::error::AppError;
    use crate::ledger::memory::MemoryLedgerStore;
    use crate::ledger::store::{LedgerReader, LedgerStore};

    #[tokio::test]
    async fn test_debit_below_zero_is_a_constraint_violation() {
        let store = MemoryLedgerStore::new();
        let now = Utc::now();
        let account = Account {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            balance: dec!(100),
            initial_balance: dec!(100),
            created_at: now,
            updated_at: now,
        };

        let mut tx = store.begin().await.unwrap();
        tx.insert_account(&account).await.unwrap();

        let entry = post(tx.as_mut(), &account, EntryKind::Debit, dec!(80), Uuid::new_v4(), now)
            .await
            .unwrap();
        assert_eq!(entry.balance_after, dec!(20));

        let locked = tx.account_for_update(account.id).await.unwrap().unwrap();
        let err = post(tx.as_mut(), &locked, EntryKind::Debit, dec!(80), Uuid::new_v4(), now)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ConstraintViolation(_)));

        tx.commit().await.unwrap();
        let entries = store.list_account_entries(account.id).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, EntryKind::Debit);
    }
}
