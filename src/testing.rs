// Shared fixtures for unit tests: the whole ledger wired to the in-memory
// store and a manual clock.

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use uuid::Uuid;

use crate::clock::ManualClock;
use crate::error::AppResult;
use crate::events::EventBus;
use crate::ledger::{
    audit::{audit_account, audit_campaign},
    memory::MemoryLedgerStore,
    models::{Account, Campaign},
    registry::{CreateCampaignRequest, LedgerRegistry, OpenAccountRequest},
    store::LedgerReader,
    unit_of_work::{UnitOfWork, UnitPolicy},
};
use crate::pledge::{PledgeProcessor, PledgeReceipt, PledgeRequest};
use crate::settlement::executor::SettlementExecutor;

pub(crate) struct Harness {
    pub store: Arc<MemoryLedgerStore>,
    pub clock: Arc<ManualClock>,
    pub events: EventBus,
    pub registry: Arc<LedgerRegistry>,
    pub processor: Arc<PledgeProcessor>,
    pub executor: Arc<SettlementExecutor>,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(true)
    }

    pub fn without_precheck() -> Self {
        Self::build(false)
    }

    fn build(precheck: bool) -> Self {
        let store = Arc::new(MemoryLedgerStore::new());
        let uow = Arc::new(UnitOfWork::new(store.clone(), UnitPolicy::default()));
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let events = EventBus::new();

        let registry = Arc::new(LedgerRegistry::new(uow.clone(), clock.clone()));
        let processor = Arc::new(
            PledgeProcessor::new(uow.clone(), store.clone(), clock.clone(), events.clone())
                .with_precheck(precheck),
        );
        let executor = Arc::new(SettlementExecutor::new(
            uow.clone(),
            clock.clone(),
            events.clone(),
        ));

        Self {
            store,
            clock,
            events,
            registry,
            processor,
            executor,
        }
    }

    pub async fn account(&self, balance: Decimal) -> Account {
        self.account_for(Uuid::new_v4(), balance).await
    }

    pub async fn account_for(&self, owner_id: Uuid, balance: Decimal) -> Account {
        self.registry
            .open_account(OpenAccountRequest {
                owner_id,
                initial_balance: balance,
            })
            .await
            .unwrap()
    }

    pub async fn campaign(&self, creator: &Account, goal: Decimal, runs_for: Duration) -> Campaign {
        self.registry
            .create_campaign(CreateCampaignRequest {
                creator_account_id: creator.id,
                goal_amount: goal,
                deadline: crate::clock::Clock::now(self.clock.as_ref()) + runs_for,
            })
            .await
            .unwrap()
    }

    pub async fn pledge(
        &self,
        backer: &Account,
        campaign: &Campaign,
        amount: Decimal,
    ) -> AppResult<PledgeReceipt> {
        self.processor
            .submit_pledge(PledgeRequest {
                backer_id: backer.id,
                campaign_id: campaign.id,
                amount,
            })
            .await
    }

    pub async fn balance(&self, account_id: Uuid) -> Decimal {
        self.store
            .get_account(account_id)
            .await
            .unwrap()
            .unwrap()
            .balance
    }

    /// Every account reconstructs from its entries and every campaign total
    /// matches its counted pledges
    pub async fn assert_invariants(&self, accounts: &[Uuid], campaigns: &[Uuid]) {
        for id in accounts {
            let audit = audit_account(self.store.as_ref(), *id).await.unwrap();
            assert!(audit.is_consistent(), "account audit failed: {:?}", audit);
        }
        for id in campaigns {
            let audit = audit_campaign(self.store.as_ref(), *id).await.unwrap();
            assert!(audit.is_consistent(), "campaign audit failed: {:?}", audit);
        }
    }
}
