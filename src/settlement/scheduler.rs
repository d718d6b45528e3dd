// Settlement Scheduler - settles campaigns whose deadline has passed
//
// - Ticks every `settlement_interval`; missed ticks are delayed, not bursted
// - One pass at a time: a tick that finds a pass running is skipped
// - A campaign that fails to settle is logged and left for the next tick

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::executor::{SettleOutcome, SettlementExecutor, SettlementReport};
use crate::clock::Clock;
use crate::error::{AppError, AppResult};
use crate::ledger::store::LedgerReader;

/// Counts from one settlement pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickSummary {
    pub examined: usize,
    pub released: usize,
    pub refunded: usize,
    pub noop: usize,
    pub failed: usize,
}

impl TickSummary {
    fn record(&mut self, report: &SettlementReport) {
        match report.outcome {
            SettleOutcome::Released => self.released += 1,
            SettleOutcome::Refunded => self.refunded += 1,
            SettleOutcome::Noop => self.noop += 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum TickOutcome {
    Completed(TickSummary),
    /// Another pass held the guard
    Skipped,
}

struct RunningLoop {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct SettlementScheduler {
    executor: Arc<SettlementExecutor>,
    reader: Arc<dyn LedgerReader>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    tick_guard: Mutex<()>,
    running: parking_lot::Mutex<Option<RunningLoop>>,
}

impl SettlementScheduler {
    pub fn new(
        executor: Arc<SettlementExecutor>,
        reader: Arc<dyn LedgerReader>,
        clock: Arc<dyn Clock>,
        interval: Duration,
    ) -> Self {
        Self {
            executor,
            reader,
            clock,
            interval,
            tick_guard: Mutex::new(()),
            running: parking_lot::Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|running| !running.handle.is_finished())
    }

    /// Start the background loop
    pub fn start(self: &Arc<Self>) -> AppResult<()> {
        let mut running = self.running.lock();
        if running.is_some() {
            return Err(AppError::Internal(
                "settlement scheduler is already running".to_string(),
            ));
        }

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let scheduler = Arc::clone(self);

        let handle = tokio::spawn(async move {
            let mut ticker = interval(scheduler.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!(
                "⏰ Settlement scheduler started, every {:?}",
                scheduler.interval
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match scheduler.run_once().await {
                            Ok(TickOutcome::Completed(summary)) if summary.examined > 0 => {
                                info!("✓ Settlement cycle completed: {:?}", summary);
                            }
                            Ok(_) => {}
                            Err(e) => error!("❌ Settlement cycle failed: {}", e),
                        }
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }

            info!("Settlement scheduler stopped");
        });

        *running = Some(RunningLoop { shutdown, handle });
        Ok(())
    }

    /// Signal the loop and wait for the current pass to finish
    pub async fn stop(&self) -> AppResult<()> {
        let running = self.running.lock().take();
        let Some(RunningLoop { shutdown, handle }) = running else {
            debug!("Settlement scheduler not running");
            return Ok(());
        };

        let _ = shutdown.send(true);
        handle
            .await
            .map_err(|e| AppError::Internal(format!("settlement loop panicked: {}", e)))
    }

    /// Settle every expired active campaign once
    pub async fn run_once(&self) -> AppResult<TickOutcome> {
        let Ok(_guard) = self.tick_guard.try_lock() else {
            warn!("⚠️ Settlement pass already running, tick skipped");
            return Ok(TickOutcome::Skipped);
        };

        let due = self
            .reader
            .list_expired_active_campaigns(self.clock.now())
            .await?;

        let mut summary = TickSummary {
            examined: due.len(),
            ..TickSummary::default()
        };
        if !due.is_empty() {
            info!("🔄 Settling {} expired campaigns", due.len());
        }

        for campaign in due {
            match self.executor.settle(campaign.id).await {
                Ok(report) => summary.record(&report),
                Err(e) => {
                    let e = AppError::settlement(campaign.id, e);
                    error!("❌ {}", e);
                    summary.failed += 1;
                }
            }
        }

        Ok(TickOutcome::Completed(summary))
    }

    /// Manual trigger for one campaign; waits for a running pass instead of
    /// skipping
    pub async fn settle_campaign(&self, campaign_id: Uuid) -> AppResult<SettlementReport> {
        let _guard = self.tick_guard.lock().await;
        info!("🔄 Manual settlement of campaign {}", campaign_id);
        self.executor.settle(campaign_id).await
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::ledger::models::{CampaignStatus, SettlementOutcome, SettlementRecord};
    use crate::ledger::store::{LedgerStore, LedgerTx};
    use crate::testing::Harness;

    fn scheduler(h: &Harness, every: Duration) -> Arc<SettlementScheduler> {
        Arc::new(SettlementScheduler::new(
            h.executor.clone(),
            h.store.clone(),
            h.clock.clone(),
            every,
        ))
    }

    async fn plant_stray_record(h: &Harness, campaign_id: Uuid) {
        let mut tx = h.store.begin().await.unwrap();
        tx.insert_settlement_record(&SettlementRecord {
            campaign_id,
            outcome: SettlementOutcome::Released,
            amount: dec!(0),
            settled_at: h.clock.now(),
        })
        .await
        .unwrap();
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_pass_settles_only_expired_campaigns() {
        let h = Harness::new();
        let backer = h.account(dec!(1000)).await;
        let creator = h.account(dec!(0)).await;
        let funded = h.campaign(&creator, dec!(500), ChronoDuration::hours(1)).await;
        let short = h.campaign(&creator, dec!(5000), ChronoDuration::hours(1)).await;
        let later = h.campaign(&creator, dec!(500), ChronoDuration::days(3)).await;
        h.pledge(&backer, &funded, dec!(500)).await.unwrap();
        h.pledge(&backer, &short, dec!(100)).await.unwrap();
        h.pledge(&backer, &later, dec!(100)).await.unwrap();

        h.clock.advance(ChronoDuration::hours(1));
        let outcome = scheduler(&h, Duration::from_secs(60)).run_once().await.unwrap();

        assert_eq!(
            outcome,
            TickOutcome::Completed(TickSummary {
                examined: 2,
                released: 1,
                refunded: 1,
                noop: 0,
                failed: 0,
            })
        );
        let later = h.store.get_campaign(later.id).await.unwrap().unwrap();
        assert_eq!(later.status, CampaignStatus::Active);
        assert_eq!(h.balance(backer.id).await, dec!(400));
        assert_eq!(h.balance(creator.id).await, dec!(500));
        h.assert_invariants(&[backer.id, creator.id], &[funded.id, short.id, later.id])
            .await;
    }

    #[tokio::test]
    async fn test_failing_campaign_does_not_block_others() {
        let h = Harness::new();
        let backer = h.account(dec!(1000)).await;
        let creator = h.account(dec!(0)).await;
        let broken = h.campaign(&creator, dec!(100), ChronoDuration::minutes(1)).await;
        let healthy = h.campaign(&creator, dec!(100), ChronoDuration::minutes(2)).await;
        h.pledge(&backer, &broken, dec!(100)).await.unwrap();
        h.pledge(&backer, &healthy, dec!(100)).await.unwrap();
        plant_stray_record(&h, broken.id).await;

        h.clock.advance(ChronoDuration::minutes(5));
        let outcome = scheduler(&h, Duration::from_secs(60)).run_once().await.unwrap();

        let TickOutcome::Completed(summary) = outcome else {
            panic!("pass was skipped");
        };
        assert_eq!(summary.examined, 2);
        assert_eq!(summary.released, 1);
        assert_eq!(summary.failed, 1);

        let broken = h.store.get_campaign(broken.id).await.unwrap().unwrap();
        assert_eq!(broken.status, CampaignStatus::Active);
        let healthy = h.store.get_campaign(healthy.id).await.unwrap().unwrap();
        assert_eq!(healthy.status, CampaignStatus::Successful);
    }

    #[tokio::test]
    async fn test_tick_is_skipped_while_pass_runs() {
        let h = Harness::new();
        let scheduler = scheduler(&h, Duration::from_secs(60));

        let held = scheduler.tick_guard.lock().await;
        assert_eq!(scheduler.run_once().await.unwrap(), TickOutcome::Skipped);
        drop(held);

        assert!(matches!(
            scheduler.run_once().await.unwrap(),
            TickOutcome::Completed(_)
        ));
    }

    #[tokio::test]
    async fn test_manual_trigger_uses_executor_path() {
        let h = Harness::new();
        let backer = h.account(dec!(100)).await;
        let creator = h.account(dec!(0)).await;
        let campaign = h.campaign(&creator, dec!(500), ChronoDuration::hours(1)).await;
        h.pledge(&backer, &campaign, dec!(60)).await.unwrap();
        let scheduler = scheduler(&h, Duration::from_secs(60));

        h.clock.advance(ChronoDuration::hours(1));
        let first = scheduler.settle_campaign(campaign.id).await.unwrap();
        let second = scheduler.settle_campaign(campaign.id).await.unwrap();

        assert_eq!(first.outcome, SettleOutcome::Refunded);
        assert_eq!(first.amount, dec!(60));
        assert_eq!(second.outcome, SettleOutcome::Noop);
        assert_eq!(h.balance(backer.id).await, dec!(100));
    }

    #[tokio::test]
    async fn test_background_loop_settles_and_stops() {
        let h = Harness::new();
        let backer = h.account(dec!(100)).await;
        let creator = h.account(dec!(0)).await;
        let campaign = h.campaign(&creator, dec!(50), ChronoDuration::minutes(1)).await;
        h.pledge(&backer, &campaign, dec!(50)).await.unwrap();
        h.clock.advance(ChronoDuration::minutes(1));

        let scheduler = scheduler(&h, Duration::from_millis(10));
        scheduler.start().unwrap();
        assert!(scheduler.is_running());
        assert!(scheduler.start().is_err());

        let mut settled = false;
        for _ in 0..100 {
            let current = h.store.get_campaign(campaign.id).await.unwrap().unwrap();
            if current.status == CampaignStatus::Successful {
                settled = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(settled);

        scheduler.stop().await.unwrap();
        assert!(!scheduler.is_running());
        scheduler.stop().await.unwrap();
    }
}
