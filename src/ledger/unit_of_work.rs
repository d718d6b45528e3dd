use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn, Instrument};

use super::store::{LedgerStore, LedgerTx};
use crate::config::Config;
use crate::error::{AppError, AppResult};

tokio::task_local! {
    static IN_UNIT_OF_WORK: ();
}

/// A sequence of store mutations that commits or rolls back as a whole.
///
/// `run` may be called more than once when an attempt fails transiently, so it
/// must derive everything it writes from what it reads through `tx`.
#[async_trait]
pub trait Work: Send + Sync {
    type Output: Send;

    /// Label used in logs
    fn name(&self) -> &'static str;

    async fn run(&self, tx: &mut dyn LedgerTx) -> AppResult<Self::Output>;
}

/// Timeout and retry bounds for every unit of work
#[derive(Debug, Clone)]
pub struct UnitPolicy {
    pub timeout: Duration,
    pub max_retries: u32,
    pub retry_backoff: Duration,
}

impl UnitPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            timeout: config.unit_timeout(),
            max_retries: config.max_retries,
            retry_backoff: config.retry_backoff(),
        }
    }

    fn backoff_for(&self, attempt: u32) -> Duration {
        self.retry_backoff * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

impl Default for UnitPolicy {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

enum Attempt<T> {
    Done(AppResult<T>),
    Retryable(AppError),
}

/// The only gateway through which the ledger is mutated
pub struct UnitOfWork {
    store: Arc<dyn LedgerStore>,
    policy: UnitPolicy,
}

impl UnitOfWork {
    pub fn new(store: Arc<dyn LedgerStore>, policy: UnitPolicy) -> Self {
        Self { store, policy }
    }

    /// Run `work` atomically. Every effect is undone if it fails, and the
    /// original error is returned.
    pub async fn execute<W: Work>(&self, work: &W) -> AppResult<W::Output> {
        if IN_UNIT_OF_WORK.try_with(|_| ()).is_ok() {
            return Err(AppError::Internal(format!(
                "nested unit of work: {} started inside another unit",
                work.name()
            )));
        }

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let span = tracing::debug_span!("unit_of_work", work = work.name(), attempt);

            let outcome = IN_UNIT_OF_WORK
                .scope((), self.attempt(work))
                .instrument(span)
                .await;

            match outcome {
                Attempt::Done(Ok(output)) => return Ok(output),
                Attempt::Done(Err(e)) => {
                    if matches!(e, AppError::ConstraintViolation(_)) {
                        error!("❌ {} rolled back on constraint violation: {}", work.name(), e);
                    }
                    return Err(e);
                }
                Attempt::Retryable(e) if attempt <= self.policy.max_retries => {
                    let delay = self.policy.backoff_for(attempt);
                    warn!(
                        "⚠️ {} attempt {} failed transiently, retrying in {:?}: {}",
                        work.name(),
                        attempt,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
                Attempt::Retryable(e) => {
                    error!(
                        "❌ {} gave up after {} attempts: {}",
                        work.name(),
                        attempt,
                        e
                    );
                    return Err(e);
                }
            }
        }
    }

    async fn attempt<W: Work>(&self, work: &W) -> Attempt<W::Output> {
        // begin + run are bounded; dropping the future on timeout drops the
        // transaction, which discards it.
        let bounded = tokio::time::timeout(self.policy.timeout, async {
            let mut tx = self.store.begin().await?;
            match work.run(tx.as_mut()).await {
                Ok(output) => Ok((tx, output)),
                Err(e) => {
                    if let Err(rollback_err) = tx.rollback().await {
                        warn!("⚠️ Rollback of {} failed: {}", work.name(), rollback_err);
                    }
                    Err(e)
                }
            }
        })
        .await;

        let (tx, output) = match bounded {
            Ok(Ok(done)) => done,
            Ok(Err(e)) if e.is_transient() => return Attempt::Retryable(e),
            Ok(Err(e)) => return Attempt::Done(Err(e)),
            Err(_) => {
                return Attempt::Retryable(AppError::TransientStore(format!(
                    "{} exceeded {:?}",
                    work.name(),
                    self.policy.timeout
                )))
            }
        };

        // A failed commit has an unknown outcome, so it is never retried
        match tx.commit().await {
            Ok(()) => {
                debug!("✓ {} committed", work.name());
                Attempt::Done(Ok(output))
            }
            Err(e) => Attempt::Done(Err(e)),
        }
    }
}
