use std::sync::Arc;
use tracing::info;

use crate::{
    api::handler::AppState,
    clock::{Clock, SystemClock},
    config::{Config, StoreBackend},
    error::AppResult,
    events::{EventBus, NotificationRelay},
    ledger::{
        memory::MemoryLedgerStore,
        postgres::PgLedgerStore,
        registry::LedgerRegistry,
        store::LedgerStore,
        unit_of_work::{UnitOfWork, UnitPolicy},
    },
    pledge::PledgeProcessor,
    settlement::{SettlementExecutor, SettlementScheduler},
};

pub async fn initialize_app_state(config: &Config) -> AppResult<AppState> {
    info!("Initializing application components ...");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let state = match config.store_backend {
        StoreBackend::Postgres => {
            info!("📊 Connecting to database...");
            let store = PgLedgerStore::connect(config).await?;

            info!("🔄 Running database migrations...");
            store.migrate().await?;

            build_app_state(config, Arc::new(store), clock)
        }
        StoreBackend::Memory => {
            info!("⚠️ Using in-memory ledger store, state is lost on restart");
            build_app_state(config, Arc::new(MemoryLedgerStore::new()), clock)
        }
    };

    NotificationRelay::new(&state.events).start();
    info!("✅ Notification relay started");

    if config.settlement_enabled {
        state.scheduler.start()?;
        info!(
            "✅ Settlement scheduler started (every {}s)",
            config.settlement_interval_secs
        );
    } else {
        info!("⚠️ Settlement scheduler disabled, settle through the API");
    }

    Ok(state)
}

/// Wire every component over one store. Background tasks are not started.
pub fn build_app_state<S>(config: &Config, store: Arc<S>, clock: Arc<dyn Clock>) -> AppState
where
    S: LedgerStore + 'static,
{
    let events = EventBus::new();
    let uow = Arc::new(UnitOfWork::new(
        store.clone(),
        UnitPolicy::from_config(config),
    ));

    let registry = Arc::new(LedgerRegistry::new(uow.clone(), clock.clone()));
    info!("✅ Ledger registry initialized");

    let pledges = Arc::new(
        PledgeProcessor::new(uow.clone(), store.clone(), clock.clone(), events.clone())
            .with_precheck(config.pledge_precheck),
    );
    info!("✅ Pledge processor initialized");

    let executor = Arc::new(SettlementExecutor::new(
        uow.clone(),
        clock.clone(),
        events.clone(),
    ));
    let scheduler = Arc::new(SettlementScheduler::new(
        executor,
        store.clone(),
        clock.clone(),
        config.settlement_interval(),
    ));
    info!("✅ Settlement executor initialized");

    AppState {
        reader: store,
        registry,
        pledges,
        scheduler,
        events,
        clock,
        backend: config.store_backend,
    }
}
