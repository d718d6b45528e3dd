use anyhow::Context;
use pledge_ledger::{bootstrap, config::Config, server};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// Initialize logging and tracing
fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,tower_http=debug,pledge_ledger=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    dotenv::dotenv().ok();
    init_tracing();

    info!("🚀 Starting pledge ledger");

    let config = Config::from_env().context("failed to load configuration")?;
    info!(
        "⚙️ Store backend {:?}, settlement every {}s",
        config.store_backend, config.settlement_interval_secs
    );

    let state = bootstrap::initialize_app_state(&config)
        .await
        .context("failed to initialize application state")?;
    let scheduler = state.scheduler.clone();

    let app = server::create_app(state);
    let served =
        server::run_server(app, &config.bind_address, server::shutdown_signal()).await;

    scheduler.stop().await?;
    info!("Server stopped");

    served.with_context(|| format!("server on {} failed", config.bind_address))
}
