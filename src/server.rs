use axum::{
    routing::{get, post},
    Router,
};
use std::future::Future;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::api::handler::{
    create_campaign, get_account, get_campaign, get_settlement, health_check,
    list_account_entries, list_campaign_pledges, open_account, run_settlement, settle_campaign,
    submit_pledge, AppState,
};

pub fn create_app(state: AppState) -> Router {
    info!("⚙️ Setting up HTTP routes...");

    let app = Router::new()
        // Public health check endpoint
        .route("/health", get(health_check))
        .nest(
            "/api/v1",
            Router::new()
                // Accounts
                .route("/accounts", post(open_account))
                .route("/accounts/:id", get(get_account))
                .route("/accounts/:id/entries", get(list_account_entries))
                // Campaigns
                .route("/campaigns", post(create_campaign))
                .route("/campaigns/:id", get(get_campaign))
                .route("/campaigns/:id/pledges", get(list_campaign_pledges))
                .route("/campaigns/:id/settlement", get(get_settlement))
                .route("/campaigns/:id/settle", post(settle_campaign))
                // Pledges
                .route("/pledges", post(submit_pledge))
                // Settlement
                .route("/settlement/run", post(run_settlement)),
        )
        .layer(CompressionLayer::new())
        .layer(CorsLayer::very_permissive())
        // Add request tracing
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!("✓ HTTP routes configured");
    app
}

/// Serve until `shutdown` resolves, then drain in-flight requests
pub async fn run_server<F>(app: Router, bind_address: &str, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    info!("🌐 Server listening on: {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

/// Resolves on Ctrl+C
pub async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("⚠️ Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("🛑 Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use chrono::{Duration, Utc};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    use super::*;
    use crate::bootstrap::build_app_state;
    use crate::clock::{Clock, ManualClock};
    use crate::config::{Config, StoreBackend};
    use crate::ledger::memory::MemoryLedgerStore;

    struct TestApp {
        app: Router,
        clock: Arc<ManualClock>,
    }

    impl TestApp {
        fn new() -> Self {
            let config = Config {
                store_backend: StoreBackend::Memory,
                settlement_enabled: false,
                ..Config::default()
            };
            let clock = Arc::new(ManualClock::new(Utc::now()));
            let state = build_app_state(&config, Arc::new(MemoryLedgerStore::new()), clock.clone());
            Self {
                app: create_app(state),
                clock,
            }
        }

        async fn call(&self, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
            let request = Request::builder()
                .method(method)
                .uri(uri)
                .header("content-type", "application/json")
                .body(match body {
                    Some(body) => Body::from(body.to_string()),
                    None => Body::empty(),
                })
                .unwrap();

            let response = self.app.clone().oneshot(request).await.unwrap();
            let status = response.status();
            let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
            let value = if bytes.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&bytes).unwrap()
            };
            (status, value)
        }

        async fn open_account(&self, balance: f64) -> String {
            let (status, body) = self
                .call(
                    "POST",
                    "/api/v1/accounts",
                    Some(json!({"owner_id": uuid::Uuid::new_v4(), "initial_balance": balance})),
                )
                .await;
            assert_eq!(status, StatusCode::CREATED, "{}", body);
            body["id"].as_str().unwrap().to_string()
        }

        async fn create_campaign(&self, creator: &str, goal: f64) -> String {
            let deadline = self.clock.now() + Duration::days(1);
            let (status, body) = self
                .call(
                    "POST",
                    "/api/v1/campaigns",
                    Some(json!({
                        "creator_account_id": creator,
                        "goal_amount": goal,
                        "deadline": deadline,
                    })),
                )
                .await;
            assert_eq!(status, StatusCode::CREATED, "{}", body);
            body["id"].as_str().unwrap().to_string()
        }
    }

    #[tokio::test]
    async fn test_pledge_and_settle_over_http() {
        let t = TestApp::new();
        let backer = t.open_account(1000.0).await;
        let creator = t.open_account(0.0).await;
        let campaign = t.create_campaign(&creator, 500.0).await;

        let (status, receipt) = t
            .call(
                "POST",
                "/api/v1/pledges",
                Some(json!({"backer_id": backer, "campaign_id": campaign, "amount": 600})),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED, "{}", receipt);
        assert_eq!(receipt["new_balance"], json!(400.0));

        let (status, early) = t
            .call("POST", &format!("/api/v1/campaigns/{}/settle", campaign), None)
            .await;
        assert_eq!(status, StatusCode::CONFLICT, "{}", early);

        t.clock.advance(Duration::days(1));
        let (status, outcome) = t.call("POST", "/api/v1/settlement/run", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(outcome["status"], json!("completed"));
        assert_eq!(outcome["released"], json!(1));

        let (_, account) = t.call("GET", &format!("/api/v1/accounts/{}", creator), None).await;
        assert_eq!(account["balance"], json!(600.0));
        assert_eq!(account["ledger_consistent"], json!(true));

        let (_, settlement) = t
            .call("GET", &format!("/api/v1/campaigns/{}/settlement", campaign), None)
            .await;
        assert_eq!(settlement["status"], json!("successful"));
        assert_eq!(settlement["record"]["outcome"], json!("released"));

        let (_, again) = t
            .call("POST", &format!("/api/v1/campaigns/{}/settle", campaign), None)
            .await;
        assert_eq!(again["outcome"], json!("noop"));

        let (_, entries) = t
            .call("GET", &format!("/api/v1/accounts/{}/entries", backer), None)
            .await;
        assert_eq!(entries["entries"].as_array().unwrap().len(), 1);
        assert_eq!(entries["total_debits"], json!(600.0));
    }

    #[tokio::test]
    async fn test_rejections_map_to_status_codes() {
        let t = TestApp::new();
        let backer = t.open_account(50.0).await;
        let creator = t.open_account(0.0).await;
        let campaign = t.create_campaign(&creator, 500.0).await;

        let (status, body) = t
            .call(
                "POST",
                "/api/v1/pledges",
                Some(json!({"backer_id": backer, "campaign_id": campaign, "amount": 80})),
            )
            .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error_code"], json!("INSUFFICIENT_FUNDS"));

        let (status, _) = t
            .call(
                "POST",
                "/api/v1/pledges",
                Some(json!({"backer_id": creator, "campaign_id": campaign, "amount": 10})),
            )
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = t
            .call(
                "POST",
                "/api/v1/pledges",
                Some(json!({"backer_id": backer, "campaign_id": campaign, "amount": 0})),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = t
            .call("GET", &format!("/api/v1/campaigns/{}", uuid::Uuid::new_v4()), None)
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_health_reports_store_and_scheduler() {
        let t = TestApp::new();

        let (status, body) = t.call("GET", "/health", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], json!("healthy"));
        assert_eq!(body["store"], json!("memory"));
        assert_eq!(body["scheduler_running"], json!(false));
        assert_eq!(body["awaiting_settlement"], json!(0));
    }

    #[tokio::test]
    async fn test_server_stops_when_shutdown_resolves() {
        let t = TestApp::new();
        let (stop, stopped) = tokio::sync::oneshot::channel::<()>();

        let server = tokio::spawn(run_server(t.app, "127.0.0.1:0", async {
            let _ = stopped.await;
        }));
        stop.send(()).unwrap();

        let served = tokio::time::timeout(std::time::Duration::from_secs(5), server)
            .await
            .expect("server did not stop")
            .unwrap();
        assert!(served.is_ok());
    }
}
