use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::models::*;
use crate::{
    clock::Clock,
    config::StoreBackend,
    error::{AppResult, BusinessRuleViolation},
    events::EventBus,
    ledger::{
        audit::{audit_account, pledged_total, totals_by_kind},
        models::{Account, Campaign, Pledge},
        registry::{CreateCampaignRequest, LedgerRegistry, OpenAccountRequest},
        store::LedgerReader,
    },
    pledge::{PledgeProcessor, PledgeReceipt, PledgeRequest},
    settlement::{SettlementReport, SettlementScheduler, TickOutcome},
};

#[derive(Clone)]
pub struct AppState {
    pub reader: Arc<dyn LedgerReader>,
    pub registry: Arc<LedgerRegistry>,
    pub pledges: Arc<PledgeProcessor>,
    pub scheduler: Arc<SettlementScheduler>,
    pub events: EventBus,
    pub clock: Arc<dyn Clock>,
    pub backend: StoreBackend,
}

// ========== COMMANDS ==========

/// POST /accounts
pub async fn open_account(
    State(state): State<AppState>,
    Json(request): Json<OpenAccountRequest>,
) -> AppResult<(StatusCode, Json<Account>)> {
    let account = state.registry.open_account(request).await?;
    Ok((StatusCode::CREATED, Json(account)))
}

/// POST /campaigns
pub async fn create_campaign(
    State(state): State<AppState>,
    Json(request): Json<CreateCampaignRequest>,
) -> AppResult<(StatusCode, Json<Campaign>)> {
    let campaign = state.registry.create_campaign(request).await?;
    Ok((StatusCode::CREATED, Json(campaign)))
}

/// POST /pledges
pub async fn submit_pledge(
    State(state): State<AppState>,
    Json(request): Json<PledgeRequest>,
) -> AppResult<(StatusCode, Json<PledgeReceipt>)> {
    let receipt = state.pledges.submit_pledge(request).await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

/// POST /campaigns/:id/settle - manual settlement trigger
pub async fn settle_campaign(
    State(state): State<AppState>,
    Path(campaign_id): Path<Uuid>,
) -> AppResult<Json<SettlementReport>> {
    let report = state.scheduler.settle_campaign(campaign_id).await?;
    Ok(Json(report))
}

/// POST /settlement/run - one settlement pass over every expired campaign
pub async fn run_settlement(State(state): State<AppState>) -> AppResult<Json<TickOutcome>> {
    info!("🔄 Settlement pass requested");
    let outcome = state.scheduler.run_once().await?;
    Ok(Json(outcome))
}

// ========== QUERIES ==========

async fn load_account(state: &AppState, account_id: Uuid) -> AppResult<Account> {
    Ok(state
        .reader
        .get_account(account_id)
        .await?
        .ok_or(BusinessRuleViolation::AccountNotFound(account_id))?)
}

async fn load_campaign(state: &AppState, campaign_id: Uuid) -> AppResult<Campaign> {
    Ok(state
        .reader
        .get_campaign(campaign_id)
        .await?
        .ok_or(BusinessRuleViolation::CampaignNotFound(campaign_id))?)
}

/// GET /accounts/:id
pub async fn get_account(
    State(state): State<AppState>,
    Path(account_id): Path<Uuid>,
) -> AppResult<Json<AccountResponse>> {
    let account = load_account(&state, account_id).await?;
    let audit = audit_account(state.reader.as_ref(), account_id).await?;

    if !audit.is_consistent() {
        warn!("⚠️ Account {} does not reconcile: {:?}", account_id, audit);
    }

    Ok(Json(AccountResponse {
        account,
        ledger_consistent: audit.is_consistent(),
    }))
}

/// GET /accounts/:id/entries
pub async fn list_account_entries(
    State(state): State<AppState>,
    Path(account_id): Path<Uuid>,
) -> AppResult<Json<EntriesResponse>> {
    load_account(&state, account_id).await?;
    let entries = state.reader.list_account_entries(account_id).await?;
    let (total_debits, total_credits, total_refunds) = totals_by_kind(&entries);

    Ok(Json(EntriesResponse {
        account_id,
        entries,
        total_debits,
        total_credits,
        total_refunds,
    }))
}

/// GET /campaigns/:id
pub async fn get_campaign(
    State(state): State<AppState>,
    Path(campaign_id): Path<Uuid>,
) -> AppResult<Json<CampaignResponse>> {
    let campaign = load_campaign(&state, campaign_id).await?;
    let pledges = state.reader.list_campaign_pledges(campaign_id).await?;

    Ok(Json(CampaignResponse {
        campaign,
        pledged_funds: pledged_total(&pledges),
    }))
}

/// GET /campaigns/:id/pledges
pub async fn list_campaign_pledges(
    State(state): State<AppState>,
    Path(campaign_id): Path<Uuid>,
) -> AppResult<Json<Vec<Pledge>>> {
    load_campaign(&state, campaign_id).await?;
    Ok(Json(state.reader.list_campaign_pledges(campaign_id).await?))
}

/// GET /campaigns/:id/settlement
pub async fn get_settlement(
    State(state): State<AppState>,
    Path(campaign_id): Path<Uuid>,
) -> AppResult<Json<SettlementStatusResponse>> {
    let campaign = load_campaign(&state, campaign_id).await?;
    let record = state.reader.get_settlement_record(campaign_id).await?;

    Ok(Json(SettlementStatusResponse {
        campaign_id,
        status: campaign.status,
        record,
    }))
}

/// GET /health - Health check
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let now = state.clock.now();
    let awaiting = match state.reader.list_expired_active_campaigns(now).await {
        Ok(due) => Some(due.len()),
        Err(e) => {
            warn!("⚠️ Health check could not reach the store: {}", e);
            None
        }
    };

    Json(HealthResponse {
        status: if awaiting.is_some() {
            "healthy".to_string()
        } else {
            "degraded".to_string()
        },
        timestamp: now,
        store: format!("{:?}", state.backend).to_lowercase(),
        scheduler_running: state.scheduler.is_running(),
        awaiting_settlement: awaiting,
    })
}
