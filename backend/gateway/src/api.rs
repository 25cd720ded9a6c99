//! Axum REST API over the escrow engine and its event journal.
//!
//! Callers identify themselves with the [`CALLER_HEADER`] header; the
//! gateway does no authentication of its own.  Amounts are decimal strings
//! in every response and may be sent as strings or integers.

use std::fmt;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use crowdtank_escrow::{
    Amount, CampaignId, CampaignStatus, CampaignView, Clock, ContributionRecord, CrowdTank,
    EscrowError, Identity, InMemoryLedger, NewCampaign, Withdrawal,
};
use serde::de::{self, Deserializer, Unexpected, Visitor};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;

use crate::db;
use crate::errors::{GatewayError, Result};
use crate::events::EventRecord;
use crate::journal::JournalSink;

pub const CALLER_HEADER: &str = "x-caller-id";

/// The engine as the gateway runs it.
pub type Escrow = CrowdTank<Arc<InMemoryLedger>, Arc<dyn Clock>, JournalSink>;

#[derive(Clone)]
pub struct ApiState {
    pub pool: SqlitePool,
    pub escrow: Arc<Escrow>,
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/campaigns", post(create_campaign).get(list_campaigns))
        .route("/campaigns/:id", get(get_campaign))
        .route(
            "/campaigns/:id/contributions",
            post(contribute).get(get_contributions),
        )
        .route("/campaigns/:id/finalize", post(finalize))
        .route("/campaigns/:id/withdraw", post(withdraw))
        .route("/campaigns/:id/remaining", get(get_remaining))
        .route("/campaigns/:id/events", get(get_campaign_events))
        .route("/stats", get(stats))
        .route("/accounts/:identity", get(get_account))
        .route("/events", get(get_all_events))
        .with_state(state)
}

fn caller(headers: &HeaderMap) -> Result<Identity> {
    headers
        .get(CALLER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(Identity::from)
        .ok_or(GatewayError::MissingCaller)
}

// ─────────────────────────────────────────────────────────
// Request shapes
// ─────────────────────────────────────────────────────────

/// An amount as sent by a client: a JSON integer or a decimal string.
/// Negative inputs parse to `None` so they fail engine validation rather
/// than JSON decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireAmount(Option<Amount>);

impl<'de> Deserialize<'de> for WireAmount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct AmountVisitor;

        impl<'de> Visitor<'de> for AmountVisitor {
            type Value = WireAmount;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an integer or a decimal string")
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<WireAmount, E> {
                Ok(WireAmount(u128::try_from(v).ok()))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<WireAmount, E> {
                Ok(WireAmount(Some(v.into())))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<WireAmount, E> {
                let s = v.trim();
                if let Ok(amount) = s.parse::<u128>() {
                    return Ok(WireAmount(Some(amount)));
                }
                match s.parse::<i128>() {
                    Ok(_) => Ok(WireAmount(None)),
                    Err(_) => Err(E::invalid_value(Unexpected::Str(v), &self)),
                }
            }
        }

        deserializer.deserialize_any(AmountVisitor)
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateCampaignRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub goal: WireAmount,
    pub duration_secs: i64,
    #[serde(default)]
    pub id: Option<CampaignId>,
}

#[derive(Debug, Deserialize)]
pub struct ContributeRequest {
    pub amount: WireAmount,
}

// ─────────────────────────────────────────────────────────
// Response shapes
// ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

#[derive(Serialize)]
pub struct CreatedResponse {
    pub campaign_id: CampaignId,
}

#[derive(Serialize)]
pub struct CampaignResponse {
    pub id: CampaignId,
    pub name: String,
    pub description: String,
    pub creator: Identity,
    pub goal: String,
    pub created_at: u64,
    pub deadline: u64,
    pub amount_raised: String,
    pub custody_balance: String,
    pub remaining_funding: String,
    pub status: CampaignStatus,
    pub creator_withdrawn: bool,
    pub contributor_count: usize,
}

impl From<CampaignView> for CampaignResponse {
    fn from(view: CampaignView) -> Self {
        CampaignResponse {
            id: view.id,
            remaining_funding: view.goal.saturating_sub(view.amount_raised).to_string(),
            goal: view.goal.to_string(),
            amount_raised: view.amount_raised.to_string(),
            custody_balance: view.custody_balance.to_string(),
            name: view.name,
            description: view.description,
            creator: view.creator,
            created_at: view.created_at,
            deadline: view.deadline,
            status: view.status,
            creator_withdrawn: view.creator_withdrawn,
            contributor_count: view.contributor_count,
        }
    }
}

#[derive(Serialize)]
pub struct CampaignsResponse {
    pub count: usize,
    pub campaigns: Vec<CampaignResponse>,
}

#[derive(Serialize)]
pub struct ContributedResponse {
    pub campaign_id: CampaignId,
    pub contributor: Identity,
    pub amount: String,
    pub amount_raised: String,
}

#[derive(Serialize)]
pub struct ContributionResponse {
    pub contributor: Identity,
    pub amount: String,
    pub refunded: bool,
}

impl From<ContributionRecord> for ContributionResponse {
    fn from(record: ContributionRecord) -> Self {
        ContributionResponse {
            contributor: record.contributor,
            amount: record.amount.to_string(),
            refunded: record.refunded,
        }
    }
}

#[derive(Serialize)]
pub struct ContributionsResponse {
    pub campaign_id: CampaignId,
    pub count: usize,
    pub contributions: Vec<ContributionResponse>,
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub campaign_id: CampaignId,
    pub status: CampaignStatus,
}

#[derive(Serialize)]
pub struct WithdrawalResponse {
    pub campaign_id: CampaignId,
    pub kind: &'static str,
    pub amount: String,
}

#[derive(Serialize)]
pub struct RemainingResponse {
    pub campaign_id: CampaignId,
    pub remaining: String,
}

#[derive(Serialize)]
pub struct StatsResponse {
    pub total_projects: usize,
    pub total_projects_funded: u64,
    pub total_projects_failed: u64,
}

#[derive(Serialize)]
pub struct AccountResponse {
    pub identity: Identity,
    pub balance: String,
}

#[derive(Serialize)]
pub struct EventsResponse {
    pub campaign_id: String,
    pub count: usize,
    pub events: Vec<EventRecord>,
}

#[derive(Serialize)]
pub struct AllEventsResponse {
    pub count: usize,
    pub events: Vec<EventRecord>,
}

// ─────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────

/// `GET /health`
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// `POST /campaigns`
pub async fn create_campaign(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(req): Json<CreateCampaignRequest>,
) -> Result<(StatusCode, Json<CreatedResponse>)> {
    let creator = caller(&headers)?;
    let goal = req.goal.0.ok_or(EscrowError::InvalidGoal)?;
    let duration_secs =
        u64::try_from(req.duration_secs).map_err(|_| EscrowError::InvalidDuration)?;

    let campaign_id = state.escrow.create_project(
        &creator,
        NewCampaign {
            name: req.name,
            description: req.description,
            goal,
            duration_secs,
            id: req.id,
        },
    )?;

    Ok((StatusCode::CREATED, Json(CreatedResponse { campaign_id })))
}

/// `GET /campaigns`
pub async fn list_campaigns(State(state): State<Arc<ApiState>>) -> Json<CampaignsResponse> {
    let campaigns: Vec<CampaignResponse> = state
        .escrow
        .list_projects()
        .into_iter()
        .map(CampaignResponse::from)
        .collect();
    Json(CampaignsResponse {
        count: campaigns.len(),
        campaigns,
    })
}

/// `GET /campaigns/:id`
pub async fn get_campaign(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<CampaignId>,
) -> Result<Json<CampaignResponse>> {
    Ok(Json(state.escrow.get_project(id)?.into()))
}

/// `POST /campaigns/:id/contributions`
pub async fn contribute(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<CampaignId>,
    headers: HeaderMap,
    Json(req): Json<ContributeRequest>,
) -> Result<Json<ContributedResponse>> {
    let contributor = caller(&headers)?;
    let amount = req.amount.0.ok_or(EscrowError::InvalidAmount)?;

    let amount_raised = state.escrow.fund_project(&contributor, id, amount)?;

    Ok(Json(ContributedResponse {
        campaign_id: id,
        contributor,
        amount: amount.to_string(),
        amount_raised: amount_raised.to_string(),
    }))
}

/// `GET /campaigns/:id/contributions`
pub async fn get_contributions(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<CampaignId>,
) -> Result<Json<ContributionsResponse>> {
    let contributions: Vec<ContributionResponse> = state
        .escrow
        .get_contributions(id)?
        .into_iter()
        .map(ContributionResponse::from)
        .collect();
    Ok(Json(ContributionsResponse {
        campaign_id: id,
        count: contributions.len(),
        contributions,
    }))
}

/// `POST /campaigns/:id/finalize`
///
/// Anyone may trigger finalization; before the deadline it reports `open`.
pub async fn finalize(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<CampaignId>,
) -> Result<Json<StatusResponse>> {
    let status = state.escrow.check_project_status(id)?;
    Ok(Json(StatusResponse {
        campaign_id: id,
        status,
    }))
}

/// `POST /campaigns/:id/withdraw`
pub async fn withdraw(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<CampaignId>,
    headers: HeaderMap,
) -> Result<Json<WithdrawalResponse>> {
    let who = caller(&headers)?;
    let withdrawal = state.escrow.user_withdraw_funds(&who, id)?;
    let kind = match withdrawal {
        Withdrawal::Creator { .. } => "creator",
        Withdrawal::Refund { .. } => "refund",
    };
    Ok(Json(WithdrawalResponse {
        campaign_id: id,
        kind,
        amount: withdrawal.amount().to_string(),
    }))
}

/// `GET /campaigns/:id/remaining`
pub async fn get_remaining(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<CampaignId>,
) -> Result<Json<RemainingResponse>> {
    let remaining = state.escrow.get_remaining_funding(id)?;
    Ok(Json(RemainingResponse {
        campaign_id: id,
        remaining: remaining.to_string(),
    }))
}

/// `GET /stats`
pub async fn stats(State(state): State<Arc<ApiState>>) -> Json<StatsResponse> {
    let totals = state.escrow.get_totals();
    Json(StatsResponse {
        total_projects: state.escrow.registry().len(),
        total_projects_funded: totals.funded,
        total_projects_failed: totals.failed,
    })
}

/// `GET /accounts/:identity`
///
/// Balance the in-memory ledger has paid out to `identity`.
pub async fn get_account(
    State(state): State<Arc<ApiState>>,
    Path(identity): Path<String>,
) -> Json<AccountResponse> {
    let identity = Identity::new(identity);
    let balance = state.escrow.ledger().balance_of(&identity);
    Json(AccountResponse {
        identity,
        balance: balance.to_string(),
    })
}

/// `GET /campaigns/:id/events`
///
/// Returns all journaled events for the given campaign.
pub async fn get_campaign_events(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<CampaignId>,
) -> Result<Json<EventsResponse>> {
    let campaign_id = id.to_string();
    let events = db::get_events_for_campaign(&state.pool, &campaign_id).await?;
    Ok(Json(EventsResponse {
        campaign_id,
        count: events.len(),
        events,
    }))
}

/// `GET /events`
///
/// Returns all journaled events across all campaigns.
pub async fn get_all_events(State(state): State<Arc<ApiState>>) -> Result<Json<AllEventsResponse>> {
    let events = db::get_all_events(&state.pool).await?;
    Ok(Json(AllEventsResponse {
        count: events.len(),
        events,
    }))
}
