// =============================================================================
// REST API Endpoints: Axum 0.7
// =============================================================================
//
// Read surfaces over the ledger, leaderboard, and analyzers, plus the POST
// trigger endpoint that adapts straight onto `RoundOrchestrator::trigger`.
// CORS is configured permissively for development; tighten allowed origins
// in production.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::header,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::api::ApiError;
use crate::app_state::AppState;
use crate::leaderboard::SortKey;
use crate::ledger::LedgerQuery;
use crate::orchestrator::TriggerOutcome;
use crate::stream::EventFilter;
use crate::types::EventKind;

// =============================================================================
// Router construction
// =============================================================================

/// Build the full REST API router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // ── Liveness & roster ───────────────────────────────────────
        .route("/health", get(health))
        .route("/agents", get(agents))
        .route("/agents/:agent_id/portfolio", get(agent_portfolio))
        .route("/agents/:agent_id/fills", get(agent_fills))
        // ── Rounds ──────────────────────────────────────────────────
        .route("/trigger-round/trigger", post(trigger_round))
        .route("/trigger-round/cancel", post(cancel_round))
        .route("/trigger-round/status", get(round_status))
        .route("/trigger-round/history", get(round_history))
        // ── Trade stream ────────────────────────────────────────────
        .route("/trade-stream/live", get(crate::api::sse::live_stream))
        .route("/trade-stream/events", get(stream_events))
        // ── Ledger ──────────────────────────────────────────────────
        .route("/ledger/query", get(ledger_query))
        .route("/ledger/verify", get(ledger_verify))
        .route("/ledger/export", get(ledger_export))
        // ── Leaderboard & analyzers ─────────────────────────────────
        .route("/leaderboard", get(leaderboard))
        .route("/analyzers/calibration/:agent_id", get(calibration))
        .route("/analyzers/personality/:agent_id", get(personality))
        .route("/analyzers/consistency/:agent_id", get(consistency_report))
        .route("/analyzers/consensus", get(consensus))
        // ── Middleware & state ──────────────────────────────────────
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Liveness & roster
// =============================================================================

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.health())
}

async fn agents(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.roster.as_ref().clone())
}

async fn agent_portfolio(
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if state.agent(&agent_id).is_none() {
        return Err(ApiError::not_found(
            "unknown_agent",
            format!("no agent '{agent_id}'"),
        ));
    }
    let snapshot = state
        .market
        .snapshot()
        .await
        .map_err(|e| ApiError::internal(format!("market snapshot failed: {e:#}")))?;
    Ok(Json(state.fills.portfolio_for(&agent_id, &snapshot)))
}

async fn agent_fills(
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if state.agent(&agent_id).is_none() {
        return Err(ApiError::not_found(
            "unknown_agent",
            format!("no agent '{agent_id}'"),
        ));
    }
    Ok(Json(state.fills.fills_for(&agent_id)))
}

// =============================================================================
// Rounds
// =============================================================================

async fn trigger_round(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse, ApiError> {
    match state.orchestrator.trigger().await {
        TriggerOutcome::Completed(round) => {
            info!(round_id = %round.round_id, status = ?round.status, "round triggered via API");
            Ok(Json(round))
        }
        TriggerOutcome::Busy { round_id } => Err(ApiError::conflict(
            "round_in_progress",
            "a round is already running",
        )
        .with_details(serde_json::json!({ "roundId": round_id }))),
    }
}

async fn cancel_round(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.orchestrator.cancel_current();
    Json(serde_json::json!({ "cancelRequested": true }))
}

async fn round_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let status = state.orchestrator.status();
    Json(serde_json::json!({
        "locked": status.locked,
        "currentRound": status.current_round,
        "lastRound": status.last_round,
        "roundsRun": status.rounds_run,
        "rpc": state.rpc.metrics(),
    }))
}

#[derive(Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

async fn round_history(
    State(state): State<Arc<AppState>>,
    Query(query): Query<HistoryQuery>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(20).min(100);
    Json(state.orchestrator.history(limit))
}

// =============================================================================
// Trade stream (polling fallback)
// =============================================================================

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventsQuery {
    limit: Option<usize>,
    /// Comma-separated event types.
    types: Option<String>,
    agent_id: Option<String>,
    since: Option<u64>,
}

/// Parse a comma-separated `types=` parameter into event kinds.
pub(crate) fn parse_types(raw: &str) -> Result<Vec<EventKind>, ApiError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            EventKind::parse(s).ok_or_else(|| {
                ApiError::bad_request("validation", format!("unknown event type '{s}'"))
            })
        })
        .collect()
}

async fn stream_events(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EventsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let types = match &query.types {
        Some(raw) => Some(parse_types(raw)?),
        None => None,
    };
    let filter = EventFilter {
        types,
        agent_ids: query.agent_id.clone().map(|a| vec![a]),
    };
    let limit = query.limit.unwrap_or(50).min(500);
    Ok(Json(state.stream.recent(&filter, limit, query.since)))
}

// =============================================================================
// Ledger
// =============================================================================

async fn ledger_query(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LedgerQuery>,
) -> impl IntoResponse {
    Json(state.ledger.query(&query))
}

async fn ledger_verify(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.ledger.verify_integrity())
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExportQuery {
    agent_id: Option<String>,
    format: Option<String>,
}

async fn ledger_export(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ExportQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let agent_id = query.agent_id.as_deref();
    match query.format.as_deref().unwrap_or("jsonl") {
        "jsonl" => Ok((
            [(header::CONTENT_TYPE, "application/x-ndjson")],
            state.ledger.export_jsonl(agent_id),
        )),
        "csv" => Ok((
            [(header::CONTENT_TYPE, "text/csv")],
            state.ledger.export_csv(agent_id),
        )),
        other => Err(ApiError::bad_request(
            "validation",
            format!("unknown export format '{other}', expected jsonl or csv"),
        )),
    }
}

// =============================================================================
// Leaderboard & analyzers
// =============================================================================

#[derive(Deserialize)]
struct LeaderboardQuery {
    limit: Option<usize>,
    sort: Option<String>,
}

async fn leaderboard(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LeaderboardQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let sort = match query.sort.as_deref() {
        None => SortKey::Composite,
        Some(raw) => SortKey::parse(raw).ok_or_else(|| {
            ApiError::bad_request("validation", format!("unknown sort key '{raw}'"))
        })?,
    };
    let limit = query.limit.unwrap_or(50).min(200);
    Ok(Json(state.leaderboard.standings(sort, limit)))
}

async fn calibration(
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if state.agent(&agent_id).is_none() {
        return Err(ApiError::not_found(
            "unknown_agent",
            format!("no agent '{agent_id}'"),
        ));
    }
    Ok(Json(state.scoring.calibration_report(&agent_id)))
}

async fn personality(
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if state.agent(&agent_id).is_none() {
        return Err(ApiError::not_found(
            "unknown_agent",
            format!("no agent '{agent_id}'"),
        ));
    }
    Ok(Json(state.scoring.personality_report(&agent_id)))
}

async fn consistency_report(
    State(state): State<Arc<AppState>>,
    Path(agent_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if state.agent(&agent_id).is_none() {
        return Err(ApiError::not_found(
            "unknown_agent",
            format!("no agent '{agent_id}'"),
        ));
    }
    Ok(Json(state.scoring.consistency_report(&agent_id)))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConsensusQuery {
    agent_a: String,
    agent_b: String,
}

async fn consensus(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ConsensusQuery>,
) -> Result<impl IntoResponse, ApiError> {
    for id in [&query.agent_a, &query.agent_b] {
        if state.agent(id).is_none() {
            return Err(ApiError::not_found(
                "unknown_agent",
                format!("no agent '{id}'"),
            ));
        }
    }
    Ok(Json(
        state
            .scoring
            .consensus(&state.ledger, &query.agent_a, &query.agent_b),
    ))
}

// =============================================================================
// Tests
// =============================================================================
