//! Request/response types and handlers.
//!
//! Thin translation layer: each handler extracts its inputs, calls one core
//! operation, and serializes the result. No scheduling logic lives here.
//! Worker-facing handlers touch the caller's session first so the
//! inactivity reaper sees real activity.

use std::collections::HashSet;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::error;

use super::AppState;
use crate::admin::{Actor, Role};
use crate::error::CoreError;
use crate::reaper::CubicleCleanup;
use crate::store::TurnStore;
use crate::types::{
    AuditRecord, CubicleId, PriorityClass, Turn, TurnId, WorkerId, WorkerSession,
};

/// Header carrying the authenticated caller's worker id.
const HEADER_ACTOR_ID: &str = "x-actor-id";
/// Header carrying the authenticated caller's role.
const HEADER_ACTOR_ROLE: &str = "x-actor-role";
/// Header carrying the original client address, set by the proxy.
const HEADER_FORWARDED_FOR: &str = "x-forwarded-for";

/// Errors surfaced over HTTP.
#[derive(Debug)]
pub enum ApiError {
    /// Malformed request: bad header, bad body shape.
    BadRequest(String),
    /// A core operation failed.
    Core(CoreError),
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        ApiError::Core(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Core(err) => {
                let status = match &err {
                    CoreError::TurnNotFound(_)
                    | CoreError::CubicleNotFound(_)
                    | CoreError::SessionNotFound(_) => StatusCode::NOT_FOUND,
                    CoreError::InvalidStateTransition { .. } => StatusCode::UNPROCESSABLE_ENTITY,
                    CoreError::Validation(_) => StatusCode::BAD_REQUEST,
                    CoreError::ConcurrencyConflict(_) => StatusCode::CONFLICT,
                    CoreError::Forbidden(_) => StatusCode::FORBIDDEN,
                    CoreError::Store(_) | CoreError::Snapshot(_) => {
                        error!(error = %err, "internal error");
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                (status, err.to_string())
            }
        };
        (status, Json(ErrorBody { error: message })).into_response()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ErrorBody {
    error: String,
}

type ApiResult<T> = Result<T, ApiError>;

/// Builds the caller identity from request headers.
fn actor_from_headers(headers: &HeaderMap) -> ApiResult<Actor> {
    let id = header_str(headers, HEADER_ACTOR_ID)?
        .parse::<u64>()
        .map(WorkerId)
        .map_err(|_| ApiError::BadRequest(format!("{HEADER_ACTOR_ID} must be an integer")))?;
    let role = match header_str(headers, HEADER_ACTOR_ROLE)? {
        "admin" => Role::Admin,
        "staff" => Role::Staff,
        other => {
            return Err(ApiError::BadRequest(format!(
                "unknown {HEADER_ACTOR_ROLE}: {other}"
            )))
        }
    };
    let source_address = headers
        .get(HEADER_FORWARDED_FOR)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    Ok(Actor {
        id,
        role,
        source_address,
    })
}

fn header_str<'a>(headers: &'a HeaderMap, name: &'static str) -> ApiResult<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest(format!("missing required header: {name}")))
}

// ─── Intake and lookup ───

#[derive(Debug, Deserialize)]
pub struct CreateTurnRequest {
    pub priority_class: PriorityClass,
}

pub async fn create_turn(
    State(state): State<AppState>,
    Json(body): Json<CreateTurnRequest>,
) -> ApiResult<(StatusCode, Json<Turn>)> {
    let turn = state
        .store()
        .create_turn(body.priority_class, state.clock().now())
        .map_err(CoreError::from)?;
    Ok((StatusCode::CREATED, Json(turn)))
}

pub async fn get_turn(
    State(state): State<AppState>,
    Path(turn): Path<u64>,
) -> ApiResult<Json<Turn>> {
    let id = TurnId(turn);
    let turn = state
        .store()
        .get(id)
        .map_err(CoreError::from)?
        .ok_or(CoreError::TurnNotFound(id))?;
    Ok(Json(turn))
}

// ─── Holdings ───

#[derive(Debug, Serialize, Deserialize)]
pub struct HoldingResponse {
    pub turn: Option<Turn>,
}

pub async fn assign_next_holding(
    State(state): State<AppState>,
    Path(worker): Path<u64>,
) -> ApiResult<Json<HoldingResponse>> {
    let worker = WorkerId(worker);
    state.sessions().touch_session(worker)?;
    let turn = state.scheduler().assign_next_holding(worker)?;
    Ok(Json(HoldingResponse { turn }))
}

pub async fn get_user_holding_turn(
    State(state): State<AppState>,
    Path(worker): Path<u64>,
) -> ApiResult<Json<HoldingResponse>> {
    let turn = state.scheduler().get_user_holding_turn(WorkerId(worker))?;
    Ok(Json(HoldingResponse { turn }))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReleaseResponse {
    pub released: usize,
}

pub async fn release_user_holdings(
    State(state): State<AppState>,
    Path(worker): Path<u64>,
) -> ApiResult<Json<ReleaseResponse>> {
    let released = state.scheduler().release_user_holdings(WorkerId(worker))?;
    Ok(Json(ReleaseResponse { released }))
}

// ─── Skip ───

/// The skip set is round-tripped through the client: it is per-worker,
/// per-cycle state the core does not persist.
#[derive(Debug, Deserialize)]
pub struct SkipRequest {
    pub current_turn_id: TurnId,
    #[serde(default)]
    pub skipped: HashSet<TurnId>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SkipResponse {
    pub turn: Option<Turn>,
    pub cycle_completed: bool,
    /// The updated skip set the client must send on the next skip.
    pub skipped: HashSet<TurnId>,
}

pub async fn skip_holding(
    State(state): State<AppState>,
    Path(worker): Path<u64>,
    Json(body): Json<SkipRequest>,
) -> ApiResult<Json<SkipResponse>> {
    let worker = WorkerId(worker);
    state.sessions().touch_session(worker)?;
    let mut skipped = body.skipped;
    let outcome = state
        .skip()
        .skip_holding(worker, body.current_turn_id, &mut skipped)?;
    Ok(Json(SkipResponse {
        turn: outcome.turn,
        cycle_completed: outcome.cycle_completed,
        skipped,
    }))
}

// ─── Attendance ───

#[derive(Debug, Deserialize)]
pub struct AttendRequest {
    pub turn_id: TurnId,
    pub cubicle_id: CubicleId,
}

pub async fn start_attending(
    State(state): State<AppState>,
    Path(worker): Path<u64>,
    Json(body): Json<AttendRequest>,
) -> ApiResult<Json<Turn>> {
    let worker = WorkerId(worker);
    state.sessions().touch_session(worker)?;
    let turn = state
        .scheduler()
        .start_attending(worker, body.turn_id, body.cubicle_id)?;
    Ok(Json(turn))
}

#[derive(Debug, Deserialize)]
pub struct FinishRequest {
    pub turn_id: TurnId,
}

pub async fn finish_turn(
    State(state): State<AppState>,
    Path(worker): Path<u64>,
    Json(body): Json<FinishRequest>,
) -> ApiResult<Json<Turn>> {
    let worker = WorkerId(worker);
    state.sessions().touch_session(worker)?;
    let turn = state.scheduler().finish_turn(worker, body.turn_id)?;
    Ok(Json(turn))
}

pub async fn register_call(
    State(state): State<AppState>,
    Path(turn): Path<u64>,
) -> ApiResult<Json<Turn>> {
    let turn = state.scheduler().register_call(TurnId(turn))?;
    Ok(Json(turn))
}

pub async fn defer_turn(
    State(state): State<AppState>,
    Path(turn): Path<u64>,
) -> ApiResult<Json<Turn>> {
    let turn = state.defer().defer_turn(TurnId(turn))?;
    Ok(Json(turn))
}

// ─── Sessions ───

pub async fn touch_session(
    State(state): State<AppState>,
    Path(worker): Path<u64>,
) -> ApiResult<Json<WorkerSession>> {
    let session = state.sessions().touch_session(WorkerId(worker))?;
    Ok(Json(session))
}

#[derive(Debug, Deserialize)]
pub struct SelectCubicleRequest {
    pub cubicle_id: CubicleId,
}

pub async fn select_cubicle(
    State(state): State<AppState>,
    Path(worker): Path<u64>,
    Json(body): Json<SelectCubicleRequest>,
) -> ApiResult<Json<WorkerSession>> {
    let session = state
        .sessions()
        .select_cubicle(WorkerId(worker), body.cubicle_id)?;
    Ok(Json(session))
}

pub async fn cleanup_cubicles(
    State(state): State<AppState>,
) -> ApiResult<Json<CubicleCleanup>> {
    let cleanup = state.scheduler().reaper().release_expired_cubicles()?;
    Ok(Json(cleanup))
}

// ─── Admin overrides ───

#[derive(Debug, Deserialize)]
pub struct ReasonedRequest {
    pub reason: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct OptionalReasonRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReassignCubicleRequest {
    pub cubicle_id: CubicleId,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ReassignWorkerRequest {
    pub worker_id: WorkerId,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ChangePriorityRequest {
    pub priority_class: PriorityClass,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct OverrideResponse {
    pub turn: Turn,
    pub record: AuditRecord,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BatchResponse {
    pub finished: Vec<Turn>,
    pub record: AuditRecord,
}

pub async fn cancel_turn(
    State(state): State<AppState>,
    Path(turn): Path<u64>,
    headers: HeaderMap,
    Json(body): Json<ReasonedRequest>,
) -> ApiResult<Json<OverrideResponse>> {
    let actor = actor_from_headers(&headers)?;
    let outcome = state
        .admin()
        .cancel_turn(&actor, TurnId(turn), &body.reason)?;
    Ok(Json(OverrideResponse {
        turn: outcome.turn,
        record: outcome.record,
    }))
}

pub async fn force_complete(
    State(state): State<AppState>,
    Path(turn): Path<u64>,
    headers: HeaderMap,
    Json(body): Json<ReasonedRequest>,
) -> ApiResult<Json<OverrideResponse>> {
    let actor = actor_from_headers(&headers)?;
    let outcome = state
        .admin()
        .force_complete(&actor, TurnId(turn), &body.reason)?;
    Ok(Json(OverrideResponse {
        turn: outcome.turn,
        record: outcome.record,
    }))
}

pub async fn reactivate_turn(
    State(state): State<AppState>,
    Path(turn): Path<u64>,
    headers: HeaderMap,
    Json(body): Json<ReasonedRequest>,
) -> ApiResult<Json<OverrideResponse>> {
    let actor = actor_from_headers(&headers)?;
    let outcome = state
        .admin()
        .reactivate_turn(&actor, TurnId(turn), &body.reason)?;
    Ok(Json(OverrideResponse {
        turn: outcome.turn,
        record: outcome.record,
    }))
}

pub async fn return_to_queue(
    State(state): State<AppState>,
    Path(turn): Path<u64>,
    headers: HeaderMap,
    Json(body): Json<ReasonedRequest>,
) -> ApiResult<Json<OverrideResponse>> {
    let actor = actor_from_headers(&headers)?;
    let outcome = state
        .admin()
        .return_to_queue(&actor, TurnId(turn), &body.reason)?;
    Ok(Json(OverrideResponse {
        turn: outcome.turn,
        record: outcome.record,
    }))
}

pub async fn reassign_cubicle(
    State(state): State<AppState>,
    Path(turn): Path<u64>,
    headers: HeaderMap,
    Json(body): Json<ReassignCubicleRequest>,
) -> ApiResult<Json<OverrideResponse>> {
    let actor = actor_from_headers(&headers)?;
    let outcome = state.admin().reassign_cubicle(
        &actor,
        TurnId(turn),
        body.cubicle_id,
        body.reason.as_deref(),
    )?;
    Ok(Json(OverrideResponse {
        turn: outcome.turn,
        record: outcome.record,
    }))
}

pub async fn reassign_worker(
    State(state): State<AppState>,
    Path(turn): Path<u64>,
    headers: HeaderMap,
    Json(body): Json<ReassignWorkerRequest>,
) -> ApiResult<Json<OverrideResponse>> {
    let actor = actor_from_headers(&headers)?;
    let outcome = state.admin().reassign_worker(
        &actor,
        TurnId(turn),
        body.worker_id,
        body.reason.as_deref(),
    )?;
    Ok(Json(OverrideResponse {
        turn: outcome.turn,
        record: outcome.record,
    }))
}

pub async fn change_priority(
    State(state): State<AppState>,
    Path(turn): Path<u64>,
    headers: HeaderMap,
    Json(body): Json<ChangePriorityRequest>,
) -> ApiResult<Json<OverrideResponse>> {
    let actor = actor_from_headers(&headers)?;
    let outcome = state.admin().change_priority(
        &actor,
        TurnId(turn),
        body.priority_class,
        body.reason.as_deref(),
    )?;
    Ok(Json(OverrideResponse {
        turn: outcome.turn,
        record: outcome.record,
    }))
}

pub async fn release_holding(
    State(state): State<AppState>,
    Path(turn): Path<u64>,
    headers: HeaderMap,
    Json(body): Json<OptionalReasonRequest>,
) -> ApiResult<Json<OverrideResponse>> {
    let actor = actor_from_headers(&headers)?;
    let outcome = state
        .admin()
        .release_holding(&actor, TurnId(turn), body.reason.as_deref())?;
    Ok(Json(OverrideResponse {
        turn: outcome.turn,
        record: outcome.record,
    }))
}

pub async fn finish_all(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<ReasonedRequest>,
) -> ApiResult<Json<BatchResponse>> {
    let actor = actor_from_headers(&headers)?;
    let outcome = state.admin().finish_all(&actor, &body.reason)?;
    Ok(Json(BatchResponse {
        finished: outcome.finished,
        record: outcome.record,
    }))
}
