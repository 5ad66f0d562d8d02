//! API route handlers.
//!
//! All endpoints return JSON. The house is shared via `Arc<ApiState>`;
//! handlers call it synchronously since no house lock is ever held across
//! an await.

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

use crate::engine::commission::MonthlyRecord;
use crate::engine::settlement::{RefundReport, SettlementReport};
use crate::engine::{BatchReceipt, BetReceipt, House};
use crate::pool::{PoolStatus, RiskParameters};
use crate::risk::{BetRequest, ExposureRecord};
use crate::types::{Amount, Bet, BetType, Draw, DrawId, HouseError, MonthId, WinningNumbers};

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Shared state accessible by all route handlers.
pub struct ApiState {
    pub house: Arc<House>,
    /// Operator routes are refused outright when no token is configured.
    operator_token: Option<SecretString>,
}

impl ApiState {
    pub fn new(house: Arc<House>, operator_token: Option<SecretString>) -> Self {
        Self { house, operator_token }
    }

    fn authorize(&self, headers: &HeaderMap) -> Result<(), ApiError> {
        let Some(expected) = &self.operator_token else {
            return Err(ApiError::Unauthorized);
        };
        let presented = headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "));
        match presented {
            Some(token) if token == expected.expose_secret().as_str() => Ok(()),
            _ => {
                warn!("Rejected operator request: bad or missing token");
                Err(ApiError::Unauthorized)
            }
        }
    }
}

pub type AppState = Arc<ApiState>;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ApiError {
    House(HouseError),
    Unauthorized,
}

impl From<HouseError> for ApiError {
    fn from(e: HouseError) -> Self {
        ApiError::House(e)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_allowed_stake: Option<Amount>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<usize>,
}

/// HTTP status for a domain error.
pub fn status_for(error: &HouseError) -> StatusCode {
    match error {
        HouseError::InvalidStakeAmount { .. }
        | HouseError::InvalidNumber { .. }
        | HouseError::UnknownBetType(_)
        | HouseError::EmptyBatch
        | HouseError::InvalidSchedule(_)
        | HouseError::InvalidAmount(_)
        | HouseError::InvalidMonth(_)
        | HouseError::InvalidRiskParameters(_)
        | HouseError::AmountOverflow => StatusCode::BAD_REQUEST,
        HouseError::DrawNotFound(_) => StatusCode::NOT_FOUND,
        HouseError::InvalidStateTransition { .. }
        | HouseError::DrawNotOpen { .. }
        | HouseError::AlreadySettled(_)
        | HouseError::AlreadyCalculated(_)
        | HouseError::MonthNotClosed(_)
        | HouseError::NothingToWithdraw => StatusCode::CONFLICT,
        HouseError::ExposureLimitExceeded { .. } | HouseError::InsufficientBankroll { .. } => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        HouseError::BatchRejected { reason, .. } => status_for(reason),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                Json(ErrorBody {
                    error: "Unauthorized",
                    message: "operator token required".into(),
                    max_allowed_stake: None,
                    index: None,
                }),
            )
                .into_response(),
            ApiError::House(e) => {
                let index = match &e {
                    HouseError::BatchRejected { index, .. } => Some(*index),
                    _ => None,
                };
                let body = ErrorBody {
                    error: e.code(),
                    message: e.to_string(),
                    max_allowed_stake: e.max_allowed_stake(),
                    index,
                };
                (status_for(&e), Json(body)).into_response()
            }
        }
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct AmountRequest {
    pub amount: Amount,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleRequest {
    pub scheduled_time: DateTime<Utc>,
}

/// Results either as the single drawn 4-digit number or per bet type.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ResultsRequest {
    Drawn { drawn_number: u16 },
    PerType(WinningNumbers),
}

impl ResultsRequest {
    fn winning(self) -> Result<WinningNumbers, HouseError> {
        match self {
            ResultsRequest::Drawn { drawn_number } => WinningNumbers::from_draw(drawn_number),
            ResultsRequest::PerType(winning) => Ok(winning),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchRequest {
    pub bets: Vec<BetRequest>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WithdrawnResponse {
    pub withdrawn: Amount,
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// GET /api/pool
pub async fn get_pool(State(state): State<AppState>) -> Json<PoolStatus> {
    Json(state.house.pool_status())
}

/// POST /api/pool/deposit
pub async fn deposit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<AmountRequest>,
) -> ApiResult<Json<PoolStatus>> {
    state.authorize(&headers)?;
    Ok(Json(state.house.deposit(req.amount)?))
}

/// POST /api/pool/withdraw
pub async fn withdraw(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<AmountRequest>,
) -> ApiResult<Json<PoolStatus>> {
    state.authorize(&headers)?;
    Ok(Json(state.house.withdraw(req.amount)?))
}

/// GET /api/risk
pub async fn get_risk(State(state): State<AppState>) -> Json<RiskParameters> {
    Json(state.house.risk_parameters())
}

/// PUT /api/risk
pub async fn put_risk(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(params): Json<RiskParameters>,
) -> ApiResult<Json<RiskParameters>> {
    state.authorize(&headers)?;
    Ok(Json(state.house.set_risk_parameters(params)?))
}

/// GET /api/exposure/:draw_id/:bet_type/:number
pub async fn get_exposure(
    State(state): State<AppState>,
    Path((draw_id, bet_type, number)): Path<(DrawId, String, u16)>,
) -> ApiResult<Json<ExposureRecord>> {
    let bet_type: BetType = bet_type.parse()?;
    Ok(Json(state.house.exposure(draw_id, bet_type, number)?))
}

/// GET /api/draws
pub async fn list_draws(State(state): State<AppState>) -> Json<Vec<Draw>> {
    Json(state.house.draws())
}

/// POST /api/draws
pub async fn schedule_draw(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ScheduleRequest>,
) -> ApiResult<(StatusCode, Json<Draw>)> {
    state.authorize(&headers)?;
    let draw = state.house.schedule_draw(req.scheduled_time)?;
    Ok((StatusCode::CREATED, Json(draw)))
}

/// GET /api/draws/:draw_id
pub async fn get_draw(
    State(state): State<AppState>,
    Path(draw_id): Path<DrawId>,
) -> ApiResult<Json<Draw>> {
    Ok(Json(state.house.draw(draw_id)?))
}

/// POST /api/draws/:draw_id/open
pub async fn open_draw(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(draw_id): Path<DrawId>,
) -> ApiResult<Json<Draw>> {
    state.authorize(&headers)?;
    Ok(Json(state.house.open_draw(draw_id)?))
}

/// POST /api/draws/:draw_id/close
pub async fn close_draw(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(draw_id): Path<DrawId>,
) -> ApiResult<Json<Draw>> {
    state.authorize(&headers)?;
    Ok(Json(state.house.close_draw(draw_id)?))
}

/// POST /api/draws/:draw_id/results
pub async fn enter_results(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(draw_id): Path<DrawId>,
    Json(req): Json<ResultsRequest>,
) -> ApiResult<Json<SettlementReport>> {
    state.authorize(&headers)?;
    let winning = req.winning()?;
    Ok(Json(state.house.enter_results(draw_id, winning)?))
}

/// POST /api/draws/:draw_id/cancel
pub async fn cancel_draw(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(draw_id): Path<DrawId>,
) -> ApiResult<Json<RefundReport>> {
    state.authorize(&headers)?;
    Ok(Json(state.house.cancel_draw(draw_id)?))
}

/// GET /api/draws/:draw_id/bets
pub async fn list_bets(
    State(state): State<AppState>,
    Path(draw_id): Path<DrawId>,
) -> ApiResult<Json<Vec<Bet>>> {
    Ok(Json(state.house.bets_for_draw(draw_id)?))
}

/// POST /api/draws/:draw_id/bets
pub async fn place_bet(
    State(state): State<AppState>,
    Path(draw_id): Path<DrawId>,
    Json(req): Json<BetRequest>,
) -> ApiResult<(StatusCode, Json<BetReceipt>)> {
    let receipt = state
        .house
        .place_bet(draw_id, req.bet_type, req.number, req.stake)?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

/// POST /api/draws/:draw_id/bets/batch
pub async fn place_bets(
    State(state): State<AppState>,
    Path(draw_id): Path<DrawId>,
    Json(req): Json<BatchRequest>,
) -> ApiResult<(StatusCode, Json<BatchReceipt>)> {
    let receipt = state.house.place_bets(draw_id, &req.bets)?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

/// GET /api/commission/:month
pub async fn get_month(
    State(state): State<AppState>,
    Path(month): Path<String>,
) -> ApiResult<Json<MonthlyRecord>> {
    let month: MonthId = month.parse()?;
    let record = state
        .house
        .monthly_record(month)
        .unwrap_or_else(|| MonthlyRecord::new(month));
    Ok(Json(record))
}

/// POST /api/commission/:month
pub async fn calculate_commission(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(month): Path<String>,
) -> ApiResult<Json<MonthlyRecord>> {
    state.authorize(&headers)?;
    let month: MonthId = month.parse()?;
    Ok(Json(state.house.calculate_monthly_commission(month)?))
}

/// POST /api/commission/withdraw
pub async fn withdraw_fees(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ApiResult<Json<WithdrawnResponse>> {
    state.authorize(&headers)?;
    let withdrawn = state.house.withdraw_operator_fees()?;
    Ok(Json(WithdrawnResponse { withdrawn }))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::engine::HouseConfig;
    use crate::types::{BetStatus, ExposureKey};
    use axum::http::HeaderValue;

    fn state(token: Option<&str>) -> AppState {
        let house = House::new(HouseConfig::default(), Arc::new(ManualClock::new(Utc::now()))).unwrap();
        Arc::new(ApiState::new(
            Arc::new(house),
            token.map(|t| SecretString::new(t.to_string())),
        ))
    }

    fn bearer(token: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}")).unwrap(),
        );
        headers
    }

    #[test]
    fn test_authorize() {
        let s = state(Some("secret"));
        assert!(s.authorize(&bearer("secret")).is_ok());
        assert!(s.authorize(&bearer("nope")).is_err());
        assert!(s.authorize(&HeaderMap::new()).is_err());
    }

    #[test]
    fn test_no_token_configured_refuses_operator() {
        let s = state(None);
        assert!(matches!(s.authorize(&bearer("anything")), Err(ApiError::Unauthorized)));
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(&HouseError::DrawNotFound(1)), StatusCode::NOT_FOUND);
        assert_eq!(status_for(&HouseError::EmptyBatch), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(&HouseError::NothingToWithdraw), StatusCode::CONFLICT);
        assert_eq!(
            status_for(&HouseError::InsufficientBankroll { requested: 2, available: 1 }),
            StatusCode::UNPROCESSABLE_ENTITY
        );

        let key = ExposureKey { draw_id: 1, bet_type: BetType::TwoDigit, number: 5 };
        let batch = HouseError::BatchRejected {
            index: 3,
            reason: Box::new(HouseError::ExposureLimitExceeded {
                key,
                projected: 10,
                cap: 5,
                max_allowed_stake: 0,
            }),
        };
        assert_eq!(status_for(&batch), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn test_results_request_forms() {
        let drawn: ResultsRequest = serde_json::from_str(r#"{"drawn_number": 4321}"#).unwrap();
        assert_eq!(drawn.winning().unwrap().two_digit, 21);

        let per_type: ResultsRequest =
            serde_json::from_str(r#"{"two_digit": 1, "three_digit": 22, "four_digit": 333}"#).unwrap();
        assert_eq!(per_type.winning().unwrap().three_digit, 22);

        let bad: ResultsRequest = serde_json::from_str(r#"{"drawn_number": 10000}"#).unwrap();
        assert!(matches!(bad.winning(), Err(HouseError::InvalidNumber { .. })));
    }

    #[tokio::test]
    async fn test_get_pool_handler() {
        let s = state(None);
        s.house.deposit(5_000_000).unwrap();
        let Json(pool) = get_pool(State(s)).await;
        assert_eq!(pool.total_pool, 5_000_000);
    }

    #[tokio::test]
    async fn test_list_bets_handler() {
        let s = state(None);
        let draw = s.house.schedule_draw(Utc::now() + chrono::Duration::hours(1)).unwrap();
        s.house.open_draw(draw.id).unwrap();
        s.house.deposit(100_000_000_000).unwrap();
        s.house.place_bet(draw.id, BetType::ThreeDigit, 7, 1_000_000).unwrap();

        let Json(bets) = list_bets(State(s), Path(draw.id)).await.unwrap();
        assert_eq!(bets.len(), 1);
        assert_eq!(bets[0].status, BetStatus::Pending);
    }
}
