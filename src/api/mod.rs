//! HTTP API: Axum server over the house.
//!
//! Public read routes plus bet placement; operator routes (draw control,
//! bankroll, risk, commission) require `Authorization: Bearer <token>`.
//! CORS enabled for local development.

pub mod routes;

use anyhow::{Context, Result};
use axum::{
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use routes::AppState;

/// Bind the API port and serve in a background task.
///
/// Binding happens before returning so a taken port is reported to the
/// caller; the server itself runs detached.
pub async fn spawn_api(state: AppState, port: u16) -> Result<()> {
    let app = build_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind API port {port}"))?;
    info!(port, "API server listening on http://localhost:{port}");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "API server error");
        }
    });

    Ok(())
}

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(HeaderValue::from_static("*"))
        .allow_methods([Method::GET, Method::POST, Method::PUT])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    Router::new()
        .route("/health", get(routes::health))
        // Pool and risk
        .route("/api/pool", get(routes::get_pool))
        .route("/api/pool/deposit", post(routes::deposit))
        .route("/api/pool/withdraw", post(routes::withdraw))
        .route("/api/risk", get(routes::get_risk).put(routes::put_risk))
        .route(
            "/api/exposure/:draw_id/:bet_type/:number",
            get(routes::get_exposure),
        )
        // Draws
        .route("/api/draws", get(routes::list_draws).post(routes::schedule_draw))
        .route("/api/draws/:draw_id", get(routes::get_draw))
        .route("/api/draws/:draw_id/open", post(routes::open_draw))
        .route("/api/draws/:draw_id/close", post(routes::close_draw))
        .route("/api/draws/:draw_id/results", post(routes::enter_results))
        .route("/api/draws/:draw_id/cancel", post(routes::cancel_draw))
        .route(
            "/api/draws/:draw_id/bets",
            get(routes::list_bets).post(routes::place_bet),
        )
        .route("/api/draws/:draw_id/bets/batch", post(routes::place_bets))
        // Commission
        .route("/api/commission/withdraw", post(routes::withdraw_fees))
        .route(
            "/api/commission/:month",
            get(routes::get_month).post(routes::calculate_commission),
        )
        .layer(cors)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::engine::{House, HouseConfig};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::{Duration, TimeZone, Utc};
    use routes::ApiState;
    use secrecy::SecretString;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    const TOKEN: &str = "test-operator-token";

    fn test_state() -> AppState {
        let t0 = Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap();
        let house = House::new(HouseConfig::default(), Arc::new(ManualClock::new(t0))).unwrap();
        house.deposit(200_000_000_000).unwrap();
        house.schedule_draw(t0 + Duration::hours(1)).unwrap();
        house.open_draw(1).unwrap();
        Arc::new(ApiState::new(Arc::new(house), Some(SecretString::new(TOKEN.into()))))
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post(uri: &str, body: Value, token: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn json_body(resp: axum::response::Response) -> Value {
        let body = axum::body::to_bytes(resp.into_body(), 100_000).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = build_router(test_state());
        let resp = app.oneshot(get("/health")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_pool_endpoint() {
        let app = build_router(test_state());
        let resp = app.oneshot(get("/api/pool")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let json = json_body(resp).await;
        assert_eq!(json["total_pool"], 200_000_000_000i64);
        // min(10,000 USDT, 0.1 * 160,000 USDT)
        assert_eq!(json["payout_cap"], 10_000_000_000i64);
    }

    #[tokio::test]
    async fn test_place_bet_and_read_exposure() {
        let state = test_state();
        let resp = build_router(state.clone())
            .oneshot(post(
                "/api/draws/1/bets",
                json!({"bet_type": "two_digit", "number": 42, "stake": 10_000_000}),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let receipt = json_body(resp).await;
        assert_eq!(receipt["accepted"], true);
        assert_eq!(receipt["multiplier"], 65);

        let resp = build_router(state)
            .oneshot(get("/api/exposure/1/2d/42"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let exposure = json_body(resp).await;
        assert_eq!(exposure["total_liability"], 650_000_000i64);
    }

    #[tokio::test]
    async fn test_exposure_limit_is_422_with_retry_stake() {
        let app = build_router(test_state());
        // 4D × 7 USDT = 10,500 USDT > 10,000 cap → max 6 USDT
        let resp = app
            .oneshot(post(
                "/api/draws/1/bets",
                json!({"bet_type": "four_digit", "number": 1234, "stake": 7_000_000}),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let json = json_body(resp).await;
        assert_eq!(json["error"], "ExposureLimitExceeded");
        assert_eq!(json["max_allowed_stake"], 6_666_666i64);
    }

    #[tokio::test]
    async fn test_batch_rejection_reports_index() {
        let app = build_router(test_state());
        let resp = app
            .oneshot(post(
                "/api/draws/1/bets/batch",
                json!({"bets": [
                    {"bet_type": "two_digit", "number": 1, "stake": 1_000_000},
                    {"bet_type": "two_digit", "number": 2, "stake": 0}
                ]}),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let json = json_body(resp).await;
        assert_eq!(json["error"], "BatchRejected");
        assert_eq!(json["index"], 1);
    }

    #[tokio::test]
    async fn test_unknown_draw_is_404() {
        let app = build_router(test_state());
        let resp = app.oneshot(get("/api/draws/77")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_operator_routes_require_token() {
        let state = test_state();
        let resp = build_router(state.clone())
            .oneshot(post("/api/draws/1/close", json!({}), None))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = build_router(state.clone())
            .oneshot(post("/api/draws/1/close", json!({}), Some("wrong")))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let resp = build_router(state)
            .oneshot(post("/api/draws/1/close", json!({}), Some(TOKEN)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let draw = json_body(resp).await;
        assert_eq!(draw["status"], "Closed");
    }

    #[tokio::test]
    async fn test_results_then_replay_then_conflict() {
        let state = test_state();
        state.house.close_draw(1).unwrap();

        for _ in 0..2 {
            let resp = build_router(state.clone())
                .oneshot(post("/api/draws/1/results", json!({"drawn_number": 1234}), Some(TOKEN)))
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::OK);
            let report = json_body(resp).await;
            assert_eq!(report["winning"]["two_digit"], 34);
        }

        let resp = build_router(state)
            .oneshot(post(
                "/api/draws/1/results",
                json!({"two_digit": 1, "three_digit": 1, "four_digit": 1}),
                Some(TOKEN),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        assert_eq!(json_body(resp).await["error"], "AlreadySettled");
    }

    #[tokio::test]
    async fn test_commission_not_closed_is_409() {
        let app = build_router(test_state());
        let resp = app
            .oneshot(post("/api/commission/2026-06", json!({}), Some(TOKEN)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        assert_eq!(json_body(resp).await["error"], "MonthNotClosed");
    }

    #[tokio::test]
    async fn test_commission_month_beyond_calendar_is_400() {
        let app = build_router(test_state());
        let resp = app
            .oneshot(post("/api/commission/2147483647-12", json!({}), Some(TOKEN)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(resp).await["error"], "InvalidMonth");
    }

    #[tokio::test]
    async fn test_withdraw_fees_route_is_not_a_month() {
        let app = build_router(test_state());
        let resp = app
            .oneshot(post("/api/commission/withdraw", json!({}), Some(TOKEN)))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        assert_eq!(json_body(resp).await["error"], "NothingToWithdraw");
    }

    #[tokio::test]
    async fn test_schedule_draw_route() {
        let app = build_router(test_state());
        let resp = app
            .oneshot(post(
                "/api/draws",
                json!({"scheduled_time": "2026-06-01T18:00:00Z"}),
                Some(TOKEN),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
        let draw = json_body(resp).await;
        assert_eq!(draw["id"], 2);
        assert_eq!(draw["status"], "Scheduled");
    }

    #[tokio::test]
    async fn test_bad_bet_type_in_path() {
        let app = build_router(test_state());
        let resp = app.oneshot(get("/api/exposure/1/5d/1")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(resp).await["error"], "UnknownBetType");
    }
}
