// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// Read-only operational surface on an internal bind address:
//
//   GET /api/v1/health       liveness + state version
//   GET /api/v1/state        full engine snapshot (counters, positions,
//                            recent rejections)
//   GET /api/v1/positions    open positions per account
//
// CORS is permissive; the listener is not meant to face the public internet.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::State,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};

use crate::app_state::AppState;

/// Build the REST router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/state", get(full_state))
        .route("/api/v1/positions", get(positions))
        .layer(cors)
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    state_version: u64,
    server_time: i64,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        state_version: state.state_version.load(std::sync::atomic::Ordering::SeqCst),
        server_time: chrono::Utc::now().timestamp_millis(),
    })
}

async fn full_state(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.build_snapshot())
}

#[derive(Serialize)]
struct PositionsResponse {
    accounts: Vec<AccountPositions>,
}

#[derive(Serialize)]
struct AccountPositions {
    account: String,
    positions: Vec<crate::positions::Position>,
}

async fn positions(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let accounts = state
        .managers
        .iter()
        .map(|m| AccountPositions {
            account: m.account().to_string(),
            positions: m.open_positions(),
        })
        .collect();
    Json(PositionsResponse { accounts })
}
