use axum::{extract::State, routing::get, Json, Router};
use serde_json::{json, Value};

use crate::AppState;

pub fn health_router() -> Router<AppState> {
    Router::new().route("/healthz", get(healthz))
}

/// Health check endpoint, no auth required.
async fn healthz(State(state): State<AppState>) -> Json<Value> {
    let open_signals = state.watchlist.lock().await.open_symbols().len();
    Json(json!({
        "status": "ok",
        "open_signals": open_signals,
        "uptime_secs": state.started_at.elapsed().as_secs(),
    }))
}
