use axum::{
    extract::{Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::error;

use crate::{auth::require_auth, AppState};

const DEFAULT_HISTORY: u32 = 50;
const MAX_HISTORY: u32 = 500;

pub fn api_router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/api/stats", get(get_stats))
        .route("/api/signals", get(get_signals))
        .route("/api/history", get(get_history))
        .route_layer(middleware::from_fn_with_state(state, require_auth))
}

// ─── Stats ────────────────────────────────────────────────────────────────────

async fn get_stats(State(state): State<AppState>) -> Response {
    let (stats, open_signals) = {
        let wl = state.watchlist.lock().await;
        (wl.stats(), wl.open_symbols().len())
    };
    Json(json!({
        "total_signals": stats.total_signals,
        "wins": stats.wins,
        "losses": stats.losses,
        "profit_percent": stats.profit_percent,
        "win_rate": stats.win_rate(),
        "average_profit": stats.average_profit(),
        "open_signals": open_signals,
    }))
    .into_response()
}

// ─── Open signals ─────────────────────────────────────────────────────────────

async fn get_signals(State(state): State<AppState>) -> Response {
    let mut signals = state.watchlist.lock().await.active_signals();
    signals.sort_by_key(|s| s.id);
    Json(json!({ "signals": signals, "total_open": signals.len() })).into_response()
}

// ─── History ──────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct HistoryQuery {
    limit: Option<u32>,
}

async fn get_history(State(state): State<AppState>, Query(q): Query<HistoryQuery>) -> Response {
    let limit = q.limit.unwrap_or(DEFAULT_HISTORY).clamp(1, MAX_HISTORY);
    match state.journal.recent(limit).await {
        Ok(rows) => Json(json!({ "signals": rows, "limit": limit })).into_response(),
        Err(e) => {
            error!(error = %e, "History query failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "history unavailable" })),
            )
                .into_response()
        }
    }
}
