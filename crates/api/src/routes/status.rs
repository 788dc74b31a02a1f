use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};

use common::TraderStatus;

use crate::AppState;

pub fn status_router() -> Router<AppState> {
    Router::new()
        .route("/api/status", get(get_all))
        .route("/api/status/:instrument", get(get_one))
}

// ─── Status ───────────────────────────────────────────────────────────────────

async fn get_all(State(state): State<AppState>) -> Json<Value> {
    let engine_state = *state.engine_state.read().await;
    let mut traders: Vec<TraderStatus> = state
        .statuses
        .values()
        .map(|rx| rx.borrow().clone())
        .collect();
    traders.sort_by(|a, b| a.instrument.cmp(&b.instrument));

    Json(json!({
        "engine": engine_state.to_string(),
        "traders": traders,
    }))
}

async fn get_one(
    State(state): State<AppState>,
    Path(instrument): Path<String>,
) -> Result<Json<TraderStatus>, (StatusCode, Json<Value>)> {
    match state.statuses.get(&instrument) {
        Some(rx) => Ok(Json(rx.borrow().clone())),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("unknown instrument '{instrument}'") })),
        )),
    }
}
