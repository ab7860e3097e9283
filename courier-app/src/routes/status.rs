use crate::server::AppState;
use axum::routing::get;
use axum::{Extension, Json};
use chrono::Utc;
use std::sync::Arc;

pub fn router() -> axum::Router {
    axum::Router::new().route("/status", get(get_status))
}

#[tracing::instrument(level = "debug", skip_all)]
async fn get_status(Extension(state): Extension<Arc<AppState>>) -> Json<serde_json::Value> {
    let engine = state.dispatcher.engine().status();
    Json(serde_json::json!({
        "status": "online",
        "checked_at": Utc::now(),
        "engine": engine,
    }))
}
