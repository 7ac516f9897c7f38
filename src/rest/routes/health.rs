use crate::observability::HealthStatus;
use crate::AppContext;
use axum::{extract::State, Json};
use serde_json::{json, Value};
use std::sync::Arc;

pub async fn health(State(ctx): State<Arc<AppContext>>) -> Json<Value> {
    let uptime = ctx.started_at.elapsed().as_secs();
    let db_ok = ctx.storage.ping().await;
    Json(json!(HealthStatus::new(
        uptime,
        db_ok,
        ctx.config.time_tracking.enabled
    )))
}
