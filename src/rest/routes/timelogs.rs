// rest/routes/timelogs.rs — work-hour log CRUD.
//
// Logging time requires being a participant of the task; reads are
// scoped to the caller's own logs unless the caller is staff.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::{ApiError, ApiResult};
use crate::rest::auth::CurrentUser;
use crate::tasks::policy;
use crate::timelogs::{CreateTimeLogRequest, TimeLogChanges, TimeLogListParams, TimeLogRow};
use crate::AppContext;

#[derive(Debug, Default, Deserialize)]
pub struct TimeLogQuery {
    pub task: Option<String>,
    pub task_item: Option<String>,
    pub user: Option<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<u32>,
}

pub async fn list_logs(
    State(ctx): State<Arc<AppContext>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Query(query): Query<TimeLogQuery>,
) -> ApiResult<Json<Value>> {
    let params = TimeLogListParams {
        task: query.task,
        task_item: query.task_item,
        user: query.user,
        date_from: query.date_from,
        date_to: query.date_to,
        limit: Some(ctx.config.page_size(query.limit) as u32),
        offset: query.offset,
    };
    let rows = ctx.time_logs.list(&user, &params).await?;
    Ok(Json(
        json!({ "time_logs": rows.iter().map(log_json).collect::<Vec<_>>() }),
    ))
}

pub async fn create_log(
    State(ctx): State<Arc<AppContext>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(body): Json<Value>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let req: CreateTimeLogRequest =
        serde_json::from_value(body).map_err(|e| ApiError::validation(e.to_string()))?;
    ctx.tasks.get_task(&req.task_id).await.map_err(|e| match e {
        ApiError::NotFound => ApiError::validation("unknown task id"),
        other => other,
    })?;
    policy::check_task_view(ctx.tasks.task_access(&user, &req.task_id).await?)?;
    let row = ctx.time_logs.create(&user, &req).await?;
    Ok((StatusCode::CREATED, Json(log_json(&row))))
}

pub async fn get_log(
    State(ctx): State<Arc<AppContext>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let row = ctx.time_logs.get_visible(&user, &id).await?;
    Ok(Json(log_json(&row)))
}

pub async fn update_log(
    State(ctx): State<Arc<AppContext>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    let changes = TimeLogChanges::from_json(&body)?;
    let row = ctx.time_logs.update(&user, &id, &changes).await?;
    Ok(Json(log_json(&row)))
}

pub async fn delete_log(
    State(ctx): State<Arc<AppContext>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    ctx.time_logs.delete(&user, &id).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn log_json(l: &TimeLogRow) -> Value {
    json!({
        "id": l.id,
        "user_id": l.user_id,
        "task_id": l.task_id,
        "task_item_id": l.task_item_id,
        "date": l.date,
        "hours": l.hours,
        "description": l.description,
        "created_at": l.created_at,
        "updated_at": l.updated_at,
    })
}
