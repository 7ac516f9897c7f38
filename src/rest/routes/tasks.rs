// rest/routes/tasks.rs — task CRUD, roles, and the named list actions.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::{ApiError, ApiResult};
use crate::identity::UserPublic;
use crate::observability::LatencyTracker;
use crate::rest::auth::CurrentUser;
use crate::tasks::model::{ItemView, RoleView, TaskDetail, TaskSummary};
use crate::tasks::policy;
use crate::tasks::{CreateTaskRequest, NewTaskItem, RoleKind, TaskChanges, TaskListParams, TaskStatus};
use crate::AppContext;

#[derive(Debug, Default, Deserialize)]
pub struct TaskListQuery {
    pub status: Option<String>,
    pub created_after: Option<String>,
    pub created_before: Option<String>,
    pub planned_end_after: Option<String>,
    pub planned_end_before: Option<String>,
    pub assigner: Option<String>,
    pub executor: Option<String>,
    pub is_overdue: Option<bool>,
    pub limit: Option<i64>,
    pub offset: Option<u32>,
}

pub async fn list_tasks(
    State(ctx): State<Arc<AppContext>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Query(query): Query<TaskListQuery>,
) -> ApiResult<Json<Value>> {
    let status = match &query.status {
        Some(s) => Some(
            TaskStatus::parse(s)
                .ok_or_else(|| ApiError::validation(format!("invalid status: {s}")))?,
        ),
        None => None,
    };
    let params = TaskListParams {
        status,
        created_after: query.created_after,
        created_before: query.created_before,
        planned_end_after: query.planned_end_after,
        planned_end_before: query.planned_end_before,
        assigner: query.assigner,
        executor: query.executor,
        is_overdue: query.is_overdue.unwrap_or(false),
        limit: Some(ctx.config.page_size(query.limit) as u32),
        offset: query.offset,
    };
    let tracker = LatencyTracker::start("task.list");
    let rows = ctx.tasks.list_tasks(&user, &params).await?;
    tracker.finish();
    Ok(Json(
        json!({ "tasks": rows.iter().map(summary_json).collect::<Vec<_>>() }),
    ))
}

pub async fn create_task(
    State(ctx): State<Arc<AppContext>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(body): Json<Value>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let req: CreateTaskRequest =
        serde_json::from_value(body).map_err(|e| ApiError::validation(e.to_string()))?;
    let tracker = LatencyTracker::start("task.create");
    let task = ctx.tasks.create_task(&user, &req).await?;
    let detail = ctx.tasks.detail(task).await?;
    tracker.finish();
    Ok((StatusCode::CREATED, Json(detail_json(&detail))))
}

pub async fn get_task(
    State(ctx): State<Arc<AppContext>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let task = ctx.tasks.get_task(&id).await?;
    policy::check_task_view(ctx.tasks.task_access(&user, &id).await?)?;
    let detail = ctx.tasks.detail(task).await?;
    Ok(Json(detail_json(&detail)))
}

pub async fn update_task(
    State(ctx): State<Arc<AppContext>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    ctx.tasks.get_task(&id).await?;
    policy::check_task_manage(ctx.tasks.task_access(&user, &id).await?)?;
    let changes = TaskChanges::from_json(&body)?;
    let task = ctx.tasks.update_task(&id, &changes).await?;
    let detail = ctx.tasks.detail(task).await?;
    Ok(Json(detail_json(&detail)))
}

pub async fn delete_task(
    State(ctx): State<Arc<AppContext>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    ctx.tasks.get_task(&id).await?;
    policy::check_task_manage(ctx.tasks.task_access(&user, &id).await?)?;
    ctx.tasks.delete_task(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn my_tasks(
    State(ctx): State<Arc<AppContext>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> ApiResult<Json<Value>> {
    let rows = ctx.tasks.my_tasks(&user.id).await?;
    Ok(Json(
        json!({ "tasks": rows.iter().map(summary_json).collect::<Vec<_>>() }),
    ))
}

pub async fn my_items(
    State(ctx): State<Arc<AppContext>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> ApiResult<Json<Value>> {
    let rows = ctx.tasks.my_items(&user.id).await?;
    Ok(Json(
        json!({ "items": rows.iter().map(item_json).collect::<Vec<_>>() }),
    ))
}

pub async fn assigned_by_me(
    State(ctx): State<Arc<AppContext>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> ApiResult<Json<Value>> {
    let rows = ctx.tasks.assigned_by_me(&user.id).await?;
    Ok(Json(
        json!({ "tasks": rows.iter().map(summary_json).collect::<Vec<_>>() }),
    ))
}

pub async fn add_role(
    State(ctx): State<Arc<AppContext>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    ctx.tasks.get_task(&id).await?;
    policy::check_task_manage(ctx.tasks.task_access(&user, &id).await?)?;

    let user_id = body
        .get("user_id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ApiError::validation("user_id is required"))?;
    let role = body
        .get("role")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ApiError::validation("role is required"))?;
    let role = RoleKind::parse(role)
        .ok_or_else(|| ApiError::validation(format!("invalid role: {role}")))?;

    let row = ctx.tasks.add_role(&id, user_id, role).await?;
    let member = ctx.users.get(user_id).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "id": row.id,
            "task_id": row.task_id,
            "role": row.role,
            "user": member.as_ref().map(UserPublic::from),
            "assigned_at": row.assigned_at,
        })),
    ))
}

pub async fn remove_role(
    State(ctx): State<Arc<AppContext>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path((id, role_id)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    ctx.tasks.get_task(&id).await?;
    policy::check_task_manage(ctx.tasks.task_access(&user, &id).await?)?;
    ctx.tasks.remove_role(&id, &role_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn add_item(
    State(ctx): State<Arc<AppContext>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    ctx.tasks.get_task(&id).await?;
    policy::check_task_manage(ctx.tasks.task_access(&user, &id).await?)?;
    let item: NewTaskItem =
        serde_json::from_value(body).map_err(|e| ApiError::validation(e.to_string()))?;
    let row = ctx.tasks.add_item(&id, &item).await?;
    let view = ctx.tasks.item_view(row).await?;
    Ok((StatusCode::CREATED, Json(item_json(&view))))
}

// ── JSON views ──

pub(super) fn summary_json(s: &TaskSummary) -> Value {
    let t = &s.task;
    json!({
        "id": t.id,
        "title": t.title,
        "description": t.description,
        "status": t.status,
        "source_links": t.source_links_json(),
        "result_link": t.result_link,
        "planned_start_date": t.planned_start_date,
        "actual_start_date": t.actual_start_date,
        "planned_end_date": t.planned_end_date,
        "actual_end_date": t.actual_end_date,
        "assigner": s.assigner,
        "progress_percentage": s.progress_percentage,
        "task_items_count": s.task_items_count,
        "completed_items_count": s.completed_items_count,
        "total_planned_hours": s.total_planned_hours,
        "total_spent_hours": s.total_spent_hours,
        "created_at": t.created_at,
        "updated_at": t.updated_at,
    })
}

pub(super) fn detail_json(d: &TaskDetail) -> Value {
    let mut value = summary_json(&d.summary);
    if let Value::Object(obj) = &mut value {
        obj.insert(
            "roles".to_string(),
            Value::Array(d.roles.iter().map(role_json).collect()),
        );
        obj.insert(
            "items".to_string(),
            Value::Array(d.items.iter().map(item_json).collect()),
        );
    }
    value
}

pub(super) fn role_json(r: &RoleView) -> Value {
    json!({
        "id": r.role.id,
        "task_id": r.role.task_id,
        "role": r.role.role,
        "user": r.user,
        "assigned_at": r.role.assigned_at,
    })
}

pub(super) fn item_json(v: &ItemView) -> Value {
    let i = &v.item;
    json!({
        "id": i.id,
        "task_id": i.task_id,
        "title": i.title,
        "description": i.description,
        "status": i.status,
        "executor": v.executor,
        "planned_hours": i.planned_hours,
        "spent_hours": v.spent_hours,
        "order": i.order,
        "completed_at": i.completed_at,
        "created_at": i.created_at,
        "updated_at": i.updated_at,
    })
}
