// rest/routes/items.rs — task item reads and field-gated mutations.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

use super::tasks::item_json;
use crate::error::{ApiError, ApiResult};
use crate::rest::auth::CurrentUser;
use crate::tasks::model::body_fields;
use crate::tasks::policy;
use crate::tasks::{ItemChanges, ItemListParams, ItemStatus};
use crate::AppContext;

#[derive(Debug, Default, Deserialize)]
pub struct ItemListQuery {
    pub task: Option<String>,
    pub executor: Option<String>,
    pub status: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<u32>,
}

pub async fn list_items(
    State(ctx): State<Arc<AppContext>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Query(query): Query<ItemListQuery>,
) -> ApiResult<Json<Value>> {
    let status = match &query.status {
        Some(s) => Some(
            ItemStatus::parse(s)
                .ok_or_else(|| ApiError::validation(format!("invalid status: {s}")))?,
        ),
        None => None,
    };
    let params = ItemListParams {
        task: query.task,
        executor: query.executor,
        status,
        limit: Some(ctx.config.page_size(query.limit) as u32),
        offset: query.offset,
    };
    let rows = ctx.tasks.list_items(&user, &params).await?;
    Ok(Json(
        json!({ "items": rows.iter().map(item_json).collect::<Vec<_>>() }),
    ))
}

pub async fn get_item(
    State(ctx): State<Arc<AppContext>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let item = ctx.tasks.get_item(&id).await?;
    policy::check_item_view(ctx.tasks.item_access(&user, &item).await?)?;
    let view = ctx.tasks.item_view(item).await?;
    Ok(Json(item_json(&view)))
}

pub async fn update_item(
    State(ctx): State<Arc<AppContext>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    let item = ctx.tasks.get_item(&id).await?;
    let access = ctx.tasks.item_access(&user, &item).await?;
    policy::check_item_update(access, &body_fields(&body))?;
    let changes = ItemChanges::from_json(&body)?;
    let row = ctx.tasks.update_item(&id, &changes).await?;
    let view = ctx.tasks.item_view(row).await?;
    Ok(Json(item_json(&view)))
}

pub async fn delete_item(
    State(ctx): State<Arc<AppContext>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    let item = ctx.tasks.get_item(&id).await?;
    policy::check_item_delete(ctx.tasks.item_access(&user, &item).await?)?;
    ctx.tasks.delete_item(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}
