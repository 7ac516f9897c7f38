// rest/routes/users.rs — registration, token issuance, and profiles.

use axum::{extract::State, http::StatusCode, Extension, Json};
use serde_json::{json, Value};
use std::sync::Arc;

use crate::error::{ApiError, ApiResult};
use crate::identity::{ProfileUpdate, RegisterRequest, UserPublic};
use crate::rest::auth::CurrentUser;
use crate::AppContext;

pub async fn register(
    State(ctx): State<Arc<AppContext>>,
    Json(body): Json<Value>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let req: RegisterRequest =
        serde_json::from_value(body).map_err(|e| ApiError::validation(e.to_string()))?;
    let user = ctx.users.register(&req).await?;
    let token = ctx.users.issue_token(&user.id).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "user": UserPublic::from(&user), "token": token })),
    ))
}

pub async fn token(
    State(ctx): State<Arc<AppContext>>,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    let email = body
        .get("email")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ApiError::validation("email is required"))?;
    let password = body
        .get("password")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ApiError::validation("password is required"))?;
    let user = ctx.users.authenticate(email, password).await?;
    let token = ctx.users.issue_token(&user.id).await?;
    Ok(Json(
        json!({ "token": token, "user": UserPublic::from(&user) }),
    ))
}

pub async fn me(Extension(CurrentUser(user)): Extension<CurrentUser>) -> Json<Value> {
    Json(json!({ "user": UserPublic::from(&user) }))
}

pub async fn update_me(
    State(ctx): State<Arc<AppContext>>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(body): Json<Value>,
) -> ApiResult<Json<Value>> {
    let update: ProfileUpdate =
        serde_json::from_value(body).map_err(|e| ApiError::validation(e.to_string()))?;
    let updated = ctx.users.update_profile(&user.id, &update).await?;
    Ok(Json(json!({ "user": UserPublic::from(&updated) })))
}

pub async fn list_users(State(ctx): State<Arc<AppContext>>) -> ApiResult<Json<Value>> {
    let rows = ctx.users.list_active().await?;
    let list: Vec<Value> = rows.iter().map(|u| json!(UserPublic::from(u))).collect();
    Ok(Json(json!({ "users": list })))
}
