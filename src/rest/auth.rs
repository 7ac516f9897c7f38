// rest/auth.rs — Bearer token auth middleware.
//
// Tokens are issued by POST /api/v1/auth/register and /auth/token and
// resolved against the api_tokens table on every request.
// Header: Authorization: Bearer <token>

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use std::sync::Arc;

use crate::identity::UserRow;
use crate::AppContext;

/// The authenticated caller, inserted as a request extension by
/// [`require_api_auth`].
#[derive(Clone)]
pub struct CurrentUser(pub UserRow);

pub async fn require_api_auth(
    State(ctx): State<Arc<AppContext>>,
    mut req: Request,
    next: Next,
) -> Response {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    let Some(token) = token else {
        return unauthorized("missing bearer token");
    };

    match ctx.users.resolve_token(token).await {
        Ok(Some(user)) => {
            req.extensions_mut().insert(CurrentUser(user));
            next.run(req).await
        }
        Ok(None) => unauthorized("invalid or expired token"),
        Err(err) => err.into_response(),
    }
}

fn unauthorized(reason: &str) -> Response {
    (StatusCode::UNAUTHORIZED, Json(json!({ "error": reason }))).into_response()
}
