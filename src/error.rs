//! Service error taxonomy.
//!
//! Every failing operation resolves to one of five categories, each with a
//! fixed HTTP mapping. Read paths report an invisible resource as `NotFound`;
//! mutation paths on a resource the actor can see report `Forbidden`.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    /// An invariant or input constraint was violated. Maps to 400.
    /// Carries a human-readable reason; state is never silently corrected.
    #[error("{0}")]
    Validation(String),

    /// Missing or invalid credentials. Maps to 401.
    #[error("{0}")]
    Unauthorized(String),

    /// The actor can see the resource but may not perform the operation. Maps to 403.
    #[error("you do not have permission to perform this action")]
    Forbidden,

    /// Absent, or not visible to the actor — indistinguishable on the wire. Maps to 404.
    #[error("not found")]
    NotFound,

    /// Unexpected failure. Maps to 500; details are logged, not leaked.
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn validation(reason: impl Into<String>) -> Self {
        ApiError::Validation(reason.into())
    }

    pub fn unauthorized(reason: impl Into<String>) -> Self {
        ApiError::Unauthorized(reason.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => ApiError::NotFound,
            other => ApiError::Internal(other.into()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(err = %self, "request failed");
            return (status, Json(json!({ "error": "internal server error" }))).into_response();
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_maps_to_400() {
        assert_eq!(
            ApiError::validation("bad input").status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn row_not_found_maps_to_404() {
        let e: ApiError = sqlx::Error::RowNotFound.into();
        assert_eq!(e.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn forbidden_and_unauthorized_are_distinct() {
        assert_eq!(ApiError::Forbidden.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(
            ApiError::unauthorized("no token").status_code(),
            StatusCode::UNAUTHORIZED
        );
    }
}
