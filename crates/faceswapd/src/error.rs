use crate::auth::AuthError;
use crate::swap::SwapError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use faceswap_tokens::TokenStoreError;
use serde_json::json;
use thiserror::Error;

pub type ApiResult<T> = Result<T, ApiError>;

/// Errors surfaced to HTTP clients as `{"detail": "..."}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    NotFound(String),
    #[error("token store: {0}")]
    Store(#[from] TokenStoreError),
}

impl ApiError {
    pub fn api_key(e: AuthError) -> Self {
        match e {
            AuthError::Unauthorized => ApiError::Unauthorized("Invalid API Key".to_string()),
            AuthError::Store(e) => ApiError::Store(e),
        }
    }
}

impl From<SwapError> for ApiError {
    fn from(e: SwapError) -> Self {
        ApiError::BadRequest(format!("Face swap failed: {e}"))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Store(e) => {
                tracing::error!(error = %e, "token store failure");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error".to_string())
            }
        };

        (status, Json(json!({ "detail": detail }))).into_response()
    }
}
