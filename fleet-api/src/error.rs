use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use fleet_orchestrator::OrchestratorError;
use serde_json::json;
use thiserror::Error;
use tracing::error;

pub type ApiResult<T> = Result<T, ApiError>;

pub const UNAUTHORIZED_DETAIL: &str = "Invalid signature or API key";

#[derive(Error, Debug)]
pub enum ApiError {
    /// Never carries detail, so callers learn nothing about why.
    #[error("{}", UNAUTHORIZED_DETAIL)]
    Unauthorized,
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, Json(json!({ "status": "error", "detail": self.to_string() }))).into_response()
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        match err {
            OrchestratorError::Validation(e) => ApiError::BadRequest(e.to_string()),
            OrchestratorError::NotFound(msg) => ApiError::NotFound(msg),
            other => {
                error!("{}", other);
                ApiError::Internal(other.to_string())
            }
        }
    }
}
