use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use optiboard_core::error as core_error;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("missing x-user-id header")]
    MissingUserId,

    #[error("invalid x-user-id header: {0}")]
    InvalidUserId(String),

    #[error("{0}")]
    Core(#[from] optiboard_core::Error),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::MissingUserId | ApiError::InvalidUserId(_) | ApiError::InvalidInput(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Core(err) => match err {
                core_error::Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
                core_error::Error::NotFound(_) => StatusCode::NOT_FOUND,
                // Missing master secret and missing credentials both read as
                // "sync unavailable" to the dashboard.
                core_error::Error::Configuration(_)
                | core_error::Error::CredentialUnavailable => StatusCode::SERVICE_UNAVAILABLE,
                core_error::Error::Remote { .. }
                | core_error::Error::Integrity
                | core_error::Error::Backend { .. }
                | core_error::Error::BackendMessage(_) => StatusCode::BAD_GATEWAY,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.status_code();
        let body = ErrorBody {
            error: self.to_string(),
        };
        (code, Json(body)).into_response()
    }
}
