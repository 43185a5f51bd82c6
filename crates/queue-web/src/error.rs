//! 领域错误到HTTP响应的映射

use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use queue_core::QueueError;
use serde::Serialize;

/// HTTP层错误，包装 `QueueError`
#[derive(Debug)]
pub struct ApiError(pub QueueError);

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: bool,
    code: &'static str,
    message: String,
    status: u16,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            QueueError::Validation(_) => StatusCode::BAD_REQUEST,
            QueueError::NotFound(_) => StatusCode::NOT_FOUND,
            QueueError::Conflict(_) | QueueError::InvalidStateTransition { .. } => {
                StatusCode::CONFLICT
            }
            QueueError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<QueueError> for ApiError {
    fn from(err: QueueError) -> Self {
        Self(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(QueueError::Validation(rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self(QueueError::Validation(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(
                code = self.0.code(),
                retryable = self.0.is_retryable(),
                "Request failed: {}",
                self.0
            );
        } else {
            tracing::debug!(code = self.0.code(), "Request rejected: {}", self.0);
        }

        let body = ErrorBody {
            error: true,
            code: self.0.code(),
            message: self.0.to_string(),
            status: status.as_u16(),
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
