use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::relay::error_response;
use crate::validate::ValidationError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Token is invalid.")]
    Unauthorized,
    #[error("Invalid JSON format")]
    MalformedJson(#[source] serde_json::Error),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Failed to get embeddings from Copilot API: {body}")]
    Upstream { status: u16, body: String },
    #[error("Method Not Allowed")]
    MethodNotAllowed,
    #[error("Too many requests in flight")]
    Overloaded,
    /// Detail stays in logs; callers only see the generic message.
    #[error("Internal server error")]
    Internal(String),
}

impl AppError {
    pub fn internal(detail: impl Into<String>) -> Self {
        AppError::Internal(detail.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::MalformedJson(_) | AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Upstream { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            AppError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            AppError::Overloaded => StatusCode::TOO_MANY_REQUESTS,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            AppError::Unauthorized => "authentication_error",
            AppError::MalformedJson(_) => "malformed_request",
            AppError::Validation(_) => "invalid_request_error",
            AppError::Upstream { .. } => "upstream_error",
            AppError::MethodNotAllowed => "method_not_allowed",
            AppError::Overloaded => "rate_limit_error",
            AppError::Internal(_) => "api_error",
        }
    }

    /// The envelope omits `code` on authentication failures.
    pub fn code(&self) -> Option<u16> {
        match self {
            AppError::Unauthorized => None,
            _ => Some(self.status().as_u16()),
        }
    }

    pub fn detail(&self) -> Option<String> {
        match self {
            AppError::MalformedJson(err) => Some(err.to_string()),
            AppError::Internal(detail) => Some(detail.clone()),
            _ => None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let message = match &self {
            // An out-of-range upstream status cannot be relayed as-is.
            AppError::Upstream { status, .. } if StatusCode::from_u16(*status).is_err() => {
                return error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error",
                    Some(500),
                );
            }
            other => other.to_string(),
        };
        error_response(self.status(), &message, self.code())
    }
}
