use axum::{
    body::Body,
    http::{
        HeaderValue, StatusCode,
        header::{
            ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS,
            ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN, CACHE_CONTROL, CONNECTION,
            CONTENT_TYPE,
        },
    },
    response::{IntoResponse, Response},
};

use crate::error::AppError;
use crate::models::{ErrorEnvelope, UpstreamOutcome};

pub const JSON_UTF8: &str = "application/json; charset=utf-8";

/// Response headers every reply from the embeddings endpoint carries.
pub async fn apply_gateway_headers(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        ACCESS_CONTROL_ALLOW_CREDENTIALS,
        HeaderValue::from_static("true"),
    );
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("POST, OPTIONS"),
    );
    headers.insert(
        ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type, Authorization"),
    );
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON_UTF8));
    headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));
    response
}

pub fn preflight() -> Response {
    StatusCode::NO_CONTENT.into_response()
}

pub fn error_response(status: StatusCode, message: &str, code: Option<u16>) -> Response {
    let envelope = ErrorEnvelope {
        error: message.to_string(),
        code,
    };
    let body = serde_json::to_vec(&envelope)
        .unwrap_or_else(|_| br#"{"error":"Internal server error"}"#.to_vec());
    (status, [(CONTENT_TYPE, JSON_UTF8)], body).into_response()
}

/// Success bodies are passed through byte for byte; anything else becomes
/// an upstream error carrying the upstream status.
pub fn relay_outcome(outcome: UpstreamOutcome) -> Result<Response, AppError> {
    if outcome.status != StatusCode::OK.as_u16() {
        return Err(AppError::Upstream {
            status: outcome.status,
            body: outcome.body_text(),
        });
    }
    Ok((
        StatusCode::OK,
        [(CONTENT_TYPE, JSON_UTF8)],
        Body::from(outcome.body),
    )
        .into_response())
}
