//! HTTP error envelope: `{"error": {"code": ..., "message": ...}}`.

use crate::errors::Error;
use axum::{
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tracing::error;

#[derive(Debug)]
pub struct ServerError {
    status: StatusCode,
    code: String,
    message: String,
    retry_after: Option<u64>,
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: String,
    message: String,
}

impl ServerError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        let code = status_code_to_string(status);
        Self {
            status,
            code,
            message: message.into(),
            retry_after: None,
        }
    }

    /// 429 carrying a `Retry-After` header.
    #[must_use]
    pub fn rate_limited(retry_after: u64) -> Self {
        Self {
            retry_after: Some(retry_after),
            ..Self::new(
                StatusCode::TOO_MANY_REQUESTS,
                format!("Rate limit exceeded, retry after {retry_after} seconds"),
            )
        }
    }

    #[must_use]
    pub const fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let body = ErrorEnvelope {
            error: ErrorBody {
                code: self.code,
                message: self.message,
            },
        };
        let mut response = (self.status, axum::Json(body)).into_response();
        if let Some(seconds) = self.retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(seconds));
        }
        response
    }
}

impl From<Error> for ServerError {
    fn from(err: Error) -> Self {
        match err {
            Error::Validation { message } => Self::new(StatusCode::BAD_REQUEST, message),
            Error::Unauthorized { message } => Self::new(StatusCode::UNAUTHORIZED, message),
            Error::Forbidden { message } => Self::new(StatusCode::FORBIDDEN, message),
            Error::NotFound { .. } => Self::new(StatusCode::NOT_FOUND, err.to_string()),
            Error::Conflict { message } => Self::new(StatusCode::CONFLICT, message),
            Error::InvalidTransition { .. } => Self::new(StatusCode::CONFLICT, err.to_string()),
            Error::Locked { .. } => Self::new(StatusCode::LOCKED, err.to_string()),
            Error::RateLimited { retry_after } => Self::rate_limited(retry_after),
            Error::Mqtt { message } => Self::new(StatusCode::SERVICE_UNAVAILABLE, message),
            other => {
                error!("request failed: {other}");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        }
    }
}

fn status_code_to_string(status: StatusCode) -> String {
    match status {
        StatusCode::BAD_REQUEST => "bad_request",
        StatusCode::UNAUTHORIZED => "unauthorized",
        StatusCode::FORBIDDEN => "forbidden",
        StatusCode::NOT_FOUND => "not_found",
        StatusCode::CONFLICT => "conflict",
        StatusCode::LOCKED => "locked",
        StatusCode::TOO_MANY_REQUESTS => "rate_limited",
        StatusCode::SERVICE_UNAVAILABLE => "service_unavailable",
        StatusCode::INTERNAL_SERVER_ERROR => "internal_error",
        _ => status.canonical_reason().unwrap_or("error"),
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_errors_map_to_status() {
        let cases = [
            (Error::validation("bad"), StatusCode::BAD_REQUEST),
            (Error::unauthorized("who"), StatusCode::UNAUTHORIZED),
            (Error::not_found("device", 7), StatusCode::NOT_FOUND),
            (
                Error::InvalidTransition {
                    from: "resolved".to_string(),
                    to: "active".to_string(),
                },
                StatusCode::CONFLICT,
            ),
            (Error::RateLimited { retry_after: 3 }, StatusCode::TOO_MANY_REQUESTS),
            (
                Error::Backup {
                    message: "disk".to_string(),
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(ServerError::from(err).status(), status);
        }
    }

    #[test]
    fn test_rate_limited_sets_retry_after() {
        let response = ServerError::rate_limited(4).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "4");
    }
}
