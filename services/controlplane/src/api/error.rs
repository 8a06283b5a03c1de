//! API error types and helpers.
//!
//! # Purpose
//! Centralizes HTTP error response construction so every handler maps store
//! errors to the same status codes and body shape. Rate denials additionally
//! carry a `Retry-After` header.
use crate::api::types::ErrorResponse;
use crate::store::StoreError;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use axum::Json;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorResponse,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let retry_after = self.body.retry_after_seconds;
        let mut response = (self.status, Json(self.body)).into_response();
        if let Some(seconds) = retry_after {
            if let Ok(value) = HeaderValue::from_str(&seconds.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

pub fn api_not_found(message: &str) -> ApiError {
    ApiError {
        status: StatusCode::NOT_FOUND,
        body: ErrorResponse {
            code: "not_found".to_string(),
            message: message.to_string(),
            retry_after_seconds: None,
        },
    }
}

pub fn api_internal(message: &str, err: &StoreError) -> ApiError {
    tracing::error!(error = ?err, "controlplane storage error");
    ApiError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        body: ErrorResponse {
            code: "internal".to_string(),
            message: message.to_string(),
            retry_after_seconds: None,
        },
    }
}

pub fn api_internal_message(message: &str) -> ApiError {
    ApiError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        body: ErrorResponse {
            code: "internal".to_string(),
            message: message.to_string(),
            retry_after_seconds: None,
        },
    }
}

/// Map an admission denial or lookup failure to its HTTP shape.
pub fn from_store_error(err: StoreError, context: &str) -> ApiError {
    match err {
        StoreError::NotFound(_) => api_not_found("store not found"),
        StoreError::QuotaExceeded { scope } => ApiError {
            status: StatusCode::TOO_MANY_REQUESTS,
            body: ErrorResponse {
                code: "quota_exceeded".to_string(),
                message: format!("{scope} store quota exceeded"),
                retry_after_seconds: None,
            },
        },
        StoreError::RateLimited {
            retry_after_seconds,
        } => ApiError {
            status: StatusCode::TOO_MANY_REQUESTS,
            body: ErrorResponse {
                code: "rate_limited".to_string(),
                message: "store creation rate exceeded".to_string(),
                retry_after_seconds: Some(retry_after_seconds),
            },
        },
        err => api_internal(context, &err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::QuotaScope;

    #[tokio::test]
    async fn rate_denial_sets_retry_after_header() {
        let response = from_store_error(
            StoreError::RateLimited {
                retry_after_seconds: 42,
            },
            "create failed",
        )
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok()),
            Some("42")
        );
    }

    #[tokio::test]
    async fn quota_denial_is_429_without_retry_after() {
        let response = from_store_error(
            StoreError::QuotaExceeded {
                scope: QuotaScope::Tenant,
            },
            "create failed",
        )
        .into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(response.headers().get(header::RETRY_AFTER).is_none());
    }

    #[tokio::test]
    async fn not_found_maps_to_404() {
        let response =
            from_store_error(StoreError::NotFound("store".into()), "lookup failed").into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
