//! Control-plane HTTP API module.
//!
//! # Purpose and responsibility
//! Exposes route handler modules and the shared header-extraction helpers
//! used across store endpoints.
//!
//! # Key invariants and assumptions
//! - Tenant identity comes from a request header and is trusted on input;
//!   there is no authentication layer in front of it.
//! - Error shapes are standardized via `api::error`.
pub mod error;
pub mod openapi;
pub mod stores;
pub mod system;
pub mod types;

use axum::http::HeaderMap;
use uuid::Uuid;

pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 255;

/// Tenant identity from `X-Tenant-Id`, else `X-User-Id`, else `"default"`.
pub(crate) fn tenant_from_headers(headers: &HeaderMap) -> String {
    header_value(headers, "x-tenant-id")
        .or_else(|| header_value(headers, "x-user-id"))
        .unwrap_or_else(|| "default".to_string())
}

/// The request's idempotency key.
///
/// A missing, empty, or over-long header yields a fresh unique key, which
/// effectively disables replay protection for that request.
pub(crate) fn idempotency_key_from_headers(headers: &HeaderMap) -> String {
    match header_value(headers, "idempotency-key") {
        Some(key) if key.len() <= MAX_IDEMPOTENCY_KEY_LEN => key,
        _ => format!("auto-{}", Uuid::new_v4().simple()),
    }
}

/// Best-effort client address for audit entries.
pub(crate) fn client_ip_from_headers(headers: &HeaderMap) -> Option<String> {
    header_value(headers, "x-forwarded-for")
        .map(|value| value.split(',').next().unwrap_or("").trim().to_string())
        .filter(|value| !value.is_empty())
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
