//! HTTP API request/response types.
//!
//! # Purpose
//! Defines shared payload shapes for the control-plane REST API and OpenAPI
//! schema generation. The `Store` record itself serializes directly; these
//! are the envelopes around it.
use crate::model::Store;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Reserved for future creation options; the body today is `{}`.
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, Default)]
pub struct StoreCreateRequest {}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct StoreDeleteResponse {
    pub message: String,
    pub store: Store,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct HealthResponse {
    pub status: String,
    pub database: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    /// Seconds until the tenant's rate window reopens; only on rate denials.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub retry_after_seconds: Option<i64>,
}
