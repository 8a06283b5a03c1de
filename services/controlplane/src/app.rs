//! Control-plane HTTP application wiring.
//!
//! # Purpose
//! Builds the Axum router, configures middleware, and defines the shared
//! application state injected into handlers.
//!
//! # Notes
//! This module centralizes route composition to keep `main` small and
//! testable; integration tests build the same router over the memory store.
use crate::api;
use crate::api::openapi::ApiDoc;
use crate::audit::AuditSink;
use crate::lifecycle::LifecycleConfig;
use crate::orchestrator::Orchestrator;
use crate::store::{ControlPlaneStore, QuotaLimits};
use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ControlPlaneStore>,
    pub orchestrator: Arc<dyn Orchestrator>,
    pub audit: AuditSink,
    pub limits: QuotaLimits,
    pub lifecycle: LifecycleConfig,
    pub dns_suffix: String,
}

pub fn build_router(state: AppState) -> Router {
    let trace_layer =
        TraceLayer::new_for_http().make_span_with(|request: &axum::http::Request<_>| {
            tracing::info_span!(
                "http.request",
                method = %request.method(),
                uri = %request.uri(),
                version = ?request.version()
            )
        });

    Router::new()
        .route(
            "/stores",
            get(api::stores::list_stores).post(api::stores::create_store),
        )
        .route(
            "/stores/:id",
            get(api::stores::get_store).delete(api::stores::delete_store),
        )
        .route("/health", get(api::system::health))
        .merge(
            utoipa_swagger_ui::SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()),
        )
        .layer(trace_layer)
        .with_state(state)
}
