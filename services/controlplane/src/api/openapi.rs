//! OpenAPI schema aggregation for the control-plane API.
//!
//! # Purpose
//! Collects all routes and schema types into a single OpenAPI document for
//! docs and client generation.
use crate::api::{
    stores, system,
    types::{ErrorResponse, HealthResponse, StoreCreateRequest, StoreDeleteResponse},
};
use crate::model::{Store, StoreStatus};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "storefront-controlplane",
        version = "v1",
        description = "Storefront provisioning control plane HTTP API"
    ),
    paths(
        stores::create_store,
        stores::list_stores,
        stores::get_store,
        stores::delete_store,
        system::health
    ),
    components(schemas(
        Store,
        StoreStatus,
        StoreCreateRequest,
        StoreDeleteResponse,
        HealthResponse,
        ErrorResponse
    )),
    tags(
        (name = "stores", description = "Store provisioning and lifecycle"),
        (name = "system", description = "Health and diagnostics")
    )
)]
pub struct ApiDoc;
