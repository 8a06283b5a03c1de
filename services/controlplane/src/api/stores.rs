//! Store API handlers.
//!
//! # Purpose
//! Implements create, list, get, and delete for stores. Handlers do the
//! short transactional write, hand the long-running orchestrator work to
//! `lifecycle`, and describe the outcome through the audit sink.
use crate::api::error::{
    api_internal, api_internal_message, api_not_found, from_store_error, ApiError,
};
use crate::api::types::StoreDeleteResponse;
use crate::api::{client_ip_from_headers, idempotency_key_from_headers, tenant_from_headers};
use crate::app::AppState;
use crate::lifecycle;
use crate::model::time::now_millis;
use crate::model::{AuditEntry, AuditOutcome, Store};
use crate::store::{CreateOutcome, DeleteOutcome, StoreError};
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;

/// How many fresh ids to try when an id/host uniqueness collision occurs.
const CREATE_ATTEMPTS: usize = 3;

#[utoipa::path(
    post,
    path = "/stores",
    tag = "stores",
    request_body = crate::api::types::StoreCreateRequest,
    responses(
        (status = 202, description = "Store provisioning accepted", body = Store),
        (status = 200, description = "Idempotent replay of an earlier create", body = Store),
        (status = 429, description = "Quota or rate limit exceeded", body = crate::api::types::ErrorResponse),
        (status = 500, description = "Internal error", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn create_store(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<axum::response::Response, ApiError> {
    let tenant_id = tenant_from_headers(&headers);
    let idempotency_key = idempotency_key_from_headers(&headers);
    let ip = client_ip_from_headers(&headers);
    let now = now_millis();

    let mut outcome = None;
    for _ in 0..CREATE_ATTEMPTS {
        let record = Store::provisioning(&tenant_id, &state.dns_suffix, now);
        match state
            .store
            .create_store(record, &idempotency_key, &state.limits, now)
            .await
        {
            Ok(admitted) => {
                outcome = Some(admitted);
                break;
            }
            // Id or host collision: retry with a freshly generated id.
            Err(StoreError::Conflict(_)) => continue,
            Err(err) => {
                state.audit.emit(
                    AuditEntry::new(
                        &tenant_id,
                        "store.create",
                        None,
                        audit_outcome_for(&err),
                        now,
                    )
                    .with_details(serde_json::json!({ "error": err.to_string() }))
                    .with_ip(ip),
                );
                metrics::counter!("storefront_store_creates_total", "outcome" => "denied")
                    .increment(1);
                return Err(from_store_error(err, "failed to create store"));
            }
        }
    }
    let Some(outcome) = outcome else {
        return Err(api_internal_message("store id allocation failed"));
    };

    match outcome {
        CreateOutcome::Created(record) => {
            lifecycle::spawn_provisioner(
                state.store.clone(),
                state.orchestrator.clone(),
                state.lifecycle,
                record.clone(),
            );
            state.audit.emit(
                AuditEntry::new(
                    &tenant_id,
                    "store.create",
                    Some(&record.id),
                    AuditOutcome::Accepted,
                    now,
                )
                .with_details(serde_json::json!({ "host": record.host }))
                .with_ip(ip),
            );
            metrics::counter!("storefront_store_creates_total", "outcome" => "created")
                .increment(1);
            lifecycle::refresh_active_gauge(&state.store).await;
            Ok((StatusCode::ACCEPTED, Json(record)).into_response())
        }
        CreateOutcome::Replayed(record) => {
            state.audit.emit(
                AuditEntry::new(
                    &tenant_id,
                    "store.create",
                    Some(&record.id),
                    AuditOutcome::Replayed,
                    now,
                )
                .with_ip(ip),
            );
            metrics::counter!("storefront_store_creates_total", "outcome" => "replayed")
                .increment(1);
            Ok((StatusCode::OK, Json(record)).into_response())
        }
    }
}

#[utoipa::path(
    get,
    path = "/stores",
    tag = "stores",
    responses(
        (status = 200, description = "The tenant's non-deleted stores, newest first", body = [Store]),
        (status = 500, description = "Internal error", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn list_stores(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Vec<Store>>, ApiError> {
    let tenant_id = tenant_from_headers(&headers);
    let items = state
        .store
        .list_stores(&tenant_id)
        .await
        .map_err(|err| api_internal("failed to list stores", &err))?;
    Ok(Json(items))
}

#[utoipa::path(
    get,
    path = "/stores/{id}",
    tag = "stores",
    params(("id" = String, Path, description = "Store identifier")),
    responses(
        (status = 200, description = "Fetch store", body = Store),
        (status = 404, description = "Store not found for tenant", body = crate::api::types::ErrorResponse),
        (status = 500, description = "Internal error", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn get_store(
    Path(id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Store>, ApiError> {
    let tenant_id = tenant_from_headers(&headers);
    match state.store.get_store(&id, &tenant_id).await {
        Ok(record) => Ok(Json(record)),
        Err(err) => Err(from_store_error(err, "failed to fetch store")),
    }
}

#[utoipa::path(
    delete,
    path = "/stores/{id}",
    tag = "stores",
    params(("id" = String, Path, description = "Store identifier")),
    responses(
        (status = 200, description = "Deletion started or already done", body = StoreDeleteResponse),
        (status = 404, description = "Store not found for tenant", body = crate::api::types::ErrorResponse),
        (status = 500, description = "Internal error", body = crate::api::types::ErrorResponse)
    )
)]
pub(crate) async fn delete_store(
    Path(id): Path<String>,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<StoreDeleteResponse>, ApiError> {
    let tenant_id = tenant_from_headers(&headers);
    let ip = client_ip_from_headers(&headers);
    let now = now_millis();

    match state.store.begin_delete(&id, &tenant_id, now).await {
        Ok(DeleteOutcome::Started(record)) => {
            lifecycle::spawn_deleter(
                state.store.clone(),
                state.orchestrator.clone(),
                record.clone(),
            );
            state.audit.emit(
                AuditEntry::new(&tenant_id, "store.delete", Some(&id), AuditOutcome::Ok, now)
                    .with_ip(ip),
            );
            Ok(Json(StoreDeleteResponse {
                message: "Store deletion started".to_string(),
                store: record,
            }))
        }
        Ok(DeleteOutcome::InProgress(record)) => Ok(Json(StoreDeleteResponse {
            message: "Store deletion already in progress".to_string(),
            store: record,
        })),
        Ok(DeleteOutcome::AlreadyDeleted(record)) => Ok(Json(StoreDeleteResponse {
            message: "Store already deleted".to_string(),
            store: record,
        })),
        Err(StoreError::NotFound(_)) => {
            state.audit.emit(
                AuditEntry::new(
                    &tenant_id,
                    "store.delete",
                    Some(&id),
                    AuditOutcome::NotFound,
                    now,
                )
                .with_ip(ip),
            );
            Err(api_not_found("store not found"))
        }
        Err(err) => Err(api_internal("failed to delete store", &err)),
    }
}

fn audit_outcome_for(err: &StoreError) -> AuditOutcome {
    match err {
        StoreError::QuotaExceeded { .. } | StoreError::RateLimited { .. } => AuditOutcome::Denied,
        _ => AuditOutcome::Error,
    }
}
