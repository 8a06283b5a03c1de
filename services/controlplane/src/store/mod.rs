use crate::model::{AuditEntry, Store};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::fmt;
use thiserror::Error;

pub mod memory;
pub mod postgres;

/// Admission limits enforced by the create gate.
///
/// Counts compare with `>=` against the caps, so a cap of `N` allows exactly
/// `N` concurrently active (non-`Deleted`) stores.
#[derive(Debug, Clone, Copy)]
pub struct QuotaLimits {
    pub max_stores_global: i64,
    pub max_stores_per_tenant: i64,
    pub max_stores_per_hour: i64,
    /// Sliding window for the per-tenant create rate.
    pub rate_window: Duration,
    /// How long an idempotency key replays the original response.
    pub idempotency_window: Duration,
}

impl Default for QuotaLimits {
    fn default() -> Self {
        QuotaLimits {
            max_stores_global: 100,
            max_stores_per_tenant: 10,
            max_stores_per_hour: 5,
            rate_window: Duration::hours(1),
            idempotency_window: Duration::minutes(5),
        }
    }
}

/// Which cap rejected a create.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaScope {
    Global,
    Tenant,
}

impl fmt::Display for QuotaScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuotaScope::Global => write!(f, "global"),
            QuotaScope::Tenant => write!(f, "tenant"),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("{scope} store quota exceeded")]
    QuotaExceeded { scope: QuotaScope },
    #[error("store creation rate exceeded, retry after {retry_after_seconds}s")]
    RateLimited { retry_after_seconds: i64 },
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Result of an admitted create request.
#[derive(Debug, Clone)]
pub enum CreateOutcome {
    /// A new record was inserted; provisioning should start.
    Created(Store),
    /// A non-expired idempotency key matched; the original record is returned
    /// verbatim and no quota or rate budget was consumed.
    Replayed(Store),
}

/// Result of a delete request after row-locked arbitration.
#[derive(Debug, Clone)]
pub enum DeleteOutcome {
    /// This request won the transition to `Deleting`; teardown should start.
    Started(Store),
    /// Another request already moved the record to `Deleting`.
    InProgress(Store),
    /// The record is already `Deleted`.
    AlreadyDeleted(Store),
}

/// Persistence operations backing the control plane.
///
/// The database is the only synchronisation point between replicas: every
/// backend must make `create_store` (gate checks plus the triple insert) and
/// `begin_delete` (status arbitration) atomic, so concurrent requests agree
/// on who consumed quota and who started a teardown.
#[async_trait]
pub trait ControlPlaneStore: Send + Sync {
    /// Run the admission gate and, if admitted, insert the store record, its
    /// idempotency key, and its rate row atomically.
    ///
    /// Gate order is fixed: idempotent replay short-circuits before any cap
    /// is consulted, then global cap, tenant cap, and the sliding-window
    /// rate. A uniqueness collision on `id`/`host` surfaces as `Conflict`
    /// so the caller can retry with a fresh identifier; a collision on the
    /// idempotency key is resolved internally by returning the winner.
    async fn create_store(
        &self,
        record: Store,
        idempotency_key: &str,
        limits: &QuotaLimits,
        now: DateTime<Utc>,
    ) -> StoreResult<CreateOutcome>;

    /// Fetch one store scoped to a tenant. `Deleted` records remain readable.
    async fn get_store(&self, id: &str, tenant_id: &str) -> StoreResult<Store>;

    /// All non-`Deleted` stores of a tenant, newest first.
    async fn list_stores(&self, tenant_id: &str) -> StoreResult<Vec<Store>>;

    /// `Provisioning -> Ready`. Returns whether the transition applied; it
    /// does not if a delete (or a failure) got there first.
    async fn mark_store_ready(&self, id: &str, now: DateTime<Utc>) -> StoreResult<bool>;

    /// `Provisioning -> Failed` with a reason.
    async fn mark_provisioning_failed(&self, id: &str, reason: &str) -> StoreResult<bool>;

    /// `Deleting -> Deleted`.
    async fn mark_store_deleted(&self, id: &str, now: DateTime<Utc>) -> StoreResult<bool>;

    /// `Deleting -> Failed` with a reason.
    async fn mark_delete_failed(&self, id: &str, reason: &str) -> StoreResult<bool>;

    /// Row-locked transition of a non-terminal record to `Deleting`.
    async fn begin_delete(
        &self,
        id: &str,
        tenant_id: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<DeleteOutcome>;

    async fn count_global_active(&self) -> StoreResult<i64>;
    async fn count_tenant_active(&self, tenant_id: &str) -> StoreResult<i64>;
    async fn count_rate_window(&self, tenant_id: &str, cutoff: DateTime<Utc>)
        -> StoreResult<i64>;
    async fn oldest_rate_in_window(
        &self,
        tenant_id: &str,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<Option<DateTime<Utc>>>;

    /// The store recorded for a non-expired idempotency key, if any.
    async fn lookup_idempotent(
        &self,
        key: &str,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<Option<Store>>;

    /// Append one audit row. Callers treat errors as log-only.
    async fn append_audit(&self, entry: AuditEntry) -> StoreResult<()>;

    /// Delete idempotency keys and rate rows older than their cutoffs.
    /// Returns `(idempotency_rows, rate_rows)` removed.
    async fn purge_expired(
        &self,
        idempotency_cutoff: DateTime<Utc>,
        rate_cutoff: DateTime<Utc>,
    ) -> StoreResult<(u64, u64)>;

    /// Move `Provisioning` records whose provisioning started before `cutoff`
    /// to `Failed(reason)`. Reaps work orphaned by a dead replica.
    async fn sweep_stranded_provisioning(
        &self,
        cutoff: DateTime<Utc>,
        reason: &str,
    ) -> StoreResult<u64>;

    async fn health_check(&self) -> StoreResult<()>;
    fn is_durable(&self) -> bool;
    fn backend_name(&self) -> &'static str;
}
