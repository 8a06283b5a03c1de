//! In-memory implementation of the control-plane store.
//!
//! # Purpose
//! Implements `ControlPlaneStore` entirely in memory for local development
//! and tests. Not durable: all state is lost on restart, and multiple
//! replicas would each see independent state, so only the Postgres backend
//! is suitable for production.
//!
//! # Atomicity
//! The create flow touches three collections (stores, idempotency keys, rate
//! rows) and the delete flow arbitrates a status transition. A single
//! `RwLock` over the whole state stands in for the Postgres transaction and
//! row lock: every trait operation takes the lock once, so the observable
//! semantics match the durable backend.
use super::{ControlPlaneStore, CreateOutcome, DeleteOutcome, QuotaLimits, StoreError, StoreResult};
use crate::gate::{self, GateInputs};
use crate::model::{AuditEntry, Store, StoreStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct IdempotencyRecord {
    store_id: String,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct RateRecord {
    tenant_id: String,
    created_at: DateTime<Utc>,
}

#[derive(Default)]
struct Inner {
    stores: HashMap<String, Store>,
    idempotency: HashMap<String, IdempotencyRecord>,
    rate: Vec<RateRecord>,
    audit: Vec<AuditEntry>,
}

impl Inner {
    fn active_counts(&self, tenant_id: &str) -> (i64, i64) {
        let mut global = 0;
        let mut tenant = 0;
        for record in self.stores.values() {
            if record.status.counts_against_quota() {
                global += 1;
                if record.tenant_id == tenant_id {
                    tenant += 1;
                }
            }
        }
        (global, tenant)
    }

    fn rate_window(&self, tenant_id: &str, cutoff: DateTime<Utc>) -> (i64, Option<DateTime<Utc>>) {
        let mut count = 0;
        let mut oldest: Option<DateTime<Utc>> = None;
        for record in &self.rate {
            if record.tenant_id == tenant_id && record.created_at >= cutoff {
                count += 1;
                oldest = Some(match oldest {
                    Some(current) if current <= record.created_at => current,
                    _ => record.created_at,
                });
            }
        }
        (count, oldest)
    }

    fn replay(&self, key: &str, cutoff: DateTime<Utc>) -> Option<Store> {
        let record = self.idempotency.get(key)?;
        if record.created_at < cutoff {
            return None;
        }
        self.stores.get(&record.store_id).cloned()
    }
}

/// Non-durable dev/test store.
pub struct InMemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        InMemoryStore {
            inner: Arc::new(RwLock::new(Inner::default())),
        }
    }

    /// Audit rows appended so far. Dev/test introspection; the Postgres
    /// backend exposes audit data through the `audit_logs` table instead.
    pub async fn audit_entries(&self) -> Vec<AuditEntry> {
        self.inner.read().await.audit.clone()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        InMemoryStore::new()
    }
}

#[async_trait]
impl ControlPlaneStore for InMemoryStore {
    async fn create_store(
        &self,
        record: Store,
        idempotency_key: &str,
        limits: &QuotaLimits,
        now: DateTime<Utc>,
    ) -> StoreResult<CreateOutcome> {
        let mut inner = self.inner.write().await;

        // Replay first: a matched key consumes no quota or rate budget.
        if let Some(existing) = inner.replay(idempotency_key, now - limits.idempotency_window) {
            return Ok(CreateOutcome::Replayed(existing));
        }

        let (global_active, tenant_active) = inner.active_counts(&record.tenant_id);
        let (rate_in_window, oldest_in_window) =
            inner.rate_window(&record.tenant_id, now - limits.rate_window);
        gate::admit(
            &GateInputs {
                global_active,
                tenant_active,
                rate_in_window,
                oldest_in_window,
            },
            limits,
            now,
        )?;

        if inner.stores.contains_key(&record.id)
            || inner.stores.values().any(|s| s.host == record.host)
        {
            return Err(StoreError::Conflict("store id or host exists".into()));
        }

        inner.idempotency.insert(
            idempotency_key.to_string(),
            IdempotencyRecord {
                store_id: record.id.clone(),
                created_at: now,
            },
        );
        inner.rate.push(RateRecord {
            tenant_id: record.tenant_id.clone(),
            created_at: now,
        });
        inner.stores.insert(record.id.clone(), record.clone());
        Ok(CreateOutcome::Created(record))
    }

    async fn get_store(&self, id: &str, tenant_id: &str) -> StoreResult<Store> {
        self.inner
            .read()
            .await
            .stores
            .get(id)
            .filter(|record| record.tenant_id == tenant_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound("store".into()))
    }

    async fn list_stores(&self, tenant_id: &str) -> StoreResult<Vec<Store>> {
        let mut items: Vec<Store> = self
            .inner
            .read()
            .await
            .stores
            .values()
            .filter(|record| {
                record.tenant_id == tenant_id && record.status != StoreStatus::Deleted
            })
            .cloned()
            .collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(items)
    }

    async fn mark_store_ready(&self, id: &str, now: DateTime<Utc>) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        match inner.stores.get_mut(id) {
            Some(record) if record.status == StoreStatus::Provisioning => {
                record.status = StoreStatus::Ready;
                record.ready_at = Some(now);
                record.failure_reason = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_provisioning_failed(&self, id: &str, reason: &str) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        match inner.stores.get_mut(id) {
            Some(record) if record.status == StoreStatus::Provisioning => {
                record.status = StoreStatus::Failed;
                record.failure_reason = Some(reason.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_store_deleted(&self, id: &str, now: DateTime<Utc>) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        match inner.stores.get_mut(id) {
            Some(record) if record.status == StoreStatus::Deleting => {
                record.status = StoreStatus::Deleted;
                record.deleted_at = Some(now);
                record.failure_reason = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_delete_failed(&self, id: &str, reason: &str) -> StoreResult<bool> {
        let mut inner = self.inner.write().await;
        match inner.stores.get_mut(id) {
            Some(record) if record.status == StoreStatus::Deleting => {
                record.status = StoreStatus::Failed;
                record.failure_reason = Some(reason.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn begin_delete(
        &self,
        id: &str,
        tenant_id: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<DeleteOutcome> {
        let mut inner = self.inner.write().await;
        let record = inner
            .stores
            .get_mut(id)
            .filter(|record| record.tenant_id == tenant_id)
            .ok_or_else(|| StoreError::NotFound("store".into()))?;
        match record.status {
            StoreStatus::Deleted => Ok(DeleteOutcome::AlreadyDeleted(record.clone())),
            StoreStatus::Deleting => Ok(DeleteOutcome::InProgress(record.clone())),
            _ => {
                record.status = StoreStatus::Deleting;
                record.deletion_started_at = Some(now);
                record.failure_reason = None;
                Ok(DeleteOutcome::Started(record.clone()))
            }
        }
    }

    async fn count_global_active(&self) -> StoreResult<i64> {
        Ok(self
            .inner
            .read()
            .await
            .stores
            .values()
            .filter(|record| record.status.counts_against_quota())
            .count() as i64)
    }

    async fn count_tenant_active(&self, tenant_id: &str) -> StoreResult<i64> {
        Ok(self.inner.read().await.active_counts(tenant_id).1)
    }

    async fn count_rate_window(
        &self,
        tenant_id: &str,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<i64> {
        Ok(self.inner.read().await.rate_window(tenant_id, cutoff).0)
    }

    async fn oldest_rate_in_window(
        &self,
        tenant_id: &str,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<Option<DateTime<Utc>>> {
        Ok(self.inner.read().await.rate_window(tenant_id, cutoff).1)
    }

    async fn lookup_idempotent(
        &self,
        key: &str,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<Option<Store>> {
        Ok(self.inner.read().await.replay(key, cutoff))
    }

    async fn append_audit(&self, entry: AuditEntry) -> StoreResult<()> {
        self.inner.write().await.audit.push(entry);
        Ok(())
    }

    async fn purge_expired(
        &self,
        idempotency_cutoff: DateTime<Utc>,
        rate_cutoff: DateTime<Utc>,
    ) -> StoreResult<(u64, u64)> {
        let mut inner = self.inner.write().await;
        let idempotency_before = inner.idempotency.len();
        inner
            .idempotency
            .retain(|_, record| record.created_at >= idempotency_cutoff);
        let idempotency_removed = (idempotency_before - inner.idempotency.len()) as u64;

        let rate_before = inner.rate.len();
        inner.rate.retain(|record| record.created_at >= rate_cutoff);
        let rate_removed = (rate_before - inner.rate.len()) as u64;
        Ok((idempotency_removed, rate_removed))
    }

    async fn sweep_stranded_provisioning(
        &self,
        cutoff: DateTime<Utc>,
        reason: &str,
    ) -> StoreResult<u64> {
        let mut inner = self.inner.write().await;
        let mut swept = 0;
        for record in inner.stores.values_mut() {
            if record.status == StoreStatus::Provisioning
                && record.provisioning_started_at.unwrap_or(record.created_at) < cutoff
            {
                record.status = StoreStatus::Failed;
                record.failure_reason = Some(reason.to_string());
                swept += 1;
            }
        }
        Ok(swept)
    }

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }

    fn is_durable(&self) -> bool {
        false
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
