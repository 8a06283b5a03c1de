//! Postgres-backed implementation of the control-plane store.
//!
//! # What this module is
//! Implements `ControlPlaneStore` on top of Postgres via `sqlx`. Postgres is
//! the single source of truth: control-plane replicas are stateless in front
//! of it, and all cross-replica coordination happens through transactions
//! and row locks here.
//!
//! # Schema
//! Four tables: `stores` (authoritative lifecycle state, `host` unique),
//! `idempotency_keys` (replay window for creates), `rate_limits` (one row
//! per admitted create, consulted for the sliding-window rate), and
//! `audit_logs` (append-only action record). Schema creation is conditional
//! (`CREATE TABLE IF NOT EXISTS`) and runs at connect time, before the
//! service starts answering requests; there is no migration versioning.
//!
//! # Consistency / atomicity
//! - `create_store` runs the whole admission gate and the triple insert
//!   (store + idempotency key + rate row) in one transaction. Two racing
//!   creates with the same idempotency key both pass the replay lookup; one
//!   commits, the other hits the `idempotency_keys` primary key, rolls back,
//!   and returns the winner's record.
//! - `begin_delete` takes `SELECT ... FOR UPDATE` on the store row so only
//!   one handler starts a teardown; later requests observe `Deleting` or
//!   `Deleted` and return idempotently.
//! - Lifecycle markers are single guarded `UPDATE`s (`WHERE status = ...`),
//!   so a transition that lost a race is a no-op rather than a regression.
//!
//! # Operational notes
//! - Pool sizing and acquire timeouts are explicit; hanging forever on an
//!   unhealthy database is worse than failing fast.
//! - Audit inserts go through the same pool; the audit task treats errors as
//!   log-only.
use super::{ControlPlaneStore, CreateOutcome, DeleteOutcome, QuotaLimits, StoreError, StoreResult};
use crate::config::PostgresConfig;
use crate::gate::{self, GateInputs};
use crate::model::{AuditEntry, Store, StoreStatus};
use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{FromRow, PgPool};
use std::time::Duration;

const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS stores (
        id TEXT PRIMARY KEY,
        tenant_id TEXT NOT NULL,
        namespace TEXT NOT NULL,
        host TEXT NOT NULL UNIQUE,
        status TEXT NOT NULL,
        failure_reason TEXT,
        created_at TIMESTAMPTZ NOT NULL,
        provisioning_started_at TIMESTAMPTZ,
        ready_at TIMESTAMPTZ,
        deletion_started_at TIMESTAMPTZ,
        deleted_at TIMESTAMPTZ
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_stores_tenant_created ON stores (tenant_id, created_at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_stores_status ON stores (status)",
    r#"CREATE TABLE IF NOT EXISTS idempotency_keys (
        key TEXT PRIMARY KEY,
        store_id TEXT NOT NULL REFERENCES stores(id),
        created_at TIMESTAMPTZ NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_idempotency_created ON idempotency_keys (created_at)",
    r#"CREATE TABLE IF NOT EXISTS rate_limits (
        id BIGSERIAL PRIMARY KEY,
        tenant_id TEXT NOT NULL,
        store_id TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_rate_tenant_created ON rate_limits (tenant_id, created_at)",
    r#"CREATE TABLE IF NOT EXISTS audit_logs (
        id BIGSERIAL PRIMARY KEY,
        tenant_id TEXT NOT NULL,
        action TEXT NOT NULL,
        resource_type TEXT NOT NULL,
        resource_id TEXT,
        status TEXT NOT NULL,
        details JSONB,
        ip_address TEXT,
        created_at TIMESTAMPTZ NOT NULL
    )"#,
];

const STORE_COLUMNS: &str = "id, tenant_id, namespace, host, status, failure_reason, created_at, \
     provisioning_started_at, ready_at, deletion_started_at, deleted_at";

/// Durable control-plane store backed by Postgres.
pub struct PostgresStore {
    pool: PgPool,
}

/// Row shape for the `stores` table.
///
/// Kept separate from the domain `Store` so column names and the stringly
/// status stay a storage detail; `store_from_db` is the one place statuses
/// are parsed.
#[derive(Debug, Clone, FromRow)]
struct DbStore {
    id: String,
    tenant_id: String,
    namespace: String,
    host: String,
    status: String,
    failure_reason: Option<String>,
    created_at: DateTime<Utc>,
    provisioning_started_at: Option<DateTime<Utc>>,
    ready_at: Option<DateTime<Utc>>,
    deletion_started_at: Option<DateTime<Utc>>,
    deleted_at: Option<DateTime<Utc>>,
}

impl PostgresStore {
    /// Connect to Postgres and ensure the schema exists.
    ///
    /// Schema statements are idempotent, so concurrent replicas can start at
    /// the same time; whichever runs first creates the tables.
    pub async fn connect(pg: &PostgresConfig) -> StoreResult<Self> {
        let connect_options = PgConnectOptions::new()
            .host(&pg.host)
            .port(pg.port)
            .database(&pg.name)
            .username(&pg.user)
            .password(&pg.password);
        let pool = PgPoolOptions::new()
            .max_connections(pg.max_connections)
            .acquire_timeout(Duration::from_millis(pg.acquire_timeout_ms))
            .connect_with(connect_options)
            .await
            .map_err(|e| StoreError::Unexpected(e.into()))?;

        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&pool)
                .await
                .map_err(|e| StoreError::Unexpected(e.into()))?;
        }

        Ok(Self { pool })
    }
}

#[async_trait]
impl ControlPlaneStore for PostgresStore {
    async fn create_store(
        &self,
        record: Store,
        idempotency_key: &str,
        limits: &QuotaLimits,
        now: DateTime<Utc>,
    ) -> StoreResult<CreateOutcome> {
        let idempotency_cutoff = now - limits.idempotency_window;
        let rate_cutoff = now - limits.rate_window;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Unexpected(e.into()))?;

        // Replay first: a matched key consumes no quota or rate budget.
        let replayed = sqlx::query_as::<_, DbStore>(&format!(
            "SELECT {STORE_COLUMNS} FROM stores \
             WHERE id = (SELECT store_id FROM idempotency_keys WHERE key = $1 AND created_at >= $2)"
        ))
        .bind(idempotency_key)
        .bind(idempotency_cutoff)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| StoreError::Unexpected(e.into()))?;
        if let Some(row) = replayed {
            return Ok(CreateOutcome::Replayed(store_from_db(row)?));
        }

        let global_active = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM stores WHERE status <> 'Deleted'",
        )
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| StoreError::Unexpected(e.into()))?;
        let tenant_active = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM stores WHERE tenant_id = $1 AND status <> 'Deleted'",
        )
        .bind(&record.tenant_id)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| StoreError::Unexpected(e.into()))?;
        let rate_in_window = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM rate_limits WHERE tenant_id = $1 AND created_at >= $2",
        )
        .bind(&record.tenant_id)
        .bind(rate_cutoff)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| StoreError::Unexpected(e.into()))?;
        let oldest_in_window = sqlx::query_scalar::<_, Option<DateTime<Utc>>>(
            "SELECT MIN(created_at) FROM rate_limits WHERE tenant_id = $1 AND created_at >= $2",
        )
        .bind(&record.tenant_id)
        .bind(rate_cutoff)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| StoreError::Unexpected(e.into()))?;

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

        let inserted = sqlx::query(
            "INSERT INTO stores (id, tenant_id, namespace, host, status, created_at, provisioning_started_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(&record.id)
        .bind(&record.tenant_id)
        .bind(&record.namespace)
        .bind(&record.host)
        .bind(record.status.as_str())
        .bind(record.created_at)
        .bind(record.provisioning_started_at)
        .execute(&mut *tx)
        .await;
        if let Err(err) = inserted {
            if is_unique_violation(&err) {
                return Err(StoreError::Conflict("store id or host exists".into()));
            }
            return Err(StoreError::Unexpected(err.into()));
        }

        // Expired keys linger until maintenance GC, so take the key over when
        // its previous row fell out of the window. A conflicting row still
        // inside the window means a concurrent create won the key; the WHERE
        // clause leaves it untouched and zero rows are affected.
        let keyed = sqlx::query(
            "INSERT INTO idempotency_keys (key, store_id, created_at) VALUES ($1, $2, $3) \
             ON CONFLICT (key) DO UPDATE \
             SET store_id = EXCLUDED.store_id, created_at = EXCLUDED.created_at \
             WHERE idempotency_keys.created_at < $4",
        )
        .bind(idempotency_key)
        .bind(&record.id)
        .bind(now)
        .bind(idempotency_cutoff)
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Unexpected(e.into()))?;
        if keyed.rows_affected() == 0 {
            // A concurrent create with the same key committed between our
            // replay lookup and this insert. Drop the transaction and return
            // the winner.
            drop(tx);
            if let Some(existing) = self
                .lookup_idempotent(idempotency_key, idempotency_cutoff)
                .await?
            {
                return Ok(CreateOutcome::Replayed(existing));
            }
            return Err(StoreError::Conflict("idempotency key contention".into()));
        }

        sqlx::query(
            "INSERT INTO rate_limits (tenant_id, store_id, created_at) VALUES ($1, $2, $3)",
        )
        .bind(&record.tenant_id)
        .bind(&record.id)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Unexpected(e.into()))?;

        tx.commit()
            .await
            .map_err(|e| StoreError::Unexpected(e.into()))?;
        Ok(CreateOutcome::Created(record))
    }

    async fn get_store(&self, id: &str, tenant_id: &str) -> StoreResult<Store> {
        let row = sqlx::query_as::<_, DbStore>(&format!(
            "SELECT {STORE_COLUMNS} FROM stores WHERE id = $1 AND tenant_id = $2"
        ))
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Unexpected(e.into()))?;
        match row {
            Some(row) => store_from_db(row),
            None => Err(StoreError::NotFound("store".into())),
        }
    }

    async fn list_stores(&self, tenant_id: &str) -> StoreResult<Vec<Store>> {
        let rows = sqlx::query_as::<_, DbStore>(&format!(
            "SELECT {STORE_COLUMNS} FROM stores \
             WHERE tenant_id = $1 AND status <> 'Deleted' ORDER BY created_at DESC"
        ))
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::Unexpected(e.into()))?;
        rows.into_iter().map(store_from_db).collect()
    }

    async fn mark_store_ready(&self, id: &str, now: DateTime<Utc>) -> StoreResult<bool> {
        let updated = sqlx::query(
            "UPDATE stores SET status = 'Ready', ready_at = $2, failure_reason = NULL \
             WHERE id = $1 AND status = 'Provisioning'",
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Unexpected(e.into()))?;
        Ok(updated.rows_affected() > 0)
    }

    async fn mark_provisioning_failed(&self, id: &str, reason: &str) -> StoreResult<bool> {
        let updated = sqlx::query(
            "UPDATE stores SET status = 'Failed', failure_reason = $2 \
             WHERE id = $1 AND status = 'Provisioning'",
        )
        .bind(id)
        .bind(reason)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Unexpected(e.into()))?;
        Ok(updated.rows_affected() > 0)
    }

    async fn mark_store_deleted(&self, id: &str, now: DateTime<Utc>) -> StoreResult<bool> {
        let updated = sqlx::query(
            "UPDATE stores SET status = 'Deleted', deleted_at = $2, failure_reason = NULL \
             WHERE id = $1 AND status = 'Deleting'",
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Unexpected(e.into()))?;
        Ok(updated.rows_affected() > 0)
    }

    async fn mark_delete_failed(&self, id: &str, reason: &str) -> StoreResult<bool> {
        let updated = sqlx::query(
            "UPDATE stores SET status = 'Failed', failure_reason = $2 \
             WHERE id = $1 AND status = 'Deleting'",
        )
        .bind(id)
        .bind(reason)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Unexpected(e.into()))?;
        Ok(updated.rows_affected() > 0)
    }

    async fn begin_delete(
        &self,
        id: &str,
        tenant_id: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<DeleteOutcome> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Unexpected(e.into()))?;

        // Row lock: only one handler wins the transition to Deleting.
        let row = sqlx::query_as::<_, DbStore>(&format!(
            "SELECT {STORE_COLUMNS} FROM stores WHERE id = $1 AND tenant_id = $2 FOR UPDATE"
        ))
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| StoreError::Unexpected(e.into()))?;
        let row = match row {
            Some(row) => row,
            None => return Err(StoreError::NotFound("store".into())),
        };
        let record = store_from_db(row)?;

        match record.status {
            StoreStatus::Deleted => Ok(DeleteOutcome::AlreadyDeleted(record)),
            StoreStatus::Deleting => Ok(DeleteOutcome::InProgress(record)),
            _ => {
                sqlx::query(
                    "UPDATE stores SET status = 'Deleting', deletion_started_at = $2, \
                     failure_reason = NULL WHERE id = $1",
                )
                .bind(id)
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(|e| StoreError::Unexpected(e.into()))?;
                tx.commit()
                    .await
                    .map_err(|e| StoreError::Unexpected(e.into()))?;
                let mut record = record;
                record.status = StoreStatus::Deleting;
                record.deletion_started_at = Some(now);
                record.failure_reason = None;
                Ok(DeleteOutcome::Started(record))
            }
        }
    }

    async fn count_global_active(&self) -> StoreResult<i64> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM stores WHERE status <> 'Deleted'")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| StoreError::Unexpected(e.into()))
    }

    async fn count_tenant_active(&self, tenant_id: &str) -> StoreResult<i64> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM stores WHERE tenant_id = $1 AND status <> 'Deleted'",
        )
        .bind(tenant_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::Unexpected(e.into()))
    }

    async fn count_rate_window(
        &self,
        tenant_id: &str,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<i64> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM rate_limits WHERE tenant_id = $1 AND created_at >= $2",
        )
        .bind(tenant_id)
        .bind(cutoff)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::Unexpected(e.into()))
    }

    async fn oldest_rate_in_window(
        &self,
        tenant_id: &str,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<Option<DateTime<Utc>>> {
        sqlx::query_scalar::<_, Option<DateTime<Utc>>>(
            "SELECT MIN(created_at) FROM rate_limits WHERE tenant_id = $1 AND created_at >= $2",
        )
        .bind(tenant_id)
        .bind(cutoff)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::Unexpected(e.into()))
    }

    async fn lookup_idempotent(
        &self,
        key: &str,
        cutoff: DateTime<Utc>,
    ) -> StoreResult<Option<Store>> {
        let row = sqlx::query_as::<_, DbStore>(&format!(
            "SELECT {STORE_COLUMNS} FROM stores \
             WHERE id = (SELECT store_id FROM idempotency_keys WHERE key = $1 AND created_at >= $2)"
        ))
        .bind(key)
        .bind(cutoff)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StoreError::Unexpected(e.into()))?;
        row.map(store_from_db).transpose()
    }

    async fn append_audit(&self, entry: AuditEntry) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO audit_logs (tenant_id, action, resource_type, resource_id, status, \
             details, ip_address, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(&entry.tenant_id)
        .bind(&entry.action)
        .bind(&entry.resource_type)
        .bind(&entry.resource_id)
        .bind(entry.status.as_str())
        .bind(&entry.details)
        .bind(&entry.ip_address)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Unexpected(e.into()))?;
        Ok(())
    }

    async fn purge_expired(
        &self,
        idempotency_cutoff: DateTime<Utc>,
        rate_cutoff: DateTime<Utc>,
    ) -> StoreResult<(u64, u64)> {
        let idempotency = sqlx::query("DELETE FROM idempotency_keys WHERE created_at < $1")
            .bind(idempotency_cutoff)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Unexpected(e.into()))?;
        let rate = sqlx::query("DELETE FROM rate_limits WHERE created_at < $1")
            .bind(rate_cutoff)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Unexpected(e.into()))?;
        Ok((idempotency.rows_affected(), rate.rows_affected()))
    }

    async fn sweep_stranded_provisioning(
        &self,
        cutoff: DateTime<Utc>,
        reason: &str,
    ) -> StoreResult<u64> {
        let swept = sqlx::query(
            "UPDATE stores SET status = 'Failed', failure_reason = $2 \
             WHERE status = 'Provisioning' \
             AND COALESCE(provisioning_started_at, created_at) < $1",
        )
        .bind(cutoff)
        .bind(reason)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Unexpected(e.into()))?;
        Ok(swept.rows_affected())
    }

    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Unexpected(e.into()))?;
        Ok(())
    }

    fn is_durable(&self) -> bool {
        true
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        return db_err.code().map(|code| code == "23505").unwrap_or(false);
    }
    false
}

fn store_from_db(row: DbStore) -> StoreResult<Store> {
    let status = StoreStatus::parse(&row.status)
        .ok_or_else(|| StoreError::Unexpected(anyhow!("invalid store status {}", row.status)))?;
    Ok(Store {
        id: row.id,
        tenant_id: row.tenant_id,
        namespace: row.namespace,
        host: row.host,
        status,
        failure_reason: row.failure_reason,
        created_at: row.created_at,
        provisioning_started_at: row.provisioning_started_at,
        ready_at: row.ready_at,
        deletion_started_at: row.deletion_started_at,
        deleted_at: row.deleted_at,
    })
}
