use crate::audit;
use crate::lifecycle::LifecycleConfig;
use crate::maintenance::MaintenanceConfig;
use crate::store::QuotaLimits;
use anyhow::{Context, Result};
use chrono::Duration as ChronoDuration;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_MAX_STORES_GLOBAL: i64 = 100;
pub const DEFAULT_MAX_STORES_PER_TENANT: i64 = 10;
pub const DEFAULT_MAX_STORES_PER_HOUR: i64 = 5;
pub const DEFAULT_PROVISIONING_TIMEOUT_MS: u64 = 300_000;
pub const DEFAULT_READINESS_CHECK_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_MAX_READINESS_CHECKS: u32 = 60;
pub const DEFAULT_IDEMPOTENCY_WINDOW_MS: u64 = 300_000;
pub const DEFAULT_MAINTENANCE_INTERVAL_MS: u64 = 300_000;
pub const DEFAULT_COMMAND_TIMEOUT_MS: u64 = 120_000;

/// Which store backend serves this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Memory,
    Postgres,
}

/// Postgres connection settings, one field per `DB_*` environment variable.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: String,
    pub max_connections: u32,
    pub acquire_timeout_ms: u64,
}

// Control plane configuration sourced from environment variables.
#[derive(Debug, Clone)]
pub struct ControlPlaneConfig {
    // HTTP bind address for the control plane API.
    pub bind_addr: SocketAddr,
    // Metrics HTTP bind address.
    pub metrics_bind: SocketAddr,
    pub storage: StorageBackend,
    pub postgres: PostgresConfig,
    // DNS suffix appended to store ids to form per-instance hostnames.
    pub dns_suffix: String,
    // Chart installed for every store.
    pub chart_path: PathBuf,
    pub max_stores_global: i64,
    pub max_stores_per_tenant: i64,
    pub max_stores_per_hour: i64,
    pub provisioning_timeout_ms: u64,
    pub readiness_check_interval_ms: u64,
    pub max_readiness_checks: u32,
    pub idempotency_window_ms: u64,
    pub maintenance_interval_ms: u64,
    pub command_timeout_ms: u64,
    pub audit_queue_capacity: usize,
}

impl ControlPlaneConfig {
    pub fn from_env() -> Result<Self> {
        // Environment variables provide defaults for local development.
        let bind_addr = env_or("BIND_ADDR", "0.0.0.0:8080")
            .parse()
            .with_context(|| "parse BIND_ADDR")?;
        let metrics_bind = env_or("METRICS_BIND", "0.0.0.0:9090")
            .parse()
            .with_context(|| "parse METRICS_BIND")?;

        let db_host = std::env::var("DB_HOST").ok();
        // Without an explicit backend, a configured database selects
        // Postgres; otherwise the process runs on the memory store.
        let storage = match std::env::var("STORAGE_BACKEND").ok().as_deref() {
            Some("memory") => StorageBackend::Memory,
            Some("postgres") => StorageBackend::Postgres,
            Some(other) => anyhow::bail!("unknown STORAGE_BACKEND {other:?}"),
            None if db_host.is_some() => StorageBackend::Postgres,
            None => StorageBackend::Memory,
        };
        let postgres = PostgresConfig {
            host: db_host.unwrap_or_else(|| "localhost".to_string()),
            port: parse_env("DB_PORT", 5432u16)?,
            name: env_or("DB_NAME", "storefront"),
            user: env_or("DB_USER", "storefront"),
            password: env_or("DB_PASSWORD", ""),
            max_connections: parse_env("DB_MAX_CONNECTIONS", 10u32)?,
            acquire_timeout_ms: parse_env("DB_ACQUIRE_TIMEOUT_MS", 5_000u64)?,
        };

        Ok(Self {
            bind_addr,
            metrics_bind,
            storage,
            postgres,
            dns_suffix: env_or("DNS_SUFFIX", "stores.localhost"),
            chart_path: PathBuf::from(env_or("CHART_PATH", "charts/store")),
            max_stores_global: parse_env("MAX_STORES_GLOBAL", DEFAULT_MAX_STORES_GLOBAL)?,
            max_stores_per_tenant: parse_env(
                "MAX_STORES_PER_TENANT",
                DEFAULT_MAX_STORES_PER_TENANT,
            )?,
            max_stores_per_hour: parse_env("MAX_STORES_PER_HOUR", DEFAULT_MAX_STORES_PER_HOUR)?,
            provisioning_timeout_ms: parse_env(
                "PROVISIONING_TIMEOUT_MS",
                DEFAULT_PROVISIONING_TIMEOUT_MS,
            )?,
            readiness_check_interval_ms: parse_env(
                "READINESS_CHECK_INTERVAL_MS",
                DEFAULT_READINESS_CHECK_INTERVAL_MS,
            )?,
            max_readiness_checks: parse_env(
                "MAX_READINESS_CHECKS",
                DEFAULT_MAX_READINESS_CHECKS,
            )?,
            idempotency_window_ms: parse_env(
                "IDEMPOTENCY_WINDOW_MS",
                DEFAULT_IDEMPOTENCY_WINDOW_MS,
            )?,
            maintenance_interval_ms: parse_env(
                "MAINTENANCE_INTERVAL_MS",
                DEFAULT_MAINTENANCE_INTERVAL_MS,
            )?,
            command_timeout_ms: parse_env(
                "ORCHESTRATOR_COMMAND_TIMEOUT_MS",
                DEFAULT_COMMAND_TIMEOUT_MS,
            )?,
            audit_queue_capacity: parse_env(
                "AUDIT_QUEUE_CAPACITY",
                audit::DEFAULT_QUEUE_CAPACITY,
            )?,
        })
    }

    pub fn quota_limits(&self) -> QuotaLimits {
        QuotaLimits {
            max_stores_global: self.max_stores_global,
            max_stores_per_tenant: self.max_stores_per_tenant,
            max_stores_per_hour: self.max_stores_per_hour,
            rate_window: ChronoDuration::hours(1),
            idempotency_window: ChronoDuration::milliseconds(self.idempotency_window_ms as i64),
        }
    }

    pub fn lifecycle(&self) -> LifecycleConfig {
        LifecycleConfig {
            provisioning_timeout: Duration::from_millis(self.provisioning_timeout_ms),
            readiness_check_interval: Duration::from_millis(self.readiness_check_interval_ms),
            max_readiness_checks: self.max_readiness_checks,
        }
    }

    pub fn maintenance(&self) -> MaintenanceConfig {
        MaintenanceConfig {
            interval: Duration::from_millis(self.maintenance_interval_ms),
            idempotency_window: ChronoDuration::milliseconds(self.idempotency_window_ms as i64),
            rate_window: ChronoDuration::hours(1),
            stranded_after: ChronoDuration::milliseconds(
                (self.provisioning_timeout_ms + self.readiness_check_interval_ms) as i64,
            ),
        }
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(value) => value.parse().with_context(|| format!("parse {key}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    const KEYS: &[&str] = &[
        "BIND_ADDR",
        "METRICS_BIND",
        "STORAGE_BACKEND",
        "DB_HOST",
        "DB_PORT",
        "DB_NAME",
        "DB_USER",
        "DB_PASSWORD",
        "DB_MAX_CONNECTIONS",
        "DB_ACQUIRE_TIMEOUT_MS",
        "DNS_SUFFIX",
        "CHART_PATH",
        "MAX_STORES_GLOBAL",
        "MAX_STORES_PER_TENANT",
        "MAX_STORES_PER_HOUR",
        "PROVISIONING_TIMEOUT_MS",
        "READINESS_CHECK_INTERVAL_MS",
        "MAX_READINESS_CHECKS",
        "IDEMPOTENCY_WINDOW_MS",
        "MAINTENANCE_INTERVAL_MS",
        "ORCHESTRATOR_COMMAND_TIMEOUT_MS",
        "AUDIT_QUEUE_CAPACITY",
    ];

    fn clear_env() {
        for key in KEYS {
            unsafe {
                env::remove_var(key);
            }
        }
    }

    #[serial]
    #[test]
    fn from_env_uses_defaults() {
        clear_env();
        let config = ControlPlaneConfig::from_env().expect("from_env");
        assert_eq!(config.bind_addr.to_string(), "0.0.0.0:8080");
        assert_eq!(config.metrics_bind.to_string(), "0.0.0.0:9090");
        assert_eq!(config.storage, StorageBackend::Memory);
        assert_eq!(config.dns_suffix, "stores.localhost");
        assert_eq!(config.max_stores_global, 100);
        assert_eq!(config.max_stores_per_tenant, 10);
        assert_eq!(config.max_stores_per_hour, 5);
        assert_eq!(config.provisioning_timeout_ms, 300_000);
        assert_eq!(config.readiness_check_interval_ms, 5_000);
        assert_eq!(config.max_readiness_checks, 60);
        assert_eq!(config.idempotency_window_ms, 300_000);
        clear_env();
    }

    #[serial]
    #[test]
    fn db_host_selects_postgres() {
        clear_env();
        unsafe {
            env::set_var("DB_HOST", "db.internal");
            env::set_var("DB_PORT", "5433");
            env::set_var("DB_PASSWORD", "hunter2");
        }
        let config = ControlPlaneConfig::from_env().expect("from_env");
        assert_eq!(config.storage, StorageBackend::Postgres);
        assert_eq!(config.postgres.host, "db.internal");
        assert_eq!(config.postgres.port, 5433);
        assert_eq!(config.postgres.password, "hunter2");
        clear_env();
    }

    #[serial]
    #[test]
    fn explicit_backend_overrides_db_host() {
        clear_env();
        unsafe {
            env::set_var("DB_HOST", "db.internal");
            env::set_var("STORAGE_BACKEND", "memory");
        }
        let config = ControlPlaneConfig::from_env().expect("from_env");
        assert_eq!(config.storage, StorageBackend::Memory);
        clear_env();
    }

    #[serial]
    #[test]
    fn invalid_numbers_fail() {
        clear_env();
        unsafe {
            env::set_var("MAX_STORES_GLOBAL", "lots");
        }
        assert!(ControlPlaneConfig::from_env().is_err());
        clear_env();
    }

    #[serial]
    #[test]
    fn invalid_backend_fails() {
        clear_env();
        unsafe {
            env::set_var("STORAGE_BACKEND", "sqlite");
        }
        assert!(ControlPlaneConfig::from_env().is_err());
        clear_env();
    }

    #[serial]
    #[test]
    fn limit_views_carry_overrides() {
        clear_env();
        unsafe {
            env::set_var("MAX_STORES_PER_HOUR", "2");
            env::set_var("IDEMPOTENCY_WINDOW_MS", "60000");
            env::set_var("PROVISIONING_TIMEOUT_MS", "1000");
            env::set_var("READINESS_CHECK_INTERVAL_MS", "100");
        }
        let config = ControlPlaneConfig::from_env().expect("from_env");
        let limits = config.quota_limits();
        assert_eq!(limits.max_stores_per_hour, 2);
        assert_eq!(limits.idempotency_window, ChronoDuration::seconds(60));
        let lifecycle = config.lifecycle();
        assert_eq!(lifecycle.provisioning_timeout, Duration::from_secs(1));
        let maintenance = config.maintenance();
        assert_eq!(
            maintenance.stranded_after,
            ChronoDuration::milliseconds(1_100)
        );
        clear_env();
    }
}
