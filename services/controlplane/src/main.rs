// Storefront Control Plane (HTTP)
// -------------------------------
// This binary is the provisioning control plane for storefront workloads. It
// exposes a JSON/HTTP API (Axum) that creates, tracks, and retires isolated
// store instances: each create deploys a templated chart (app + sidecar
// database) into a dedicated namespace and exposes it on a per-store
// hostname; delete tears the whole bundle down.
//
// Storage model:
// - Pluggable `ControlPlaneStore`: in-memory (default for dev) or Postgres
//   when DB_HOST / STORAGE_BACKEND=postgres is set.
// - Postgres is the single source of truth; replicas are stateless in front
//   of it. The create gate (quota, rate, idempotency) and delete arbitration
//   run inside database transactions, so any number of replicas can share
//   one database.
//
// Background work:
// - Provisioning and deletion run as detached tasks: handlers respond right
//   after the transactional write, then the task drives helm/kubectl and
//   commits one terminal transition.
// - A maintenance task GCs expired idempotency keys and out-of-window rate
//   rows, and fails `Provisioning` stores stranded by a dead replica.
// - Audit entries flow through a bounded fire-and-forget channel.
use anyhow::Context;
use controlplane::app::{build_router, AppState};
use controlplane::audit::AuditSink;
use controlplane::config::{ControlPlaneConfig, StorageBackend};
use controlplane::maintenance;
use controlplane::observability;
use controlplane::orchestrator::{HelmKubeClient, Orchestrator};
use controlplane::store::memory::InMemoryStore;
use controlplane::store::postgres::PostgresStore;
use controlplane::store::ControlPlaneStore;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let metrics_handle = observability::init_observability();

    let config = ControlPlaneConfig::from_env().context("control plane config")?;
    let store: Arc<dyn ControlPlaneStore> = match config.storage {
        StorageBackend::Memory => Arc::new(InMemoryStore::new()),
        StorageBackend::Postgres => Arc::new(
            PostgresStore::connect(&config.postgres)
                .await
                .context("connect postgres")?,
        ),
    };
    tracing::info!(
        backend = store.backend_name(),
        durable = store.is_durable(),
        "control plane store ready"
    );

    let orchestrator: Arc<dyn Orchestrator> = Arc::new(HelmKubeClient::new(
        config.chart_path.clone(),
        config.command_timeout(),
    ));

    let (audit, _audit_task) = AuditSink::spawn(store.clone(), config.audit_queue_capacity);
    maintenance::spawn_maintenance(store.clone(), config.maintenance());
    tokio::spawn(observability::serve_metrics(
        metrics_handle,
        config.metrics_bind,
    ));

    let state = AppState {
        store,
        orchestrator,
        audit,
        limits: config.quota_limits(),
        lifecycle: config.lifecycle(),
        dns_suffix: config.dns_suffix.clone(),
    };
    let app = build_router(state);

    let addr = config.bind_addr;
    tracing::info!(%addr, "control plane listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}
