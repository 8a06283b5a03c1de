//! Background lifecycle drivers for provisioning and deletion.
//!
//! # Purpose
//! HTTP handlers respond right after their transactional write; the
//! long-running orchestrator work happens in detached tokio tasks spawned
//! here. Each task commits exactly one terminal transition through the
//! store's guarded markers, so a task whose store was deleted underneath it
//! simply no-ops.
use crate::model::time::now_millis;
use crate::model::Store;
use crate::orchestrator::Orchestrator;
use crate::store::ControlPlaneStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

pub const TIMEOUT_REASON: &str = "Provisioning timeout exceeded";
pub const MAX_CHECKS_REASON: &str = "Maximum readiness checks exceeded";

/// Knobs for the readiness watch loop.
#[derive(Debug, Clone, Copy)]
pub struct LifecycleConfig {
    pub provisioning_timeout: Duration,
    pub readiness_check_interval: Duration,
    pub max_readiness_checks: u32,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        LifecycleConfig {
            provisioning_timeout: Duration::from_secs(300),
            readiness_check_interval: Duration::from_secs(5),
            max_readiness_checks: 60,
        }
    }
}

/// Install the release and watch readiness until a terminal state.
pub fn spawn_provisioner(
    store: Arc<dyn ControlPlaneStore>,
    orchestrator: Arc<dyn Orchestrator>,
    config: LifecycleConfig,
    record: Store,
) -> JoinHandle<()> {
    tokio::spawn(async move { run_provisioner(store, orchestrator, config, record).await })
}

/// Uninstall the release and commit the delete result.
pub fn spawn_deleter(
    store: Arc<dyn ControlPlaneStore>,
    orchestrator: Arc<dyn Orchestrator>,
    record: Store,
) -> JoinHandle<()> {
    tokio::spawn(async move { run_deleter(store, orchestrator, record).await })
}

async fn run_provisioner(
    store: Arc<dyn ControlPlaneStore>,
    orchestrator: Arc<dyn Orchestrator>,
    config: LifecycleConfig,
    record: Store,
) {
    if let Err(err) = orchestrator
        .install(&record.id, &record.namespace, &record.host)
        .await
    {
        fail_provisioning(&store, &record, &err.to_string()).await;
        return;
    }
    info!(store_id = %record.id, host = %record.host, "release installed, watching readiness");

    let started = Instant::now();
    let mut attempts: u32 = 0;
    loop {
        // Stop conditions first, so a store that never becomes ready fails
        // on the boundary attempt rather than one attempt later.
        if started.elapsed() > config.provisioning_timeout {
            fail_provisioning(&store, &record, TIMEOUT_REASON).await;
            return;
        }
        if attempts >= config.max_readiness_checks {
            fail_provisioning(&store, &record, MAX_CHECKS_REASON).await;
            return;
        }
        attempts += 1;

        let pods = orchestrator.check_pod_readiness(&record.namespace).await;
        if pods.ready {
            let ingress = orchestrator
                .check_ingress_readiness(&record.namespace, &record.host)
                .await;
            if ingress.ready {
                match store.mark_store_ready(&record.id, now_millis()).await {
                    Ok(true) => {
                        info!(store_id = %record.id, attempts, "store ready");
                        metrics::counter!("storefront_store_transitions_total", "to" => "ready")
                            .increment(1);
                        refresh_active_gauge(&store).await;
                    }
                    Ok(false) => {
                        debug!(store_id = %record.id, "store left provisioning before readiness landed");
                    }
                    Err(err) => {
                        error!(store_id = %record.id, error = ?err, "failed to record readiness");
                    }
                }
                return;
            }
            debug!(
                store_id = %record.id,
                attempt = attempts,
                reason = ingress.reason.as_deref().unwrap_or(""),
                "ingress not ready"
            );
        } else {
            debug!(
                store_id = %record.id,
                attempt = attempts,
                reason = pods.reason.as_deref().unwrap_or(""),
                "pods not ready"
            );
        }

        tokio::time::sleep(config.readiness_check_interval).await;
    }
}

async fn run_deleter(
    store: Arc<dyn ControlPlaneStore>,
    orchestrator: Arc<dyn Orchestrator>,
    record: Store,
) {
    match orchestrator.uninstall(&record.id, &record.namespace).await {
        Ok(()) => match store.mark_store_deleted(&record.id, now_millis()).await {
            Ok(true) => {
                info!(store_id = %record.id, "store deleted");
                metrics::counter!("storefront_store_transitions_total", "to" => "deleted")
                    .increment(1);
                refresh_active_gauge(&store).await;
            }
            Ok(false) => {
                debug!(store_id = %record.id, "store was not deleting when teardown finished");
            }
            Err(err) => {
                error!(store_id = %record.id, error = ?err, "failed to record deletion");
            }
        },
        Err(err) => {
            let reason = format!("Deletion failed: {err}");
            warn!(store_id = %record.id, %reason, "teardown failed");
            metrics::counter!("storefront_store_transitions_total", "to" => "failed").increment(1);
            if let Err(err) = store.mark_delete_failed(&record.id, &reason).await {
                error!(store_id = %record.id, error = ?err, "failed to record teardown failure");
            }
        }
    }
}

async fn fail_provisioning(store: &Arc<dyn ControlPlaneStore>, record: &Store, reason: &str) {
    warn!(store_id = %record.id, %reason, "provisioning failed");
    metrics::counter!("storefront_store_transitions_total", "to" => "failed").increment(1);
    if let Err(err) = store.mark_provisioning_failed(&record.id, reason).await {
        error!(store_id = %record.id, error = ?err, "failed to record provisioning failure");
    }
}

/// Keep the active-store gauge in step with terminal transitions.
pub async fn refresh_active_gauge(store: &Arc<dyn ControlPlaneStore>) {
    if let Ok(active) = store.count_global_active().await {
        metrics::gauge!("storefront_stores_active").set(active as f64);
    }
}
