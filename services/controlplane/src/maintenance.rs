//! Periodic maintenance of control-plane bookkeeping.
//!
//! # Purpose
//! A detached task that, on every tick:
//! - deletes idempotency keys older than the replay window,
//! - deletes rate rows that fell out of the sliding window,
//! - moves `Provisioning` stores whose watcher died with them (older than
//!   the provisioning timeout) to `Failed`.
//!
//! Transient store errors are logged and retried on the next tick; the task
//! never touches the request path.
use crate::lifecycle::TIMEOUT_REASON;
use crate::model::time::now_millis;
use crate::store::ControlPlaneStore;
use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy)]
pub struct MaintenanceConfig {
    pub interval: Duration,
    pub idempotency_window: ChronoDuration,
    pub rate_window: ChronoDuration,
    /// Age after which a `Provisioning` store is considered stranded. Set a
    /// little past the provisioning timeout so a live watcher always loses
    /// the race to its own timeout transition.
    pub stranded_after: ChronoDuration,
}

pub fn spawn_maintenance(
    store: Arc<dyn ControlPlaneStore>,
    config: MaintenanceConfig,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(config.interval);
        loop {
            ticker.tick().await;
            run_tick(&store, &config).await;
        }
    })
}

/// One maintenance pass; factored out of the loop so tests drive it directly.
pub async fn run_tick(store: &Arc<dyn ControlPlaneStore>, config: &MaintenanceConfig) {
    let now = now_millis();

    match store
        .purge_expired(now - config.idempotency_window, now - config.rate_window)
        .await
    {
        Ok((0, 0)) => {}
        Ok((idempotency, rate)) => {
            debug!(idempotency, rate, "purged expired gate records");
        }
        Err(err) => warn!(error = ?err, "gate record purge failed, retrying next tick"),
    }

    match store
        .sweep_stranded_provisioning(now - config.stranded_after, TIMEOUT_REASON)
        .await
    {
        Ok(0) => {}
        Ok(swept) => {
            warn!(swept, "failed stranded provisioning stores");
            metrics::counter!("storefront_store_transitions_total", "to" => "failed")
                .increment(swept);
        }
        Err(err) => warn!(error = ?err, "stranded provisioning sweep failed, retrying next tick"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Store, StoreStatus};
    use crate::store::memory::InMemoryStore;
    use crate::store::{CreateOutcome, QuotaLimits};

    fn config() -> MaintenanceConfig {
        MaintenanceConfig {
            interval: Duration::from_secs(300),
            idempotency_window: ChronoDuration::minutes(5),
            rate_window: ChronoDuration::hours(1),
            stranded_after: ChronoDuration::minutes(6),
        }
    }

    #[tokio::test]
    async fn tick_purges_and_sweeps() {
        let store: Arc<dyn ControlPlaneStore> = Arc::new(InMemoryStore::new());
        let old = now_millis() - ChronoDuration::hours(2);
        let record = Store::provisioning("t1", "stores.localhost", old);
        let stale_id = record.id.clone();
        match store
            .create_store(record, "k-old", &QuotaLimits::default(), old)
            .await
            .expect("create")
        {
            CreateOutcome::Created(_) => {}
            CreateOutcome::Replayed(_) => panic!("unexpected replay"),
        }

        run_tick(&store, &config()).await;

        let stale = store.get_store(&stale_id, "t1").await.expect("get");
        assert_eq!(stale.status, StoreStatus::Failed);
        assert_eq!(stale.failure_reason.as_deref(), Some(TIMEOUT_REASON));

        // The expired key no longer replays and the rate row is gone.
        let now = now_millis();
        assert!(store
            .lookup_idempotent("k-old", now - ChronoDuration::minutes(5))
            .await
            .expect("lookup")
            .is_none());
        assert_eq!(
            store
                .count_rate_window("t1", now - ChronoDuration::hours(1))
                .await
                .expect("count"),
            0
        );
    }

    #[tokio::test]
    async fn tick_leaves_fresh_state_alone() {
        let store: Arc<dyn ControlPlaneStore> = Arc::new(InMemoryStore::new());
        let now = now_millis();
        let record = Store::provisioning("t1", "stores.localhost", now);
        let id = record.id.clone();
        store
            .create_store(record, "k-new", &QuotaLimits::default(), now)
            .await
            .expect("create");

        run_tick(&store, &config()).await;

        let fresh = store.get_store(&id, "t1").await.expect("get");
        assert_eq!(fresh.status, StoreStatus::Provisioning);
        assert!(store
            .lookup_idempotent("k-new", now - ChronoDuration::minutes(5))
            .await
            .expect("lookup")
            .is_some());
    }
}
