//! Fire-and-forget audit sink.
//!
//! # Purpose
//! Handlers describe what happened; this sink gets it into the `audit_logs`
//! table without ever blocking or failing the request. Entries flow through
//! a bounded channel into a detached writer task; a full queue or a failed
//! insert drops the entry with a warning. Consumers of the audit table
//! accept at-most-once durability.
use crate::model::AuditEntry;
use crate::store::ControlPlaneStore;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Cloneable handle for emitting audit entries.
#[derive(Clone)]
pub struct AuditSink {
    tx: mpsc::Sender<AuditEntry>,
}

impl AuditSink {
    /// Start the writer task and return the emit handle.
    pub fn spawn(
        store: Arc<dyn ControlPlaneStore>,
        capacity: usize,
    ) -> (AuditSink, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<AuditEntry>(capacity);
        let task = tokio::spawn(async move {
            while let Some(entry) = rx.recv().await {
                if let Err(err) = store.append_audit(entry).await {
                    metrics::counter!("storefront_audit_dropped_total").increment(1);
                    warn!(error = ?err, "audit write dropped");
                }
            }
        });
        (AuditSink { tx }, task)
    }

    /// Queue an entry. Never blocks; a full or closed queue drops the entry.
    pub fn emit(&self, entry: AuditEntry) {
        if self.tx.try_send(entry).is_err() {
            metrics::counter!("storefront_audit_dropped_total").increment(1);
            warn!("audit queue full, entry dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::time::now_millis;
    use crate::model::AuditOutcome;
    use crate::store::memory::InMemoryStore;
    use std::time::Duration;

    #[tokio::test]
    async fn emitted_entries_reach_the_store() {
        let store = Arc::new(InMemoryStore::new());
        let (sink, task) = AuditSink::spawn(store.clone(), 8);

        sink.emit(AuditEntry::new(
            "t1",
            "store.create",
            Some("store-0a1b2c3d"),
            AuditOutcome::Accepted,
            now_millis(),
        ));
        sink.emit(AuditEntry::new(
            "t1",
            "store.delete",
            Some("store-0a1b2c3d"),
            AuditOutcome::Ok,
            now_millis(),
        ));

        // Close the channel and let the writer drain.
        drop(sink);
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("drain")
            .expect("writer task");

        let entries = store.audit_entries().await;
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action, "store.create");
        assert_eq!(entries[1].status, AuditOutcome::Ok);
    }

    #[tokio::test]
    async fn full_queue_drops_instead_of_blocking() {
        let store = Arc::new(InMemoryStore::new());
        let (sink, task) = AuditSink::spawn(store.clone(), 1);
        // The writer may drain concurrently; emitting many entries must not
        // block regardless of queue state.
        for i in 0..64 {
            sink.emit(AuditEntry::new(
                "t1",
                "store.create",
                Some(&format!("store-{i:08}")),
                AuditOutcome::Accepted,
                now_millis(),
            ));
        }
        drop(sink);
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("drain")
            .expect("writer task");
        assert!(!store.audit_entries().await.is_empty());
    }
}
