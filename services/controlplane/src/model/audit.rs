//! Audit-log entry payloads.
//!
//! # Purpose
//! Defines the append-only audit record written (best-effort) for every
//! control-plane action. Audit writes never block or fail the request they
//! describe; the sink in `crate::audit` enforces that.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome label recorded with an audit entry.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Accepted,
    Replayed,
    Denied,
    Ok,
    NotFound,
    Error,
}

impl AuditOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditOutcome::Accepted => "accepted",
            AuditOutcome::Replayed => "replayed",
            AuditOutcome::Denied => "denied",
            AuditOutcome::Ok => "ok",
            AuditOutcome::NotFound => "not_found",
            AuditOutcome::Error => "error",
        }
    }
}

/// One append-only audit record.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AuditEntry {
    pub tenant_id: String,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub status: AuditOutcome,
    pub details: Option<serde_json::Value>,
    pub ip_address: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        tenant_id: &str,
        action: &str,
        resource_id: Option<&str>,
        status: AuditOutcome,
        now: DateTime<Utc>,
    ) -> AuditEntry {
        AuditEntry {
            tenant_id: tenant_id.to_string(),
            action: action.to_string(),
            resource_type: "store".to_string(),
            resource_id: resource_id.map(str::to_string),
            status,
            details: None,
            ip_address: None,
            created_at: now,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> AuditEntry {
        self.details = Some(details);
        self
    }

    pub fn with_ip(mut self, ip: Option<String>) -> AuditEntry {
        self.ip_address = ip;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::time::now_millis;

    #[test]
    fn builder_populates_fields() {
        let entry = AuditEntry::new(
            "acme",
            "store.create",
            Some("store-0a1b2c3d"),
            AuditOutcome::Accepted,
            now_millis(),
        )
        .with_details(serde_json::json!({"host": "store-0a1b2c3d.stores.localhost"}))
        .with_ip(Some("10.0.0.7".to_string()));

        assert_eq!(entry.resource_type, "store");
        assert_eq!(entry.status.as_str(), "accepted");
        assert_eq!(entry.resource_id.as_deref(), Some("store-0a1b2c3d"));
        assert!(entry.details.is_some());
        assert_eq!(entry.ip_address.as_deref(), Some("10.0.0.7"));
    }
}
