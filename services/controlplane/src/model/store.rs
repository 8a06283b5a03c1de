//! Store record and lifecycle status.
//!
//! # Purpose
//! Defines the provisioned-workload record exposed over the HTTP API and
//! persisted by the store layer, plus its five-state lifecycle status.
use super::time::{iso_millis, iso_millis_opt};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Lifecycle status of a store.
///
/// `Deleted` is terminal: a record never leaves it. `Failed` may still be
/// deleted explicitly, which is how a tenant reclaims the quota slot a failed
/// provision occupies.
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, Copy, PartialEq, Eq)]
pub enum StoreStatus {
    Provisioning,
    Ready,
    Failed,
    Deleting,
    Deleted,
}

impl StoreStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreStatus::Provisioning => "Provisioning",
            StoreStatus::Ready => "Ready",
            StoreStatus::Failed => "Failed",
            StoreStatus::Deleting => "Deleting",
            StoreStatus::Deleted => "Deleted",
        }
    }

    pub fn parse(value: &str) -> Option<StoreStatus> {
        match value {
            "Provisioning" => Some(StoreStatus::Provisioning),
            "Ready" => Some(StoreStatus::Ready),
            "Failed" => Some(StoreStatus::Failed),
            "Deleting" => Some(StoreStatus::Deleting),
            "Deleted" => Some(StoreStatus::Deleted),
            _ => None,
        }
    }

    /// Whether a record in this status counts against tenant and global quota.
    pub fn counts_against_quota(&self) -> bool {
        !matches!(self, StoreStatus::Deleted)
    }
}

/// A provisioned workload instance owned by a tenant.
///
/// The `namespace` equals `id`, and `host` is `<id>.<dns-suffix>`; both are
/// derived at creation and never change. All timestamps carry millisecond
/// precision and serialize as ISO-8601 strings.
#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, PartialEq)]
pub struct Store {
    pub id: String,
    pub tenant_id: String,
    pub namespace: String,
    pub host: String,
    pub status: StoreStatus,
    /// Present iff `status` is `Failed`.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub failure_reason: Option<String>,
    #[serde(with = "iso_millis")]
    pub created_at: DateTime<Utc>,
    #[serde(
        with = "iso_millis_opt",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub provisioning_started_at: Option<DateTime<Utc>>,
    #[serde(
        with = "iso_millis_opt",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub ready_at: Option<DateTime<Utc>>,
    #[serde(
        with = "iso_millis_opt",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub deletion_started_at: Option<DateTime<Utc>>,
    #[serde(
        with = "iso_millis_opt",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Store {
    /// Build a fresh `Provisioning` record for a tenant.
    ///
    /// The identifier is `store-` plus eight lowercase hex characters; callers
    /// retry with a new record on the (unlikely) uniqueness collision.
    pub fn provisioning(tenant_id: &str, dns_suffix: &str, now: DateTime<Utc>) -> Store {
        let id = new_store_id();
        let host = format!("{id}.{dns_suffix}");
        Store {
            namespace: id.clone(),
            id,
            tenant_id: tenant_id.to_string(),
            host,
            status: StoreStatus::Provisioning,
            failure_reason: None,
            created_at: now,
            provisioning_started_at: Some(now),
            ready_at: None,
            deletion_started_at: None,
            deleted_at: None,
        }
    }
}

fn new_store_id() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("store-{}", &hex[..8])
}
