//! Quota and rate admission predicates.
//!
//! # Purpose
//! Pure, ordered checks shared by every store backend. Each backend gathers
//! its counts under its own atomicity mechanism (a transaction in Postgres,
//! a single lock in memory) and asks this module for a decision, so the two
//! backends cannot drift on admission semantics.
//!
//! Idempotent replay is not decided here: backends resolve replay before
//! counting, because a replayed request must not consume any budget.
use crate::store::{QuotaLimits, QuotaScope, StoreError};
use chrono::{DateTime, Duration, Utc};

/// Counts observed by a backend at admission time.
#[derive(Debug, Clone, Copy)]
pub struct GateInputs {
    pub global_active: i64,
    pub tenant_active: i64,
    pub rate_in_window: i64,
    pub oldest_in_window: Option<DateTime<Utc>>,
}

/// Ordered admission decision: global cap, tenant cap, then rate window.
pub fn admit(
    inputs: &GateInputs,
    limits: &QuotaLimits,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    if inputs.global_active >= limits.max_stores_global {
        return Err(StoreError::QuotaExceeded {
            scope: QuotaScope::Global,
        });
    }
    if inputs.tenant_active >= limits.max_stores_per_tenant {
        return Err(StoreError::QuotaExceeded {
            scope: QuotaScope::Tenant,
        });
    }
    if inputs.rate_in_window >= limits.max_stores_per_hour {
        return Err(StoreError::RateLimited {
            retry_after_seconds: retry_after_seconds(
                inputs.oldest_in_window,
                limits.rate_window,
                now,
            ),
        });
    }
    Ok(())
}

/// Seconds until the oldest in-window create leaves the window, rounded up,
/// never below one.
pub fn retry_after_seconds(
    oldest_in_window: Option<DateTime<Utc>>,
    window: Duration,
    now: DateTime<Utc>,
) -> i64 {
    let Some(oldest) = oldest_in_window else {
        return 1;
    };
    let millis = (oldest + window - now).num_milliseconds();
    ((millis + 999) / 1000).max(1)
}
