use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use jitaccess_core::{AppResult, ObjectKey};

/// Time source, injectable for deterministic tests.
pub trait Clock: Send + Sync {
    /// Returns the current UTC time.
    fn now(&self) -> DateTime<Utc>;
}

/// Work queue port feeding access request keys to reconcile workers.
#[async_trait]
pub trait ReconcileQueue: Send + Sync {
    /// Schedules the key for reconciliation as soon as possible.
    async fn enqueue(&self, key: ObjectKey) -> AppResult<()>;

    /// Schedules the key for reconciliation after `delay`.
    async fn enqueue_after(&self, key: ObjectKey, delay: Duration) -> AppResult<()>;
}
