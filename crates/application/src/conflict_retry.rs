use std::future::Future;
use std::time::Duration;

use jitaccess_core::{AppError, AppResult};
use tracing::debug;

/// Bounds for repeating a read-modify-write transaction that lost a race.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConflictRetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Pause between attempts.
    pub backoff: Duration,
}

impl Default for ConflictRetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: Duration::from_millis(10),
        }
    }
}

/// Runs `transaction` until it succeeds, fails with a non-conflict error, or
/// the attempt budget is spent.
///
/// Each attempt must re-read its inputs; the last conflict is returned when
/// every attempt lost.
pub async fn retry_on_conflict<T, F, Fut>(
    policy: ConflictRetryPolicy,
    operation: &str,
    mut transaction: F,
) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match transaction().await {
            Err(AppError::Conflict(message)) if attempt < max_attempts => {
                debug!(operation, attempt, %message, "retrying after write conflict");
                attempt += 1;
                if !policy.backoff.is_zero() {
                    tokio::time::sleep(policy.backoff).await;
                }
            }
            result => return result,
        }
    }
}
