use std::sync::Arc;
use std::time::Duration;

use jitaccess_application::{
    AccessRequestReconciler, DependencyIndex, ReconcileOutcome, ReconcileQueue, ResourceChange,
};
use jitaccess_core::{AppError, AppResult, ObjectKey};
use jitaccess_infrastructure::{InMemoryReconcileQueue, InMemoryResourceStore};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Running controller: one change router plus a pool of reconcile workers.
pub struct ControllerRuntime {
    store: Arc<InMemoryResourceStore>,
    queue: Arc<InMemoryReconcileQueue>,
    reconciler: AccessRequestReconciler,
    worker_count: usize,
    reconcile_timeout: Duration,
}

impl ControllerRuntime {
    pub fn new(
        store: Arc<InMemoryResourceStore>,
        queue: Arc<InMemoryReconcileQueue>,
        reconciler: AccessRequestReconciler,
        worker_count: usize,
        reconcile_timeout: Duration,
    ) -> Self {
        Self {
            store,
            queue,
            reconciler,
            worker_count,
            reconcile_timeout,
        }
    }

    /// Runs until `cancel` fires and every task has stopped.
    pub async fn run(self, cancel: CancellationToken) -> AppResult<()> {
        // Subscribe first: writes during the initial sweep must still be routed.
        let changes = self.store.subscribe();
        let index = DependencyIndex::new(self.store.clone(), self.queue.clone());
        enqueue_all(&self.store, self.queue.as_ref()).await?;

        let mut tasks = JoinSet::new();
        tasks.spawn(route_changes(
            changes,
            index,
            self.store.clone(),
            self.queue.clone(),
            cancel.clone(),
        ));
        for worker_id in 0..self.worker_count {
            tasks.spawn(run_worker(
                worker_id,
                self.queue.clone(),
                self.reconciler.clone(),
                self.reconcile_timeout,
                cancel.clone(),
            ));
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(error) = joined {
                warn!(error = %error, "controller task ended abnormally");
            }
        }
        Ok(())
    }
}

async fn enqueue_all(store: &InMemoryResourceStore, queue: &dyn ReconcileQueue) -> AppResult<()> {
    let keys = store.access_request_keys().await;
    let count = keys.len();
    for key in keys {
        queue.enqueue(key).await?;
    }
    debug!(count, "enqueued every stored access request");
    Ok(())
}

async fn route_changes(
    mut changes: broadcast::Receiver<ResourceChange>,
    index: DependencyIndex,
    store: Arc<InMemoryResourceStore>,
    queue: Arc<InMemoryReconcileQueue>,
    cancel: CancellationToken,
) {
    loop {
        let received = tokio::select! {
            () = cancel.cancelled() => break,
            received = changes.recv() => received,
        };

        match received {
            Ok(change) => {
                if let Err(error) = index.route_change(&change).await {
                    warn!(
                        kind = change.kind(),
                        resource = %change.key(),
                        error = %error,
                        "failed to route resource change"
                    );
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "change feed lagged; resynchronizing every request");
                if let Err(error) = enqueue_all(&store, queue.as_ref()).await {
                    warn!(error = %error, "failed to resynchronize access requests");
                }
            }
            Err(RecvError::Closed) => break,
        }
    }
}

async fn run_worker(
    worker_id: usize,
    queue: Arc<InMemoryReconcileQueue>,
    reconciler: AccessRequestReconciler,
    reconcile_timeout: Duration,
    cancel: CancellationToken,
) {
    debug!(worker_id, "reconcile worker started");

    while let Some(key) = queue.next(&cancel).await {
        let result = reconcile_with_timeout(&reconciler, &key, reconcile_timeout, &cancel).await;

        match result {
            Ok(ReconcileOutcome::Done) => queue.forget(&key).await,
            Ok(ReconcileOutcome::RequeueAfter(delay)) => {
                queue.forget(&key).await;
                if let Err(error) = queue.enqueue_after(key.clone(), delay).await {
                    warn!(request = %key, error = %error, "failed to requeue access request");
                }
            }
            Err(error) if cancel.is_cancelled() => {
                debug!(request = %key, error = %error, "reconcile abandoned on shutdown");
            }
            Err(error) => {
                let delay = queue.retry_later(key.clone()).await;
                warn!(
                    worker_id,
                    request = %key,
                    retryable = error.is_retryable(),
                    retry_in_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %error,
                    "access request reconcile failed"
                );
            }
        }

        queue.done(&key).await;
    }

    debug!(worker_id, "reconcile worker stopped");
}

async fn reconcile_with_timeout(
    reconciler: &AccessRequestReconciler,
    key: &ObjectKey,
    reconcile_timeout: Duration,
    cancel: &CancellationToken,
) -> AppResult<ReconcileOutcome> {
    let attempt = cancel.child_token();

    match tokio::time::timeout(reconcile_timeout, reconciler.reconcile(key, &attempt)).await {
        Ok(result) => result,
        Err(_) => {
            attempt.cancel();
            Err(AppError::Cancelled(format!(
                "reconcile of access request '{key}' exceeded {}s",
                reconcile_timeout.as_secs()
            )))
        }
    }
}
