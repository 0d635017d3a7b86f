//! Just-in-time access request controller.

#![forbid(unsafe_code)]

mod controller_config;
mod controller_runtime;
mod seed;

use std::sync::Arc;

use jitaccess_application::{AccessRequestReconciler, Clock, PermissionGate, ResourceRepositories};
use jitaccess_core::{AppError, AppResult};
use jitaccess_infrastructure::{
    HttpPermissionGate, InMemoryReconcileQueue, InMemoryResourceStore, StaticPermissionGate,
    SystemClock,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::controller_config::{ControllerConfig, PermissionGateConfig, init_tracing};
use crate::controller_runtime::ControllerRuntime;
use crate::seed::SeedDocument;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = ControllerConfig::load()?;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = Arc::new(InMemoryResourceStore::new(clock.clone()));
    let repositories = ResourceRepositories::from_store(store.clone());

    if let Some(seed_file) = config.seed_file.as_deref() {
        SeedDocument::read(seed_file)?.apply(&repositories).await?;
    }

    let permission_gate = build_permission_gate(&config.permission_gate)?;
    let reconciler = AccessRequestReconciler::new(
        repositories,
        permission_gate,
        clock,
        config.reconciler_config(),
    );
    let queue = Arc::new(InMemoryReconcileQueue::new(config.queue_backoff()));

    info!(
        worker_count = config.worker_count,
        reconcile_timeout_seconds = config.reconcile_timeout.as_secs(),
        requeue_interval_seconds = config.requeue_interval.as_secs(),
        role_pruning = config.role_pruning.as_str(),
        "jitaccess-controller started"
    );

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_on_signal(cancel.clone()));

    ControllerRuntime::new(
        store,
        queue,
        reconciler,
        config.worker_count,
        config.reconcile_timeout,
    )
    .run(cancel)
    .await?;

    info!("jitaccess-controller stopped");
    Ok(())
}

fn build_permission_gate(config: &PermissionGateConfig) -> AppResult<Arc<dyn PermissionGate>> {
    match config {
        PermissionGateConfig::Static { denied_subjects } => {
            info!(denied_subjects = denied_subjects.len(), "using static permission gate");
            Ok(Arc::new(StaticPermissionGate::new(
                denied_subjects.iter().cloned(),
            )))
        }
        PermissionGateConfig::Http { url, timeout } => {
            let http_client = reqwest::Client::builder()
                .timeout(*timeout)
                .build()
                .map_err(|error| {
                    AppError::Internal(format!("failed to build HTTP client: {error}"))
                })?;
            info!(endpoint = %url, "using HTTP permission gate");
            Ok(Arc::new(HttpPermissionGate::new(http_client, url.as_str())))
        }
    }
}

async fn shutdown_on_signal(cancel: CancellationToken) {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(error = %error, "failed to listen for shutdown signal");
        return;
    }
    info!("shutdown signal received");
    cancel.cancel();
}
