use std::sync::Arc;
use std::time::Duration;

use jitaccess_core::{AppError, AppResult, ObjectKey};
use jitaccess_domain::{AccessRequest, ManagedApplication, RenderedRole, RequestState};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::conflict_retry::ConflictRetryPolicy;
use crate::{
    AccessRequestLifecycle, Clock, PermissionGate, ProjectAccessBinder, ResourceRepositories,
    RolePruning,
};

mod finalizer;


/// Scheduling hint returned by one reconcile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Nothing left to do until something changes.
    Done,
    /// Reconcile again after the delay.
    RequeueAfter(Duration),
}

/// Tunables for the access request reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilerConfig {
    /// Delay before re-checking a request still awaiting a decision.
    pub requeue_interval: Duration,
    /// Retry bounds for read-modify-write transactions.
    pub conflict_retry: ConflictRetryPolicy,
    /// Treatment of rendered roles left without members.
    pub role_pruning: RolePruning,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            requeue_interval: Duration::from_secs(180),
            conflict_retry: ConflictRetryPolicy::default(),
            role_pruning: RolePruning::default(),
        }
    }
}

/// Reconciles one access request key against the store.
#[derive(Clone)]
pub struct AccessRequestReconciler {
    repositories: ResourceRepositories,
    lifecycle: AccessRequestLifecycle,
    binder: ProjectAccessBinder,
    clock: Arc<dyn Clock>,
    config: ReconcilerConfig,
}

impl AccessRequestReconciler {
    /// Creates a reconciler wired to the given ports.
    #[must_use]
    pub fn new(
        repositories: ResourceRepositories,
        permission_gate: Arc<dyn PermissionGate>,
        clock: Arc<dyn Clock>,
        config: ReconcilerConfig,
    ) -> Self {
        let binder = ProjectAccessBinder::new(
            repositories.projects.clone(),
            repositories.access_requests.clone(),
            config.conflict_retry,
            config.role_pruning,
        );
        let lifecycle = AccessRequestLifecycle::new(
            repositories.access_requests.clone(),
            binder.clone(),
            permission_gate,
            clock.clone(),
            config.conflict_retry,
        );

        Self {
            repositories,
            lifecycle,
            binder,
            clock,
            config,
        }
    }

    /// Reconciles the request stored under `key`.
    ///
    /// A missing request is not an error. Cancellation abandons the pass
    /// between store writes and reports `AppError::Cancelled`.
    pub async fn reconcile(
        &self,
        key: &ObjectKey,
        cancel: &CancellationToken,
    ) -> AppResult<ReconcileOutcome> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(AppError::Cancelled(format!(
                "reconcile of access request '{key}'"
            ))),
            result = self.reconcile_access_request(key) => result,
        }
    }

    async fn reconcile_access_request(&self, key: &ObjectKey) -> AppResult<ReconcileOutcome> {
        let Some(request) = self
            .repositories
            .access_requests
            .find_access_request(key)
            .await?
        else {
            debug!(access_request = %key, "access request no longer exists");
            return Ok(ReconcileOutcome::Done);
        };

        let Some(mut request) = self.reconcile_finalizer(request).await? else {
            return Ok(ReconcileOutcome::Done);
        };

        request.validate()?;

        let (application, rendered) = match self.resolve(&request).await {
            Ok(resolved) => resolved,
            Err(error) => {
                if self.lifecycle.expire_if_due(&mut request, None).await? {
                    warn!(
                        access_request = %key,
                        error = %error,
                        "expired access request whose references no longer resolve"
                    );
                    return Ok(ReconcileOutcome::Done);
                }
                return Err(error);
            }
        };

        let state = self
            .lifecycle
            .advance(&mut request, &application, &rendered)
            .await?;
        let outcome = self.outcome_for(state, &request);

        info!(
            access_request = %key,
            state = %state,
            outcome = ?outcome,
            "reconciled access request"
        );
        Ok(outcome)
    }

    /// Loads the application and template and renders the role for this request.
    ///
    /// Once a project was recorded on the request it keeps being used, even if
    /// the application moved since.
    async fn resolve(
        &self,
        request: &AccessRequest,
    ) -> AppResult<(ManagedApplication, RenderedRole)> {
        let application_key = request.spec().application.key();
        let application = self
            .repositories
            .applications
            .find_application(&application_key)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "managed application '{application_key}' referenced by access request '{}'",
                    request.key()
                ))
            })?;

        let template_key = request.role_template_key();
        let template = self
            .repositories
            .role_templates
            .find_role_template(&template_key)
            .await?
            .ok_or_else(|| {
                AppError::NotFound(format!(
                    "role template '{template_key}' referenced by access request '{}'",
                    request.key()
                ))
            })?;

        let project = request
            .status()
            .target_project()
            .unwrap_or(application.project());
        let rendered = template.render(project, application.name(), application.namespace())?;
        Ok((application, rendered))
    }

    fn outcome_for(&self, state: RequestState, request: &AccessRequest) -> ReconcileOutcome {
        match state {
            RequestState::Requested => ReconcileOutcome::RequeueAfter(self.config.requeue_interval),
            RequestState::Granted => match request.status().expires_at() {
                Some(expires_at) => ReconcileOutcome::RequeueAfter(
                    (expires_at - self.clock.now())
                        .to_std()
                        .unwrap_or(Duration::ZERO),
                ),
                None => ReconcileOutcome::RequeueAfter(self.config.requeue_interval),
            },
            RequestState::Denied | RequestState::Expired => ReconcileOutcome::Done,
        }
    }
}
