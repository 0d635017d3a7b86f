use std::sync::Arc;

use jitaccess_core::{AppError, AppResult, ObjectKey};
use jitaccess_domain::{
    AccessRequest, AccessRequestStatus, ManagedApplication, RenderedRole, RequestState,
};
use tracing::{debug, info, warn};

use crate::conflict_retry::{ConflictRetryPolicy, retry_on_conflict};
use crate::{
    AccessRequestRepository, Clock, PermissionDecision, PermissionGate, ProjectAccessBinder,
};

/// Drives one access request through Requested, Granted, Denied and Expired.
///
/// Every status change is persisted before the next step runs, and a status
/// equal to the stored one is never written.
#[derive(Clone)]
pub struct AccessRequestLifecycle {
    access_requests: Arc<dyn AccessRequestRepository>,
    binder: ProjectAccessBinder,
    permission_gate: Arc<dyn PermissionGate>,
    clock: Arc<dyn Clock>,
    retry: ConflictRetryPolicy,
}

impl AccessRequestLifecycle {
    /// Creates a lifecycle service.
    #[must_use]
    pub fn new(
        access_requests: Arc<dyn AccessRequestRepository>,
        binder: ProjectAccessBinder,
        permission_gate: Arc<dyn PermissionGate>,
        clock: Arc<dyn Clock>,
        retry: ConflictRetryPolicy,
    ) -> Self {
        Self {
            access_requests,
            binder,
            permission_gate,
            clock,
            retry,
        }
    }

    /// Advances `request` one step given its resolved application and rendering.
    ///
    /// On return `request` holds the stored copy, and the resulting state is
    /// reported. Expiry is checked before anything else, so a lapsed grant is
    /// revoked even when the template no longer renders the bound role.
    pub async fn advance(
        &self,
        request: &mut AccessRequest,
        application: &ManagedApplication,
        rendered: &RenderedRole,
    ) -> AppResult<RequestState> {
        let fingerprint = rendered.fingerprint();

        if request.request_state().is_none() {
            let before = request.status().clone();
            request.initialize_status(
                application.project(),
                rendered.role_name(),
                &fingerprint,
                self.clock.now(),
            );
            self.persist_status(request, &before).await?;
            info!(
                access_request = %request.key(),
                role_name = rendered.role_name(),
                "access request initialized"
            );
        }

        if self.expire_if_due(request, Some(rendered)).await? {
            return Ok(RequestState::Expired);
        }

        let (project_key, role_name) = binding_target(request)?;
        let subject = request.spec().subject.username.clone();

        let state = request
            .request_state()
            .ok_or_else(|| AppError::Internal(format!("'{}' lost its state", request.key())))?;
        if state.is_concluded() {
            debug!(access_request = %request.key(), state = %state, "access request concluded");
            return Ok(state);
        }

        let role_name = if rendered.role_name() == role_name {
            role_name
        } else if state == RequestState::Requested {
            self.retarget(request, &project_key, &role_name, rendered, &fingerprint)
                .await?;
            rendered.role_name().to_owned()
        } else {
            return Err(AppError::Render(format!(
                "role template '{}' now renders role '{}' but access request '{}' is bound to '{role_name}'",
                request.role_template_key(),
                rendered.role_name(),
                request.key()
            )));
        };

        match state {
            RequestState::Requested => {
                self.decide(
                    request,
                    application,
                    rendered,
                    &project_key,
                    &role_name,
                    &fingerprint,
                )
                .await
            }
            _ => {
                self.binder
                    .grant_access(&project_key, rendered, &subject)
                    .await?;
                let before = request.status().clone();
                if request.refresh_role_template_hash(&fingerprint) {
                    self.persist_status(request, &before).await?;
                    info!(
                        access_request = %request.key(),
                        "granted role converged to updated template"
                    );
                }
                Ok(RequestState::Granted)
            }
        }
    }

    /// Revokes and concludes a Granted request whose expiry has passed.
    ///
    /// Usable without a rendering, e.g. when the template was deleted; the
    /// role's policies are converged only when `refresh` renders the bound
    /// role. Returns true when the request is now Expired.
    pub async fn expire_if_due(
        &self,
        request: &mut AccessRequest,
        refresh: Option<&RenderedRole>,
    ) -> AppResult<bool> {
        let now = self.clock.now();
        if !request.is_expired_at(now) {
            return Ok(false);
        }

        let (project_key, role_name) = binding_target(request)?;
        let subject = request.spec().subject.username.clone();
        let refresh = refresh.filter(|rendered| rendered.role_name() == role_name);
        self.binder
            .revoke_access(&project_key, &role_name, &subject, refresh, request.key())
            .await?;

        let before = request.status().clone();
        request.mark_expired(now)?;
        self.persist_status(request, &before).await?;
        info!(access_request = %request.key(), subject = %subject, "access expired and revoked");
        Ok(true)
    }

    async fn decide(
        &self,
        request: &mut AccessRequest,
        application: &ManagedApplication,
        rendered: &RenderedRole,
        project_key: &ObjectKey,
        role_name: &str,
        fingerprint: &str,
    ) -> AppResult<RequestState> {
        let subject = request.spec().subject.username.clone();
        let decision = self
            .permission_gate
            .check(&subject, rendered, application)
            .await?;

        let before = request.status().clone();
        match decision {
            PermissionDecision::Deny { reason } => {
                // An earlier pass may have bound the subject without recording it.
                self.release_unrecorded_binding(request, project_key, role_name, &subject)
                    .await?;
                request.mark_denied(self.clock.now(), Some(reason.clone()))?;
                self.persist_status(request, &before).await?;
                info!(
                    access_request = %request.key(),
                    subject = %subject,
                    reason = %reason,
                    "access denied"
                );
                Ok(RequestState::Denied)
            }
            PermissionDecision::Allow => {
                self.binder
                    .grant_access(project_key, rendered, &subject)
                    .await?;
                request.mark_granted(self.clock.now(), fingerprint)?;
                if let Err(error) = self.persist_status(request, &before).await {
                    self.compensate_grant(request.key(), project_key, role_name, &subject)
                        .await;
                    return Err(error);
                }
                info!(
                    access_request = %request.key(),
                    subject = %subject,
                    expires_at = ?request.status().expires_at(),
                    "access granted"
                );
                Ok(RequestState::Granted)
            }
        }
    }

    /// Moves a Requested request onto the role the template renders now.
    async fn retarget(
        &self,
        request: &mut AccessRequest,
        project_key: &ObjectKey,
        previous_role: &str,
        rendered: &RenderedRole,
        fingerprint: &str,
    ) -> AppResult<()> {
        let subject = request.spec().subject.username.clone();
        self.release_unrecorded_binding(request, project_key, previous_role, &subject)
            .await?;

        let before = request.status().clone();
        if request.retarget_role(rendered.role_name(), fingerprint)? {
            self.persist_status(request, &before).await?;
            info!(
                access_request = %request.key(),
                previous_role,
                role_name = rendered.role_name(),
                "pending access request follows renamed role"
            );
        }
        Ok(())
    }

    /// Revokes a membership a Requested request holds without having recorded
    /// a grant. Reads only when the subject is not bound.
    async fn release_unrecorded_binding(
        &self,
        request: &AccessRequest,
        project_key: &ObjectKey,
        role_name: &str,
        subject: &str,
    ) -> AppResult<()> {
        if !self.binder.is_bound(project_key, role_name, subject).await? {
            return Ok(());
        }

        warn!(
            access_request = %request.key(),
            subject,
            role_name,
            "releasing binding left by an unrecorded grant"
        );
        self.binder
            .revoke_access(project_key, role_name, subject, None, request.key())
            .await?;
        Ok(())
    }

    /// Best-effort undo of a grant whose Granted status could not be stored.
    async fn compensate_grant(
        &self,
        request_key: &ObjectKey,
        project_key: &ObjectKey,
        role_name: &str,
        subject: &str,
    ) {
        match self
            .binder
            .revoke_access(project_key, role_name, subject, None, request_key)
            .await
        {
            Ok(_) => warn!(
                access_request = %request_key,
                subject,
                "grant rolled back after status write failed"
            ),
            Err(error) => warn!(
                access_request = %request_key,
                subject,
                error = %error,
                "failed to roll back grant; the next decision releases it"
            ),
        }
    }

    /// Writes the in-memory status onto the freshest stored copy.
    ///
    /// Fails with a conflict when someone else moved the stored status away
    /// from `expected`.
    async fn persist_status(
        &self,
        request: &mut AccessRequest,
        expected: &AccessRequestStatus,
    ) -> AppResult<()> {
        let key = request.key().clone();
        let desired = request.status().clone();
        let (key_ref, desired_ref) = (&key, &desired);

        let stored = retry_on_conflict(self.retry, "persist access request status", move || {
            self.try_persist_status(key_ref, expected, desired_ref)
        })
        .await?;

        *request = stored;
        Ok(())
    }

    async fn try_persist_status(
        &self,
        key: &ObjectKey,
        expected: &AccessRequestStatus,
        desired: &AccessRequestStatus,
    ) -> AppResult<AccessRequest> {
        let mut stored = self
            .access_requests
            .find_access_request(key)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("access request '{key}'")))?;

        if stored.status() == desired {
            return Ok(stored);
        }
        if stored.status() != expected {
            return Err(AppError::Conflict(format!(
                "status of access request '{key}' changed concurrently"
            )));
        }

        stored.replace_status(desired.clone());
        self.access_requests.update_access_request(stored).await
    }
}

fn binding_target(request: &AccessRequest) -> AppResult<(ObjectKey, String)> {
    let project_key = request.project_key();
    let role_name = request.status().role_name().map(str::to_owned);
    match (project_key, role_name) {
        (Some(project_key), Some(role_name)) => Ok((project_key, role_name)),
        _ => Err(AppError::Internal(format!(
            "access request '{}' has a state but no resolved binding",
            request.key()
        ))),
    }
}
