use jitaccess_core::{AppResult, ObjectKey};
use jitaccess_domain::{ACCESS_REQUEST_FINALIZER, AccessRequest, RenderedRole, RequestState};
use tracing::{debug, info};

use crate::conflict_retry::retry_on_conflict;

use super::AccessRequestReconciler;

impl AccessRequestReconciler {
    /// Keeps the cleanup finalizer in place and runs cleanup on deletion.
    ///
    /// Returns the request to keep reconciling, or `None` once it is gone or
    /// was finalized.
    pub(super) async fn reconcile_finalizer(
        &self,
        request: AccessRequest,
    ) -> AppResult<Option<AccessRequest>> {
        if request.metadata().is_marked_for_deletion() {
            if request.metadata().has_finalizer(ACCESS_REQUEST_FINALIZER) {
                self.finalize(&request).await?;
            }
            return Ok(None);
        }

        if request.metadata().has_finalizer(ACCESS_REQUEST_FINALIZER) {
            return Ok(Some(request));
        }

        let key = request.key().clone();
        let key_ref = &key;
        retry_on_conflict(
            self.config.conflict_retry,
            "add access request finalizer",
            move || self.try_add_finalizer(key_ref),
        )
        .await
    }

    async fn try_add_finalizer(&self, key: &ObjectKey) -> AppResult<Option<AccessRequest>> {
        let access_requests = &self.repositories.access_requests;
        let Some(mut request) = access_requests.find_access_request(key).await? else {
            return Ok(None);
        };
        if request.metadata().is_marked_for_deletion() {
            return Ok(None);
        }
        if !request.metadata_mut().add_finalizer(ACCESS_REQUEST_FINALIZER) {
            return Ok(Some(request));
        }

        let request = access_requests.update_access_request(request).await?;
        debug!(access_request = %key, "added cleanup finalizer");
        Ok(Some(request))
    }

    /// Revokes whatever the request may have granted, then releases it.
    ///
    /// The finalizer stays when revocation fails, so the deletion is retried.
    async fn finalize(&self, request: &AccessRequest) -> AppResult<()> {
        let may_hold_binding = matches!(
            request.request_state(),
            Some(RequestState::Requested | RequestState::Granted)
        );

        if may_hold_binding
            && let (Some(project_key), Some(role_name)) =
                (request.project_key(), request.status().role_name())
        {
            let refresh = self.render_for_cleanup(request).await;
            self.binder
                .revoke_access(
                    &project_key,
                    role_name,
                    &request.spec().subject.username,
                    refresh.as_ref(),
                    request.key(),
                )
                .await?;
        }

        let key = request.key().clone();
        let key_ref = &key;
        retry_on_conflict(
            self.config.conflict_retry,
            "remove access request finalizer",
            move || self.try_remove_finalizer(key_ref),
        )
        .await?;

        info!(access_request = %key, "access request finalized");
        Ok(())
    }

    async fn try_remove_finalizer(&self, key: &ObjectKey) -> AppResult<()> {
        let access_requests = &self.repositories.access_requests;
        let Some(mut request) = access_requests.find_access_request(key).await? else {
            return Ok(());
        };
        if !request
            .metadata_mut()
            .remove_finalizer(ACCESS_REQUEST_FINALIZER)
        {
            return Ok(());
        }

        access_requests.update_access_request(request).await?;
        Ok(())
    }

    async fn render_for_cleanup(&self, request: &AccessRequest) -> Option<RenderedRole> {
        match self.resolve(request).await {
            Ok((_, rendered)) => Some(rendered),
            Err(error) => {
                debug!(
                    access_request = %request.key(),
                    error = %error,
                    "cleanup proceeds without refreshing role policies"
                );
                None
            }
        }
    }
}
