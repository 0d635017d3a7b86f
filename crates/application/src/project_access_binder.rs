use std::str::FromStr;
use std::sync::Arc;

use jitaccess_core::{AppError, AppResult, ObjectKey};
use jitaccess_domain::{AccessRequest, RenderedRole, RequestState};
use tracing::{debug, info};

use crate::conflict_retry::{ConflictRetryPolicy, retry_on_conflict};
use crate::{AccessRequestRepository, ProjectRepository};


/// Effect of a binder call on the stored project.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingChange {
    /// Project already matched the desired binding; nothing was written.
    Unchanged,
    /// Role list was rewritten.
    Updated,
    /// Role became unreferenced and was deleted.
    RoleRemoved,
}

/// What happens to a rendered role whose last member was removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RolePruning {
    /// Keep the role with an empty member list.
    #[default]
    Retain,
    /// Delete the role once no member and no active request references it.
    WhenUnreferenced,
}

impl RolePruning {
    /// Returns the configuration label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Retain => "retain",
            Self::WhenUnreferenced => "when_unreferenced",
        }
    }
}

impl FromStr for RolePruning {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "retain" => Ok(Self::Retain),
            "when_unreferenced" => Ok(Self::WhenUnreferenced),
            other => Err(AppError::Validation(format!(
                "unknown role pruning mode '{other}'"
            ))),
        }
    }
}

/// Applies and removes subject bindings on project roles.
///
/// Every write is a read-modify-write guarded by the project's resource
/// version and repeated on conflict, so concurrent binders never drop each
/// other's changes.
#[derive(Clone)]
pub struct ProjectAccessBinder {
    projects: Arc<dyn ProjectRepository>,
    access_requests: Arc<dyn AccessRequestRepository>,
    retry: ConflictRetryPolicy,
    pruning: RolePruning,
}

impl ProjectAccessBinder {
    /// Creates a binder.
    #[must_use]
    pub fn new(
        projects: Arc<dyn ProjectRepository>,
        access_requests: Arc<dyn AccessRequestRepository>,
        retry: ConflictRetryPolicy,
        pruning: RolePruning,
    ) -> Self {
        Self {
            projects,
            access_requests,
            retry,
            pruning,
        }
    }

    /// Ensures the rendered role exists with current policies and lists `subject`.
    pub async fn grant_access(
        &self,
        project: &ObjectKey,
        rendered: &RenderedRole,
        subject: &str,
    ) -> AppResult<BindingChange> {
        let change = retry_on_conflict(self.retry, "grant project access", move || {
            self.try_grant_access(project, rendered, subject)
        })
        .await?;

        if change == BindingChange::Updated {
            info!(
                project = %project,
                role_name = rendered.role_name(),
                subject,
                "granted project role membership"
            );
        }
        Ok(change)
    }

    /// Removes `subject` from `role_name`.
    ///
    /// When `refresh` is given the role's policies are converged to it in the
    /// same write. A missing project or role means there is nothing to revoke.
    pub async fn revoke_access(
        &self,
        project: &ObjectKey,
        role_name: &str,
        subject: &str,
        refresh: Option<&RenderedRole>,
        requested_by: &ObjectKey,
    ) -> AppResult<BindingChange> {
        let change = retry_on_conflict(self.retry, "revoke project access", move || {
            self.try_revoke_access(project, role_name, subject, refresh, requested_by)
        })
        .await?;

        match change {
            BindingChange::Unchanged => {
                debug!(project = %project, role_name, subject, "nothing to revoke");
            }
            BindingChange::Updated => {
                info!(project = %project, role_name, subject, "revoked project role membership");
            }
            BindingChange::RoleRemoved => {
                info!(project = %project, role_name, subject, "removed unreferenced project role");
            }
        }
        Ok(change)
    }

    /// Returns whether `subject` is currently listed on `role_name`.
    ///
    /// Read-only; a missing project or role counts as not bound.
    pub async fn is_bound(
        &self,
        project: &ObjectKey,
        role_name: &str,
        subject: &str,
    ) -> AppResult<bool> {
        Ok(self
            .projects
            .find_project(project)
            .await?
            .is_some_and(|project| project.has_member(role_name, subject)))
    }

    async fn try_grant_access(
        &self,
        project_key: &ObjectKey,
        rendered: &RenderedRole,
        subject: &str,
    ) -> AppResult<BindingChange> {
        let mut project = self
            .projects
            .find_project(project_key)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("project '{project_key}'")))?;

        if !project.bind_subject(rendered, subject) {
            return Ok(BindingChange::Unchanged);
        }

        self.projects.update_project(project).await?;
        Ok(BindingChange::Updated)
    }

    async fn try_revoke_access(
        &self,
        project_key: &ObjectKey,
        role_name: &str,
        subject: &str,
        refresh: Option<&RenderedRole>,
        requested_by: &ObjectKey,
    ) -> AppResult<BindingChange> {
        let Some(mut project) = self.projects.find_project(project_key).await? else {
            return Ok(BindingChange::Unchanged);
        };

        let others = self
            .other_active_requests(project_key, role_name, requested_by)
            .await?;
        let still_entitled = others.iter().any(|request| {
            request.request_state() == Some(RequestState::Granted)
                && request.spec().subject.username == subject
        });

        let mut changed = !still_entitled && project.unbind_subject(role_name, subject);
        if let Some(rendered) = refresh.filter(|rendered| rendered.role_name() == role_name) {
            changed |= project.converge_role_policies(rendered);
        }

        let mut removed = false;
        if self.pruning == RolePruning::WhenUnreferenced
            && others.is_empty()
            && project
                .role(role_name)
                .is_some_and(|role| role.groups.is_empty())
        {
            removed = project.remove_role(role_name);
        }

        if !changed && !removed {
            return Ok(BindingChange::Unchanged);
        }

        self.projects.update_project(project).await?;
        Ok(if removed {
            BindingChange::RoleRemoved
        } else {
            BindingChange::Updated
        })
    }

    /// Lists unconcluded requests other than `requested_by` bound to the role.
    async fn other_active_requests(
        &self,
        project_key: &ObjectKey,
        role_name: &str,
        requested_by: &ObjectKey,
    ) -> AppResult<Vec<AccessRequest>> {
        let requests = self
            .access_requests
            .list_access_requests_by_project(project_key)
            .await?;

        Ok(requests
            .into_iter()
            .filter(|request| {
                request.key() != requested_by
                    && !request.is_concluded()
                    && request.status().role_name() == Some(role_name)
            })
            .collect())
    }
}
