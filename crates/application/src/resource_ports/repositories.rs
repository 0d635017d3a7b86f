use std::sync::Arc;

use async_trait::async_trait;

use jitaccess_core::{AppResult, ObjectKey};
use jitaccess_domain::{AccessRequest, ManagedApplication, Project, RoleTemplate};

/// Repository port for access requests and their secondary indexes.
///
/// `update_access_request` must fail with `AppError::Conflict` when the
/// stored resource version differs from the one carried by the object.
#[async_trait]
pub trait AccessRequestRepository: Send + Sync {
    /// Returns one access request by key.
    async fn find_access_request(&self, key: &ObjectKey) -> AppResult<Option<AccessRequest>>;

    /// Lists requests in the template's namespace referencing the template name.
    async fn list_access_requests_by_role_template(
        &self,
        role_template: &ObjectKey,
    ) -> AppResult<Vec<AccessRequest>>;

    /// Lists requests in the project's namespace resolved to the project name.
    async fn list_access_requests_by_project(
        &self,
        project: &ObjectKey,
    ) -> AppResult<Vec<AccessRequest>>;

    /// Persists a new access request.
    async fn create_access_request(&self, request: AccessRequest) -> AppResult<AccessRequest>;

    /// Writes an access request guarded by its resource version.
    async fn update_access_request(&self, request: AccessRequest) -> AppResult<AccessRequest>;

    /// Requests deletion; objects with finalizers are only marked.
    async fn delete_access_request(&self, key: &ObjectKey) -> AppResult<()>;
}

/// Repository port for role templates.
#[async_trait]
pub trait RoleTemplateRepository: Send + Sync {
    /// Returns one role template by key.
    async fn find_role_template(&self, key: &ObjectKey) -> AppResult<Option<RoleTemplate>>;

    /// Persists a new role template.
    async fn create_role_template(&self, template: RoleTemplate) -> AppResult<RoleTemplate>;

    /// Writes a role template guarded by its resource version.
    async fn update_role_template(&self, template: RoleTemplate) -> AppResult<RoleTemplate>;
}

/// Repository port for managed applications.
#[async_trait]
pub trait ManagedApplicationRepository: Send + Sync {
    /// Returns one application by key.
    async fn find_application(&self, key: &ObjectKey) -> AppResult<Option<ManagedApplication>>;

    /// Persists a new application.
    async fn create_application(
        &self,
        application: ManagedApplication,
    ) -> AppResult<ManagedApplication>;
}

/// Repository port for projects.
#[async_trait]
pub trait ProjectRepository: Send + Sync {
    /// Returns one project by key.
    async fn find_project(&self, key: &ObjectKey) -> AppResult<Option<Project>>;

    /// Persists a new project.
    async fn create_project(&self, project: Project) -> AppResult<Project>;

    /// Writes a project guarded by its resource version.
    async fn update_project(&self, project: Project) -> AppResult<Project>;
}

/// Bundle of repository ports shared by the controller services.
#[derive(Clone)]
pub struct ResourceRepositories {
    /// Access request repository.
    pub access_requests: Arc<dyn AccessRequestRepository>,
    /// Role template repository.
    pub role_templates: Arc<dyn RoleTemplateRepository>,
    /// Managed application repository.
    pub applications: Arc<dyn ManagedApplicationRepository>,
    /// Project repository.
    pub projects: Arc<dyn ProjectRepository>,
}

impl ResourceRepositories {
    /// Builds the bundle from one adapter implementing every port.
    #[must_use]
    pub fn from_store<S>(store: Arc<S>) -> Self
    where
        S: AccessRequestRepository
            + RoleTemplateRepository
            + ManagedApplicationRepository
            + ProjectRepository
            + 'static,
    {
        Self {
            access_requests: store.clone(),
            role_templates: store.clone(),
            applications: store.clone(),
            projects: store,
        }
    }
}
