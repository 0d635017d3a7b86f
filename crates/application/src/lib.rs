//! Application services and ports.

#![forbid(unsafe_code)]

mod access_request_lifecycle;
mod access_request_reconciler;
mod conflict_retry;
mod dependency_index;
mod project_access_binder;
mod resource_ports;

#[cfg(test)]
mod test_support;

pub use access_request_lifecycle::AccessRequestLifecycle;
pub use access_request_reconciler::{AccessRequestReconciler, ReconcileOutcome, ReconcilerConfig};
pub use conflict_retry::{ConflictRetryPolicy, retry_on_conflict};
pub use dependency_index::DependencyIndex;
pub use project_access_binder::{BindingChange, ProjectAccessBinder, RolePruning};
pub use resource_ports::{
    AccessRequestRepository, Clock, ManagedApplicationRepository, PermissionDecision,
    PermissionGate, ProjectRepository, ReconcileQueue, ResourceChange, ResourceRepositories,
    RoleTemplateRepository,
};
