mod changes;
mod permission_gate;
mod repositories;
mod runtime;

pub use changes::ResourceChange;
pub use permission_gate::{PermissionDecision, PermissionGate};
pub use repositories::{
    AccessRequestRepository, ManagedApplicationRepository, ProjectRepository,
    ResourceRepositories, RoleTemplateRepository,
};
pub use runtime::{Clock, ReconcileQueue};
