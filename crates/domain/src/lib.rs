//! Domain entities and invariants.

#![forbid(unsafe_code)]

mod access_request;
mod managed_application;
mod project;
mod rendered_role;
mod role_template;

pub use access_request::{
    ACCESS_REQUEST_FINALIZER, AccessRequest, AccessRequestSpec, AccessRequestStatus,
    RequestState, StatusHistoryEntry, Subject, TargetApplication,
};
pub use managed_application::ManagedApplication;
pub use project::{Project, ProjectRole};
pub use rendered_role::RenderedRole;
pub use role_template::{RoleTemplate, RoleTemplateSpec};
