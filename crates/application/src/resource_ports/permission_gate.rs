use async_trait::async_trait;

use jitaccess_core::AppResult;
use jitaccess_domain::{ManagedApplication, RenderedRole};

/// Decision returned by the permission gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionDecision {
    /// Subject may receive the role.
    Allow,
    /// Subject may not receive the role.
    Deny {
        /// Reason recorded in the request history.
        reason: String,
    },
}

/// Port answering whether a subject may be bound to a role on an application.
///
/// Failures to reach a decision are reported as `AppError::PermissionGate`.
#[async_trait]
pub trait PermissionGate: Send + Sync {
    /// Checks one subject against one rendered role.
    async fn check(
        &self,
        subject: &str,
        role: &RenderedRole,
        application: &ManagedApplication,
    ) -> AppResult<PermissionDecision>;
}
