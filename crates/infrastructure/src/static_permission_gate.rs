use std::collections::BTreeSet;

use async_trait::async_trait;
use jitaccess_application::{PermissionDecision, PermissionGate};
use jitaccess_core::AppResult;
use jitaccess_domain::{ManagedApplication, RenderedRole};

/// Gate allowing every subject except those on a fixed deny list.
#[derive(Debug, Clone, Default)]
pub struct StaticPermissionGate {
    denied_subjects: BTreeSet<String>,
}

impl StaticPermissionGate {
    /// Creates a gate denying the listed subjects.
    #[must_use]
    pub fn new<I, S>(denied_subjects: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            denied_subjects: denied_subjects
                .into_iter()
                .map(Into::into)
                .filter(|subject: &String| !subject.trim().is_empty())
                .collect(),
        }
    }

    /// Creates a gate allowing everyone.
    #[must_use]
    pub fn allow_all() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PermissionGate for StaticPermissionGate {
    async fn check(
        &self,
        subject: &str,
        role: &RenderedRole,
        _application: &ManagedApplication,
    ) -> AppResult<PermissionDecision> {
        if self.denied_subjects.contains(subject) {
            return Ok(PermissionDecision::Deny {
                reason: format!(
                    "subject '{subject}' may not receive role '{}'",
                    role.role_name()
                ),
            });
        }

        Ok(PermissionDecision::Allow)
    }
}
