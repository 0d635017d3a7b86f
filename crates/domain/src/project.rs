use jitaccess_core::{ObjectKey, ObjectMeta};
use serde::{Deserialize, Serialize};

use crate::RenderedRole;

/// One role entry of a project's access-control policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectRole {
    /// Role name, unique within the project.
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Subjects bound to the role.
    #[serde(default)]
    pub groups: Vec<String>,
    /// Policy statements granted to the role.
    #[serde(default)]
    pub policies: Vec<String>,
}

/// Project whose role list is consumed by the external enforcer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    metadata: ObjectMeta,
    #[serde(default)]
    roles: Vec<ProjectRole>,
}

impl Project {
    /// Creates a project with the given roles.
    #[must_use]
    pub fn new(key: ObjectKey, roles: Vec<ProjectRole>) -> Self {
        Self {
            metadata: ObjectMeta::new(key),
            roles,
        }
    }

    /// Returns the project key.
    #[must_use]
    pub fn key(&self) -> &ObjectKey {
        self.metadata.key()
    }

    /// Returns object metadata.
    #[must_use]
    pub fn metadata(&self) -> &ObjectMeta {
        &self.metadata
    }

    /// Returns mutable object metadata.
    pub fn metadata_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }

    /// Returns the roles in policy order.
    #[must_use]
    pub fn roles(&self) -> &[ProjectRole] {
        self.roles.as_slice()
    }

    /// Returns mutable access to the role list.
    pub fn roles_mut(&mut self) -> &mut Vec<ProjectRole> {
        &mut self.roles
    }

    /// Returns one role by name.
    #[must_use]
    pub fn role(&self, role_name: &str) -> Option<&ProjectRole> {
        self.roles.iter().find(|role| role.name == role_name)
    }

    /// Returns whether `subject` is listed on the named role.
    #[must_use]
    pub fn has_member(&self, role_name: &str, subject: &str) -> bool {
        self.role(role_name)
            .is_some_and(|role| role.groups.iter().any(|member| member == subject))
    }

    /// Binds `subject` to the rendered role and converges its policies.
    ///
    /// Returns true when the role list changed.
    pub fn bind_subject(&mut self, rendered: &RenderedRole, subject: &str) -> bool {
        let Some(role) = self
            .roles
            .iter_mut()
            .find(|role| role.name == rendered.role_name())
        else {
            self.roles.push(ProjectRole {
                name: rendered.role_name().to_owned(),
                description: rendered.description().to_owned(),
                groups: vec![subject.to_owned()],
                policies: rendered.policies().to_vec(),
            });
            return true;
        };

        let mut changed = converge_role(role, rendered);
        if !role.groups.iter().any(|member| member == subject) {
            role.groups.push(subject.to_owned());
            changed = true;
        }

        changed
    }

    /// Overwrites an existing role's description and policies with the rendering.
    ///
    /// Returns true when the role existed and differed.
    pub fn converge_role_policies(&mut self, rendered: &RenderedRole) -> bool {
        self.roles
            .iter_mut()
            .find(|role| role.name == rendered.role_name())
            .is_some_and(|role| converge_role(role, rendered))
    }

    /// Removes `subject` from the named role and returns true when it was a member.
    pub fn unbind_subject(&mut self, role_name: &str, subject: &str) -> bool {
        self.roles
            .iter_mut()
            .find(|role| role.name == role_name)
            .is_some_and(|role| {
                let before = role.groups.len();
                role.groups.retain(|member| member != subject);
                before != role.groups.len()
            })
    }

    /// Deletes the named role and returns true when it existed.
    pub fn remove_role(&mut self, role_name: &str) -> bool {
        let before = self.roles.len();
        self.roles.retain(|role| role.name != role_name);
        before != self.roles.len()
    }
}

fn converge_role(role: &mut ProjectRole, rendered: &RenderedRole) -> bool {
    let mut changed = false;
    if role.policies.as_slice() != rendered.policies() {
        role.policies = rendered.policies().to_vec();
        changed = true;
    }
    if role.description != rendered.description() {
        role.description = rendered.description().to_owned();
        changed = true;
    }

    changed
}

#[cfg(test)]
mod tests {
    use jitaccess_core::ObjectKey;

    use super::{Project, ProjectRole};
    use crate::RenderedRole;

    fn project() -> Project {
        Project::new(
            ObjectKey::new("argocd", "payments"),
            vec![ProjectRole {
                name: "read-only".to_owned(),
                description: String::new(),
                groups: vec!["viewers".to_owned()],
                policies: vec!["p, viewers, applications, get, payments/*, allow".to_owned()],
            }],
        )
    }

    fn rendered(policies: &[&str]) -> RenderedRole {
        RenderedRole::new(
            "ephemeral-admin-argocd-checkout",
            "",
            policies.iter().map(|policy| (*policy).to_owned()).collect(),
        )
    }

    #[test]
    fn binding_appends_a_new_role_after_existing_ones() {
        let mut project = project();

        assert!(project.bind_subject(&rendered(&["p1", "p2"]), "alice"));

        assert_eq!(project.roles().len(), 2);
        assert_eq!(project.roles()[1].groups, vec!["alice".to_owned()]);
        assert_eq!(project.roles()[1].policies.len(), 2);
        assert_eq!(project.roles()[0], self::project().roles()[0]);
    }

    #[test]
    fn binding_is_idempotent_and_keeps_insertion_order() {
        let mut project = project();
        let role = rendered(&["p1"]);

        assert!(project.bind_subject(&role, "alice"));
        assert!(project.bind_subject(&role, "bob"));
        assert!(!project.bind_subject(&role, "alice"));

        assert_eq!(
            project.roles()[1].groups,
            vec!["alice".to_owned(), "bob".to_owned()]
        );
    }

    #[test]
    fn binding_reverts_policy_drift() {
        let mut project = project();
        assert!(project.bind_subject(&rendered(&["p1"]), "alice"));
        project.roles_mut()[1].policies = vec!["tampered".to_owned()];

        assert!(project.bind_subject(&rendered(&["p1"]), "alice"));

        assert_eq!(project.roles()[1].policies, vec!["p1".to_owned()]);
    }

    #[test]
    fn unbinding_leaves_other_roles_alone() {
        let mut project = project();
        assert!(project.bind_subject(&rendered(&["p1"]), "alice"));

        assert!(project.unbind_subject("ephemeral-admin-argocd-checkout", "alice"));
        assert!(!project.unbind_subject("ephemeral-admin-argocd-checkout", "alice"));
        assert!(!project.unbind_subject("read-only", "alice"));

        assert!(project.roles()[1].groups.is_empty());
        assert_eq!(project.roles()[0].groups, vec!["viewers".to_owned()]);
    }

    #[test]
    fn membership_is_scoped_to_the_named_role() {
        let mut project = project();
        assert!(project.bind_subject(&rendered(&["p1"]), "alice"));

        assert!(project.has_member("ephemeral-admin-argocd-checkout", "alice"));
        assert!(!project.has_member("read-only", "alice"));
        assert!(!project.has_member("missing-role", "alice"));
    }

    #[test]
    fn converging_a_missing_role_changes_nothing() {
        let mut project = project();

        assert!(!project.converge_role_policies(&rendered(&["p1"])));
        assert_eq!(project.roles().len(), 1);
    }
}
