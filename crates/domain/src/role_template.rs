use jitaccess_core::{AppError, AppResult, NonEmptyString, ObjectKey, ObjectMeta};
use serde::{Deserialize, Serialize};

use crate::RenderedRole;

const PLACEHOLDER_OPEN: &str = "{{";
const PLACEHOLDER_CLOSE: &str = "}}";

/// Operator-editable part of a role template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleTemplateSpec {
    /// Base role name; the rendered name is derived from it.
    pub name: String,
    /// Free-form description copied to the project role.
    #[serde(default)]
    pub description: String,
    /// Policy statements with `{{.Role}}`, `{{.Project}}`,
    /// `{{.Application}}` and `{{.Namespace}}` placeholders.
    pub policies: Vec<String>,
}

/// Reusable, parameterized role definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleTemplate {
    metadata: ObjectMeta,
    spec: RoleTemplateSpec,
}

impl RoleTemplate {
    /// Creates a role template.
    #[must_use]
    pub fn new(key: ObjectKey, spec: RoleTemplateSpec) -> Self {
        Self {
            metadata: ObjectMeta::new(key),
            spec,
        }
    }

    /// Returns the template key.
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

    /// Returns the template spec.
    #[must_use]
    pub fn spec(&self) -> &RoleTemplateSpec {
        &self.spec
    }

    /// Replaces the template spec.
    pub fn set_spec(&mut self, spec: RoleTemplateSpec) {
        self.spec = spec;
    }

    /// Returns the role name rendered for one application.
    #[must_use]
    pub fn role_name_for(&self, application: &str, namespace: &str) -> String {
        format!("ephemeral-{}-{namespace}-{application}", self.spec.name)
    }

    /// Renders the template for one project, application and namespace.
    pub fn render(
        &self,
        project: &str,
        application: &str,
        namespace: &str,
    ) -> AppResult<RenderedRole> {
        let project = render_input("project", project)?;
        let application = render_input("application", application)?;
        let namespace = render_input("namespace", namespace)?;
        if self.spec.name.trim().is_empty() {
            return Err(AppError::Render(format!(
                "role template '{}' has an empty role name",
                self.key()
            )));
        }

        let role_name = self.role_name_for(application.as_str(), namespace.as_str());
        let role_reference = format!("proj:{}:{role_name}", project.as_str());
        let substitutions = [
            ("Role", role_reference.as_str()),
            ("Project", project.as_str()),
            ("Application", application.as_str()),
            ("Namespace", namespace.as_str()),
        ];

        let policies = self
            .spec
            .policies
            .iter()
            .map(|policy| render_policy(policy, &substitutions))
            .collect::<AppResult<Vec<_>>>()
            .map_err(|error| match error {
                AppError::Render(message) => {
                    AppError::Render(format!("role template '{}': {message}", self.key()))
                }
                other => other,
            })?;

        Ok(RenderedRole::new(
            role_name,
            self.spec.description.as_str(),
            policies,
        ))
    }
}

fn render_input(field: &str, value: &str) -> AppResult<NonEmptyString> {
    NonEmptyString::new(value)
        .map_err(|_| AppError::Render(format!("{field} must not be empty when rendering")))
}

fn render_policy(template: &str, substitutions: &[(&str, &str)]) -> AppResult<String> {
    let mut rendered = String::with_capacity(template.len());
    let mut remaining = template;

    while let Some(start) = remaining.find(PLACEHOLDER_OPEN) {
        rendered.push_str(&remaining[..start]);
        let after_open = &remaining[start + PLACEHOLDER_OPEN.len()..];
        let end = after_open.find(PLACEHOLDER_CLOSE).ok_or_else(|| {
            AppError::Render(format!("unterminated placeholder in policy '{template}'"))
        })?;

        let placeholder = after_open[..end].trim();
        let variable = placeholder.strip_prefix('.').unwrap_or(placeholder);
        let value = substitutions
            .iter()
            .find_map(|(name, value)| (*name == variable).then_some(*value))
            .ok_or_else(|| {
                AppError::Render(format!(
                    "unknown placeholder '{placeholder}' in policy '{template}'"
                ))
            })?;

        rendered.push_str(value);
        remaining = &after_open[end + PLACEHOLDER_CLOSE.len()..];
    }

    rendered.push_str(remaining);
    Ok(rendered)
}
