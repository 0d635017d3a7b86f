use std::path::Path;

use jitaccess_application::ResourceRepositories;
use jitaccess_core::{AppError, AppResult, ObjectKey};
use jitaccess_domain::{
    AccessRequest, AccessRequestSpec, ManagedApplication, Project, ProjectRole, RoleTemplate,
    RoleTemplateSpec,
};
use serde::Deserialize;
use tracing::info;

/// Objects loaded into the store before the workers start.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SeedDocument {
    pub role_templates: Vec<SeedRoleTemplate>,
    pub applications: Vec<SeedApplication>,
    pub projects: Vec<SeedProject>,
    pub access_requests: Vec<SeedAccessRequest>,
}

#[derive(Debug, Deserialize)]
pub struct SeedRoleTemplate {
    pub namespace: String,
    pub name: String,
    pub spec: RoleTemplateSpec,
}

#[derive(Debug, Deserialize)]
pub struct SeedApplication {
    pub namespace: String,
    pub name: String,
    pub project: String,
}

#[derive(Debug, Deserialize)]
pub struct SeedProject {
    pub namespace: String,
    pub name: String,
    #[serde(default)]
    pub roles: Vec<ProjectRole>,
}

#[derive(Debug, Deserialize)]
pub struct SeedAccessRequest {
    pub namespace: String,
    pub name: String,
    pub spec: AccessRequestSpec,
}

impl SeedDocument {
    pub fn parse(raw: &str) -> AppResult<Self> {
        serde_json::from_str(raw)
            .map_err(|error| AppError::Validation(format!("invalid seed document: {error}")))
    }

    pub fn read(path: &Path) -> AppResult<Self> {
        let raw = std::fs::read_to_string(path).map_err(|error| {
            AppError::Internal(format!(
                "failed to read seed file '{}': {error}",
                path.display()
            ))
        })?;
        Self::parse(raw.as_str())
    }

    /// Creates every object, referenced kinds before the requests using them.
    pub async fn apply(self, repositories: &ResourceRepositories) -> AppResult<()> {
        let counts = (
            self.role_templates.len(),
            self.applications.len(),
            self.projects.len(),
            self.access_requests.len(),
        );

        for template in self.role_templates {
            repositories
                .role_templates
                .create_role_template(RoleTemplate::new(
                    ObjectKey::new(template.namespace, template.name),
                    template.spec,
                ))
                .await?;
        }
        for application in self.applications {
            repositories
                .applications
                .create_application(ManagedApplication::new(
                    ObjectKey::new(application.namespace, application.name),
                    application.project,
                ))
                .await?;
        }
        for project in self.projects {
            repositories
                .projects
                .create_project(Project::new(
                    ObjectKey::new(project.namespace, project.name),
                    project.roles,
                ))
                .await?;
        }
        for request in self.access_requests {
            repositories
                .access_requests
                .create_access_request(AccessRequest::new(
                    ObjectKey::new(request.namespace, request.name),
                    request.spec,
                ))
                .await?;
        }

        info!(
            role_templates = counts.0,
            applications = counts.1,
            projects = counts.2,
            access_requests = counts.3,
            "seed objects created"
        );
        Ok(())
    }
}
