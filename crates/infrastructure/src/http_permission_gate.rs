use async_trait::async_trait;
use jitaccess_application::{PermissionDecision, PermissionGate};
use jitaccess_core::{AppError, AppResult};
use jitaccess_domain::{ManagedApplication, RenderedRole};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Serialize)]
struct PermissionCheckRequest<'a> {
    subject: &'a str,
    role_name: &'a str,
    policies: &'a [String],
    application: PermissionCheckApplication<'a>,
}

#[derive(Debug, Serialize)]
struct PermissionCheckApplication<'a> {
    name: &'a str,
    namespace: &'a str,
    project: &'a str,
}

#[derive(Debug, Deserialize)]
struct PermissionCheckResponse {
    allowed: bool,
    #[serde(default)]
    reason: Option<String>,
}

/// Permission gate delegating decisions to an external HTTP endpoint.
///
/// The endpoint receives a JSON document describing the subject, rendered
/// role and application and answers `{"allowed": bool, "reason": string?}`.
pub struct HttpPermissionGate {
    http_client: reqwest::Client,
    endpoint: String,
}

impl HttpPermissionGate {
    /// Creates a gate posting to `endpoint`; timeouts come from the client.
    #[must_use]
    pub fn new(http_client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            http_client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl PermissionGate for HttpPermissionGate {
    async fn check(
        &self,
        subject: &str,
        role: &RenderedRole,
        application: &ManagedApplication,
    ) -> AppResult<PermissionDecision> {
        let payload = PermissionCheckRequest {
            subject,
            role_name: role.role_name(),
            policies: role.policies(),
            application: PermissionCheckApplication {
                name: application.name(),
                namespace: application.namespace(),
                project: application.project(),
            },
        };

        let response = self
            .http_client
            .post(self.endpoint.as_str())
            .json(&payload)
            .send()
            .await
            .map_err(|error| {
                AppError::PermissionGate(format!("permission check transport error: {error}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<response body unavailable>".to_owned());
            return Err(AppError::PermissionGate(format!(
                "permission check failed with status {status}: {body}"
            )));
        }

        let decision: PermissionCheckResponse = response.json().await.map_err(|error| {
            AppError::PermissionGate(format!("permission check returned invalid JSON: {error}"))
        })?;
        debug!(subject, allowed = decision.allowed, "permission gate answered");

        Ok(decision_from_response(decision))
    }
}

fn decision_from_response(response: PermissionCheckResponse) -> PermissionDecision {
    if response.allowed {
        return PermissionDecision::Allow;
    }

    PermissionDecision::Deny {
        reason: response
            .reason
            .filter(|reason| !reason.trim().is_empty())
            .unwrap_or_else(|| "denied by permission gate".to_owned()),
    }
}
