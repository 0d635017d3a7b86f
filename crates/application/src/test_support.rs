use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use tokio::sync::Mutex;

use jitaccess_core::{AppError, AppResult, ObjectKey, ObjectMeta};
use jitaccess_domain::{
    AccessRequest, AccessRequestSpec, ManagedApplication, Project, ProjectRole, RenderedRole,
    RoleTemplate, RoleTemplateSpec, Subject, TargetApplication,
};

use crate::{
    AccessRequestRepository, Clock, ManagedApplicationRepository, PermissionDecision,
    PermissionGate, ProjectRepository, ReconcileQueue, ResourceRepositories,
    RoleTemplateRepository,
};

pub(crate) const NAMESPACE: &str = "argocd";
pub(crate) const PROJECT: &str = "sample-project";
pub(crate) const APPLICATION: &str = "sample-app";
pub(crate) const TEMPLATE: &str = "devops-template";

pub(crate) fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0)
        .single()
        .unwrap_or_else(|| unreachable!())
}

#[derive(Default)]
pub(crate) struct FakeResourceStore {
    access_requests: Mutex<HashMap<ObjectKey, AccessRequest>>,
    role_templates: Mutex<HashMap<ObjectKey, RoleTemplate>>,
    applications: Mutex<HashMap<ObjectKey, ManagedApplication>>,
    projects: Mutex<HashMap<ObjectKey, Project>>,
    next_version: AtomicU64,
    pub(crate) project_writes: AtomicUsize,
    pub(crate) access_request_writes: AtomicUsize,
    pub(crate) pending_project_conflicts: AtomicU32,
    pub(crate) projects_unavailable: AtomicBool,
    pub(crate) access_request_writes_unavailable: AtomicBool,
}

impl FakeResourceStore {
    pub(crate) fn repositories(self: &Arc<Self>) -> ResourceRepositories {
        ResourceRepositories::from_store(self.clone())
    }

    pub(crate) async fn access_request(&self, key: &ObjectKey) -> Option<AccessRequest> {
        self.access_requests.lock().await.get(key).cloned()
    }

    pub(crate) async fn project(&self) -> Project {
        self.projects
            .lock()
            .await
            .get(&ObjectKey::new(NAMESPACE, PROJECT))
            .cloned()
            .unwrap_or_else(|| unreachable!())
    }

    fn stamp(&self, metadata: &mut ObjectMeta) {
        let version = self.next_version.fetch_add(1, Ordering::SeqCst) + 1;
        metadata.set_resource_version(version);
    }

    fn check_version(stored: &ObjectMeta, incoming: &ObjectMeta) -> AppResult<()> {
        if stored.resource_version() != incoming.resource_version() {
            return Err(AppError::Conflict(format!(
                "'{}' was modified concurrently",
                incoming.key()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl AccessRequestRepository for FakeResourceStore {
    async fn find_access_request(&self, key: &ObjectKey) -> AppResult<Option<AccessRequest>> {
        Ok(self.access_requests.lock().await.get(key).cloned())
    }

    async fn list_access_requests_by_role_template(
        &self,
        role_template: &ObjectKey,
    ) -> AppResult<Vec<AccessRequest>> {
        Ok(self
            .access_requests
            .lock()
            .await
            .values()
            .filter(|request| &request.role_template_key() == role_template)
            .cloned()
            .collect())
    }

    async fn list_access_requests_by_project(
        &self,
        project: &ObjectKey,
    ) -> AppResult<Vec<AccessRequest>> {
        Ok(self
            .access_requests
            .lock()
            .await
            .values()
            .filter(|request| request.project_key().as_ref() == Some(project))
            .cloned()
            .collect())
    }

    async fn create_access_request(&self, mut request: AccessRequest) -> AppResult<AccessRequest> {
        self.stamp(request.metadata_mut());
        self.access_requests
            .lock()
            .await
            .insert(request.key().clone(), request.clone());
        Ok(request)
    }

    async fn update_access_request(&self, mut request: AccessRequest) -> AppResult<AccessRequest> {
        if self.access_request_writes_unavailable.load(Ordering::SeqCst) {
            return Err(AppError::StoreUnavailable(
                "access request store is offline".to_owned(),
            ));
        }

        let mut requests = self.access_requests.lock().await;
        let stored = requests
            .get(request.key())
            .ok_or_else(|| AppError::NotFound(format!("access request '{}'", request.key())))?;
        Self::check_version(stored.metadata(), request.metadata())?;

        self.access_request_writes.fetch_add(1, Ordering::SeqCst);
        if request.metadata().is_marked_for_deletion() && request.metadata().finalizers().is_empty()
        {
            requests.remove(request.key());
            return Ok(request);
        }

        self.stamp(request.metadata_mut());
        requests.insert(request.key().clone(), request.clone());
        Ok(request)
    }

    async fn delete_access_request(&self, key: &ObjectKey) -> AppResult<()> {
        let mut requests = self.access_requests.lock().await;
        let Some(stored) = requests.get_mut(key) else {
            return Err(AppError::NotFound(format!("access request '{key}'")));
        };

        if stored.metadata().finalizers().is_empty() {
            requests.remove(key);
            return Ok(());
        }

        stored.metadata_mut().mark_for_deletion(start_time());
        let version = self.next_version.fetch_add(1, Ordering::SeqCst) + 1;
        stored.metadata_mut().set_resource_version(version);
        Ok(())
    }
}

#[async_trait]
impl RoleTemplateRepository for FakeResourceStore {
    async fn find_role_template(&self, key: &ObjectKey) -> AppResult<Option<RoleTemplate>> {
        Ok(self.role_templates.lock().await.get(key).cloned())
    }

    async fn create_role_template(&self, mut template: RoleTemplate) -> AppResult<RoleTemplate> {
        self.stamp(template.metadata_mut());
        self.role_templates
            .lock()
            .await
            .insert(template.key().clone(), template.clone());
        Ok(template)
    }

    async fn update_role_template(&self, mut template: RoleTemplate) -> AppResult<RoleTemplate> {
        let mut templates = self.role_templates.lock().await;
        if let Some(stored) = templates.get(template.key()) {
            Self::check_version(stored.metadata(), template.metadata())?;
        }
        self.stamp(template.metadata_mut());
        templates.insert(template.key().clone(), template.clone());
        Ok(template)
    }
}

#[async_trait]
impl ManagedApplicationRepository for FakeResourceStore {
    async fn find_application(&self, key: &ObjectKey) -> AppResult<Option<ManagedApplication>> {
        Ok(self.applications.lock().await.get(key).cloned())
    }

    async fn create_application(
        &self,
        mut application: ManagedApplication,
    ) -> AppResult<ManagedApplication> {
        self.stamp(application.metadata_mut());
        self.applications
            .lock()
            .await
            .insert(application.key().clone(), application.clone());
        Ok(application)
    }
}

#[async_trait]
impl ProjectRepository for FakeResourceStore {
    async fn find_project(&self, key: &ObjectKey) -> AppResult<Option<Project>> {
        if self.projects_unavailable.load(Ordering::SeqCst) {
            return Err(AppError::StoreUnavailable("project store is offline".to_owned()));
        }
        Ok(self.projects.lock().await.get(key).cloned())
    }

    async fn create_project(&self, mut project: Project) -> AppResult<Project> {
        self.stamp(project.metadata_mut());
        self.projects
            .lock()
            .await
            .insert(project.key().clone(), project.clone());
        Ok(project)
    }

    async fn update_project(&self, mut project: Project) -> AppResult<Project> {
        if self.projects_unavailable.load(Ordering::SeqCst) {
            return Err(AppError::StoreUnavailable("project store is offline".to_owned()));
        }

        let mut projects = self.projects.lock().await;
        let stored = projects
            .get(project.key())
            .ok_or_else(|| AppError::NotFound(format!("project '{}'", project.key())))?;
        Self::check_version(stored.metadata(), project.metadata())?;

        let injected = self
            .pending_project_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |pending| {
                pending.checked_sub(1)
            })
            .is_ok();
        if injected {
            // Simulate a concurrent writer bumping the version first.
            let mut bumped = stored.clone();
            self.stamp(bumped.metadata_mut());
            projects.insert(bumped.key().clone(), bumped);
            return Err(AppError::Conflict(format!(
                "project '{}' was modified concurrently",
                project.key()
            )));
        }

        self.project_writes.fetch_add(1, Ordering::SeqCst);
        self.stamp(project.metadata_mut());
        projects.insert(project.key().clone(), project.clone());
        Ok(project)
    }
}

pub(crate) struct FakePermissionGate {
    decision: Mutex<AppResult<PermissionDecision>>,
    pub(crate) calls: AtomicUsize,
}

impl FakePermissionGate {
    pub(crate) fn allowing() -> Self {
        Self {
            decision: Mutex::new(Ok(PermissionDecision::Allow)),
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) fn denying(reason: &str) -> Self {
        Self {
            decision: Mutex::new(Ok(PermissionDecision::Deny {
                reason: reason.to_owned(),
            })),
            calls: AtomicUsize::new(0),
        }
    }

    pub(crate) async fn set_decision(&self, decision: AppResult<PermissionDecision>) {
        *self.decision.lock().await = decision;
    }
}

#[async_trait]
impl PermissionGate for FakePermissionGate {
    async fn check(
        &self,
        _subject: &str,
        _role: &RenderedRole,
        _application: &ManagedApplication,
    ) -> AppResult<PermissionDecision> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.decision.lock().await.clone()
    }
}

pub(crate) struct FakeClock {
    now_millis: AtomicI64,
}

impl FakeClock {
    pub(crate) fn starting_at(now: DateTime<Utc>) -> Self {
        Self {
            now_millis: AtomicI64::new(now.timestamp_millis()),
        }
    }

    pub(crate) fn advance(&self, by: TimeDelta) {
        self.now_millis
            .fetch_add(by.num_milliseconds(), Ordering::SeqCst);
    }
}

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.now_millis.load(Ordering::SeqCst)).unwrap_or_default()
    }
}

#[derive(Default)]
pub(crate) struct RecordingQueue {
    pub(crate) enqueued: Mutex<Vec<(ObjectKey, Option<Duration>)>>,
}

#[async_trait]
impl ReconcileQueue for RecordingQueue {
    async fn enqueue(&self, key: ObjectKey) -> AppResult<()> {
        self.enqueued.lock().await.push((key, None));
        Ok(())
    }

    async fn enqueue_after(&self, key: ObjectKey, delay: Duration) -> AppResult<()> {
        self.enqueued.lock().await.push((key, Some(delay)));
        Ok(())
    }
}

pub(crate) fn access_request(name: &str, subject: &str, duration_seconds: u64) -> AccessRequest {
    AccessRequest::new(
        ObjectKey::new(NAMESPACE, name),
        AccessRequestSpec {
            duration_seconds,
            role_template_name: TEMPLATE.to_owned(),
            application: TargetApplication {
                name: APPLICATION.to_owned(),
                namespace: NAMESPACE.to_owned(),
            },
            subject: Subject {
                username: subject.to_owned(),
            },
        },
    )
}

pub(crate) fn devops_template(policies: &[&str]) -> RoleTemplate {
    RoleTemplate::new(
        ObjectKey::new(NAMESPACE, TEMPLATE),
        RoleTemplateSpec {
            name: "devops".to_owned(),
            description: "write permission in application {{.Namespace}}/{{.Application}}"
                .to_owned(),
            policies: policies.iter().map(|policy| (*policy).to_owned()).collect(),
        },
    )
}

pub(crate) const DEFAULT_POLICIES: [&str; 2] = [
    "p, {{.Role}}, applications, sync, {{.Project}}/{{.Application}}, allow",
    "p, {{.Role}}, applications, action/*, {{.Project}}/{{.Application}}, allow",
];

pub(crate) fn rendered_role() -> RenderedRole {
    devops_template(&DEFAULT_POLICIES)
        .render(PROJECT, APPLICATION, NAMESPACE)
        .unwrap_or_else(|_| unreachable!())
}

pub(crate) fn rendered_role_name() -> String {
    format!("ephemeral-devops-{NAMESPACE}-{APPLICATION}")
}

pub(crate) fn static_role() -> ProjectRole {
    ProjectRole {
        name: "super-user".to_owned(),
        description: "pre-existing role".to_owned(),
        groups: vec!["admins".to_owned()],
        policies: vec![format!("p, proj:{PROJECT}:super-user, *, *, {PROJECT}/*, allow")],
    }
}

/// Seeds the project, application and default template.
pub(crate) async fn seeded_store() -> Arc<FakeResourceStore> {
    let store = Arc::new(FakeResourceStore::default());
    store
        .create_project(Project::new(
            ObjectKey::new(NAMESPACE, PROJECT),
            vec![static_role()],
        ))
        .await
        .unwrap_or_else(|_| unreachable!());
    store
        .create_application(ManagedApplication::new(
            ObjectKey::new(NAMESPACE, APPLICATION),
            PROJECT,
        ))
        .await
        .unwrap_or_else(|_| unreachable!());
    store
        .create_role_template(devops_template(&DEFAULT_POLICIES))
        .await
        .unwrap_or_else(|_| unreachable!());
    store
}
