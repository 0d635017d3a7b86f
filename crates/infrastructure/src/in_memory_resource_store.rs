use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use jitaccess_application::{
    AccessRequestRepository, Clock, ManagedApplicationRepository, ProjectRepository,
    ResourceChange, RoleTemplateRepository,
};
use jitaccess_core::{AppError, AppResult, ObjectKey, ObjectMeta};
use jitaccess_domain::{AccessRequest, ManagedApplication, Project, RoleTemplate};
use tokio::sync::{RwLock, broadcast};
use tracing::debug;
use uuid::Uuid;


const CHANGE_CHANNEL_CAPACITY: usize = 1024;

/// Object kinds held by the store.
trait StoredObject: Clone {
    const KIND: &'static str;

    fn meta(&self) -> &ObjectMeta;

    fn meta_mut(&mut self) -> &mut ObjectMeta;
}

impl StoredObject for AccessRequest {
    const KIND: &'static str = "access request";

    fn meta(&self) -> &ObjectMeta {
        self.metadata()
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        self.metadata_mut()
    }
}

impl StoredObject for RoleTemplate {
    const KIND: &'static str = "role template";

    fn meta(&self) -> &ObjectMeta {
        self.metadata()
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        self.metadata_mut()
    }
}

impl StoredObject for ManagedApplication {
    const KIND: &'static str = "managed application";

    fn meta(&self) -> &ObjectMeta {
        self.metadata()
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        self.metadata_mut()
    }
}

impl StoredObject for Project {
    const KIND: &'static str = "project";

    fn meta(&self) -> &ObjectMeta {
        self.metadata()
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        self.metadata_mut()
    }
}

#[derive(Default)]
struct StoreState {
    last_version: u64,
    access_requests: HashMap<ObjectKey, AccessRequest>,
    role_templates: HashMap<ObjectKey, RoleTemplate>,
    applications: HashMap<ObjectKey, ManagedApplication>,
    projects: HashMap<ObjectKey, Project>,
    requests_by_role_template: HashMap<ObjectKey, BTreeSet<ObjectKey>>,
    requests_by_project: HashMap<ObjectKey, BTreeSet<ObjectKey>>,
}

impl StoreState {
    fn next_version(&mut self) -> u64 {
        self.last_version += 1;
        self.last_version
    }

    fn index_request(&mut self, request: &AccessRequest) {
        self.requests_by_role_template
            .entry(request.role_template_key())
            .or_default()
            .insert(request.key().clone());
        if let Some(project) = request.project_key() {
            self.requests_by_project
                .entry(project)
                .or_default()
                .insert(request.key().clone());
        }
    }

    fn unindex_request(&mut self, request: &AccessRequest) {
        remove_index_entry(
            &mut self.requests_by_role_template,
            &request.role_template_key(),
            request.key(),
        );
        if let Some(project) = request.project_key() {
            remove_index_entry(&mut self.requests_by_project, &project, request.key());
        }
    }

    fn indexed_requests(
        &self,
        index: &HashMap<ObjectKey, BTreeSet<ObjectKey>>,
        key: &ObjectKey,
    ) -> Vec<AccessRequest> {
        index
            .get(key)
            .into_iter()
            .flatten()
            .filter_map(|request_key| self.access_requests.get(request_key).cloned())
            .collect()
    }
}

fn remove_index_entry(
    index: &mut HashMap<ObjectKey, BTreeSet<ObjectKey>>,
    key: &ObjectKey,
    request_key: &ObjectKey,
) {
    if let Some(entries) = index.get_mut(key) {
        entries.remove(request_key);
        if entries.is_empty() {
            index.remove(key);
        }
    }
}

fn insert_new<T: StoredObject>(
    objects: &mut HashMap<ObjectKey, T>,
    version: u64,
    mut object: T,
) -> AppResult<T> {
    let key = object.meta().key().clone();
    if objects.contains_key(&key) {
        return Err(AppError::AlreadyExists(format!(
            "{} '{key}' already exists",
            T::KIND
        )));
    }

    let meta = object.meta_mut();
    meta.assign_uid(Uuid::new_v4());
    meta.set_resource_version(version);
    objects.insert(key, object.clone());
    Ok(object)
}

fn check_current<T: StoredObject>(objects: &HashMap<ObjectKey, T>, object: &T) -> AppResult<()> {
    let key = object.meta().key();
    let stored = objects
        .get(key)
        .ok_or_else(|| AppError::NotFound(format!("{} '{key}' does not exist", T::KIND)))?;

    if stored.meta().resource_version() != object.meta().resource_version() {
        return Err(AppError::Conflict(format!(
            "{} '{key}' is at version {} but the write was based on version {}",
            T::KIND,
            stored.meta().resource_version(),
            object.meta().resource_version()
        )));
    }

    Ok(())
}

/// In-memory resource store with optimistic concurrency and change feed.
///
/// Every write bumps a store-wide resource version. Deleting an object that
/// still carries finalizers only marks it; it disappears on the write that
/// clears its last finalizer.
pub struct InMemoryResourceStore {
    state: RwLock<StoreState>,
    changes: broadcast::Sender<ResourceChange>,
    clock: Arc<dyn Clock>,
}

impl InMemoryResourceStore {
    /// Creates an empty store stamping deletion times from `clock`.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            state: RwLock::new(StoreState::default()),
            changes,
            clock,
        }
    }

    /// Subscribes to change notifications for writes after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ResourceChange> {
        self.changes.subscribe()
    }

    /// Lists every stored access request key in key order.
    pub async fn access_request_keys(&self) -> Vec<ObjectKey> {
        let state = self.state.read().await;
        let mut keys: Vec<ObjectKey> = state.access_requests.keys().cloned().collect();
        keys.sort();
        keys
    }

    fn publish(&self, change: ResourceChange) {
        // No subscribers is not an error for the store.
        if self.changes.send(change.clone()).is_err() {
            debug!(kind = change.kind(), resource = %change.key(), "change had no subscribers");
        }
    }
}

#[async_trait]
impl AccessRequestRepository for InMemoryResourceStore {
    async fn find_access_request(&self, key: &ObjectKey) -> AppResult<Option<AccessRequest>> {
        Ok(self.state.read().await.access_requests.get(key).cloned())
    }

    async fn list_access_requests_by_role_template(
        &self,
        role_template: &ObjectKey,
    ) -> AppResult<Vec<AccessRequest>> {
        let state = self.state.read().await;
        Ok(state.indexed_requests(&state.requests_by_role_template, role_template))
    }

    async fn list_access_requests_by_project(
        &self,
        project: &ObjectKey,
    ) -> AppResult<Vec<AccessRequest>> {
        let state = self.state.read().await;
        Ok(state.indexed_requests(&state.requests_by_project, project))
    }

    async fn create_access_request(&self, request: AccessRequest) -> AppResult<AccessRequest> {
        let created = {
            let mut state = self.state.write().await;
            let version = state.next_version();
            let created = insert_new(&mut state.access_requests, version, request)?;
            state.index_request(&created);
            created
        };

        self.publish(ResourceChange::AccessRequest(created.key().clone()));
        Ok(created)
    }

    async fn update_access_request(&self, mut request: AccessRequest) -> AppResult<AccessRequest> {
        {
            let mut state = self.state.write().await;
            check_current(&state.access_requests, &request)?;

            let key = request.key().clone();
            let previous = state
                .access_requests
                .remove(&key)
                .ok_or_else(|| AppError::Internal(format!("access request '{key}' vanished")))?;
            if previous.spec() != request.spec() {
                state.access_requests.insert(key.clone(), previous);
                return Err(AppError::Validation(format!(
                    "access request '{key}' spec is immutable"
                )));
            }
            state.unindex_request(&previous);

            if request.metadata().is_marked_for_deletion()
                && request.metadata().finalizers().is_empty()
            {
                debug!(access_request = %key, "released access request after last finalizer");
            } else {
                let version = state.next_version();
                request.metadata_mut().set_resource_version(version);
                state.index_request(&request);
                state.access_requests.insert(key, request.clone());
            }
        }

        self.publish(ResourceChange::AccessRequest(request.key().clone()));
        Ok(request)
    }

    async fn delete_access_request(&self, key: &ObjectKey) -> AppResult<()> {
        {
            let mut state = self.state.write().await;
            let has_finalizers = state
                .access_requests
                .get(key)
                .map(|request| !request.metadata().finalizers().is_empty())
                .ok_or_else(|| AppError::NotFound(format!("access request '{key}' does not exist")))?;

            if has_finalizers {
                let version = state.next_version();
                let now = self.clock.now();
                if let Some(request) = state.access_requests.get_mut(key) {
                    request.metadata_mut().mark_for_deletion(now);
                    request.metadata_mut().set_resource_version(version);
                }
            } else if let Some(removed) = state.access_requests.remove(key) {
                state.unindex_request(&removed);
            }
        }

        self.publish(ResourceChange::AccessRequest(key.clone()));
        Ok(())
    }
}

#[async_trait]
impl RoleTemplateRepository for InMemoryResourceStore {
    async fn find_role_template(&self, key: &ObjectKey) -> AppResult<Option<RoleTemplate>> {
        Ok(self.state.read().await.role_templates.get(key).cloned())
    }

    async fn create_role_template(&self, template: RoleTemplate) -> AppResult<RoleTemplate> {
        let created = {
            let mut state = self.state.write().await;
            let version = state.next_version();
            insert_new(&mut state.role_templates, version, template)?
        };

        self.publish(ResourceChange::RoleTemplate(created.key().clone()));
        Ok(created)
    }

    async fn update_role_template(&self, mut template: RoleTemplate) -> AppResult<RoleTemplate> {
        {
            let mut state = self.state.write().await;
            check_current(&state.role_templates, &template)?;
            let version = state.next_version();
            template.metadata_mut().set_resource_version(version);
            state
                .role_templates
                .insert(template.key().clone(), template.clone());
        }

        self.publish(ResourceChange::RoleTemplate(template.key().clone()));
        Ok(template)
    }
}

#[async_trait]
impl ManagedApplicationRepository for InMemoryResourceStore {
    async fn find_application(&self, key: &ObjectKey) -> AppResult<Option<ManagedApplication>> {
        Ok(self.state.read().await.applications.get(key).cloned())
    }

    async fn create_application(
        &self,
        application: ManagedApplication,
    ) -> AppResult<ManagedApplication> {
        let created = {
            let mut state = self.state.write().await;
            let version = state.next_version();
            insert_new(&mut state.applications, version, application)?
        };

        self.publish(ResourceChange::ManagedApplication(created.key().clone()));
        Ok(created)
    }
}

#[async_trait]
impl ProjectRepository for InMemoryResourceStore {
    async fn find_project(&self, key: &ObjectKey) -> AppResult<Option<Project>> {
        Ok(self.state.read().await.projects.get(key).cloned())
    }

    async fn create_project(&self, project: Project) -> AppResult<Project> {
        let created = {
            let mut state = self.state.write().await;
            let version = state.next_version();
            insert_new(&mut state.projects, version, project)?
        };

        self.publish(ResourceChange::Project(created.key().clone()));
        Ok(created)
    }

    async fn update_project(&self, mut project: Project) -> AppResult<Project> {
        {
            let mut state = self.state.write().await;
            check_current(&state.projects, &project)?;
            let version = state.next_version();
            project.metadata_mut().set_resource_version(version);
            state.projects.insert(project.key().clone(), project.clone());
        }

        self.publish(ResourceChange::Project(project.key().clone()));
        Ok(project)
    }
}
