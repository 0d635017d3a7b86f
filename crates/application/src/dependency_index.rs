use std::sync::Arc;

use jitaccess_core::{AppResult, ObjectKey};
use jitaccess_domain::AccessRequest;
use tracing::debug;

use crate::{AccessRequestRepository, ReconcileQueue, ResourceChange};

/// Maps changes on referenced resources back to the access requests that
/// depend on them and enqueues those requests.
///
/// Concluded requests never react to template or project changes.
#[derive(Clone)]
pub struct DependencyIndex {
    access_requests: Arc<dyn AccessRequestRepository>,
    queue: Arc<dyn ReconcileQueue>,
}

impl DependencyIndex {
    /// Creates an index over the request repository.
    #[must_use]
    pub fn new(
        access_requests: Arc<dyn AccessRequestRepository>,
        queue: Arc<dyn ReconcileQueue>,
    ) -> Self {
        Self {
            access_requests,
            queue,
        }
    }

    /// Returns active requests in the template's namespace naming the template.
    pub async fn requests_for_role_template(
        &self,
        role_template: &ObjectKey,
    ) -> AppResult<Vec<ObjectKey>> {
        let requests = self
            .access_requests
            .list_access_requests_by_role_template(role_template)
            .await?;
        Ok(active_keys(requests))
    }

    /// Returns active requests in the project's namespace resolved to the project.
    pub async fn requests_for_project(&self, project: &ObjectKey) -> AppResult<Vec<ObjectKey>> {
        let requests = self
            .access_requests
            .list_access_requests_by_project(project)
            .await?;
        Ok(active_keys(requests))
    }

    /// Enqueues every request affected by `change` and returns how many were.
    ///
    /// Application changes do not fan out: a request resolves its project once.
    pub async fn route_change(&self, change: &ResourceChange) -> AppResult<usize> {
        let keys = match change {
            ResourceChange::AccessRequest(key) => vec![key.clone()],
            ResourceChange::RoleTemplate(key) => self.requests_for_role_template(key).await?,
            ResourceChange::Project(key) => self.requests_for_project(key).await?,
            ResourceChange::ManagedApplication(_) => Vec::new(),
        };

        let count = keys.len();
        for key in keys {
            self.queue.enqueue(key).await?;
        }

        debug!(
            kind = change.kind(),
            resource = %change.key(),
            enqueued = count,
            "routed resource change"
        );
        Ok(count)
    }
}

fn active_keys(requests: Vec<AccessRequest>) -> Vec<ObjectKey> {
    let mut keys: Vec<ObjectKey> = requests
        .into_iter()
        .filter(|request| !request.is_concluded())
        .map(|request| request.key().clone())
        .collect();
    keys.sort();
    keys
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use jitaccess_core::ObjectKey;
    use jitaccess_domain::AccessRequest;

    use crate::test_support::{
        FakeResourceStore, NAMESPACE, PROJECT, RecordingQueue, TEMPLATE, access_request,
        start_time,
    };
    use crate::{AccessRequestRepository, ResourceChange};

    use super::DependencyIndex;

    async fn store_with_requests() -> Arc<FakeResourceStore> {
        let store = Arc::new(FakeResourceStore::default());

        let fresh = access_request("fresh", "alice", 60);

        let mut granted = access_request("granted", "bob", 60);
        granted.initialize_status(PROJECT, "role", "hash", start_time());
        granted
            .mark_granted(start_time(), "hash")
            .unwrap_or_else(|_| unreachable!());

        let mut denied = access_request("denied", "carol", 60);
        denied.initialize_status(PROJECT, "role", "hash", start_time());
        denied
            .mark_denied(start_time(), Some("no".to_owned()))
            .unwrap_or_else(|_| unreachable!());

        let mut other_namespace = AccessRequest::new(
            ObjectKey::new("team-b", "elsewhere"),
            access_request("elsewhere", "dave", 60).spec().clone(),
        );
        other_namespace.initialize_status(PROJECT, "role", "hash", start_time());

        for request in [fresh, granted, denied, other_namespace] {
            store
                .create_access_request(request)
                .await
                .unwrap_or_else(|_| unreachable!());
        }
        store
    }

    #[tokio::test]
    async fn template_lookup_skips_concluded_and_foreign_namespaces() {
        let store = store_with_requests().await;
        let index = DependencyIndex::new(store.clone(), Arc::new(RecordingQueue::default()));

        let keys = index
            .requests_for_role_template(&ObjectKey::new(NAMESPACE, TEMPLATE))
            .await
            .unwrap_or_else(|_| unreachable!());

        assert_eq!(
            keys,
            vec![
                ObjectKey::new(NAMESPACE, "fresh"),
                ObjectKey::new(NAMESPACE, "granted"),
            ]
        );
    }

    #[tokio::test]
    async fn project_lookup_requires_resolved_project() {
        let store = store_with_requests().await;
        let index = DependencyIndex::new(store.clone(), Arc::new(RecordingQueue::default()));

        let keys = index
            .requests_for_project(&ObjectKey::new(NAMESPACE, PROJECT))
            .await
            .unwrap_or_else(|_| unreachable!());

        assert_eq!(keys, vec![ObjectKey::new(NAMESPACE, "granted")]);
    }

    #[tokio::test]
    async fn route_change_enqueues_dependents() {
        let store = store_with_requests().await;
        let queue = Arc::new(RecordingQueue::default());
        let index = DependencyIndex::new(store.clone(), queue.clone());

        let template_count = index
            .route_change(&ResourceChange::RoleTemplate(ObjectKey::new(
                NAMESPACE, TEMPLATE,
            )))
            .await;
        let application_count = index
            .route_change(&ResourceChange::ManagedApplication(ObjectKey::new(
                NAMESPACE, "app",
            )))
            .await;
        let request_count = index
            .route_change(&ResourceChange::AccessRequest(ObjectKey::new(
                NAMESPACE, "denied",
            )))
            .await;

        assert_eq!(template_count, Ok(2));
        assert_eq!(application_count, Ok(0));
        assert_eq!(request_count, Ok(1));
        let enqueued: Vec<ObjectKey> = queue
            .enqueued
            .lock()
            .await
            .iter()
            .map(|(key, _)| key.clone())
            .collect();
        assert_eq!(
            enqueued,
            vec![
                ObjectKey::new(NAMESPACE, "fresh"),
                ObjectKey::new(NAMESPACE, "granted"),
                ObjectKey::new(NAMESPACE, "denied"),
            ]
        );
    }
}
