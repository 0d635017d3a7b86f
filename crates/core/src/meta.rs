use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ObjectKey;

/// Store-managed metadata carried by every resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    key: ObjectKey,
    #[serde(default)]
    uid: Option<Uuid>,
    #[serde(default)]
    resource_version: u64,
    #[serde(default)]
    finalizers: Vec<String>,
    #[serde(default)]
    deletion_requested_at: Option<DateTime<Utc>>,
}

impl ObjectMeta {
    /// Creates metadata for an object that has not been persisted yet.
    #[must_use]
    pub fn new(key: ObjectKey) -> Self {
        Self {
            key,
            uid: None,
            resource_version: 0,
            finalizers: Vec::new(),
            deletion_requested_at: None,
        }
    }

    /// Returns the object key.
    #[must_use]
    pub fn key(&self) -> &ObjectKey {
        &self.key
    }

    /// Returns the store-assigned unique identifier, once persisted.
    #[must_use]
    pub fn uid(&self) -> Option<Uuid> {
        self.uid
    }

    /// Returns the version observed when the object was read.
    #[must_use]
    pub fn resource_version(&self) -> u64 {
        self.resource_version
    }

    /// Returns the finalizer markers in insertion order.
    #[must_use]
    pub fn finalizers(&self) -> &[String] {
        self.finalizers.as_slice()
    }

    /// Returns whether the given finalizer is present.
    #[must_use]
    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers.iter().any(|value| value == finalizer)
    }

    /// Adds a finalizer and returns true when it was missing.
    pub fn add_finalizer(&mut self, finalizer: &str) -> bool {
        if self.has_finalizer(finalizer) {
            return false;
        }

        self.finalizers.push(finalizer.to_owned());
        true
    }

    /// Removes a finalizer and returns true when it was present.
    pub fn remove_finalizer(&mut self, finalizer: &str) -> bool {
        let before = self.finalizers.len();
        self.finalizers.retain(|value| value != finalizer);
        before != self.finalizers.len()
    }

    /// Returns when deletion was requested, if it was.
    #[must_use]
    pub fn deletion_requested_at(&self) -> Option<DateTime<Utc>> {
        self.deletion_requested_at
    }

    /// Returns whether the object is waiting for its finalizers to be removed.
    #[must_use]
    pub fn is_marked_for_deletion(&self) -> bool {
        self.deletion_requested_at.is_some()
    }

    /// Store hook: assigns identity on first persist.
    pub fn assign_uid(&mut self, uid: Uuid) {
        self.uid = Some(uid);
    }

    /// Store hook: records the version produced by a write.
    pub fn set_resource_version(&mut self, resource_version: u64) {
        self.resource_version = resource_version;
    }

    /// Store hook: marks the object as being deleted.
    pub fn mark_for_deletion(&mut self, at: DateTime<Utc>) {
        if self.deletion_requested_at.is_none() {
            self.deletion_requested_at = Some(at);
        }
    }
}
