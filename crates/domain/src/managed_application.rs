use jitaccess_core::{ObjectKey, ObjectMeta};
use serde::{Deserialize, Serialize};

/// Application deployed by the delivery system and owned by one project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedApplication {
    metadata: ObjectMeta,
    project: String,
}

impl ManagedApplication {
    /// Creates an application reference bound to a project.
    #[must_use]
    pub fn new(key: ObjectKey, project: impl Into<String>) -> Self {
        Self {
            metadata: ObjectMeta::new(key),
            project: project.into(),
        }
    }

    /// Returns the application key.
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

    /// Returns the owning project name.
    #[must_use]
    pub fn project(&self) -> &str {
        self.project.as_str()
    }

    /// Returns the application name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.key().name()
    }

    /// Returns the application namespace.
    #[must_use]
    pub fn namespace(&self) -> &str {
        self.key().namespace()
    }
}
