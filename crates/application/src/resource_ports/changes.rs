use jitaccess_core::ObjectKey;

/// Notification that a stored resource was written or removed.
///
/// Delivered at least once; consumers must tolerate duplicates.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceChange {
    /// An access request changed.
    AccessRequest(ObjectKey),
    /// A role template changed.
    RoleTemplate(ObjectKey),
    /// A managed application changed.
    ManagedApplication(ObjectKey),
    /// A project changed.
    Project(ObjectKey),
}

impl ResourceChange {
    /// Returns the key of the changed resource.
    #[must_use]
    pub fn key(&self) -> &ObjectKey {
        match self {
            Self::AccessRequest(key)
            | Self::RoleTemplate(key)
            | Self::ManagedApplication(key)
            | Self::Project(key) => key,
        }
    }

    /// Returns a stable kind label for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AccessRequest(_) => "access_request",
            Self::RoleTemplate(_) => "role_template",
            Self::ManagedApplication(_) => "managed_application",
            Self::Project(_) => "project",
        }
    }
}
