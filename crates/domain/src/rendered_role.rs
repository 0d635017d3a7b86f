use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Concrete role produced by rendering a template for one application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedRole {
    role_name: String,
    description: String,
    policies: Vec<String>,
}

impl RenderedRole {
    /// Creates a rendered role.
    #[must_use]
    pub fn new(
        role_name: impl Into<String>,
        description: impl Into<String>,
        policies: Vec<String>,
    ) -> Self {
        Self {
            role_name: role_name.into(),
            description: description.into(),
            policies,
        }
    }

    /// Returns the project role name.
    #[must_use]
    pub fn role_name(&self) -> &str {
        self.role_name.as_str()
    }

    /// Returns the role description.
    #[must_use]
    pub fn description(&self) -> &str {
        self.description.as_str()
    }

    /// Returns the rendered policy statements in template order.
    #[must_use]
    pub fn policies(&self) -> &[String] {
        self.policies.as_slice()
    }

    /// Returns a stable SHA-256 hex digest of the rendering.
    ///
    /// Every field is length-prefixed, so moving bytes between adjacent
    /// policies changes the digest.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hash_field(&mut hasher, self.role_name.as_str());
        hash_field(&mut hasher, self.description.as_str());
        hasher.update((self.policies.len() as u64).to_be_bytes());
        for policy in &self.policies {
            hash_field(&mut hasher, policy.as_str());
        }

        let digest = hasher.finalize();
        digest.iter().map(|byte| format!("{byte:02x}")).collect()
    }
}

fn hash_field(hasher: &mut Sha256, value: &str) {
    hasher.update((value.len() as u64).to_be_bytes());
    hasher.update(value.as_bytes());
}
