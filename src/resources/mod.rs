use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

mod config;
mod olm;
mod registry;
mod request;

pub use config::*;
pub use olm::*;
pub use registry::*;
pub use request::*;

/// Reference to a namespaced object
#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "camelCase")]
pub struct NamespacedReference {
    /// The name of the resource
    pub name: String,

    /// The containing namespace.
    pub namespace: String,
}

impl NamespacedReference {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

impl std::fmt::Display for NamespacedReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}
