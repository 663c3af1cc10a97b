//! The subset of Operator Lifecycle Manager objects needed to install and remove operators.
//!
//! These CRDs belong to OLM and are never generated by `crdgen`.

use kube::{CustomResource, ResourceExt as _};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

use super::InstallPlanApproval;

/// Annotation on an installed version listing example instances of the CRDs it owns
pub const ALM_EXAMPLES_ANNOTATION: &str = "alm-examples";

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[kube(
    kind = "Subscription",
    group = "operators.coreos.com",
    version = "v1alpha1",
    status = "SubscriptionStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionSpec {
    pub channel: Option<String>,

    /// The package to install.
    pub name: String,

    /// The catalog source providing the package.
    pub source: String,
    pub source_namespace: String,
    pub install_plan_approval: Option<InstallPlanApproval>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
pub struct SubscriptionStatus {
    /// Name of the cluster service version installed by this subscription.
    #[serde(rename = "installedCSV")]
    pub installed_csv: Option<String>,
}

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[kube(
    kind = "OperatorGroup",
    group = "operators.coreos.com",
    version = "v1",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct OperatorGroupSpec {
    pub target_namespaces: Option<Vec<String>>,
}

/// The installed version of an operator, produced once its subscription resolves
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[kube(
    kind = "ClusterServiceVersion",
    group = "operators.coreos.com",
    version = "v1alpha1",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterServiceVersionSpec {
    pub display_name: Option<String>,
    pub version: Option<String>,
}

/// An example custom resource advertised by an installed version
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AlmExample {
    pub api_version: String,
    pub kind: String,
    pub metadata: AlmExampleMetadata,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct AlmExampleMetadata {
    pub name: String,
}

impl Subscription {
    /// The installed version recorded by OLM, if resolution has happened
    pub fn installed_csv(&self) -> Option<&str> {
        self.status
            .as_ref()?
            .installed_csv
            .as_deref()
            .filter(|csv| !csv.is_empty())
    }
}

impl ClusterServiceVersion {
    pub fn alm_examples(&self) -> Result<Vec<AlmExample>> {
        match self.annotations().get(ALM_EXAMPLES_ANNOTATION) {
            Some(raw) if !raw.trim().is_empty() => {
                serde_json::from_str(raw).map_err(Error::SerializationError)
            }
            _ => Ok(Vec::new()),
        }
    }
}
