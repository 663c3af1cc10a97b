use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::NamespacedReference;

/// A catalog of operators which can be requested, along with their live status
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[cfg_attr(test, derive(Default))]
#[kube(
    kind = "OperandRegistry",
    group = "operator.ibm.com",
    version = "v1alpha1",
    status = "OperandRegistryStatus",
    doc = "A catalog of operators providing requestable operands",
    shortname = "opreg",
    namespaced,
    printcolumn = r#"{ "name": "age", "type": "date", "jsonPath": ".metadata.creationTimestamp" }"#
)]
#[serde(rename_all = "camelCase")]
pub struct OperandRegistrySpec {
    /// The operators which can be requested from this registry.
    #[serde(default)]
    pub operators: Vec<Operator>,
}

/// How to install the operator providing an operand
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Operator {
    /// Name of the operand, also used as the subscription name.
    pub name: String,

    /// Namespace the operator is installed into.
    pub namespace: String,

    /// Subscription channel.
    pub channel: String,

    /// Package name in the catalog source.
    pub package_name: String,

    /// Name of the catalog source providing the package.
    pub source_name: String,

    /// Namespace of the catalog source.
    pub source_namespace: String,

    /// Who may request this operator.
    #[serde(default)]
    pub scope: Scope,

    /// Whether install plans are approved without intervention.
    #[serde(default)]
    pub install_plan_approval: InstallPlanApproval,

    /// Namespaces watched by the installed operator. Defaults to its own namespace.
    pub target_namespaces: Option<Vec<String>>,

    pub description: Option<String>,
}

/// Visibility of an operator
#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Only requestable from the namespace the operator is installed in.
    Private,

    #[default]
    Public,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, Default, JsonSchema, PartialEq, Eq)]
pub enum InstallPlanApproval {
    #[default]
    Automatic,
    Manual,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OperandRegistryStatus {
    /// Live status of every operator that has been requested at least once.
    #[serde(default)]
    pub operators_status: BTreeMap<String, OperatorStatus>,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OperatorStatus {
    #[serde(default)]
    pub phase: OperatorPhase,

    /// The requests depending on this operator. Its length is the reference count.
    #[serde(default)]
    pub reconcile_requests: Vec<NamespacedReference>,
}

/// The possible phases of a requested operator
#[derive(Deserialize, Serialize, Clone, Copy, Default, Debug, JsonSchema, PartialEq, Eq)]
pub enum OperatorPhase {
    /// Requested, but nothing has been observed yet.
    #[default]
    Initialized,

    /// The operator is being installed.
    Installing,

    /// The operator is running.
    Running,

    /// The operator has converged; its references are pruned lazily.
    Ready,

    /// The installation failed.
    Failed,
}

impl OperandRegistry {
    pub fn find_operator(&self, name: &str) -> Option<&Operator> {
        self.spec.operators.iter().find(|o| o.name == name)
    }

    pub fn operator_status(&self, name: &str) -> Option<&OperatorStatus> {
        self.status.as_ref()?.operators_status.get(name)
    }

    pub fn operators_status(&self) -> impl Iterator<Item = (&String, &OperatorStatus)> {
        self.status.iter().flat_map(|s| s.operators_status.iter())
    }

    /// Position of a request in an operand's reference list
    pub fn reference_position(&self, operand: &str, key: &NamespacedReference) -> Option<usize> {
        self.operator_status(operand)?
            .reconcile_requests
            .iter()
            .position(|r| r == key)
    }

    pub fn reference_count(&self, operand: &str) -> usize {
        self.operator_status(operand)
            .map(|s| s.reconcile_requests.len())
            .unwrap_or_default()
    }

    /// Record that a request depends on an operand, returning whether anything changed
    pub fn add_reference(&mut self, operand: &str, key: &NamespacedReference) -> bool {
        let status = self.status.get_or_insert_with(Default::default);
        let entry = status
            .operators_status
            .entry(operand.to_string())
            .or_default();

        if entry.reconcile_requests.contains(key) {
            return false;
        }

        entry.reconcile_requests.push(key.clone());
        true
    }

    /// Drop a request's reference to an operand, returning whether anything changed.
    ///
    /// The status entry disappears with its last reference.
    pub fn remove_reference(&mut self, operand: &str, key: &NamespacedReference) -> bool {
        let Some(status) = self.status.as_mut() else {
            return false;
        };
        let Some(entry) = status.operators_status.get_mut(operand) else {
            return false;
        };

        let before = entry.reconcile_requests.len();
        entry.reconcile_requests.retain(|r| r != key);
        let changed = before != entry.reconcile_requests.len();

        if entry.reconcile_requests.is_empty() {
            status.operators_status.remove(operand);
        }

        changed
    }

    /// All requests referencing any operand of this registry
    pub fn referencing_requests(&self) -> impl Iterator<Item = &NamespacedReference> {
        self.operators_status()
            .flat_map(|(_, status)| status.reconcile_requests.iter())
    }
}
