use std::fmt::Display;

use chrono::{DateTime, Utc};
use kube::{CustomResource, ResourceExt as _};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::NamespacedReference;

/// A consumer's declared set of operands, grouped by the registry providing them
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[cfg_attr(test, derive(Default))]
#[kube(
    kind = "OperandRequest",
    group = "operator.ibm.com",
    version = "v1alpha1",
    status = "OperandRequestStatus",
    doc = "A request for a set of operands provided by one or more registries",
    shortname = "opreq",
    namespaced,
    printcolumn = r#"{ "name": "members", "type": "string", "description": "operands tracked by this request", "jsonPath": ".status.members[*].name" }"#,
    printcolumn = r#"{ "name": "age", "type": "date", "jsonPath": ".metadata.creationTimestamp" }"#
)]
#[serde(rename_all = "camelCase")]
pub struct OperandRequestSpec {
    /// The requested operands, one group per registry.
    pub requests: Vec<RequestGroup>,
}

/// A set of operands requested from a single registry
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RequestGroup {
    /// Name of the `OperandRegistry` providing the operands.
    pub registry: String,

    /// Namespace of the `OperandRegistry`.
    pub registry_namespace: String,

    /// The operands requested from this registry.
    pub operands: Vec<RequestedOperand>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RequestedOperand {
    /// Name of the operand, as declared in the registry.
    pub name: String,
}

/// Observed state of an operand request
#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OperandRequestStatus {
    /// Per-resource conditions recorded while converging and tearing down operands.
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Operands currently tracked by this request.
    #[serde(default)]
    pub members: Vec<MemberStatus>,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MemberStatus {
    pub name: String,
}

/// A condition about a single resource managed on behalf of a request
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: ConditionType,
    pub status: ConditionStatus,
    pub resource_name: String,
    pub resource_type: ResourceType,
    pub reason: String,
    pub message: String,
    pub last_update_time: Option<DateTime<Utc>>,
    pub last_transition_time: Option<DateTime<Utc>>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq)]
pub enum ConditionType {
    Creating,
    Updating,
    Deleting,
    NotFound,
    OutOfScope,
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    True,
    False,
}

/// The kind of resource a condition is about
#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq)]
pub enum ResourceType {
    Subscription,
    InstalledVersion,

    /// Only used for reporting a missing registry.
    Registry,
}

impl From<bool> for ConditionStatus {
    fn from(value: bool) -> Self {
        if value {
            ConditionStatus::True
        } else {
            ConditionStatus::False
        }
    }
}

impl Display for ConditionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConditionType::Creating => "Creating",
            ConditionType::Updating => "Updating",
            ConditionType::Deleting => "Deleting",
            ConditionType::NotFound => "NotFound",
            ConditionType::OutOfScope => "OutOfScope",
        };
        f.write_str(s)
    }
}

impl Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ResourceType::Subscription => "Subscription",
            ResourceType::InstalledVersion => "InstalledVersion",
            ResourceType::Registry => "Registry",
        };
        f.write_str(s)
    }
}

impl Condition {
    pub fn new(
        type_: ConditionType,
        status: impl Into<ConditionStatus>,
        resource_type: ResourceType,
        resource_name: impl Into<String>,
    ) -> Self {
        let resource_name = resource_name.into();
        let (reason, message) = match type_ {
            ConditionType::NotFound if resource_type == ResourceType::Registry => (
                "NotFoundRegistry".to_string(),
                format!("Registry {resource_name} does not exist"),
            ),
            ConditionType::NotFound => (
                "NotFoundOperatorFromRegistry".to_string(),
                format!("Operator {resource_name} is not declared in the registry"),
            ),
            ConditionType::OutOfScope => (
                "OutOfScope".to_string(),
                format!("Operator {resource_name} is private to its own namespace"),
            ),
            transition => (
                format!("{transition} {resource_type}"),
                format!("{transition} {resource_type} {resource_name}"),
            ),
        };
        let now = Utc::now();

        Self {
            type_,
            status: status.into(),
            resource_name,
            resource_type,
            reason,
            message,
            last_update_time: Some(now),
            last_transition_time: Some(now),
        }
    }

    fn is_about(&self, other: &Condition) -> bool {
        self.type_ == other.type_
            && self.resource_type == other.resource_type
            && self.resource_name == other.resource_name
    }
}

impl OperandRequest {
    /// The identity of this request as recorded in registry reference lists
    pub fn key(&self) -> Option<NamespacedReference> {
        self.namespace()
            .map(|namespace| NamespacedReference::new(self.name_any(), namespace))
    }

    /// Names of every operand requested across all groups
    pub fn requested_operands(&self) -> impl Iterator<Item = &str> {
        self.spec
            .requests
            .iter()
            .flat_map(|group| group.operands.iter().map(|o| o.name.as_str()))
    }

    /// Record a condition, replacing the previous one about the same resource.
    ///
    /// The transition time only moves when the status actually flips.
    pub fn set_condition(&mut self, mut condition: Condition) {
        let status = self.status.get_or_insert_with(Default::default);

        match status.conditions.iter_mut().find(|c| c.is_about(&condition)) {
            Some(existing) => {
                if existing.status == condition.status {
                    condition.last_transition_time = existing.last_transition_time;
                }
                *existing = condition;
            }
            None => status.conditions.push(condition),
        }
    }

    pub fn condition(
        &self,
        type_: ConditionType,
        resource_type: ResourceType,
        resource_name: &str,
    ) -> Option<&Condition> {
        self.status.as_ref()?.conditions.iter().find(|c| {
            c.type_ == type_ && c.resource_type == resource_type && c.resource_name == resource_name
        })
    }

    pub fn members(&self) -> impl Iterator<Item = &str> {
        self.status
            .iter()
            .flat_map(|s| s.members.iter().map(|m| m.name.as_str()))
    }

    pub fn has_member(&self, name: &str) -> bool {
        self.members().any(|m| m == name)
    }

    /// Start tracking an operand, returning whether the member list changed
    pub fn add_member(&mut self, name: &str) -> bool {
        if self.has_member(name) {
            return false;
        }

        let status = self.status.get_or_insert_with(Default::default);
        status.members.push(MemberStatus { name: name.into() });
        true
    }

    /// Stop tracking an operand, returning whether the member list changed
    pub fn clean_member_status(&mut self, name: &str) -> bool {
        let Some(status) = self.status.as_mut() else {
            return false;
        };

        let before = status.members.len();
        status.members.retain(|m| m.name != name);
        before != status.members.len()
    }
}
