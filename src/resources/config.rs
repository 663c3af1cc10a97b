use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::{
    gen::SchemaGenerator,
    schema::{InstanceType, Schema, SchemaObject},
    JsonSchema,
};
use serde::{Deserialize, Serialize};

use super::AlmExample;

/// Per-operand configuration for the operators of a registry
///
/// A config shares its name and namespace with the registry it configures.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[cfg_attr(test, derive(Default))]
#[kube(
    kind = "OperandConfig",
    group = "operator.ibm.com",
    version = "v1alpha1",
    doc = "Configuration of the custom resources managed for each operand",
    shortname = "opcon",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct OperandConfigSpec {
    #[serde(default)]
    pub services: Vec<ConfigService>,
}

/// The custom resources configured for a single operand
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConfigService {
    /// Name of the operand.
    pub name: String,

    /// Custom resource specs, keyed by the resource kind in lower camel case.
    #[serde(default)]
    #[schemars(schema_with = "preserve_unknown_fields")]
    pub spec: BTreeMap<String, serde_json::Value>,
}

/// A custom resource instance to remove before its operator is uninstalled
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CustomResourceRef {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub namespace: String,
}

impl std::fmt::Display for CustomResourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

impl OperandConfig {
    pub fn service(&self, operand: &str) -> Option<&ConfigService> {
        self.spec.services.iter().find(|s| s.name == operand)
    }

    /// The example instances shipped with an installed version that this config manages
    pub fn custom_resources_for(
        &self,
        operand: &str,
        examples: &[AlmExample],
        namespace: &str,
    ) -> Vec<CustomResourceRef> {
        let Some(service) = self.service(operand) else {
            return Vec::new();
        };

        examples
            .iter()
            .filter(|example| {
                service
                    .spec
                    .keys()
                    .any(|kind| kind.eq_ignore_ascii_case(&example.kind))
            })
            .map(|example| CustomResourceRef {
                api_version: example.api_version.clone(),
                kind: example.kind.clone(),
                name: example.metadata.name.clone(),
                namespace: namespace.to_string(),
            })
            .collect()
    }
}

fn preserve_unknown_fields(_: &mut SchemaGenerator) -> Schema {
    let mut schema = SchemaObject {
        instance_type: Some(InstanceType::Object.into()),
        ..Default::default()
    };
    schema.extensions.insert(
        "x-kubernetes-preserve-unknown-fields".into(),
        serde_json::Value::Bool(true),
    );

    Schema::Object(schema)
}
