use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Namespace;

use crate::{
    resources::{Operator, OperatorGroup, OperatorGroupSpec, Subscription, SubscriptionSpec},
    OPREQ_CONTROL_LABEL,
};

/// Name of the operator group created in namespaces that have none
pub const OPERATOR_GROUP_NAME: &str = "operand-deployment-lifecycle-manager-operatorgroup";

macro_rules! meta {
    ($($lhs:ident : $rhs:expr),*) => {{
        ::kube::core::ObjectMeta {
            $($lhs : $rhs),*,

            ..Default::default()
        }
    }};
}

/// Labels marking an object as managed by this operator
pub fn control_labels() -> BTreeMap<String, String> {
    BTreeMap::from([(OPREQ_CONTROL_LABEL.into(), "true".into())])
}

/// Whether a cluster object was created by this operator
pub fn is_managed(labels: &BTreeMap<String, String>) -> bool {
    labels.contains_key(OPREQ_CONTROL_LABEL)
}

/// The objects making up the installation of a single operator
pub struct InstallationObjects {
    pub namespace: Namespace,
    pub operator_group: OperatorGroup,
    pub subscription: Subscription,
}

impl InstallationObjects {
    pub fn for_operator(operator: &Operator) -> Self {
        Self {
            namespace: namespace(operator),
            operator_group: operator_group(operator),
            subscription: subscription(operator),
        }
    }
}

fn namespace(operator: &Operator) -> Namespace {
    Namespace {
        metadata: meta! {
            name: Some(operator.namespace.clone()),
            labels: Some(control_labels())
        },

        ..Default::default()
    }
}

fn operator_group(operator: &Operator) -> OperatorGroup {
    let target_namespaces = operator
        .target_namespaces
        .clone()
        .unwrap_or_else(|| vec![operator.namespace.clone()]);

    OperatorGroup {
        metadata: meta! {
            name: Some(OPERATOR_GROUP_NAME.into()),
            namespace: Some(operator.namespace.clone()),
            labels: Some(control_labels())
        },
        spec: OperatorGroupSpec {
            target_namespaces: Some(target_namespaces),
        },
    }
}

fn subscription(operator: &Operator) -> Subscription {
    Subscription {
        metadata: meta! {
            name: Some(operator.name.clone()),
            namespace: Some(operator.namespace.clone()),
            labels: Some(control_labels())
        },
        spec: SubscriptionSpec {
            channel: Some(operator.channel.clone()),
            name: operator.package_name.clone(),
            source: operator.source_name.clone(),
            source_namespace: operator.source_namespace.clone(),
            install_plan_approval: Some(operator.install_plan_approval),
        },
        status: None,
    }
}

#[cfg(test)]
mod tests {
    use assert_json_diff::assert_json_include;
    use serde_json::json;

    use super::*;
    use crate::resources::InstallPlanApproval;

    fn etcd() -> Operator {
        Operator {
            name: "etcd".into(),
            namespace: "etcd-operator".into(),
            channel: "stable".into(),
            package_name: "etcd".into(),
            source_name: "community-operators".into(),
            source_namespace: "openshift-marketplace".into(),
            install_plan_approval: InstallPlanApproval::Manual,
            ..Default::default()
        }
    }

    #[test]
    fn subscription_points_at_the_catalog() {
        let objects = InstallationObjects::for_operator(&etcd());

        assert_json_include!(
            actual: serde_json::to_value(&objects.subscription).unwrap(),
            expected: json!({
                "apiVersion": "operators.coreos.com/v1alpha1",
                "kind": "Subscription",
                "metadata": {
                    "name": "etcd",
                    "namespace": "etcd-operator",
                    "labels": { "operator.ibm.com/opreq-control": "true" },
                },
                "spec": {
                    "channel": "stable",
                    "name": "etcd",
                    "source": "community-operators",
                    "sourceNamespace": "openshift-marketplace",
                    "installPlanApproval": "Manual",
                },
            })
        );
    }

    #[test]
    fn operator_group_targets_its_own_namespace_by_default() {
        let objects = InstallationObjects::for_operator(&etcd());
        assert_eq!(
            objects.operator_group.spec.target_namespaces,
            Some(vec!["etcd-operator".to_string()])
        );
        assert_eq!(
            objects.namespace.metadata.name.as_deref(),
            Some("etcd-operator")
        );

        let mut operator = etcd();
        operator.target_namespaces = Some(vec!["a".into(), "b".into()]);
        let objects = InstallationObjects::for_operator(&operator);
        assert_eq!(
            objects.operator_group.spec.target_namespaces,
            Some(vec!["a".to_string(), "b".to_string()])
        );
    }

    #[test]
    fn every_object_carries_the_control_label() {
        let objects = InstallationObjects::for_operator(&etcd());

        for labels in [
            objects.namespace.metadata.labels,
            objects.operator_group.metadata.labels,
            objects.subscription.metadata.labels,
        ] {
            assert!(is_managed(&labels.unwrap()));
        }
    }
}
