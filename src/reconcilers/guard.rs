use kube::{runtime::events::EventType, ResourceExt as _};
use tracing::{debug, warn};

use crate::{
    client::OperandClient,
    resources::{
        Condition, ConditionStatus, ConditionType, OperandRegistry, OperandRequest, Operator,
        ResourceType, Scope,
    },
    Result,
};

/// Whether a requested operand may be installed
#[derive(Debug, PartialEq)]
pub(crate) enum Admission<'a> {
    Proceed(&'a Operator),

    /// The registry does not declare the operand.
    NotFound,

    /// The operand is private and requested from another namespace.
    OutOfScope,
}

pub(crate) fn admission<'a>(
    registry: &'a OperandRegistry,
    operand: &str,
    request_namespace: &str,
) -> Admission<'a> {
    match registry.find_operator(operand) {
        None => Admission::NotFound,
        Some(operator)
            if operator.scope == Scope::Private && operator.namespace != request_namespace =>
        {
            Admission::OutOfScope
        }
        Some(operator) => Admission::Proceed(operator),
    }
}

/// Check a requested operand, recording why it was refused.
///
/// Returns the operator to install when admitted. A refusal is only recorded on
/// the request, never returned as an error; failing to persist it is.
pub(crate) async fn admit(
    client: &dyn OperandClient,
    request: &mut OperandRequest,
    registry: &OperandRegistry,
    operand: &str,
) -> Result<Option<Operator>> {
    let namespace = request.namespace().unwrap_or_default();

    let refusal = match admission(registry, operand, &namespace) {
        Admission::Proceed(operator) => {
            let operator = operator.clone();
            clear_refusals(client, request, operand).await?;
            return Ok(Some(operator));
        }
        Admission::NotFound => {
            debug!(
                "Operator {operand} not found in the registry {}/{}",
                registry.namespace().unwrap_or_default(),
                registry.name_any()
            );
            ConditionType::NotFound
        }
        Admission::OutOfScope => {
            warn!("Operator {operand} is private. It can't be requested from namespace {namespace}");
            ConditionType::OutOfScope
        }
    };

    request.set_condition(Condition::new(
        refusal,
        true,
        ResourceType::Subscription,
        operand,
    ));
    client.update_request_status(request).await?;
    client
        .notify(
            request,
            EventType::Warning,
            &refusal.to_string(),
            format!("Operator {operand} can not be installed for this request"),
        )
        .await;

    Ok(None)
}

/// Flip earlier refusals of an operand that is now admitted
async fn clear_refusals(
    client: &dyn OperandClient,
    request: &mut OperandRequest,
    operand: &str,
) -> Result<()> {
    let mut changed = false;
    for refusal in [ConditionType::NotFound, ConditionType::OutOfScope] {
        let stale = request
            .condition(refusal, ResourceType::Subscription, operand)
            .is_some_and(|c| c.status == ConditionStatus::True);

        if stale {
            request.set_condition(Condition::new(
                refusal,
                false,
                ResourceType::Subscription,
                operand,
            ));
            changed = true;
        }
    }

    if changed {
        client.update_request_status(request).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        reconcilers::fake::{Call, FakeCluster},
        resources::OperandRegistrySpec,
        Error,
    };

    fn registry() -> OperandRegistry {
        let mut registry = OperandRegistry::new(
            "common-service",
            OperandRegistrySpec {
                operators: vec![
                    Operator {
                        name: "etcd".into(),
                        namespace: "etcd-operator".into(),
                        scope: Scope::Private,
                        ..Default::default()
                    },
                    Operator {
                        name: "mongodb".into(),
                        namespace: "mongodb-operator".into(),
                        ..Default::default()
                    },
                ],
            },
        );
        registry.metadata.namespace = Some("ibm-common-services".into());
        registry
    }

    #[test]
    fn unknown_operands_are_not_found() {
        let registry = registry();
        assert_eq!(
            admission(&registry, "redis", "etcd-operator"),
            Admission::NotFound
        );
    }

    #[test]
    fn private_operands_are_scoped_to_their_namespace() {
        let registry = registry();

        assert_eq!(
            admission(&registry, "etcd", "tenant-a"),
            Admission::OutOfScope
        );
        assert!(matches!(
            admission(&registry, "etcd", "etcd-operator"),
            Admission::Proceed(op) if op.name == "etcd"
        ));
    }

    #[test]
    fn public_operands_are_requestable_anywhere() {
        let registry = registry();
        assert!(matches!(
            admission(&registry, "mongodb", "tenant-a"),
            Admission::Proceed(op) if op.name == "mongodb"
        ));
    }

    #[tokio::test]
    async fn refusals_that_cannot_be_persisted_are_errors() {
        let cluster = Arc::new(FakeCluster::default());
        cluster.fail_on(Call::UpdateRequestStatus("req-1".into()));

        let mut request = OperandRequest::new("req-1", Default::default());
        request.metadata.namespace = Some("tenant-a".into());

        let err = admit(cluster.as_ref(), &mut request, &registry(), "redis")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RemoteAction(..)));
        assert!(!cluster.calls().contains(&Call::Notify("NotFound".into())));
    }

    #[tokio::test]
    async fn admitted_operands_clear_earlier_refusals() {
        let cluster = Arc::new(FakeCluster::default());
        let mut request = OperandRequest::new("req-1", Default::default());
        request.metadata.namespace = Some("tenant-a".into());
        request.set_condition(Condition::new(
            ConditionType::NotFound,
            true,
            ResourceType::Subscription,
            "mongodb",
        ));

        let operator = admit(cluster.as_ref(), &mut request, &registry(), "mongodb")
            .await
            .unwrap();
        assert_eq!(operator.map(|o| o.name), Some("mongodb".to_string()));

        let persisted = cluster.request("tenant-a", "req-1").unwrap();
        let cond = persisted
            .condition(ConditionType::NotFound, ResourceType::Subscription, "mongodb")
            .unwrap();
        assert_eq!(cond.status, ConditionStatus::False);
    }
}
