use std::collections::BTreeSet;

use kube::{runtime::events::EventType, ResourceExt as _};
use tracing::{debug, info, warn};

use super::tracked::tracked;
use crate::{
    client::OperandClient,
    manifests::is_managed,
    resources::{
        ConditionType, NamespacedReference, OperandConfig, OperandRegistry, OperandRequest,
        OperatorPhase, ResourceType,
    },
    Result,
};

/// Why a decommission pass is running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    /// The operand was removed from the request's spec.
    ///
    /// Operands in the `Ready` phase are skipped and pruned lazily.
    Unrequested,

    /// The request itself is being deleted, so every reference must go.
    Finalize,
}

/// What releasing a request's reference to an operand involves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Plan {
    /// The registry does not track this request for the operand.
    Untracked,

    /// Other requests still depend on the operand.
    DropReference,

    /// This request holds the last reference.
    FullTeardown,
}

/// What a full teardown left behind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Teardown {
    /// The subscription is deleted.
    Uninstalled,

    /// The subscription belongs to someone else and stays.
    LeftInPlace,

    /// The registry no longer declares the operand, so there is no subscription to delete.
    Unknown,
}

/// Operands tracked for this request in the given registries that it no longer asks for
pub(crate) fn operands_to_decommission(
    request: &OperandRequest,
    registries: &[OperandRegistry],
    key: &NamespacedReference,
) -> BTreeSet<String> {
    let requested: BTreeSet<&str> = request.requested_operands().collect();

    let deployed: BTreeSet<&str> = registries
        .iter()
        .flat_map(|registry| {
            registry
                .operators_status()
                .filter(|(_, status)| status.phase != OperatorPhase::Ready)
                .filter(|(_, status)| status.reconcile_requests.contains(key))
                .map(|(name, _)| name.as_str())
        })
        .collect();

    deployed
        .difference(&requested)
        .map(|name| name.to_string())
        .collect()
}

pub(crate) fn plan(
    registry: &OperandRegistry,
    operand: &str,
    key: &NamespacedReference,
    mode: Mode,
) -> Plan {
    let Some(status) = registry.operator_status(operand) else {
        return Plan::Untracked;
    };
    if mode == Mode::Unrequested && status.phase == OperatorPhase::Ready {
        return Plan::Untracked;
    }
    if registry.reference_position(operand, key).is_none() {
        return Plan::Untracked;
    }

    if registry.reference_count(operand) > 1 {
        Plan::DropReference
    } else {
        Plan::FullTeardown
    }
}

/// Release a request's reference to an operand, uninstalling it with the last reference.
///
/// Every step is idempotent, so a failure anywhere leaves a state the next
/// pass resumes from.
pub(crate) async fn decommission(
    client: &dyn OperandClient,
    request: &mut OperandRequest,
    registry: &mut OperandRegistry,
    config: Option<&OperandConfig>,
    operand: &str,
    key: &NamespacedReference,
    mode: Mode,
) -> Result<()> {
    match plan(registry, operand, key, mode) {
        Plan::Untracked => {
            debug!("{key} holds no reference to {operand} in {}", registry.name_any());
            Ok(())
        }
        Plan::DropReference => {
            info!(
                "{operand} is still requested elsewhere, only releasing the reference of {key}"
            );
            release(client, request, registry, operand, key).await
        }
        Plan::FullTeardown => {
            info!("{key} held the last reference to {operand}, uninstalling it");
            match teardown(client, request, registry, config, operand).await? {
                // Keep the reference until the registry declares the operand again
                Teardown::Unknown => Ok(()),
                Teardown::LeftInPlace => release(client, request, registry, operand, key).await,
                Teardown::Uninstalled => {
                    release(client, request, registry, operand, key).await?;
                    client
                        .notify(
                            request,
                            EventType::Normal,
                            "Deleted",
                            format!("Uninstalled operator {operand}"),
                        )
                        .await;
                    Ok(())
                }
            }
        }
    }
}

/// Remove custom resources, then the installed version, then the subscription
async fn teardown(
    client: &dyn OperandClient,
    request: &mut OperandRequest,
    registry: &OperandRegistry,
    config: Option<&OperandConfig>,
    operand: &str,
) -> Result<Teardown> {
    let operator = registry.find_operator(operand);
    let namespace = operator.map(|o| o.namespace.as_str());

    if let Some(csv) = client.find_installed_version(operand, namespace).await? {
        let namespace = csv.namespace().unwrap_or_default();
        let examples = csv.alm_examples()?;

        let custom_resources = config
            .map(|c| c.custom_resources_for(operand, &examples, &namespace))
            .unwrap_or_default();
        for resource in &custom_resources {
            debug!("Deleting custom resource {resource}");
            client.delete_custom_resource(resource).await?;
        }

        info!("Deleting the installed version {namespace}/{}", csv.name_any());
        tracked(
            client,
            request,
            ConditionType::Deleting,
            ResourceType::InstalledVersion,
            &csv.name_any(),
            client.delete_installed_version(&csv),
        )
        .await?;
    }

    let Some(operator) = operator else {
        debug!("{operand} is unknown to {}, no subscription to delete", registry.name_any());
        return Ok(Teardown::Unknown);
    };

    let existing = client
        .get_subscription(&operator.namespace, &operator.name)
        .await?;
    if existing.is_some_and(|sub| !is_managed(sub.labels())) {
        warn!(
            "Subscription {}/{} isn't created by this operator, leaving it in place",
            operator.namespace, operator.name
        );
        return Ok(Teardown::LeftInPlace);
    }

    info!("Deleting subscription {}/{}", operator.namespace, operator.name);
    tracked(
        client,
        request,
        ConditionType::Deleting,
        ResourceType::Subscription,
        &operator.name,
        client.delete_subscription(&operator.namespace, &operator.name),
    )
    .await?;

    Ok(Teardown::Uninstalled)
}

/// Forget an operand on both sides of the reference
async fn release(
    client: &dyn OperandClient,
    request: &mut OperandRequest,
    registry: &mut OperandRegistry,
    operand: &str,
    key: &NamespacedReference,
) -> Result<()> {
    if request.clean_member_status(operand) {
        client.update_request_status(request).await?;
    }
    if registry.remove_reference(operand, key) {
        client.update_registry_status(registry).await?;
    }
    Ok(())
}
