use std::{collections::BTreeSet, sync::Arc, time::Duration};

use kube::{
    runtime::{controller::Action, events::EventType},
    ResourceExt as _,
};
use tracing::{debug, info, warn};

use super::{
    decommission::{decommission, operands_to_decommission, Mode},
    guard::admit,
    subscription::converge_subscription,
    Context, Reconcile,
};
use crate::{
    client::OperandClient,
    resources::{
        Condition, ConditionType, NamespacedReference, OperandRegistry, OperandRequest,
        RequestGroup, ResourceType,
    },
    Error, Result,
};

#[async_trait::async_trait]
impl Reconcile for OperandRequest {
    async fn reconcile(&self, context: Arc<Context>) -> Result<Action, Error> {
        let client = context.client.as_ref();
        let key = request_key(self)?;

        // Work on a copy so every status write can refresh its resource version
        let mut request = self.clone();

        info!("Reconciling operators for {key}");
        converge(client, &mut request, &key).await?;
        decommission_unrequested(client, &mut request, &key).await?;
        info!("Finished reconciling operators for {key}");

        // If no events were received, check back every 5 minutes
        Ok(Action::requeue(Duration::from_secs(5 * 60)))
    }

    async fn cleanup(&self, context: Arc<Context>) -> Result<Action, Error> {
        let client = context.client.as_ref();
        let key = request_key(self)?;
        let mut request = self.clone();

        // Everything this request may hold a reference to
        let operands: BTreeSet<String> = request
            .members()
            .chain(request.requested_operands())
            .map(String::from)
            .collect();

        info!("Releasing {} operands held by {key}", operands.len());
        for group in self.spec.requests.iter() {
            decommission_group(client, &mut request, group, &operands, &key, Mode::Finalize)
                .await?;
        }

        client
            .notify(
                &request,
                EventType::Normal,
                "DeleteRequested",
                format!("Delete `{}`", request.name_any()),
            )
            .await;

        Ok(Action::await_change())
    }
}

fn request_key(request: &OperandRequest) -> Result<NamespacedReference> {
    request
        .key()
        .ok_or_else(|| Error::IllegalRequest(format!("{} has no namespace", request.name_any())))
}

/// Install or update every requested operand
async fn converge(
    client: &dyn OperandClient,
    request: &mut OperandRequest,
    key: &NamespacedReference,
) -> Result<()> {
    for group in request.spec.requests.clone() {
        let Some(mut registry) = client
            .get_registry(&group.registry, &group.registry_namespace)
            .await?
        else {
            report_missing_registry(client, request, &group).await?;
            continue;
        };

        for operand in &group.operands {
            let Some(operator) = admit(client, request, &registry, &operand.name).await? else {
                continue;
            };

            let state = converge_subscription(client, request, &operator).await?;
            if state.is_managed() {
                register(client, request, &mut registry, &operator.name, key).await?;
            }
        }
    }

    Ok(())
}

async fn report_missing_registry(
    client: &dyn OperandClient,
    request: &mut OperandRequest,
    group: &RequestGroup,
) -> Result<()> {
    warn!(
        "OperandRegistry {}/{} not found",
        group.registry_namespace, group.registry
    );

    request.set_condition(Condition::new(
        ConditionType::NotFound,
        true,
        ResourceType::Registry,
        &group.registry,
    ));
    client.update_request_status(request).await?;
    client
        .notify(
            request,
            EventType::Warning,
            "NotFound",
            format!(
                "NotFound OperandRegistry {} from the namespace {}",
                group.registry, group.registry_namespace
            ),
        )
        .await;

    Ok(())
}

/// Record that the request depends on an installed operand
async fn register(
    client: &dyn OperandClient,
    request: &mut OperandRequest,
    registry: &mut OperandRegistry,
    operand: &str,
    key: &NamespacedReference,
) -> Result<()> {
    if registry.add_reference(operand, key) {
        debug!("Adding {key} to the references of {operand}");
        client.update_registry_status(registry).await?;
    }
    if request.add_member(operand) {
        client.update_request_status(request).await?;
    }
    Ok(())
}

/// Release operands that the request no longer asks for
async fn decommission_unrequested(
    client: &dyn OperandClient,
    request: &mut OperandRequest,
    key: &NamespacedReference,
) -> Result<()> {
    let mut registries = Vec::with_capacity(request.spec.requests.len());
    for group in &request.spec.requests {
        if let Some(registry) = client
            .get_registry(&group.registry, &group.registry_namespace)
            .await?
        {
            registries.push(registry);
        }
    }

    let unrequested = operands_to_decommission(request, &registries, key);
    if unrequested.is_empty() {
        return Ok(());
    }

    debug!("Operands to decommission for {key}: {unrequested:?}");
    for group in request.spec.requests.clone() {
        decommission_group(client, request, &group, &unrequested, key, Mode::Unrequested).await?;
    }

    Ok(())
}

/// Decommission operands against a freshly read copy of one group's registry
async fn decommission_group(
    client: &dyn OperandClient,
    request: &mut OperandRequest,
    group: &RequestGroup,
    operands: &BTreeSet<String>,
    key: &NamespacedReference,
    mode: Mode,
) -> Result<()> {
    let Some(mut registry) = client
        .get_registry(&group.registry, &group.registry_namespace)
        .await?
    else {
        debug!(
            "OperandRegistry {}/{} is gone, nothing to release",
            group.registry_namespace, group.registry
        );
        return Ok(());
    };
    let config = client
        .get_config(&group.registry, &group.registry_namespace)
        .await?;

    for operand in operands {
        decommission(
            client,
            request,
            &mut registry,
            config.as_ref(),
            operand,
            key,
            mode,
        )
        .await?;
    }

    Ok(())
}
