use kube::{runtime::events::EventType, ResourceExt as _};
use tracing::{debug, info};

use super::tracked::tracked;
use crate::{
    client::OperandClient,
    manifests::{is_managed, InstallationObjects},
    resources::{ConditionType, OperandRequest, Operator, ResourceType},
    Result,
};

/// What converging a subscription did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SubscriptionState {
    Created,
    Updated,

    /// Managed by this operator and already on the requested channel.
    Converged,

    /// Created by someone else, so left alone.
    Unmanaged,
}

impl SubscriptionState {
    pub(crate) fn is_managed(self) -> bool {
        self != SubscriptionState::Unmanaged
    }
}

/// Make sure an operator's subscription exists on the channel its definition asks for
pub(crate) async fn converge_subscription(
    client: &dyn OperandClient,
    request: &mut OperandRequest,
    operator: &Operator,
) -> Result<SubscriptionState> {
    let Some(mut found) = client
        .get_subscription(&operator.namespace, &operator.name)
        .await?
    else {
        create_subscription(client, request, operator).await?;
        return Ok(SubscriptionState::Created);
    };

    if !is_managed(found.labels()) {
        debug!(
            "Subscription {}/{} isn't created by this operator. Ignore update/delete it.",
            operator.namespace, operator.name
        );
        return Ok(SubscriptionState::Unmanaged);
    }

    if found.spec.channel.as_deref() == Some(operator.channel.as_str()) {
        return Ok(SubscriptionState::Converged);
    }

    info!(
        "Updating subscription {}/{} to channel {}",
        operator.namespace, operator.name, operator.channel
    );
    found.spec.channel = Some(operator.channel.clone());
    tracked(
        client,
        request,
        ConditionType::Updating,
        ResourceType::Subscription,
        &operator.name,
        client.update_subscription(&found),
    )
    .await?;

    Ok(SubscriptionState::Updated)
}

async fn create_subscription(
    client: &dyn OperandClient,
    request: &mut OperandRequest,
    operator: &Operator,
) -> Result<()> {
    let objects = InstallationObjects::for_operator(operator);

    debug!("Creating the namespace {} for subscription {}", operator.namespace, operator.name);
    client.create_namespace(&objects.namespace).await?;

    // Never add a second operator group to a namespace
    if client
        .list_operator_groups(&operator.namespace)
        .await?
        .is_empty()
    {
        debug!("Creating the operator group for subscription {}", operator.name);
        client.create_operator_group(&objects.operator_group).await?;
    }

    info!("Creating subscription {}/{}", operator.namespace, operator.name);
    tracked(
        client,
        request,
        ConditionType::Creating,
        ResourceType::Subscription,
        &operator.name,
        client.create_subscription(&objects.subscription),
    )
    .await?;

    client
        .notify(
            request,
            EventType::Normal,
            "Created",
            format!(
                "Created subscription {}/{}",
                operator.namespace,
                objects.subscription.name_any()
            ),
        )
        .await;

    Ok(())
}
