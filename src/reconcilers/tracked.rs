use std::future::Future;

use tracing::warn;

use crate::{
    client::OperandClient,
    resources::{Condition, ConditionType, OperandRequest, ResourceType},
    Result,
};

/// Run a remote action with its condition recorded around it.
///
/// The condition is persisted as `True` before the action starts. If the
/// action fails, the condition is flipped to `False` and persisted before the
/// action's error is returned. A failure to persist always wins.
pub(crate) async fn tracked<F>(
    client: &dyn OperandClient,
    request: &mut OperandRequest,
    transition: ConditionType,
    resource_type: ResourceType,
    resource_name: &str,
    action: F,
) -> Result<()>
where
    F: Future<Output = Result<()>> + Send,
{
    request.set_condition(Condition::new(
        transition,
        true,
        resource_type,
        resource_name,
    ));
    client.update_request_status(request).await?;

    if let Err(e) = action.await {
        warn!("{transition} {resource_type} {resource_name} failed: {e}");
        request.set_condition(Condition::new(
            transition,
            false,
            resource_type,
            resource_name,
        ));
        client.update_request_status(request).await?;

        return Err(e);
    }

    Ok(())
}
