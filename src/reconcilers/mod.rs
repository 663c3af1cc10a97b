use std::sync::Arc;

use async_trait::async_trait;
use kube::{runtime::controller::Action, CustomResourceExt, ResourceExt};
use tokio::sync::RwLock;

use crate::{client::OperandClient, operator::Diagnostics, Error, Metrics};

mod decommission;
mod guard;
pub mod request;
mod subscription;
mod tracked;

#[cfg(test)]
mod fake;

/// The context passed around
pub struct Context {
    /// Access to the cluster objects the reconcilers read and write
    pub client: Arc<dyn OperandClient>,

    /// Diagnostics read by the web server
    pub diagnostics: Arc<RwLock<Diagnostics>>,

    /// Prometheus metrics
    pub metrics: Metrics,
}

/// A resource that can be reconciled by a controller
#[async_trait]
pub(crate) trait Reconcile
where
    Self: CustomResourceExt + ResourceExt,
{
    /// Attempt to reconcile a resource
    async fn reconcile(&self, context: Arc<Context>) -> Result<Action, Error>;

    /// Release everything held on behalf of a resource that is being deleted.
    async fn cleanup(&self, context: Arc<Context>) -> Result<Action, Error>;
}
