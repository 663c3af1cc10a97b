use async_trait::async_trait;
use http::StatusCode;
use k8s_openapi::api::core::v1::Namespace;
use kube::{
    api::{
        ApiResource, DeleteParams, DynamicObject, GroupVersionKind, ListParams, Patch,
        PatchParams, PostParams,
    },
    runtime::events::{Event, EventType, Recorder, Reporter},
    Api, Client, Resource as _, ResourceExt as _,
};
use serde_json::json;
use tracing::{debug, warn};

use crate::{
    resources::{
        ClusterServiceVersion, CustomResourceRef, OperandConfig, OperandRegistry, OperandRequest,
        OperatorGroup, Subscription,
    },
    Error, Result, OPERATOR_NAME, OPREQ_CONTROL_LABEL,
};

/// Everything the reconcilers need from the cluster.
///
/// Creates treat an existing object as success and deletes treat a missing
/// object as success. Status writes carry the object's resource version and
/// fail with [`Error::Conflict`] when it is stale.
#[async_trait]
pub trait OperandClient: Send + Sync {
    async fn get_registry(&self, name: &str, namespace: &str) -> Result<Option<OperandRegistry>>;

    async fn get_config(&self, name: &str, namespace: &str) -> Result<Option<OperandConfig>>;

    /// Persist the status of a request, refreshing its resource version
    async fn update_request_status(&self, request: &mut OperandRequest) -> Result<()>;

    /// Persist the status of a registry, refreshing its resource version
    async fn update_registry_status(&self, registry: &mut OperandRegistry) -> Result<()>;

    async fn get_subscription(&self, namespace: &str, name: &str) -> Result<Option<Subscription>>;

    async fn create_namespace(&self, namespace: &Namespace) -> Result<()>;

    async fn list_operator_groups(&self, namespace: &str) -> Result<Vec<OperatorGroup>>;

    async fn create_operator_group(&self, group: &OperatorGroup) -> Result<()>;

    async fn create_subscription(&self, subscription: &Subscription) -> Result<()>;

    /// Move a subscription to the channel in its spec, leaving every other field as is
    async fn update_subscription(&self, subscription: &Subscription) -> Result<()>;

    async fn delete_subscription(&self, namespace: &str, name: &str) -> Result<()>;

    /// The installed version produced by the managed subscription of an operand.
    ///
    /// Only subscriptions in `namespace` are considered when it is known.
    async fn find_installed_version(
        &self,
        operand: &str,
        namespace: Option<&str>,
    ) -> Result<Option<ClusterServiceVersion>>;

    async fn delete_installed_version(&self, csv: &ClusterServiceVersion) -> Result<()>;

    async fn delete_custom_resource(&self, resource: &CustomResourceRef) -> Result<()>;

    /// Publish an event about a request. Failures are only logged.
    async fn notify(&self, request: &OperandRequest, type_: EventType, reason: &str, note: String);
}

/// An [`OperandClient`] talking to the Kubernetes API
#[derive(Clone)]
pub struct KubeClient {
    client: Client,
    reporter: Reporter,
}

impl KubeClient {
    pub fn new(client: Client, reporter: Reporter) -> Self {
        Self { client, reporter }
    }
}

fn is_status(e: &kube::Error, code: StatusCode, reason: &str) -> bool {
    matches!(e, kube::Error::Api(ae) if ae.code == code.as_u16() && ae.reason == reason)
}

fn persistence_error(object: String, e: kube::Error) -> Error {
    if is_status(&e, StatusCode::CONFLICT, "Conflict") {
        Error::Conflict(object)
    } else if is_status(&e, StatusCode::NOT_FOUND, "NotFound") {
        Error::NotFound(object)
    } else {
        Error::Persistence(object, e)
    }
}

/// A failed write to an installation object, keeping stale writes retryable
fn remote_error(object: String, e: kube::Error) -> Error {
    if is_status(&e, StatusCode::CONFLICT, "Conflict") {
        Error::Conflict(object)
    } else {
        Error::RemoteAction(object, e)
    }
}

/// Treat an object that already exists as created
fn ignore_already_exists<T>(object: String, res: Result<T, kube::Error>) -> Result<()> {
    match res {
        Ok(_) => Ok(()),
        Err(e) if is_status(&e, StatusCode::CONFLICT, "AlreadyExists") => {
            debug!("{object} already exists");
            Ok(())
        }
        Err(e) => Err(Error::RemoteAction(object, e)),
    }
}

/// Treat an object that is already gone as deleted
fn ignore_not_found<T>(object: String, res: Result<T, kube::Error>) -> Result<()> {
    match res {
        Ok(_) => Ok(()),
        Err(e) if is_status(&e, StatusCode::NOT_FOUND, "NotFound") => {
            debug!("{object} is already gone");
            Ok(())
        }
        Err(e) => Err(Error::RemoteAction(object, e)),
    }
}

fn post_params() -> PostParams {
    PostParams {
        field_manager: Some(OPERATOR_NAME.into()),

        ..Default::default()
    }
}

#[async_trait]
impl OperandClient for KubeClient {
    async fn get_registry(&self, name: &str, namespace: &str) -> Result<Option<OperandRegistry>> {
        Api::<OperandRegistry>::namespaced(self.client.clone(), namespace)
            .get_opt(name)
            .await
            .map_err(Error::KubeError)
    }

    async fn get_config(&self, name: &str, namespace: &str) -> Result<Option<OperandConfig>> {
        Api::<OperandConfig>::namespaced(self.client.clone(), namespace)
            .get_opt(name)
            .await
            .map_err(Error::KubeError)
    }

    async fn update_request_status(&self, request: &mut OperandRequest) -> Result<()> {
        let name = request.name_any();
        let namespace = request
            .namespace()
            .ok_or_else(|| Error::IllegalRequest(format!("{name} has no namespace")))?;

        let api = Api::<OperandRequest>::namespaced(self.client.clone(), &namespace);
        let data = serde_json::to_vec(request).map_err(Error::SerializationError)?;
        let updated = api
            .replace_status(&name, &post_params(), data)
            .await
            .map_err(|e| persistence_error(format!("OperandRequest {namespace}/{name}"), e))?;

        request.metadata.resource_version = updated.metadata.resource_version;
        Ok(())
    }

    async fn update_registry_status(&self, registry: &mut OperandRegistry) -> Result<()> {
        let name = registry.name_any();
        let namespace = registry.namespace().unwrap_or_default();

        let api = Api::<OperandRegistry>::namespaced(self.client.clone(), &namespace);
        let data = serde_json::to_vec(registry).map_err(Error::SerializationError)?;
        let updated = api
            .replace_status(&name, &post_params(), data)
            .await
            .map_err(|e| persistence_error(format!("OperandRegistry {namespace}/{name}"), e))?;

        registry.metadata.resource_version = updated.metadata.resource_version;
        Ok(())
    }

    async fn get_subscription(&self, namespace: &str, name: &str) -> Result<Option<Subscription>> {
        Api::<Subscription>::namespaced(self.client.clone(), namespace)
            .get_opt(name)
            .await
            .map_err(Error::KubeError)
    }

    async fn create_namespace(&self, namespace: &Namespace) -> Result<()> {
        let res = Api::<Namespace>::all(self.client.clone())
            .create(&post_params(), namespace)
            .await;
        ignore_already_exists(format!("Namespace {}", namespace.name_any()), res)
    }

    async fn list_operator_groups(&self, namespace: &str) -> Result<Vec<OperatorGroup>> {
        let groups = Api::<OperatorGroup>::namespaced(self.client.clone(), namespace)
            .list(&ListParams::default())
            .await
            .map_err(Error::KubeError)?;
        Ok(groups.items)
    }

    async fn create_operator_group(&self, group: &OperatorGroup) -> Result<()> {
        let namespace = group.namespace().unwrap_or_default();
        let res = Api::<OperatorGroup>::namespaced(self.client.clone(), &namespace)
            .create(&post_params(), group)
            .await;
        ignore_already_exists(
            format!("OperatorGroup {namespace}/{}", group.name_any()),
            res,
        )
    }

    async fn create_subscription(&self, subscription: &Subscription) -> Result<()> {
        let namespace = subscription.namespace().unwrap_or_default();
        let res = Api::<Subscription>::namespaced(self.client.clone(), &namespace)
            .create(&post_params(), subscription)
            .await;
        ignore_already_exists(
            format!("Subscription {namespace}/{}", subscription.name_any()),
            res,
        )
    }

    async fn update_subscription(&self, subscription: &Subscription) -> Result<()> {
        let name = subscription.name_any();
        let namespace = subscription.namespace().unwrap_or_default();
        let params = PatchParams {
            field_manager: Some(OPERATOR_NAME.into()),

            ..Default::default()
        };
        let patch = Patch::Merge(json!({
            "metadata": { "resourceVersion": subscription.resource_version() },
            "spec": { "channel": subscription.spec.channel },
        }));

        Api::<Subscription>::namespaced(self.client.clone(), &namespace)
            .patch(&name, &params, &patch)
            .await
            .map_err(|e| remote_error(format!("Subscription {namespace}/{name}"), e))?;
        Ok(())
    }

    async fn delete_subscription(&self, namespace: &str, name: &str) -> Result<()> {
        let res = Api::<Subscription>::namespaced(self.client.clone(), namespace)
            .delete(name, &DeleteParams::default())
            .await;
        ignore_not_found(format!("Subscription {namespace}/{name}"), res)
    }

    async fn find_installed_version(
        &self,
        operand: &str,
        namespace: Option<&str>,
    ) -> Result<Option<ClusterServiceVersion>> {
        let subscriptions = match namespace {
            Some(ns) => Api::<Subscription>::namespaced(self.client.clone(), ns),
            None => Api::<Subscription>::all(self.client.clone()),
        };
        let managed = ListParams::default().labels(OPREQ_CONTROL_LABEL);
        let subscriptions = subscriptions
            .list(&managed)
            .await
            .map_err(Error::KubeError)?;

        let Some(subscription) = subscriptions.into_iter().find(|s| s.name_any() == operand)
        else {
            return Ok(None);
        };
        let Some(csv) = subscription.installed_csv() else {
            return Ok(None);
        };

        let namespace = subscription.namespace().unwrap_or_default();
        Api::<ClusterServiceVersion>::namespaced(self.client.clone(), &namespace)
            .get_opt(csv)
            .await
            .map_err(Error::KubeError)
    }

    async fn delete_installed_version(&self, csv: &ClusterServiceVersion) -> Result<()> {
        let name = csv.name_any();
        let namespace = csv.namespace().unwrap_or_default();
        let res = Api::<ClusterServiceVersion>::namespaced(self.client.clone(), &namespace)
            .delete(&name, &DeleteParams::default())
            .await;
        ignore_not_found(format!("ClusterServiceVersion {namespace}/{name}"), res)
    }

    async fn delete_custom_resource(&self, resource: &CustomResourceRef) -> Result<()> {
        let (group, version) = resource
            .api_version
            .split_once('/')
            .unwrap_or(("", resource.api_version.as_str()));
        let gvk = GroupVersionKind::gvk(group, version, &resource.kind);
        let api_resource = ApiResource::from_gvk(&gvk);

        let res = Api::<DynamicObject>::namespaced_with(
            self.client.clone(),
            &resource.namespace,
            &api_resource,
        )
        .delete(&resource.name, &DeleteParams::default())
        .await;
        ignore_not_found(resource.to_string(), res)
    }

    async fn notify(&self, request: &OperandRequest, type_: EventType, reason: &str, note: String) {
        let recorder = Recorder::new(
            self.client.clone(),
            self.reporter.clone(),
            request.object_ref(&()),
        );

        let published = recorder
            .publish(Event {
                type_,
                reason: reason.into(),
                note: Some(note),
                action: "Reconciling".into(),
                secondary: None,
            })
            .await;

        if let Err(e) = published {
            warn!("Failed to publish {reason} event for {}: {e}", request.name_any());
        }
    }
}
