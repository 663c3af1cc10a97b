//! An in-memory cluster recording every remote call, for exercising the reconcilers.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use kube::{core::ErrorResponse, runtime::events::EventType, ResourceExt as _};
use tokio::sync::RwLock;

use super::Context;
use crate::{
    client::OperandClient,
    manifests::is_managed,
    resources::{
        ClusterServiceVersion, CustomResourceRef, OperandConfig, OperandRegistry, OperandRequest,
        OperatorGroup, Subscription,
    },
    Error, Metrics, Result,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    UpdateRequestStatus(String),
    UpdateRegistryStatus(String),
    CreateNamespace(String),
    CreateOperatorGroup(String),
    CreateSubscription(String),
    UpdateSubscription(String),
    DeleteSubscription(String),
    DeleteInstalledVersion(String),
    DeleteCustomResource(String),
    Notify(String),
}

impl Call {
    /// Whether the call changes an installation object
    pub fn is_mutating(&self) -> bool {
        !matches!(
            self,
            Call::UpdateRequestStatus(_) | Call::UpdateRegistryStatus(_) | Call::Notify(_)
        )
    }
}

type Key = (String, String);

#[derive(Default)]
pub struct ClusterState {
    pub registries: BTreeMap<Key, OperandRegistry>,
    pub configs: BTreeMap<Key, OperandConfig>,

    /// Last persisted copy of every request
    pub requests: BTreeMap<Key, OperandRequest>,
    pub namespaces: BTreeSet<String>,
    pub operator_groups: BTreeMap<String, Vec<OperatorGroup>>,
    pub subscriptions: BTreeMap<Key, Subscription>,
    pub csvs: BTreeMap<Key, ClusterServiceVersion>,
    pub custom_resources: BTreeSet<String>,

    pub calls: Vec<Call>,

    /// Calls which fail with a server error
    pub failing: Vec<Call>,
}

#[derive(Default)]
pub struct FakeCluster {
    state: Mutex<ClusterState>,
}

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

fn next_version(current: Option<&str>) -> String {
    let version: u64 = current.and_then(|v| v.parse().ok()).unwrap_or_default();
    (version + 1).to_string()
}

impl FakeCluster {
    pub fn context(self: &Arc<Self>) -> Arc<Context> {
        Arc::new(Context {
            client: self.clone(),
            diagnostics: Arc::new(RwLock::new(Default::default())),
            metrics: Metrics::default(),
        })
    }

    pub fn with_state<T>(&self, f: impl FnOnce(&mut ClusterState) -> T) -> T {
        f(&mut self.state.lock().unwrap())
    }

    pub fn calls(&self) -> Vec<Call> {
        self.with_state(|s| s.calls.clone())
    }

    pub fn mutating_calls(&self) -> Vec<Call> {
        self.calls().into_iter().filter(Call::is_mutating).collect()
    }

    pub fn clear_calls(&self) {
        self.with_state(|s| s.calls.clear())
    }

    pub fn add_registry(&self, mut registry: OperandRegistry) {
        registry.metadata.resource_version = Some("1".into());
        let k = key(&registry.namespace().unwrap(), &registry.name_any());
        self.with_state(|s| s.registries.insert(k, registry));
    }

    pub fn registry(&self, namespace: &str, name: &str) -> OperandRegistry {
        self.with_state(|s| s.registries[&key(namespace, name)].clone())
    }

    pub fn add_config(&self, config: OperandConfig) {
        let k = key(&config.namespace().unwrap(), &config.name_any());
        self.with_state(|s| s.configs.insert(k, config));
    }

    pub fn add_subscription(&self, subscription: Subscription) {
        let k = key(&subscription.namespace().unwrap(), &subscription.name_any());
        self.with_state(|s| s.subscriptions.insert(k, subscription));
    }

    pub fn subscription(&self, namespace: &str, name: &str) -> Option<Subscription> {
        self.with_state(|s| s.subscriptions.get(&key(namespace, name)).cloned())
    }

    pub fn add_csv(&self, csv: ClusterServiceVersion) {
        let k = key(&csv.namespace().unwrap(), &csv.name_any());
        self.with_state(|s| s.csvs.insert(k, csv));
    }

    pub fn has_csv(&self, namespace: &str, name: &str) -> bool {
        self.with_state(|s| s.csvs.contains_key(&key(namespace, name)))
    }

    pub fn add_operator_group(&self, group: OperatorGroup) {
        let namespace = group.namespace().unwrap();
        self.with_state(|s| s.operator_groups.entry(namespace).or_default().push(group));
    }

    pub fn add_custom_resource(&self, resource: &CustomResourceRef) {
        self.with_state(|s| s.custom_resources.insert(resource.to_string()));
    }

    pub fn has_custom_resource(&self, resource: &CustomResourceRef) -> bool {
        self.with_state(|s| s.custom_resources.contains(&resource.to_string()))
    }

    /// The last persisted copy of a request
    pub fn request(&self, namespace: &str, name: &str) -> Option<OperandRequest> {
        self.with_state(|s| s.requests.get(&key(namespace, name)).cloned())
    }

    pub fn fail_on(&self, call: Call) {
        self.with_state(|s| s.failing.push(call))
    }

    /// Record a call, failing it if requested
    fn record(&self, call: Call) -> Result<()> {
        self.with_state(|s| {
            s.calls.push(call.clone());
            if s.failing.contains(&call) {
                let e = kube::Error::Api(ErrorResponse {
                    status: "Failure".into(),
                    message: "injected failure".into(),
                    reason: "InternalError".into(),
                    code: 500,
                });
                return Err(Error::RemoteAction(format!("{call:?}"), e));
            }
            Ok(())
        })
    }
}

#[async_trait]
impl OperandClient for FakeCluster {
    async fn get_registry(&self, name: &str, namespace: &str) -> Result<Option<OperandRegistry>> {
        Ok(self.with_state(|s| s.registries.get(&key(namespace, name)).cloned()))
    }

    async fn get_config(&self, name: &str, namespace: &str) -> Result<Option<OperandConfig>> {
        Ok(self.with_state(|s| s.configs.get(&key(namespace, name)).cloned()))
    }

    async fn update_request_status(&self, request: &mut OperandRequest) -> Result<()> {
        self.record(Call::UpdateRequestStatus(request.name_any()))?;

        let version = next_version(request.metadata.resource_version.as_deref());
        request.metadata.resource_version = Some(version);
        let k = key(&request.namespace().unwrap(), &request.name_any());
        self.with_state(|s| s.requests.insert(k, request.clone()));
        Ok(())
    }

    async fn update_registry_status(&self, registry: &mut OperandRegistry) -> Result<()> {
        let name = registry.name_any();
        self.record(Call::UpdateRegistryStatus(name.clone()))?;

        let k = key(&registry.namespace().unwrap(), &name);
        self.with_state(|s| {
            let stored = s
                .registries
                .get_mut(&k)
                .ok_or_else(|| Error::NotFound(name.clone()))?;
            if stored.metadata.resource_version != registry.metadata.resource_version {
                return Err(Error::Conflict(name));
            }

            let version = next_version(stored.metadata.resource_version.as_deref());
            stored.status = registry.status.clone();
            stored.metadata.resource_version = Some(version.clone());
            registry.metadata.resource_version = Some(version);
            Ok(())
        })
    }

    async fn get_subscription(&self, namespace: &str, name: &str) -> Result<Option<Subscription>> {
        Ok(self.subscription(namespace, name))
    }

    async fn create_namespace(&self, namespace: &Namespace) -> Result<()> {
        let name = namespace.name_any();
        self.record(Call::CreateNamespace(name.clone()))?;
        self.with_state(|s| s.namespaces.insert(name));
        Ok(())
    }

    async fn list_operator_groups(&self, namespace: &str) -> Result<Vec<OperatorGroup>> {
        Ok(self.with_state(|s| {
            s.operator_groups
                .get(namespace)
                .cloned()
                .unwrap_or_default()
        }))
    }

    async fn create_operator_group(&self, group: &OperatorGroup) -> Result<()> {
        self.record(Call::CreateOperatorGroup(group.namespace().unwrap()))?;
        self.add_operator_group(group.clone());
        Ok(())
    }

    async fn create_subscription(&self, subscription: &Subscription) -> Result<()> {
        self.record(Call::CreateSubscription(subscription.name_any()))?;
        let k = key(&subscription.namespace().unwrap(), &subscription.name_any());
        self.with_state(|s| {
            s.subscriptions.entry(k).or_insert(subscription.clone());
        });
        Ok(())
    }

    async fn update_subscription(&self, subscription: &Subscription) -> Result<()> {
        self.record(Call::UpdateSubscription(subscription.name_any()))?;
        self.add_subscription(subscription.clone());
        Ok(())
    }

    async fn delete_subscription(&self, namespace: &str, name: &str) -> Result<()> {
        self.record(Call::DeleteSubscription(name.to_string()))?;
        self.with_state(|s| s.subscriptions.remove(&key(namespace, name)));
        Ok(())
    }

    async fn find_installed_version(
        &self,
        operand: &str,
        namespace: Option<&str>,
    ) -> Result<Option<ClusterServiceVersion>> {
        Ok(self.with_state(|s| {
            let subscription = s
                .subscriptions
                .values()
                .filter(|sub| is_managed(sub.labels()))
                .filter(|sub| namespace.map_or(true, |ns| sub.namespace().as_deref() == Some(ns)))
                .find(|sub| sub.name_any() == operand)?;
            let csv = subscription.installed_csv()?;
            s.csvs
                .get(&key(&subscription.namespace().unwrap(), csv))
                .cloned()
        }))
    }

    async fn delete_installed_version(&self, csv: &ClusterServiceVersion) -> Result<()> {
        self.record(Call::DeleteInstalledVersion(csv.name_any()))?;
        self.with_state(|s| s.csvs.remove(&key(&csv.namespace().unwrap(), &csv.name_any())));
        Ok(())
    }

    async fn delete_custom_resource(&self, resource: &CustomResourceRef) -> Result<()> {
        self.record(Call::DeleteCustomResource(resource.to_string()))?;
        self.with_state(|s| s.custom_resources.remove(&resource.to_string()));
        Ok(())
    }

    async fn notify(&self, _request: &OperandRequest, _type: EventType, reason: &str, _note: String) {
        self.with_state(|s| s.calls.push(Call::Notify(reason.to_string())));
    }
}
