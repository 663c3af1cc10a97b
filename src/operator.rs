use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use futures::StreamExt;
use kube::{
    api::ListParams,
    runtime::{
        controller::Action,
        events::Reporter,
        finalizer::{finalizer, Event as Finalizer},
        reflector::ObjectRef,
        watcher::Config,
        Controller,
    },
    Api, Client, ResourceExt,
};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{error, field, info, instrument, warn, Span};

use crate::{
    client::KubeClient,
    reconcilers::{Context, Reconcile},
    resources::{OperandConfig, OperandRegistry, OperandRequest},
    telemetry, Error, Metrics, Result, OPERATOR_NAME,
};

pub const OPERAND_REQUEST_FINALIZER: &str = "operandrequest.operator.ibm.com/cleanup";

/// Diagnostics to be exposed by the web server
#[derive(Clone, Serialize)]
pub struct Diagnostics {
    pub last_event: DateTime<Utc>,
    #[serde(skip)]
    pub reporter: Reporter,
}
impl Default for Diagnostics {
    fn default() -> Self {
        Self {
            last_event: Utc::now(),
            reporter: OPERATOR_NAME.into(),
        }
    }
}

/// State shared between the controller and the web server
#[derive(Clone, Default)]
pub struct State {
    /// Diagnostics populated by the reconciler
    diagnostics: Arc<RwLock<Diagnostics>>,
    /// Metrics registry
    registry: prometheus::Registry,
}

/// State wrapper around the controller outputs for the web server
impl State {
    /// Metrics getter
    pub fn metrics(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }

    /// State getter
    pub async fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.read().await.clone()
    }

    // Create a Controller Context that can update State
    pub(crate) async fn to_context(&self, client: Client) -> Arc<Context> {
        let reporter = self.diagnostics.read().await.reporter.clone();
        Arc::new(Context {
            client: Arc::new(KubeClient::new(client, reporter)),
            metrics: Metrics::default().register(&self.registry).unwrap(),
            diagnostics: self.diagnostics.clone(),
        })
    }
}

pub struct OperandRequestController {
    state: State,
}

/// What the controller hands to every reconciliation
struct Runtime {
    /// Used for finalizer bookkeeping on the request itself
    client: Client,
    context: Arc<Context>,
}

impl OperandRequestController {
    pub fn new(state: State) -> Self {
        Self { state }
    }

    /// Initialize the controller and shared state (given the crds are installed)
    pub async fn run(self) -> Result<(), anyhow::Error> {
        // Error handler for failed reconciliations
        fn error_policy(request: Arc<OperandRequest>, error: &Error, rt: Arc<Runtime>) -> Action {
            rt.context.metrics.reconcile_failure(&request, error);

            // A stale write only needs a fresh read
            if error.is_conflict() {
                warn!("reconcile hit a conflict, retrying: {error}");
                return Action::requeue(Duration::from_secs(1));
            }

            error!("reconcile failed: {:?}", error);
            Action::requeue(Duration::from_secs(5))
        }

        // Get a k8s client for communicating with the cluster
        let client = Client::try_default()
            .await
            .expect("failed to create kube Client");

        // Create fetchers to our CRDs
        let requests = Api::<OperandRequest>::all(client.clone());
        let registries = Api::<OperandRegistry>::all(client.clone());

        // Test that we can actually query for our CRDs (a.k.a. they are installed)
        let probes = [
            requests.list(&ListParams::default().limit(1)).await.err(),
            registries.list(&ListParams::default().limit(1)).await.err(),
            Api::<OperandConfig>::all(client.clone())
                .list(&ListParams::default().limit(1))
                .await
                .err(),
        ];
        if let Some(e) = probes.into_iter().flatten().next() {
            error!("CRD is not queryable; {e:?}. Is the CRD installed?");
            info!("Installation: cargo run --bin crdgen | kubectl apply -f -");
            std::process::exit(1);
        }

        let runtime = Arc::new(Runtime {
            context: self.state.to_context(client.clone()).await,
            client,
        });

        // Create a new k8s controller for our CRD resources
        let watching_config = Config::default().page_size(50).any_semantic();
        Controller::new(requests, watching_config.clone())
            .shutdown_on_signal()
            .watches(registries, watching_config, |registry| {
                // Kick off reconciliation for every request referencing the registry
                registry
                    .referencing_requests()
                    .map(|r| ObjectRef::new(&r.name).within(&r.namespace))
                    .collect::<Vec<_>>()
            })
            .run(reconcile, error_policy, runtime)
            .filter_map(|x| async move { Result::ok(x) })
            .for_each(|_| futures::future::ready(()))
            .await;

        Ok(())
    }
}

/// Reconcile an operand request, releasing what it holds once it is deleted
#[instrument(skip(rt, request), fields(trace_id))]
async fn reconcile(request: Arc<OperandRequest>, rt: Arc<Runtime>) -> Result<Action> {
    let ctx = &rt.context;

    // Add some tracing for debugging's sake
    let trace_id = telemetry::get_trace_id();

    // Take some metrics to see the average reconcile time
    Span::current().record("trace_id", &field::display(&trace_id));
    let _timer = ctx.metrics.count_and_measure();
    ctx.diagnostics.write().await.last_event = Utc::now();

    let name = request.name_any();
    let namespace = request
        .namespace()
        .ok_or_else(|| Error::IllegalRequest(format!("{name} has no namespace")))?;
    let requests: Api<OperandRequest> = Api::namespaced(rt.client.clone(), &namespace);

    info!(r#"Starting OperandRequest reconciliation for "{namespace}/{name}""#);
    finalizer(&requests, OPERAND_REQUEST_FINALIZER, request, |event| async {
        match event {
            Finalizer::Apply(r) => r.reconcile(ctx.clone()).await,
            Finalizer::Cleanup(r) => r.cleanup(ctx.clone()).await,
        }
    })
    .await
    .map_err(|e| Error::FinalizerError(Box::new(e)))
}
