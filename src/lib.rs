use thiserror::Error;

/// Expose all controller components used by main
pub mod operator;
pub mod resources;

/// The collaborator contract used by the reconcilers
pub mod client;

// Internal only
mod manifests;
mod reconcilers;

/// Log and trace integrations
pub mod telemetry;

/// Metrics
mod metrics;
pub use metrics::Metrics;

/// Label marking cluster objects created and managed by this operator
pub const OPREQ_CONTROL_LABEL: &str = "operator.ibm.com/opreq-control";

/// Field manager and event reporter name
pub const OPERATOR_NAME: &str = "operand-deployment-lifecycle-manager";

#[derive(Error, Debug)]
pub enum Error {
    #[error("SerializationError: {0}")]
    SerializationError(#[source] serde_json::Error),

    #[error("Kube Error: {0}")]
    KubeError(#[source] kube::Error),

    #[error("Finalizer Error: {0}")]
    // NB: awkward type because finalizer::Error embeds the reconciler error (which is this)
    // so boxing this error to break cycles
    FinalizerError(#[source] Box<kube::runtime::finalizer::Error<Error>>),

    #[error("NotFound: {0}")]
    NotFound(String),

    /// A write was rejected because the object changed since it was read.
    #[error("Conflict: {0} was modified concurrently")]
    Conflict(String),

    #[error("Remote action on {0} failed: {1}")]
    RemoteAction(String, #[source] kube::Error),

    #[error("Persisting status of {0} failed: {1}")]
    Persistence(String, #[source] kube::Error),

    #[error("IllegalRequest: {0}")]
    IllegalRequest(String),
}
pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn metric_label(&self) -> String {
        let label = match self {
            Error::SerializationError(_) => "serialization",
            Error::KubeError(_) => "kube",
            Error::FinalizerError(_) => "finalizer",
            Error::NotFound(_) => "notfound",
            Error::Conflict(_) => "conflict",
            Error::RemoteAction(..) => "remoteaction",
            Error::Persistence(..) => "persistence",
            Error::IllegalRequest(_) => "illegalrequest",
        };
        label.to_string()
    }

    /// Whether the failure came from a stale write, possibly wrapped by the finalizer
    pub fn is_conflict(&self) -> bool {
        match self {
            Error::Conflict(_) => true,
            Error::FinalizerError(e) => matches!(
                e.as_ref(),
                kube::runtime::finalizer::Error::ApplyFailed(inner)
                    | kube::runtime::finalizer::Error::CleanupFailed(inner)
                    if inner.is_conflict()
            ),
            _ => false,
        }
    }
}
