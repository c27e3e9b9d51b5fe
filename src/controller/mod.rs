//! The reconciliation core and its persistence seam

mod managed;
mod registry;

pub use managed::{
    error_policy, reconcile, ConnectionDetails, ConnectionPublisher, Connector, ControllerOptions,
    Creation, ExternalClient, Initializer, ManagedContext, Observation,
};
pub use registry::{KubeRegistry, Registry};
