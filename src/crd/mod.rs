//! Custom Resource Definitions for managed AWS resources
//!
//! Each managed kind follows the same shape: a `forProvider` block with the
//! desired parameters, an `atProvider` block with cloud-side observations,
//! and the shared condition/policy machinery from [`types`].

mod load_balancer;
mod provider_config;
mod role;
mod role_policy_attachment;
pub mod types;

pub use load_balancer::{
    LoadBalancer, LoadBalancerObservation, LoadBalancerParameters, LoadBalancerSpec,
    LoadBalancerStatus, LB_STATE_ACTIVE,
};
pub use provider_config::{ProviderConfig, ProviderConfigSpec};
pub use role::{Role, RoleObservation, RoleParameters, RoleSpec, RoleStatus};
pub use role_policy_attachment::{
    RolePolicyAttachment, RolePolicyAttachmentObservation, RolePolicyAttachmentParameters,
    RolePolicyAttachmentSpec, RolePolicyAttachmentStatus,
};
pub use types::{
    condition, reason, Condition, ConditionStatus, DeletionPolicy, ManagementPolicies,
    ManagementPolicy, Reference, SecretRef, Selector,
};

use std::collections::BTreeMap;

use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::EXTERNAL_NAME_ANNOTATION;

/// A record the reconciliation core can drive.
///
/// Implemented by every managed CRD. The external name lives in an
/// annotation so renaming the cloud-side resource never requires a schema
/// change, and so the identity survives `kubectl get -o yaml | apply`
/// round trips.
pub trait Managed:
    Resource<DynamicType = ()>
    + Clone
    + std::fmt::Debug
    + DeserializeOwned
    + Serialize
    + Send
    + Sync
    + 'static
{
    /// The authoritative cloud-side identifier, if stamped
    fn external_name(&self) -> Option<String> {
        self.annotations()
            .get(EXTERNAL_NAME_ANNOTATION)
            .filter(|v| !v.is_empty())
            .cloned()
    }

    /// Stamp the external name annotation.
    ///
    /// Callers must not overwrite a non-empty external name; the
    /// reconciliation core guards this invariant.
    fn set_external_name(&mut self, value: &str) {
        self.annotations_mut()
            .insert(EXTERNAL_NAME_ANNOTATION.to_string(), value.to_string());
    }

    /// What happens to the external resource when the record is removed
    fn deletion_policy(&self) -> DeletionPolicy;

    /// Declared management policies (empty = full management)
    fn management_policies(&self) -> ManagementPolicies;

    /// Current status conditions
    fn conditions(&self) -> &[Condition];

    /// Mutable access to status conditions, creating the status block on
    /// first use
    fn conditions_mut(&mut self) -> &mut Vec<Condition>;

    /// Upsert a condition, preserving lastTransitionTime on no-ops
    fn set_condition(&mut self, condition: Condition) {
        types::set_condition(self.conditions_mut(), condition);
    }

    /// Where connection details are published, if anywhere
    fn connection_secret_ref(&self) -> Option<SecretRef> {
        None
    }

    /// Name of the ProviderConfig carrying credentials and region
    fn provider_config_name(&self) -> Option<String> {
        None
    }
}

/// A managed kind whose external resource carries a tag set
pub trait Taggable: Managed {
    /// Desired tag map in the record's spec
    fn tags(&self) -> &BTreeMap<String, String>;

    /// Mutable desired tag map
    fn tags_mut(&mut self) -> &mut BTreeMap<String, String>;
}
