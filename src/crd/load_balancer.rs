//! ELBv2 LoadBalancer managed resource

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, DeletionPolicy, ManagementPolicies, Reference, SecretRef};
use super::{Managed, Taggable};

/// Load balancer state code reported by the cloud when the resource is
/// ready for traffic
pub const LB_STATE_ACTIVE: &str = "active";

/// Desired state of a load balancer
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerParameters {
    /// Load balancer type: "application" or "network"
    #[serde(rename = "type")]
    pub lb_type: String,

    /// Scheme: "internet-facing" or "internal" (late-initialized from the
    /// cloud default when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheme: Option<String>,

    /// IP address type: "ipv4" or "dualstack" (late-initialized)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address_type: Option<String>,

    /// Subnets to attach. Order is irrelevant; compared as a set.
    pub subnets: Vec<String>,

    /// Security groups to attach. Order is irrelevant; compared as a set.
    /// Unset means "cloud default", compared as equal to empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_groups: Option<Vec<String>>,

    /// Tags applied to the load balancer
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

/// Specification for a LoadBalancer record
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "aws.cumulus.dev",
    version = "v1alpha1",
    kind = "LoadBalancer",
    plural = "loadbalancers",
    shortname = "lb",
    status = "LoadBalancerStatus",
    namespaced = false,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type=='Ready')].status"}"#,
    printcolumn = r#"{"name":"Synced","type":"string","jsonPath":".status.conditions[?(@.type=='Synced')].status"}"#,
    printcolumn = r#"{"name":"DNS","type":"string","jsonPath":".status.atProvider.dnsName"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerSpec {
    /// Desired load balancer parameters
    pub for_provider: LoadBalancerParameters,

    /// What to do with the external load balancer when this record is
    /// removed
    #[serde(default)]
    pub deletion_policy: DeletionPolicy,

    /// Loop actions permitted for this record (empty = all)
    #[serde(default, skip_serializing_if = "super::types::ManagementPolicies::is_empty")]
    pub management_policies: ManagementPolicies,

    /// ProviderConfig carrying credentials and region
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_config_ref: Option<Reference>,

    /// Where to publish the DNS endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_connection_secret_to_ref: Option<SecretRef>,
}

/// Cloud-side observations for a LoadBalancer
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerObservation {
    /// Amazon Resource Name of the load balancer
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arn: Option<String>,

    /// Public DNS name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_name: Option<String>,

    /// Provisioning state code ("provisioning", "active", "failed", ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,

    /// VPC the load balancer lives in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vpc_id: Option<String>,
}

/// Status for a LoadBalancer record
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerStatus {
    /// Cloud-side observations
    #[serde(default)]
    pub at_provider: LoadBalancerObservation,

    /// Conditions representing the record state
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl Managed for LoadBalancer {
    fn deletion_policy(&self) -> DeletionPolicy {
        self.spec.deletion_policy
    }

    fn management_policies(&self) -> ManagementPolicies {
        self.spec.management_policies.clone()
    }

    fn conditions(&self) -> &[Condition] {
        self.status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or(&[])
    }

    fn conditions_mut(&mut self) -> &mut Vec<Condition> {
        &mut self
            .status
            .get_or_insert_with(LoadBalancerStatus::default)
            .conditions
    }

    fn connection_secret_ref(&self) -> Option<SecretRef> {
        self.spec.write_connection_secret_to_ref.clone()
    }

    fn provider_config_name(&self) -> Option<String> {
        self.spec.provider_config_ref.as_ref().map(|r| r.name.clone())
    }
}

impl Taggable for LoadBalancer {
    fn tags(&self) -> &BTreeMap<String, String> {
        &self.spec.for_provider.tags
    }

    fn tags_mut(&mut self) -> &mut BTreeMap<String, String> {
        &mut self.spec.for_provider.tags
    }
}

impl LoadBalancer {
    /// Mutable access to the observation block, creating status on first use
    pub fn at_provider_mut(&mut self) -> &mut LoadBalancerObservation {
        &mut self
            .status
            .get_or_insert_with(LoadBalancerStatus::default)
            .at_provider
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_params() -> LoadBalancerParameters {
        LoadBalancerParameters {
            lb_type: "application".to_string(),
            scheme: None,
            ip_address_type: None,
            subnets: vec!["s-1".to_string(), "s-2".to_string()],
            security_groups: None,
            tags: BTreeMap::new(),
        }
    }

    #[test]
    fn type_field_is_renamed_in_serde() {
        let json = serde_json::to_string(&sample_params()).unwrap();
        assert!(json.contains(r#""type":"application""#));
        assert!(!json.contains("lbType"));
    }

    #[test]
    fn parameters_round_trip() {
        let mut params = sample_params();
        params.scheme = Some("internal".to_string());
        params.security_groups = Some(vec!["sg-1".to_string()]);
        params.tags.insert("env".into(), "prod".into());

        let json = serde_json::to_string(&params).unwrap();
        let parsed: LoadBalancerParameters = serde_json::from_str(&json).unwrap();
        assert_eq!(params, parsed);
    }

    #[test]
    fn observation_defaults_are_empty() {
        let obs = LoadBalancerObservation::default();
        assert!(obs.arn.is_none());
        assert!(obs.state.is_none());
        let json = serde_json::to_string(&obs).unwrap();
        assert_eq!(json, "{}");
    }
}
