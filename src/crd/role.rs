//! IAM Role managed resource

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, DeletionPolicy, ManagementPolicies, Reference, SecretRef};
use super::{Managed, Taggable};

/// Desired state of an IAM role
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoleParameters {
    /// Trust policy document granting an entity permission to assume the
    /// role, as a JSON string
    pub assume_role_policy_document: String,

    /// Description of the role
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Maximum session duration in seconds (late-initialized to the cloud
    /// default when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_session_duration: Option<i32>,

    /// Path to the role (late-initialized to "/" when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Tags applied to the role
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,
}

/// Specification for a Role record
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "aws.cumulus.dev",
    version = "v1alpha1",
    kind = "Role",
    plural = "roles",
    status = "RoleStatus",
    namespaced = false,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type=='Ready')].status"}"#,
    printcolumn = r#"{"name":"Synced","type":"string","jsonPath":".status.conditions[?(@.type=='Synced')].status"}"#,
    printcolumn = r#"{"name":"External-Name","type":"string","jsonPath":".metadata.annotations.cumulus\\.dev/external-name"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RoleSpec {
    /// Desired role parameters
    pub for_provider: RoleParameters,

    /// What to do with the external role when this record is removed
    #[serde(default)]
    pub deletion_policy: DeletionPolicy,

    /// Loop actions permitted for this record (empty = all)
    #[serde(default, skip_serializing_if = "super::types::ManagementPolicies::is_empty")]
    pub management_policies: ManagementPolicies,

    /// ProviderConfig carrying credentials and region
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_config_ref: Option<Reference>,

    /// Where to publish connection details
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub write_connection_secret_to_ref: Option<SecretRef>,
}

/// Cloud-side observations for a Role
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoleObservation {
    /// Amazon Resource Name of the role
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arn: Option<String>,

    /// Stable unique identifier assigned by IAM
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_id: Option<String>,

    /// When the role was created, as reported by IAM
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_date: Option<String>,
}

/// Status for a Role record
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoleStatus {
    /// Cloud-side observations
    #[serde(default)]
    pub at_provider: RoleObservation,

    /// Conditions representing the record state
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl Managed for Role {
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
        &mut self.status.get_or_insert_with(RoleStatus::default).conditions
    }

    fn connection_secret_ref(&self) -> Option<SecretRef> {
        self.spec.write_connection_secret_to_ref.clone()
    }

    fn provider_config_name(&self) -> Option<String> {
        self.spec.provider_config_ref.as_ref().map(|r| r.name.clone())
    }
}

impl Taggable for Role {
    fn tags(&self) -> &BTreeMap<String, String> {
        &self.spec.for_provider.tags
    }

    fn tags_mut(&mut self) -> &mut BTreeMap<String, String> {
        &mut self.spec.for_provider.tags
    }
}

impl Role {
    /// Mutable access to the observation block, creating status on first use
    pub fn at_provider_mut(&mut self) -> &mut RoleObservation {
        &mut self.status.get_or_insert_with(RoleStatus::default).at_provider
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::types::{condition, ConditionStatus};
    use crate::EXTERNAL_NAME_ANNOTATION;
    use kube::api::ObjectMeta;

    fn sample_role(name: &str) -> Role {
        Role {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: RoleSpec {
                for_provider: RoleParameters {
                    assume_role_policy_document: r#"{"Version":"2012-10-17"}"#.to_string(),
                    description: None,
                    max_session_duration: None,
                    path: None,
                    tags: BTreeMap::new(),
                },
                deletion_policy: DeletionPolicy::default(),
                management_policies: ManagementPolicies::default(),
                provider_config_ref: None,
                write_connection_secret_to_ref: None,
            },
            status: None,
        }
    }

    #[test]
    fn external_name_reads_the_annotation() {
        let mut role = sample_role("r1");
        assert!(role.external_name().is_none());

        role.set_external_name("r1-abc123");
        assert_eq!(role.external_name().as_deref(), Some("r1-abc123"));
        assert_eq!(
            role.metadata.annotations.as_ref().unwrap()[EXTERNAL_NAME_ANNOTATION],
            "r1-abc123"
        );
    }

    #[test]
    fn empty_annotation_is_treated_as_unset() {
        let mut role = sample_role("r1");
        role.set_external_name("");
        assert!(role.external_name().is_none());
    }

    #[test]
    fn set_condition_creates_status_block() {
        let mut role = sample_role("r1");
        assert!(role.status.is_none());

        role.set_condition(Condition::creating());
        let conditions = role.conditions();
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].type_, condition::READY);
        assert_eq!(conditions[0].status, ConditionStatus::False);
    }

    #[test]
    fn spec_serde_round_trip() {
        let mut role = sample_role("r1");
        role.spec.for_provider.tags.insert("env".into(), "prod".into());
        role.spec.deletion_policy = DeletionPolicy::Orphan;

        let json = serde_json::to_string(&role.spec).unwrap();
        assert!(json.contains("forProvider"));
        assert!(json.contains("assumeRolePolicyDocument"));
        let parsed: RoleSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(role.spec, parsed);
    }

    #[test]
    fn optional_spec_fields_are_omitted() {
        let role = sample_role("r1");
        let json = serde_json::to_string(&role.spec).unwrap();
        assert!(!json.contains("maxSessionDuration"));
        assert!(!json.contains("providerConfigRef"));
        assert!(!json.contains("managementPolicies"));
    }
}
