//! IAM RolePolicyAttachment managed resource
//!
//! Attaches a managed policy to a role. The role side is a cross-reference:
//! users may give the concrete role name, a by-name reference to a Role
//! record, or a label selector over Role records.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, DeletionPolicy, ManagementPolicies, Reference, Selector};
use super::Managed;

/// Desired state of a role-policy attachment
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RolePolicyAttachmentParameters {
    /// Concrete IAM role name. Filled in by reference resolution when
    /// `roleNameRef` or `roleNameSelector` is used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_name: Option<String>,

    /// Reference to a Role record whose external name supplies `roleName`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_name_ref: Option<Reference>,

    /// Selector over Role records; the first match (sorted by name)
    /// supplies `roleName`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_name_selector: Option<Selector>,

    /// ARN of the managed policy to attach
    pub policy_arn: String,
}

/// Specification for a RolePolicyAttachment record
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "aws.cumulus.dev",
    version = "v1alpha1",
    kind = "RolePolicyAttachment",
    plural = "rolepolicyattachments",
    status = "RolePolicyAttachmentStatus",
    namespaced = false,
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type=='Ready')].status"}"#,
    printcolumn = r#"{"name":"Synced","type":"string","jsonPath":".status.conditions[?(@.type=='Synced')].status"}"#,
    printcolumn = r#"{"name":"Role","type":"string","jsonPath":".spec.forProvider.roleName"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct RolePolicyAttachmentSpec {
    /// Desired attachment parameters
    pub for_provider: RolePolicyAttachmentParameters,

    /// What to do with the external attachment when this record is removed
    #[serde(default)]
    pub deletion_policy: DeletionPolicy,

    /// Loop actions permitted for this record (empty = all)
    #[serde(default, skip_serializing_if = "super::types::ManagementPolicies::is_empty")]
    pub management_policies: ManagementPolicies,

    /// ProviderConfig carrying credentials and region
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_config_ref: Option<Reference>,
}

/// Cloud-side observations for a RolePolicyAttachment
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RolePolicyAttachmentObservation {
    /// ARN of the policy observed attached to the role
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attached_policy_arn: Option<String>,
}

/// Status for a RolePolicyAttachment record
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RolePolicyAttachmentStatus {
    /// Cloud-side observations
    #[serde(default)]
    pub at_provider: RolePolicyAttachmentObservation,

    /// Conditions representing the record state
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl Managed for RolePolicyAttachment {
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
            .get_or_insert_with(RolePolicyAttachmentStatus::default)
            .conditions
    }

    fn provider_config_name(&self) -> Option<String> {
        self.spec.provider_config_ref.as_ref().map(|r| r.name.clone())
    }
}

impl RolePolicyAttachment {
    /// Mutable access to the observation block, creating status on first use
    pub fn at_provider_mut(&mut self) -> &mut RolePolicyAttachmentObservation {
        &mut self
            .status
            .get_or_insert_with(RolePolicyAttachmentStatus::default)
            .at_provider
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reference_fields_are_optional_in_serde() {
        let json = r#"{"forProvider":{"policyArn":"arn:aws:iam::aws:policy/ReadOnlyAccess"}}"#;
        let spec: RolePolicyAttachmentSpec = serde_json::from_str(json).unwrap();
        assert!(spec.for_provider.role_name.is_none());
        assert!(spec.for_provider.role_name_ref.is_none());
        assert!(spec.for_provider.role_name_selector.is_none());
        assert_eq!(
            spec.for_provider.policy_arn,
            "arn:aws:iam::aws:policy/ReadOnlyAccess"
        );
    }

    #[test]
    fn resolved_reference_round_trips() {
        let spec = RolePolicyAttachmentSpec {
            for_provider: RolePolicyAttachmentParameters {
                role_name: Some("r1-abc123".to_string()),
                role_name_ref: Some(Reference {
                    name: "r1".to_string(),
                }),
                role_name_selector: None,
                policy_arn: "arn:x".to_string(),
            },
            deletion_policy: DeletionPolicy::Delete,
            management_policies: ManagementPolicies::default(),
            provider_config_ref: None,
        };
        let json = serde_json::to_string(&spec).unwrap();
        assert!(json.contains("roleNameRef"));
        let parsed: RolePolicyAttachmentSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(spec, parsed);
    }
}
