//! IAM service gateway

use std::collections::BTreeMap;

use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_iam::types::{Role, Tag};
use aws_sdk_iam::Client;
#[cfg(test)]
use mockall::automock;

use super::{CloudError, CloudErrorKind};

/// Cloud-side view of an IAM role.
///
/// The assume-role policy document is kept URL-encoded exactly as IAM
/// returns it; decoding is the caller's concern.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RoleData {
    /// Amazon Resource Name
    pub arn: String,
    /// Stable unique identifier assigned by IAM
    pub role_id: String,
    /// Role path
    pub path: String,
    /// Description, if any
    pub description: Option<String>,
    /// Maximum session duration in seconds
    pub max_session_duration: Option<i32>,
    /// URL-encoded trust policy document
    pub assume_role_policy_document: Option<String>,
    /// Tags on the role
    pub tags: BTreeMap<String, String>,
    /// Creation timestamp as reported by IAM
    pub create_date: Option<String>,
}

/// Fields for a role creation request
#[derive(Clone, Debug, Default)]
pub struct CreateRoleRequest {
    /// Trust policy document as plain JSON
    pub assume_role_policy_document: String,
    /// Description, if any
    pub description: Option<String>,
    /// Maximum session duration in seconds
    pub max_session_duration: Option<i32>,
    /// Role path
    pub path: Option<String>,
    /// Tags applied at creation
    pub tags: BTreeMap<String, String>,
}

/// Gateway over the IAM service
#[cfg_attr(test, automock)]
#[async_trait]
pub trait IamGateway: Send + Sync {
    /// Describe a role by name; absence is not an error
    async fn get_role(&self, name: &str) -> Result<Option<RoleData>, CloudError>;

    /// Create a role
    async fn create_role(&self, name: &str, request: CreateRoleRequest)
        -> Result<RoleData, CloudError>;

    /// Replace the role's trust policy document
    async fn update_assume_role_policy(&self, name: &str, document: &str)
        -> Result<(), CloudError>;

    /// Update the role's description and session duration
    async fn update_role(
        &self,
        name: &str,
        description: Option<String>,
        max_session_duration: Option<i32>,
    ) -> Result<(), CloudError>;

    /// Add or overwrite tags on the role
    async fn tag_role(&self, name: &str, tags: BTreeMap<String, String>) -> Result<(), CloudError>;

    /// Remove tags from the role by key
    async fn untag_role(&self, name: &str, keys: Vec<String>) -> Result<(), CloudError>;

    /// Delete a role
    async fn delete_role(&self, name: &str) -> Result<(), CloudError>;

    /// Attach a managed policy to a role
    async fn attach_role_policy(&self, role_name: &str, policy_arn: &str)
        -> Result<(), CloudError>;

    /// Detach a managed policy from a role
    async fn detach_role_policy(&self, role_name: &str, policy_arn: &str)
        -> Result<(), CloudError>;

    /// ARNs of every managed policy attached to the role
    async fn list_attached_policies(&self, role_name: &str) -> Result<Vec<String>, CloudError>;
}

/// [`IamGateway`] backed by the AWS SDK
pub struct SdkIamGateway {
    client: Client,
}

impl SdkIamGateway {
    /// Gateway over the given SDK configuration
    pub fn new(config: &SdkConfig) -> Self {
        Self {
            client: Client::new(config),
        }
    }
}

fn convert(role: &Role) -> RoleData {
    RoleData {
        arn: role.arn().to_string(),
        role_id: role.role_id().to_string(),
        path: role.path().to_string(),
        description: role.description().map(str::to_string),
        max_session_duration: role.max_session_duration(),
        assume_role_policy_document: role.assume_role_policy_document().map(str::to_string),
        tags: role
            .tags()
            .iter()
            .map(|tag| (tag.key().to_string(), tag.value().to_string()))
            .collect(),
        create_date: Some(role.create_date().to_string()),
    }
}

fn build_tag(key: &str, value: &str) -> Result<Tag, CloudError> {
    Tag::builder()
        .key(key)
        .value(value)
        .build()
        .map_err(|err| CloudError::invalid_parameter(err.to_string()))
}

#[async_trait]
impl IamGateway for SdkIamGateway {
    async fn get_role(&self, name: &str) -> Result<Option<RoleData>, CloudError> {
        match self.client.get_role().role_name(name).send().await {
            Ok(output) => Ok(output.role().map(convert)),
            Err(err) => {
                let err = CloudError::from_sdk(err);
                if err.is_not_found() {
                    Ok(None)
                } else {
                    Err(err)
                }
            }
        }
    }

    async fn create_role(
        &self,
        name: &str,
        request: CreateRoleRequest,
    ) -> Result<RoleData, CloudError> {
        let mut call = self
            .client
            .create_role()
            .role_name(name)
            .assume_role_policy_document(&request.assume_role_policy_document)
            .set_description(request.description)
            .set_max_session_duration(request.max_session_duration)
            .set_path(request.path);
        for (key, value) in &request.tags {
            call = call.tags(build_tag(key, value)?);
        }

        let output = call.send().await.map_err(CloudError::from_sdk)?;
        let role = output
            .role()
            .ok_or_else(|| CloudError::new(CloudErrorKind::Other, "create returned no role"))?;
        Ok(convert(role))
    }

    async fn update_assume_role_policy(&self, name: &str, document: &str) -> Result<(), CloudError> {
        self.client
            .update_assume_role_policy()
            .role_name(name)
            .policy_document(document)
            .send()
            .await
            .map_err(CloudError::from_sdk)?;
        Ok(())
    }

    async fn update_role(
        &self,
        name: &str,
        description: Option<String>,
        max_session_duration: Option<i32>,
    ) -> Result<(), CloudError> {
        self.client
            .update_role()
            .role_name(name)
            .set_description(description)
            .set_max_session_duration(max_session_duration)
            .send()
            .await
            .map_err(CloudError::from_sdk)?;
        Ok(())
    }

    async fn tag_role(&self, name: &str, tags: BTreeMap<String, String>) -> Result<(), CloudError> {
        let mut call = self.client.tag_role().role_name(name);
        for (key, value) in &tags {
            call = call.tags(build_tag(key, value)?);
        }
        call.send().await.map_err(CloudError::from_sdk)?;
        Ok(())
    }

    async fn untag_role(&self, name: &str, keys: Vec<String>) -> Result<(), CloudError> {
        self.client
            .untag_role()
            .role_name(name)
            .set_tag_keys(Some(keys))
            .send()
            .await
            .map_err(CloudError::from_sdk)?;
        Ok(())
    }

    async fn delete_role(&self, name: &str) -> Result<(), CloudError> {
        self.client
            .delete_role()
            .role_name(name)
            .send()
            .await
            .map_err(CloudError::from_sdk)?;
        Ok(())
    }

    async fn attach_role_policy(&self, role_name: &str, policy_arn: &str) -> Result<(), CloudError> {
        self.client
            .attach_role_policy()
            .role_name(role_name)
            .policy_arn(policy_arn)
            .send()
            .await
            .map_err(CloudError::from_sdk)?;
        Ok(())
    }

    async fn detach_role_policy(&self, role_name: &str, policy_arn: &str) -> Result<(), CloudError> {
        self.client
            .detach_role_policy()
            .role_name(role_name)
            .policy_arn(policy_arn)
            .send()
            .await
            .map_err(CloudError::from_sdk)?;
        Ok(())
    }

    async fn list_attached_policies(&self, role_name: &str) -> Result<Vec<String>, CloudError> {
        let mut pages = self
            .client
            .list_attached_role_policies()
            .role_name(role_name)
            .into_paginator()
            .send();

        let mut arns = Vec::new();
        while let Some(page) = pages.try_next().await.map_err(CloudError::from_sdk)? {
            for policy in page.attached_policies() {
                if let Some(arn) = policy.policy_arn() {
                    arns.push(arn.to_string());
                }
            }
        }
        Ok(arns)
    }
}
