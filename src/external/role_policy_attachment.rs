//! External adapter for IAM role policy attachments
//!
//! An attachment has no cloud-side object of its own; it exists when the
//! policy ARN shows up in the role's attached-policy list. Create and
//! update are both the idempotent attach call.

use std::sync::Arc;

use async_trait::async_trait;

use crate::cloud::{IamGateway, SdkIamGateway};
use crate::controller::{ConnectionDetails, Connector, Creation, ExternalClient, Observation};
use crate::crd::{Managed, RolePolicyAttachment};
use crate::Error;

use super::AwsConfigResolver;

/// Builds [`RolePolicyAttachmentClient`]s per record
pub struct RolePolicyAttachmentConnector {
    configs: Arc<AwsConfigResolver>,
}

impl RolePolicyAttachmentConnector {
    /// Connector over the given config resolver
    pub fn new(configs: Arc<AwsConfigResolver>) -> Self {
        Self { configs }
    }
}

#[async_trait]
impl Connector<RolePolicyAttachment> for RolePolicyAttachmentConnector {
    async fn connect(
        &self,
        record: &RolePolicyAttachment,
    ) -> Result<Box<dyn ExternalClient<RolePolicyAttachment>>, Error> {
        let config = self.configs.resolve(record.provider_config_name()).await?;
        Ok(Box::new(RolePolicyAttachmentClient::new(Arc::new(
            SdkIamGateway::new(&config),
        ))))
    }
}

/// [`ExternalClient`] for role policy attachments
pub struct RolePolicyAttachmentClient {
    iam: Arc<dyn IamGateway>,
}

impl RolePolicyAttachmentClient {
    /// Client over the given gateway
    pub fn new(iam: Arc<dyn IamGateway>) -> Self {
        Self { iam }
    }
}

/// The resolved role name; resolution runs before attach calls
fn role_name(record: &RolePolicyAttachment) -> Result<String, Error> {
    record
        .spec
        .for_provider
        .role_name
        .clone()
        .ok_or_else(|| Error::reference("spec.forProvider.roleName", "not resolved"))
}

#[async_trait]
impl ExternalClient<RolePolicyAttachment> for RolePolicyAttachmentClient {
    async fn observe(&self, record: &mut RolePolicyAttachment) -> Result<Observation, Error> {
        // No resolved role means nothing can be attached yet. Reported as
        // absent so a record deleted before its reference ever resolved
        // still reaches the deletion branch and sheds its finalizer.
        let Some(role_name) = record.spec.for_provider.role_name.clone() else {
            return Ok(Observation::absent());
        };
        let policy_arn = record.spec.for_provider.policy_arn.clone();

        let attached = match self.iam.list_attached_policies(&role_name).await {
            Ok(arns) => arns,
            // The role itself is gone, so the attachment is too
            Err(err) if err.is_not_found() => return Ok(Observation::absent()),
            Err(err) => return Err(err.into()),
        };

        if attached.iter().any(|arn| *arn == policy_arn) {
            record.at_provider_mut().attached_policy_arn = Some(policy_arn);
            // An attachment has no mutable fields; present means in sync
            Ok(Observation::in_sync())
        } else {
            Ok(Observation::absent())
        }
    }

    async fn create(&self, record: &mut RolePolicyAttachment) -> Result<Creation, Error> {
        let role_name = role_name(record)?;
        let policy_arn = record.spec.for_provider.policy_arn.clone();
        self.iam.attach_role_policy(&role_name, &policy_arn).await?;

        record.at_provider_mut().attached_policy_arn = Some(policy_arn.clone());
        Ok(Creation {
            external_name: Some(format!("{role_name}/{policy_arn}")),
            connection_details: ConnectionDetails::new(),
        })
    }

    async fn update(&self, record: &mut RolePolicyAttachment) -> Result<(), Error> {
        // Attach is idempotent; re-attaching converges any partial state
        let role_name = role_name(record)?;
        self.iam
            .attach_role_policy(&role_name, &record.spec.for_provider.policy_arn)
            .await?;
        Ok(())
    }

    async fn delete(&self, record: &RolePolicyAttachment) -> Result<(), Error> {
        // Nothing was ever attached without a resolved role.
        let Some(role_name) = record.spec.for_provider.role_name.clone() else {
            return Ok(());
        };
        match self
            .iam
            .detach_role_policy(&role_name, &record.spec.for_provider.policy_arn)
            .await
        {
            Ok(()) => Ok(()),
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}
