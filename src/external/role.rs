//! External adapter for IAM roles

use std::sync::Arc;

use async_trait::async_trait;
use kube::ResourceExt;
use percent_encoding::percent_decode_str;
use tracing::debug;

use crate::cloud::{CloudError, CreateRoleRequest, IamGateway, RoleData, SdkIamGateway};
use crate::controller::{ConnectionDetails, Connector, Creation, ExternalClient, Observation};
use crate::crd::{Managed, Role, RoleParameters};
use crate::diff::{late_init, tag_diff, Diff, TagDiff};
use crate::Error;

use super::AwsConfigResolver;

/// Builds [`RoleClient`]s per record
pub struct RoleConnector {
    configs: Arc<AwsConfigResolver>,
}

impl RoleConnector {
    /// Connector over the given config resolver
    pub fn new(configs: Arc<AwsConfigResolver>) -> Self {
        Self { configs }
    }
}

#[async_trait]
impl Connector<Role> for RoleConnector {
    async fn connect(&self, record: &Role) -> Result<Box<dyn ExternalClient<Role>>, Error> {
        let config = self.configs.resolve(record.provider_config_name()).await?;
        Ok(Box::new(RoleClient::new(Arc::new(SdkIamGateway::new(
            &config,
        )))))
    }
}

/// [`ExternalClient`] for IAM roles
pub struct RoleClient {
    iam: Arc<dyn IamGateway>,
}

impl RoleClient {
    /// Client over the given gateway
    pub fn new(iam: Arc<dyn IamGateway>) -> Self {
        Self { iam }
    }
}

/// Cloud-assigned identity for a role that never had one: the record name
/// suffixed with a uid prefix, so recreated records never collide with
/// orphans of their predecessors.
fn generated_name(record: &Role) -> String {
    let uid = record.uid().unwrap_or_default();
    let prefix: String = uid.chars().take(8).collect();
    format!("{}-{}", record.name_any(), prefix)
}

/// Compare trust policy documents by JSON semantics.
///
/// IAM returns the document URL-encoded; whitespace and key order are not
/// meaningful.
fn policy_documents_match(desired: &str, observed_encoded: &str) -> Result<bool, Error> {
    let desired: serde_json::Value = serde_json::from_str(desired).map_err(|err| {
        Error::Cloud(CloudError::invalid_parameter(format!(
            "assume role policy document is not valid JSON: {err}"
        )))
    })?;
    let decoded = percent_decode_str(observed_encoded)
        .decode_utf8()
        .map_err(|err| Error::serialization(format!("policy document decode: {err}")))?;
    let observed: serde_json::Value = serde_json::from_str(&decoded)
        .map_err(|err| Error::serialization(format!("policy document parse: {err}")))?;
    Ok(desired == observed)
}

struct RoleDrift {
    policy: bool,
    config: bool,
    tags: TagDiff,
    diff: Diff,
}

/// What would have to change on the cloud side to match the desired state
fn drift(desired: &RoleParameters, observed: &RoleData) -> Result<RoleDrift, Error> {
    let mut diff = Diff::new();

    let policy = match &observed.assume_role_policy_document {
        Some(encoded) => !policy_documents_match(&desired.assume_role_policy_document, encoded)?,
        None => true,
    };
    if policy {
        diff.note("spec.forProvider.assumeRolePolicyDocument");
    }

    let mut config = false;
    if let Some(description) = &desired.description {
        if Some(description) != observed.description.as_ref() {
            config = true;
            diff.field(
                "spec.forProvider.description",
                description,
                &observed.description,
            );
        }
    }
    if let Some(duration) = desired.max_session_duration {
        if Some(duration) != observed.max_session_duration {
            config = true;
            diff.field(
                "spec.forProvider.maxSessionDuration",
                duration,
                observed.max_session_duration,
            );
        }
    }

    let tags = tag_diff(&desired.tags, &observed.tags);
    if !tags.is_empty() {
        diff.field("spec.forProvider.tags", &desired.tags, &observed.tags);
    }

    Ok(RoleDrift {
        policy,
        config,
        tags,
        diff,
    })
}

#[async_trait]
impl ExternalClient<Role> for RoleClient {
    async fn observe(&self, record: &mut Role) -> Result<Observation, Error> {
        let Some(external_name) = record.external_name() else {
            return Ok(Observation::absent());
        };
        let Some(observed) = self.iam.get_role(&external_name).await? else {
            return Ok(Observation::absent());
        };

        let at = record.at_provider_mut();
        at.arn = Some(observed.arn.clone());
        at.role_id = Some(observed.role_id.clone());
        at.create_date = observed.create_date.clone();

        let mut late_initialized = false;
        let parameters = &mut record.spec.for_provider;
        late_initialized |= late_init(&mut parameters.path, Some(&observed.path));
        late_initialized |= late_init(
            &mut parameters.max_session_duration,
            observed.max_session_duration.as_ref(),
        );

        let drift = drift(&record.spec.for_provider, &observed)?;
        Ok(Observation {
            exists: true,
            up_to_date: drift.diff.is_empty(),
            // A role is usable the moment IAM reports it
            ready: true,
            diff: drift.diff.to_string(),
            late_initialized,
            connection_details: ConnectionDetails::new(),
        })
    }

    async fn create(&self, record: &mut Role) -> Result<Creation, Error> {
        let external_name = record.external_name().unwrap_or_else(|| generated_name(record));
        let parameters = &record.spec.for_provider;
        let created = self
            .iam
            .create_role(
                &external_name,
                CreateRoleRequest {
                    assume_role_policy_document: parameters.assume_role_policy_document.clone(),
                    description: parameters.description.clone(),
                    max_session_duration: parameters.max_session_duration,
                    path: parameters.path.clone(),
                    tags: parameters.tags.clone(),
                },
            )
            .await?;

        let at = record.at_provider_mut();
        at.arn = Some(created.arn);
        at.role_id = Some(created.role_id);
        at.create_date = created.create_date;

        Ok(Creation {
            external_name: Some(external_name),
            connection_details: ConnectionDetails::new(),
        })
    }

    async fn update(&self, record: &mut Role) -> Result<(), Error> {
        let external_name = record
            .external_name()
            .ok_or_else(|| Error::unexpected("updating a role that was never created"))?;
        let observed = self
            .iam
            .get_role(&external_name)
            .await?
            .ok_or_else(|| Error::Cloud(CloudError::not_found("role vanished during update")))?;

        // Each field group has its own endpoint; only drifted groups are
        // touched.
        let parameters = &record.spec.for_provider;
        let drift = drift(parameters, &observed)?;
        if drift.policy {
            debug!(role = %external_name, "updating assume role policy");
            self.iam
                .update_assume_role_policy(&external_name, &parameters.assume_role_policy_document)
                .await?;
        }
        if drift.config {
            self.iam
                .update_role(
                    &external_name,
                    parameters.description.clone(),
                    parameters.max_session_duration,
                )
                .await?;
        }
        if !drift.tags.remove.is_empty() {
            self.iam
                .untag_role(&external_name, drift.tags.remove.clone())
                .await?;
        }
        if !drift.tags.add.is_empty() {
            self.iam.tag_role(&external_name, drift.tags.add.clone()).await?;
        }
        Ok(())
    }

    async fn delete(&self, record: &Role) -> Result<(), Error> {
        let Some(external_name) = record.external_name() else {
            return Ok(());
        };
        self.iam.delete_role(&external_name).await?;
        Ok(())
    }
}
