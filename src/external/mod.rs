//! Per-kind external adapters
//!
//! Each adapter implements [`ExternalClient`](crate::controller::ExternalClient)
//! for one managed kind, translating between the record's desired and
//! observed blocks and the cloud gateway's shapes. Kind-specific policy
//! (readiness rules, identity capture) lives here, not in the loop.

mod load_balancer;
mod role;
mod role_policy_attachment;

pub use load_balancer::LoadBalancerConnector;
pub use role::RoleConnector;
pub use role_policy_attachment::RolePolicyAttachmentConnector;

use std::sync::Arc;

use aws_config::{BehaviorVersion, Region, SdkConfig};
use dashmap::DashMap;
use kube::{Api, Client};
use tracing::debug;

use crate::crd::ProviderConfig;
use crate::Error;

/// Builds SDK configurations from `ProviderConfig` records, cached per
/// provider-config name.
///
/// Records without a `providerConfigRef` use the ambient environment
/// (instance profile, env vars), which is what the empty cache key stands
/// for.
pub struct AwsConfigResolver {
    client: Client,
    cache: DashMap<String, Arc<SdkConfig>>,
}

impl AwsConfigResolver {
    /// Resolver reading ProviderConfig records through the given client
    pub fn new(client: Client) -> Self {
        Self {
            client,
            cache: DashMap::new(),
        }
    }

    /// SDK configuration for a record's provider reference
    pub async fn resolve(&self, provider_config: Option<String>) -> Result<Arc<SdkConfig>, Error> {
        let key = provider_config.clone().unwrap_or_default();
        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached.clone());
        }

        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(name) = &provider_config {
            let api: Api<ProviderConfig> = Api::all(self.client.clone());
            let config = api.get(name).await?;
            debug!(provider_config = %name, "loading provider configuration");
            if let Some(region) = config.spec.region {
                loader = loader.region(Region::new(region));
            }
            if let Some(endpoint) = config.spec.endpoint {
                loader = loader.endpoint_url(endpoint);
            }
        }

        let config = Arc::new(loader.load().await);
        self.cache.insert(key, config.clone());
        Ok(config)
    }
}
