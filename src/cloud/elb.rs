//! Elastic Load Balancing v2 service gateway

use std::collections::BTreeMap;

use async_trait::async_trait;
use aws_config::SdkConfig;
use aws_sdk_elasticloadbalancingv2::types::{
    IpAddressType, LoadBalancer, LoadBalancerSchemeEnum, LoadBalancerTypeEnum, Tag,
};
use aws_sdk_elasticloadbalancingv2::Client;
#[cfg(test)]
use mockall::automock;

use super::{CloudError, CloudErrorKind};

/// Cloud-side view of a load balancer
#[derive(Clone, Debug, Default, PartialEq)]
pub struct LoadBalancerData {
    /// Amazon Resource Name; the authoritative identifier
    pub arn: String,
    /// DNS name clients connect to
    pub dns_name: Option<String>,
    /// State code ("provisioning", "active", "failed")
    pub state: Option<String>,
    /// VPC the load balancer lives in
    pub vpc_id: Option<String>,
    /// "application" or "network"
    pub lb_type: Option<String>,
    /// "internet-facing" or "internal"
    pub scheme: Option<String>,
    /// "ipv4" or "dualstack"
    pub ip_address_type: Option<String>,
    /// Attached subnet ids; order is not meaningful
    pub subnets: Vec<String>,
    /// Attached security group ids; order is not meaningful
    pub security_groups: Vec<String>,
    /// Tags on the load balancer
    pub tags: BTreeMap<String, String>,
}

/// Fields for a load balancer creation request
#[derive(Clone, Debug, Default)]
pub struct CreateLoadBalancerRequest {
    /// Load balancer type ("application" or "network")
    pub lb_type: String,
    /// Scheme, when not the cloud default
    pub scheme: Option<String>,
    /// IP address type, when not the cloud default
    pub ip_address_type: Option<String>,
    /// Subnet ids to attach
    pub subnets: Vec<String>,
    /// Security group ids to attach
    pub security_groups: Vec<String>,
    /// Tags applied at creation
    pub tags: BTreeMap<String, String>,
}

/// Gateway over the ELBv2 service
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ElbGateway: Send + Sync {
    /// Describe a load balancer by ARN, tags included; absence is not an
    /// error
    async fn describe_load_balancer(&self, arn: &str)
        -> Result<Option<LoadBalancerData>, CloudError>;

    /// Create a load balancer
    async fn create_load_balancer(
        &self,
        name: &str,
        request: CreateLoadBalancerRequest,
    ) -> Result<LoadBalancerData, CloudError>;

    /// Replace the attached subnet set
    async fn set_subnets(&self, arn: &str, subnets: Vec<String>) -> Result<(), CloudError>;

    /// Replace the attached security group set
    async fn set_security_groups(&self, arn: &str, groups: Vec<String>) -> Result<(), CloudError>;

    /// Change the IP address type
    async fn set_ip_address_type(&self, arn: &str, ip_address_type: &str)
        -> Result<(), CloudError>;

    /// Add or overwrite tags
    async fn add_tags(&self, arn: &str, tags: BTreeMap<String, String>) -> Result<(), CloudError>;

    /// Remove tags by key
    async fn remove_tags(&self, arn: &str, keys: Vec<String>) -> Result<(), CloudError>;

    /// Delete a load balancer
    async fn delete_load_balancer(&self, arn: &str) -> Result<(), CloudError>;
}

/// [`ElbGateway`] backed by the AWS SDK
pub struct SdkElbGateway {
    client: Client,
}

impl SdkElbGateway {
    /// Gateway over the given SDK configuration
    pub fn new(config: &SdkConfig) -> Self {
        Self {
            client: Client::new(config),
        }
    }

    async fn tags_of(&self, arn: &str) -> Result<BTreeMap<String, String>, CloudError> {
        let output = self
            .client
            .describe_tags()
            .resource_arns(arn)
            .send()
            .await
            .map_err(CloudError::from_sdk)?;

        let mut tags = BTreeMap::new();
        for description in output.tag_descriptions() {
            for tag in description.tags() {
                tags.insert(
                    tag.key().unwrap_or_default().to_string(),
                    tag.value().unwrap_or_default().to_string(),
                );
            }
        }
        Ok(tags)
    }
}

fn convert(lb: &LoadBalancer, tags: BTreeMap<String, String>) -> LoadBalancerData {
    LoadBalancerData {
        arn: lb.load_balancer_arn().unwrap_or_default().to_string(),
        dns_name: lb.dns_name().map(str::to_string),
        state: lb
            .state()
            .and_then(|state| state.code())
            .map(|code| code.as_str().to_string()),
        vpc_id: lb.vpc_id().map(str::to_string),
        lb_type: lb.r#type().map(|t| t.as_str().to_string()),
        scheme: lb.scheme().map(|s| s.as_str().to_string()),
        ip_address_type: lb.ip_address_type().map(|t| t.as_str().to_string()),
        subnets: lb
            .availability_zones()
            .iter()
            .filter_map(|zone| zone.subnet_id().map(str::to_string))
            .collect(),
        security_groups: lb.security_groups().to_vec(),
        tags,
    }
}

fn build_tag(key: &str, value: &str) -> Tag {
    Tag::builder().key(key).value(value).build()
}

#[async_trait]
impl ElbGateway for SdkElbGateway {
    async fn describe_load_balancer(
        &self,
        arn: &str,
    ) -> Result<Option<LoadBalancerData>, CloudError> {
        let output = match self
            .client
            .describe_load_balancers()
            .load_balancer_arns(arn)
            .send()
            .await
        {
            Ok(output) => output,
            Err(err) => {
                let err = CloudError::from_sdk(err);
                return if err.is_not_found() { Ok(None) } else { Err(err) };
            }
        };

        let Some(lb) = output.load_balancers().first() else {
            return Ok(None);
        };
        let tags = self.tags_of(arn).await?;
        Ok(Some(convert(lb, tags)))
    }

    async fn create_load_balancer(
        &self,
        name: &str,
        request: CreateLoadBalancerRequest,
    ) -> Result<LoadBalancerData, CloudError> {
        let mut call = self
            .client
            .create_load_balancer()
            .name(name)
            .r#type(LoadBalancerTypeEnum::from(request.lb_type.as_str()))
            .set_subnets(Some(request.subnets));
        if !request.security_groups.is_empty() {
            call = call.set_security_groups(Some(request.security_groups));
        }
        if let Some(scheme) = &request.scheme {
            call = call.scheme(LoadBalancerSchemeEnum::from(scheme.as_str()));
        }
        if let Some(ip_address_type) = &request.ip_address_type {
            call = call.ip_address_type(IpAddressType::from(ip_address_type.as_str()));
        }
        for (key, value) in &request.tags {
            call = call.tags(build_tag(key, value));
        }

        let output = call.send().await.map_err(CloudError::from_sdk)?;
        let lb = output.load_balancers().first().ok_or_else(|| {
            CloudError::new(CloudErrorKind::Other, "create returned no load balancer")
        })?;
        Ok(convert(lb, request.tags))
    }

    async fn set_subnets(&self, arn: &str, subnets: Vec<String>) -> Result<(), CloudError> {
        self.client
            .set_subnets()
            .load_balancer_arn(arn)
            .set_subnets(Some(subnets))
            .send()
            .await
            .map_err(CloudError::from_sdk)?;
        Ok(())
    }

    async fn set_security_groups(&self, arn: &str, groups: Vec<String>) -> Result<(), CloudError> {
        self.client
            .set_security_groups()
            .load_balancer_arn(arn)
            .set_security_groups(Some(groups))
            .send()
            .await
            .map_err(CloudError::from_sdk)?;
        Ok(())
    }

    async fn set_ip_address_type(
        &self,
        arn: &str,
        ip_address_type: &str,
    ) -> Result<(), CloudError> {
        self.client
            .set_ip_address_type()
            .load_balancer_arn(arn)
            .ip_address_type(IpAddressType::from(ip_address_type))
            .send()
            .await
            .map_err(CloudError::from_sdk)?;
        Ok(())
    }

    async fn add_tags(&self, arn: &str, tags: BTreeMap<String, String>) -> Result<(), CloudError> {
        let mut call = self.client.add_tags().resource_arns(arn);
        for (key, value) in &tags {
            call = call.tags(build_tag(key, value));
        }
        call.send().await.map_err(CloudError::from_sdk)?;
        Ok(())
    }

    async fn remove_tags(&self, arn: &str, keys: Vec<String>) -> Result<(), CloudError> {
        self.client
            .remove_tags()
            .resource_arns(arn)
            .set_tag_keys(Some(keys))
            .send()
            .await
            .map_err(CloudError::from_sdk)?;
        Ok(())
    }

    async fn delete_load_balancer(&self, arn: &str) -> Result<(), CloudError> {
        self.client
            .delete_load_balancer()
            .load_balancer_arn(arn)
            .send()
            .await
            .map_err(CloudError::from_sdk)?;
        Ok(())
    }
}
