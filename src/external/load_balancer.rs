//! External adapter for load balancers
//!
//! The load balancer's ARN is its external name; readiness follows the
//! cloud-side state code. The DNS name is published as a connection
//! detail.

use std::sync::Arc;

use async_trait::async_trait;
use kube::ResourceExt;
use tracing::debug;

use crate::cloud::{
    CreateLoadBalancerRequest, ElbGateway, LoadBalancerData, SdkElbGateway,
};
use crate::controller::{ConnectionDetails, Connector, Creation, ExternalClient, Observation};
use crate::crd::{LoadBalancer, LoadBalancerParameters, Managed, LB_STATE_ACTIVE};
use crate::diff::{late_init, set_eq, set_eq_opt, tag_diff, Diff, TagDiff};
use crate::Error;

use super::AwsConfigResolver;

/// Connection detail key carrying the load balancer's DNS name
pub const DNS_NAME_KEY: &str = "dnsName";

/// Builds [`LoadBalancerClient`]s per record
pub struct LoadBalancerConnector {
    configs: Arc<AwsConfigResolver>,
}

impl LoadBalancerConnector {
    /// Connector over the given config resolver
    pub fn new(configs: Arc<AwsConfigResolver>) -> Self {
        Self { configs }
    }
}

#[async_trait]
impl Connector<LoadBalancer> for LoadBalancerConnector {
    async fn connect(
        &self,
        record: &LoadBalancer,
    ) -> Result<Box<dyn ExternalClient<LoadBalancer>>, Error> {
        let config = self.configs.resolve(record.provider_config_name()).await?;
        Ok(Box::new(LoadBalancerClient::new(Arc::new(
            SdkElbGateway::new(&config),
        ))))
    }
}

/// [`ExternalClient`] for load balancers
pub struct LoadBalancerClient {
    elb: Arc<dyn ElbGateway>,
}

impl LoadBalancerClient {
    /// Client over the given gateway
    pub fn new(elb: Arc<dyn ElbGateway>) -> Self {
        Self { elb }
    }
}

struct LoadBalancerDrift {
    subnets: bool,
    security_groups: bool,
    ip_address_type: bool,
    tags: TagDiff,
    diff: Diff,
}

/// What would have to change on the cloud side to match the desired state.
///
/// Subnets and security groups are sets; order never counts as drift.
/// Type and scheme are immutable after creation and are not compared.
fn drift(desired: &LoadBalancerParameters, observed: &LoadBalancerData) -> LoadBalancerDrift {
    let mut diff = Diff::new();

    let subnets = !set_eq(&desired.subnets, &observed.subnets);
    if subnets {
        diff.field("spec.forProvider.subnets", &desired.subnets, &observed.subnets);
    }

    let security_groups =
        !set_eq_opt(desired.security_groups.as_ref(), &observed.security_groups);
    if security_groups {
        diff.field(
            "spec.forProvider.securityGroups",
            &desired.security_groups,
            &observed.security_groups,
        );
    }

    let ip_address_type = match &desired.ip_address_type {
        Some(desired_type) => observed.ip_address_type.as_ref() != Some(desired_type),
        None => false,
    };
    if ip_address_type {
        diff.field(
            "spec.forProvider.ipAddressType",
            &desired.ip_address_type,
            &observed.ip_address_type,
        );
    }

    let tags = tag_diff(&desired.tags, &observed.tags);
    if !tags.is_empty() {
        diff.field("spec.forProvider.tags", &desired.tags, &observed.tags);
    }

    LoadBalancerDrift {
        subnets,
        security_groups,
        ip_address_type,
        tags,
        diff,
    }
}

fn connection_details(observed: &LoadBalancerData) -> ConnectionDetails {
    let mut details = ConnectionDetails::new();
    if let Some(dns_name) = &observed.dns_name {
        details.insert(DNS_NAME_KEY.to_string(), dns_name.clone().into_bytes());
    }
    details
}

fn record_observation(record: &mut LoadBalancer, observed: &LoadBalancerData) {
    let at = record.at_provider_mut();
    at.arn = Some(observed.arn.clone());
    at.dns_name = observed.dns_name.clone();
    at.state = observed.state.clone();
    at.vpc_id = observed.vpc_id.clone();
}

#[async_trait]
impl ExternalClient<LoadBalancer> for LoadBalancerClient {
    async fn observe(&self, record: &mut LoadBalancer) -> Result<Observation, Error> {
        let Some(arn) = record.external_name() else {
            return Ok(Observation::absent());
        };
        let Some(observed) = self.elb.describe_load_balancer(&arn).await? else {
            return Ok(Observation::absent());
        };

        record_observation(record, &observed);

        let mut late_initialized = false;
        let parameters = &mut record.spec.for_provider;
        late_initialized |= late_init(&mut parameters.scheme, observed.scheme.as_ref());
        late_initialized |= late_init(
            &mut parameters.ip_address_type,
            observed.ip_address_type.as_ref(),
        );
        if parameters.security_groups.is_none() && !observed.security_groups.is_empty() {
            parameters.security_groups = Some(observed.security_groups.clone());
            late_initialized = true;
        }

        let drift = drift(&record.spec.for_provider, &observed);
        Ok(Observation {
            exists: true,
            up_to_date: drift.diff.is_empty(),
            ready: observed.state.as_deref() == Some(LB_STATE_ACTIVE),
            diff: drift.diff.to_string(),
            late_initialized,
            connection_details: connection_details(&observed),
        })
    }

    async fn create(&self, record: &mut LoadBalancer) -> Result<Creation, Error> {
        let parameters = &record.spec.for_provider;
        let created = self
            .elb
            .create_load_balancer(
                &record.name_any(),
                CreateLoadBalancerRequest {
                    lb_type: parameters.lb_type.clone(),
                    scheme: parameters.scheme.clone(),
                    ip_address_type: parameters.ip_address_type.clone(),
                    subnets: parameters.subnets.clone(),
                    security_groups: parameters.security_groups.clone().unwrap_or_default(),
                    tags: parameters.tags.clone(),
                },
            )
            .await?;

        record_observation(record, &created);

        // The ARN is the identity; everything else addresses the balancer
        // through it.
        Ok(Creation {
            external_name: Some(created.arn.clone()),
            connection_details: connection_details(&created),
        })
    }

    async fn update(&self, record: &mut LoadBalancer) -> Result<(), Error> {
        let arn = record
            .external_name()
            .ok_or_else(|| Error::unexpected("updating a load balancer that was never created"))?;
        let observed = self.elb.describe_load_balancer(&arn).await?.ok_or_else(|| {
            Error::Cloud(crate::cloud::CloudError::not_found(
                "load balancer vanished during update",
            ))
        })?;

        let parameters = &record.spec.for_provider;
        let drift = drift(parameters, &observed);
        if drift.subnets {
            debug!(lb = %arn, "replacing subnet set");
            self.elb.set_subnets(&arn, parameters.subnets.clone()).await?;
        }
        if drift.security_groups {
            self.elb
                .set_security_groups(
                    &arn,
                    parameters.security_groups.clone().unwrap_or_default(),
                )
                .await?;
        }
        if drift.ip_address_type {
            if let Some(ip_address_type) = &parameters.ip_address_type {
                self.elb.set_ip_address_type(&arn, ip_address_type).await?;
            }
        }
        if !drift.tags.remove.is_empty() {
            self.elb.remove_tags(&arn, drift.tags.remove.clone()).await?;
        }
        if !drift.tags.add.is_empty() {
            self.elb.add_tags(&arn, drift.tags.add.clone()).await?;
        }
        Ok(())
    }

    async fn delete(&self, record: &LoadBalancer) -> Result<(), Error> {
        let Some(arn) = record.external_name() else {
            return Ok(());
        };
        self.elb.delete_load_balancer(&arn).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use kube::api::ObjectMeta;
    use mockall::predicate::eq;

    use crate::cloud::MockElbGateway;
    use crate::crd::{DeletionPolicy, LoadBalancerSpec, ManagementPolicies};

    const ARN: &str =
        "arn:aws:elasticloadbalancing:eu-west-1:123456789012:loadbalancer/app/web/50dc6c495c0c9188";

    fn sample_lb(subnets: &[&str]) -> LoadBalancer {
        LoadBalancer {
            metadata: ObjectMeta {
                name: Some("web".to_string()),
                uid: Some("0f1e2d3c-4b5a-6978-8796-a5b4c3d2e1f0".to_string()),
                ..Default::default()
            },
            spec: LoadBalancerSpec {
                for_provider: LoadBalancerParameters {
                    lb_type: "application".to_string(),
                    scheme: None,
                    ip_address_type: None,
                    subnets: subnets.iter().map(|s| s.to_string()).collect(),
                    security_groups: None,
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

    fn observed_lb(subnets: &[&str], state: &str) -> LoadBalancerData {
        LoadBalancerData {
            arn: ARN.to_string(),
            dns_name: Some("web-1234.eu-west-1.elb.amazonaws.com".to_string()),
            state: Some(state.to_string()),
            vpc_id: Some("vpc-0a1b2c3d".to_string()),
            lb_type: Some("application".to_string()),
            scheme: Some("internet-facing".to_string()),
            ip_address_type: Some("ipv4".to_string()),
            subnets: subnets.iter().map(|s| s.to_string()).collect(),
            security_groups: Vec::new(),
            tags: BTreeMap::new(),
        }
    }

    mod drift_detection {
        use super::*;

        #[test]
        fn subnet_order_is_not_drift() {
            let lb = sample_lb(&["s-1", "s-2"]);
            let drift = drift(&lb.spec.for_provider, &observed_lb(&["s-2", "s-1"], "active"));
            assert!(!drift.subnets);
            assert!(drift.diff.is_empty());
        }

        #[test]
        fn missing_subnet_is_drift() {
            let lb = sample_lb(&["s-1", "s-2"]);
            let drift = drift(&lb.spec.for_provider, &observed_lb(&["s-1"], "active"));
            assert!(drift.subnets);
            assert!(drift.diff.to_string().contains("subnets"));
        }

        #[test]
        fn unset_security_groups_match_an_empty_observed_set() {
            let lb = sample_lb(&["s-1"]);
            let drift = drift(&lb.spec.for_provider, &observed_lb(&["s-1"], "active"));
            assert!(!drift.security_groups);
        }
    }

    mod observe {
        use super::*;

        #[tokio::test]
        async fn active_balancer_is_ready_with_connection_details() {
            let mut elb = MockElbGateway::new();
            elb.expect_describe_load_balancer()
                .with(eq(ARN))
                .returning(|_| Ok(Some(observed_lb(&["s-1"], "active"))));

            let client = LoadBalancerClient::new(Arc::new(elb));
            let mut lb = sample_lb(&["s-1"]);
            lb.set_external_name(ARN);
            lb.spec.for_provider.scheme = Some("internet-facing".to_string());
            lb.spec.for_provider.ip_address_type = Some("ipv4".to_string());

            let observation = client.observe(&mut lb).await.unwrap();
            assert!(observation.exists);
            assert!(observation.up_to_date);
            assert!(observation.ready);
            assert_eq!(
                observation.connection_details[DNS_NAME_KEY],
                b"web-1234.eu-west-1.elb.amazonaws.com".to_vec()
            );
            assert_eq!(
                lb.status.unwrap().at_provider.state.as_deref(),
                Some("active")
            );
        }

        #[tokio::test]
        async fn provisioning_balancer_is_not_ready() {
            let mut elb = MockElbGateway::new();
            elb.expect_describe_load_balancer()
                .returning(|_| Ok(Some(observed_lb(&["s-1"], "provisioning"))));

            let client = LoadBalancerClient::new(Arc::new(elb));
            let mut lb = sample_lb(&["s-1"]);
            lb.set_external_name(ARN);

            let observation = client.observe(&mut lb).await.unwrap();
            assert!(observation.exists);
            assert!(!observation.ready);
        }

        #[tokio::test]
        async fn cloud_defaults_are_late_initialized() {
            let mut elb = MockElbGateway::new();
            elb.expect_describe_load_balancer()
                .returning(|_| Ok(Some(observed_lb(&["s-1"], "active"))));

            let client = LoadBalancerClient::new(Arc::new(elb));
            let mut lb = sample_lb(&["s-1"]);
            lb.set_external_name(ARN);

            let observation = client.observe(&mut lb).await.unwrap();
            assert!(observation.late_initialized);
            assert_eq!(
                lb.spec.for_provider.scheme.as_deref(),
                Some("internet-facing")
            );
            assert_eq!(lb.spec.for_provider.ip_address_type.as_deref(), Some("ipv4"));
        }
    }

    #[tokio::test]
    async fn create_captures_the_arn_as_identity() {
        let mut elb = MockElbGateway::new();
        elb.expect_create_load_balancer()
            .with(eq("web"), mockall::predicate::always())
            .returning(|_, _| Ok(observed_lb(&["s-1"], "provisioning")));

        let client = LoadBalancerClient::new(Arc::new(elb));
        let mut lb = sample_lb(&["s-1"]);

        let creation = client.create(&mut lb).await.unwrap();
        assert_eq!(creation.external_name.as_deref(), Some(ARN));
        assert!(creation.connection_details.contains_key(DNS_NAME_KEY));
    }

    mod update {
        use super::*;

        #[tokio::test]
        async fn drifted_subnets_are_replaced_as_a_set() {
            let mut elb = MockElbGateway::new();
            elb.expect_describe_load_balancer()
                .returning(|_| Ok(Some(observed_lb(&["s-1"], "active"))));
            elb.expect_set_subnets()
                .withf(|arn, subnets| arn == ARN && *subnets == ["s-1", "s-2"])
                .times(1)
                .returning(|_, _| Ok(()));

            let client = LoadBalancerClient::new(Arc::new(elb));
            let mut lb = sample_lb(&["s-1", "s-2"]);
            lb.set_external_name(ARN);
            lb.spec.for_provider.scheme = Some("internet-facing".to_string());
            lb.spec.for_provider.ip_address_type = Some("ipv4".to_string());

            client.update(&mut lb).await.unwrap();
        }

        #[tokio::test]
        async fn reordered_subnets_trigger_no_calls() {
            let mut elb = MockElbGateway::new();
            elb.expect_describe_load_balancer()
                .returning(|_| Ok(Some(observed_lb(&["s-2", "s-1"], "active"))));
            // No set_subnets expectation: calling it would panic

            let client = LoadBalancerClient::new(Arc::new(elb));
            let mut lb = sample_lb(&["s-1", "s-2"]);
            lb.set_external_name(ARN);
            lb.spec.for_provider.scheme = Some("internet-facing".to_string());
            lb.spec.for_provider.ip_address_type = Some("ipv4".to_string());

            client.update(&mut lb).await.unwrap();
        }
    }
}
