//! Connection detail publishing
//!
//! Connection details (endpoints, generated credentials) are written as
//! opaque secrets via server-side apply, so repeated publishes of the same
//! material are no-ops and ownership of the written fields stays with this
//! controller.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client};
use tracing::debug;

use crate::controller::{ConnectionDetails, ConnectionPublisher};
use crate::crd::types::SecretRef;
use crate::{Error, FIELD_MANAGER};

/// Marker type recorded on every published connection secret
pub const SECRET_TYPE: &str = "connection.cumulus.dev/v1";

/// Publishes connection details as Kubernetes secrets.
///
/// The default publisher honors the target's namespace; the external-store
/// variant pins every secret into one dedicated namespace.
pub struct KubeSecretPublisher {
    client: Client,
    default_namespace: String,
    namespace_override: Option<String>,
}

impl KubeSecretPublisher {
    /// Publisher writing into each target's own namespace, falling back to
    /// the given default
    pub fn new(client: Client, default_namespace: impl Into<String>) -> Self {
        Self {
            client,
            default_namespace: default_namespace.into(),
            namespace_override: None,
        }
    }

    /// Publisher pinning every secret into one store namespace
    pub fn pinned(client: Client, store_namespace: impl Into<String>) -> Self {
        let store_namespace = store_namespace.into();
        Self {
            client,
            default_namespace: store_namespace.clone(),
            namespace_override: Some(store_namespace),
        }
    }

    fn namespace_for<'a>(&'a self, target: &'a SecretRef) -> &'a str {
        match &self.namespace_override {
            Some(pinned) => pinned,
            None => target
                .namespace
                .as_deref()
                .unwrap_or(&self.default_namespace),
        }
    }
}

/// The full apply payload for a connection secret
fn secret_payload(name: &str, details: &ConnectionDetails) -> serde_json::Value {
    let data: BTreeMap<&str, ByteString> = details
        .iter()
        .map(|(key, value)| (key.as_str(), ByteString(value.clone())))
        .collect();
    serde_json::json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "metadata": { "name": name },
        "type": SECRET_TYPE,
        "data": data,
    })
}

#[async_trait]
impl ConnectionPublisher for KubeSecretPublisher {
    async fn publish(&self, target: &SecretRef, details: &ConnectionDetails) -> Result<(), Error> {
        let namespace = self.namespace_for(target);
        debug!(secret = %target.name, namespace, keys = details.len(), "publishing connection details");

        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        api.patch(
            &target.name,
            &PatchParams::apply(FIELD_MANAGER).force(),
            &Patch::Apply(secret_payload(&target.name, details)),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_encodes_details_as_base64_data() {
        let mut details = ConnectionDetails::new();
        details.insert("endpoint".to_string(), b"lb.example.internal".to_vec());

        let payload = secret_payload("r1-conn", &details);
        assert_eq!(payload["kind"], "Secret");
        assert_eq!(payload["metadata"]["name"], "r1-conn");
        assert_eq!(payload["type"], SECRET_TYPE);
        // ByteString serializes to base64
        assert_eq!(payload["data"]["endpoint"], "bGIuZXhhbXBsZS5pbnRlcm5hbA==");
    }

    #[test]
    fn payload_with_no_details_is_an_empty_data_map() {
        let payload = secret_payload("r1-conn", &ConnectionDetails::new());
        assert!(payload["data"].as_object().unwrap().is_empty());
    }

    /// Building a `kube::Client` requires a process-level rustls crypto
    /// provider; both `ring` and `aws-lc-rs` are compiled in, so one must be
    /// installed explicitly.
    fn install_crypto_provider() {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    }

    #[tokio::test]
    async fn target_namespace_falls_back_to_the_default_when_unset() {
        install_crypto_provider();
        let client = Client::try_from(kube::Config::new("http://localhost".parse().unwrap()))
            .unwrap();
        let publisher = KubeSecretPublisher::new(client, "cumulus-system");

        let explicit = SecretRef {
            name: "r1-conn".to_string(),
            namespace: Some("apps".to_string()),
        };
        assert_eq!(publisher.namespace_for(&explicit), "apps");

        let unset = SecretRef {
            name: "r1-conn".to_string(),
            namespace: None,
        };
        assert_eq!(publisher.namespace_for(&unset), "cumulus-system");
    }

    #[tokio::test]
    async fn pinned_publisher_ignores_the_target_namespace() {
        install_crypto_provider();
        let client = Client::try_from(kube::Config::new("http://localhost".parse().unwrap()))
            .unwrap();
        let publisher = KubeSecretPublisher::pinned(client, "secret-store");

        let explicit = SecretRef {
            name: "r1-conn".to_string(),
            namespace: Some("apps".to_string()),
        };
        assert_eq!(publisher.namespace_for(&explicit), "secret-store");
    }
}
