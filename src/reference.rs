//! Cross-reference resolution between managed records
//!
//! A record may name its dependency three ways: an explicit value, a
//! by-name reference to another record, or a label selector. Resolution
//! runs as an initializer before Observe, so the external system only ever
//! sees fully resolved parameters. A selector match is frozen into a
//! by-name reference so later label changes cannot silently repoint the
//! dependency.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use kube::api::ListParams;
use kube::{Api, Client, ResourceExt};
use tracing::debug;

use crate::controller::Initializer;
use crate::crd::types::{Reference, Selector};
use crate::crd::{Managed, Role, RolePolicyAttachment};
use crate::Error;

/// Read access to candidate referents of one kind
#[async_trait]
pub trait Lookup<T>: Send + Sync {
    /// Fetch a record by name; absence is not an error
    async fn get(&self, name: &str) -> Result<Option<T>, Error>;

    /// List records matching every given label
    async fn list(&self, match_labels: &BTreeMap<String, String>) -> Result<Vec<T>, Error>;
}

/// [`Lookup`] backed by the API server
pub struct KubeLookup<T> {
    api: Api<T>,
}

impl<T: Managed> KubeLookup<T> {
    /// Cluster-scoped lookup for one managed kind
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }
}

#[async_trait]
impl<T: Managed> Lookup<T> for KubeLookup<T> {
    async fn get(&self, name: &str) -> Result<Option<T>, Error> {
        Ok(self.api.get_opt(name).await?)
    }

    async fn list(&self, match_labels: &BTreeMap<String, String>) -> Result<Vec<T>, Error> {
        let selector = match_labels
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect::<Vec<_>>()
            .join(",");
        let records = self.api.list(&ListParams::default().labels(&selector)).await?;
        Ok(records.items)
    }
}

/// Resolve one reference field in place.
///
/// Precedence: an explicit `value` wins and resolution is a no-op; else a
/// by-name `reference` is dereferenced through `extract`; else a `selector`
/// picks the first candidate in name order and freezes it into
/// `reference`. Returns whether the record changed and must be persisted.
pub async fn resolve<T, F>(
    field: &str,
    value: &mut Option<String>,
    reference: &mut Option<Reference>,
    selector: Option<&Selector>,
    lookup: &dyn Lookup<T>,
    extract: F,
) -> Result<bool, Error>
where
    T: Managed,
    F: Fn(&T) -> Option<String> + Send,
{
    if value.is_some() {
        return Ok(false);
    }

    if let Some(reference) = &*reference {
        let referent = lookup.get(&reference.name).await?.ok_or_else(|| {
            Error::reference(field, format!("referenced record {} not found", reference.name))
        })?;
        let resolved = extract(&referent).ok_or_else(|| {
            Error::reference(
                field,
                format!("record {} is not resolvable yet", reference.name),
            )
        })?;
        debug!(field, referent = %reference.name, value = %resolved, "resolved reference");
        *value = Some(resolved);
        return Ok(true);
    }

    if let Some(selector) = selector {
        let mut candidates = lookup.list(&selector.match_labels).await?;
        candidates.sort_by_key(|candidate| candidate.name_any());
        let chosen = candidates
            .first()
            .ok_or_else(|| Error::reference(field, "no records match the selector"))?;
        debug!(field, referent = %chosen.name_any(), "selector froze a reference");
        *reference = Some(Reference {
            name: chosen.name_any(),
        });
        return Ok(true);
    }

    Err(Error::reference(
        field,
        "no value, reference, or selector provided",
    ))
}

/// Resolves a RolePolicyAttachment's role name from the referenced Role
/// record's external name
pub struct RoleNameResolver {
    roles: Arc<dyn Lookup<Role>>,
}

impl RoleNameResolver {
    /// Resolver over the given role lookup
    pub fn new(roles: Arc<dyn Lookup<Role>>) -> Self {
        Self { roles }
    }
}

#[async_trait]
impl Initializer<RolePolicyAttachment> for RoleNameResolver {
    async fn initialize(&self, record: &mut RolePolicyAttachment) -> Result<bool, Error> {
        let selector = record.spec.for_provider.role_name_selector.clone();
        resolve(
            "spec.forProvider.roleName",
            &mut record.spec.for_provider.role_name,
            &mut record.spec.for_provider.role_name_ref,
            selector.as_ref(),
            self.roles.as_ref(),
            // The referent's cloud-side name, not its record name; unset
            // until the role has been created.
            |role| role.external_name(),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::ObjectMeta;

    use crate::crd::{RoleParameters, RoleSpec};

    fn role_with_labels(name: &str, external_name: Option<&str>, labels: &[(&str, &str)]) -> Role {
        let mut role = Role {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(
                    labels
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                ),
                ..Default::default()
            },
            spec: RoleSpec {
                for_provider: RoleParameters {
                    assume_role_policy_document: "{}".to_string(),
                    description: None,
                    max_session_duration: None,
                    path: None,
                    tags: BTreeMap::new(),
                },
                deletion_policy: Default::default(),
                management_policies: Default::default(),
                provider_config_ref: None,
                write_connection_secret_to_ref: None,
            },
            status: None,
        };
        if let Some(external_name) = external_name {
            role.set_external_name(external_name);
        }
        role
    }

    struct FakeRoles {
        roles: Vec<Role>,
    }

    #[async_trait]
    impl Lookup<Role> for FakeRoles {
        async fn get(&self, name: &str) -> Result<Option<Role>, Error> {
            Ok(self.roles.iter().find(|r| r.name_any() == name).cloned())
        }

        async fn list(&self, match_labels: &BTreeMap<String, String>) -> Result<Vec<Role>, Error> {
            Ok(self
                .roles
                .iter()
                .filter(|role| {
                    let labels = role.labels();
                    match_labels.iter().all(|(k, v)| labels.get(k) == Some(v))
                })
                .cloned()
                .collect())
        }
    }

    fn selector(labels: &[(&str, &str)]) -> Selector {
        Selector {
            match_labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[tokio::test]
    async fn explicit_value_short_circuits_resolution() {
        let lookup = FakeRoles { roles: vec![] };
        let mut value = Some("already-set".to_string());
        let mut reference = Some(Reference {
            name: "ignored".to_string(),
        });

        let changed = resolve("f", &mut value, &mut reference, None, &lookup, |r: &Role| {
            r.external_name()
        })
        .await
        .unwrap();

        assert!(!changed);
        assert_eq!(value.as_deref(), Some("already-set"));
    }

    #[tokio::test]
    async fn reference_resolves_to_the_referent_external_name() {
        let lookup = FakeRoles {
            roles: vec![role_with_labels("r1", Some("r1-0f1e2d3c"), &[])],
        };
        let mut value = None;
        let mut reference = Some(Reference {
            name: "r1".to_string(),
        });

        let changed = resolve("f", &mut value, &mut reference, None, &lookup, |r: &Role| {
            r.external_name()
        })
        .await
        .unwrap();

        assert!(changed);
        assert_eq!(value.as_deref(), Some("r1-0f1e2d3c"));
    }

    #[tokio::test]
    async fn missing_referent_is_a_reference_error() {
        let lookup = FakeRoles { roles: vec![] };
        let mut value = None;
        let mut reference = Some(Reference {
            name: "ghost".to_string(),
        });

        let err = resolve("f", &mut value, &mut reference, None, &lookup, |r: &Role| {
            r.external_name()
        })
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Reference { .. }));
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn referent_without_external_name_is_not_resolvable_yet() {
        let lookup = FakeRoles {
            roles: vec![role_with_labels("r1", None, &[])],
        };
        let mut value = None;
        let mut reference = Some(Reference {
            name: "r1".to_string(),
        });

        let err = resolve("f", &mut value, &mut reference, None, &lookup, |r: &Role| {
            r.external_name()
        })
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Reference { .. }));
    }

    #[tokio::test]
    async fn selector_freezes_the_first_match_in_name_order() {
        let lookup = FakeRoles {
            roles: vec![
                role_with_labels("zeta", Some("zeta-x"), &[("team", "net")]),
                role_with_labels("alpha", Some("alpha-x"), &[("team", "net")]),
                role_with_labels("other", Some("other-x"), &[("team", "db")]),
            ],
        };
        let mut value = None;
        let mut reference = None;
        let selector = selector(&[("team", "net")]);

        let changed = resolve(
            "f",
            &mut value,
            &mut reference,
            Some(&selector),
            &lookup,
            |r: &Role| r.external_name(),
        )
        .await
        .unwrap();

        // First pass only freezes the reference; the value resolves on the
        // next pass through the by-name path.
        assert!(changed);
        assert!(value.is_none());
        assert_eq!(reference.as_ref().map(|r| r.name.as_str()), Some("alpha"));
    }

    #[tokio::test]
    async fn frozen_reference_survives_label_changes() {
        // The selector would now match a different record, but the frozen
        // reference wins.
        let lookup = FakeRoles {
            roles: vec![
                role_with_labels("alpha", Some("alpha-x"), &[]),
                role_with_labels("beta", Some("beta-x"), &[("team", "net")]),
            ],
        };
        let mut value = None;
        let mut reference = Some(Reference {
            name: "alpha".to_string(),
        });
        let selector = selector(&[("team", "net")]);

        resolve(
            "f",
            &mut value,
            &mut reference,
            Some(&selector),
            &lookup,
            |r: &Role| r.external_name(),
        )
        .await
        .unwrap();

        assert_eq!(value.as_deref(), Some("alpha-x"));
    }

    #[tokio::test]
    async fn empty_selector_match_is_a_reference_error() {
        let lookup = FakeRoles { roles: vec![] };
        let mut value = None;
        let mut reference = None;
        let selector = selector(&[("team", "net")]);

        let err = resolve(
            "f",
            &mut value,
            &mut reference,
            Some(&selector),
            &lookup,
            |r: &Role| r.external_name(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Reference { .. }));
    }

    #[tokio::test]
    async fn nothing_to_resolve_from_is_a_reference_error() {
        let lookup = FakeRoles { roles: vec![] };
        let mut value = None;
        let mut reference = None;

        let err = resolve("f", &mut value, &mut reference, None, &lookup, |r: &Role| {
            r.external_name()
        })
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Reference { .. }));
    }

    mod role_name_resolver {
        use super::*;
        use crate::crd::{RolePolicyAttachmentParameters, RolePolicyAttachmentSpec};

        fn attachment(
            role_name: Option<&str>,
            role_name_ref: Option<&str>,
            role_name_selector: Option<Selector>,
        ) -> RolePolicyAttachment {
            RolePolicyAttachment {
                metadata: ObjectMeta {
                    name: Some("att1".to_string()),
                    ..Default::default()
                },
                spec: RolePolicyAttachmentSpec {
                    for_provider: RolePolicyAttachmentParameters {
                        role_name: role_name.map(String::from),
                        role_name_ref: role_name_ref.map(|name| Reference {
                            name: name.to_string(),
                        }),
                        role_name_selector,
                        policy_arn: "arn:aws:iam::aws:policy/ReadOnlyAccess".to_string(),
                    },
                    deletion_policy: Default::default(),
                    management_policies: Default::default(),
                    provider_config_ref: None,
                },
                status: None,
            }
        }

        #[tokio::test]
        async fn resolves_role_name_from_referent() {
            let resolver = RoleNameResolver::new(Arc::new(FakeRoles {
                roles: vec![role_with_labels("r1", Some("r1-0f1e2d3c"), &[])],
            }));
            let mut record = attachment(None, Some("r1"), None);

            let changed = resolver.initialize(&mut record).await.unwrap();
            assert!(changed);
            assert_eq!(
                record.spec.for_provider.role_name.as_deref(),
                Some("r1-0f1e2d3c")
            );
        }

        #[tokio::test]
        async fn resolved_record_is_left_alone() {
            let resolver = RoleNameResolver::new(Arc::new(FakeRoles { roles: vec![] }));
            let mut record = attachment(Some("r1-0f1e2d3c"), Some("r1"), None);

            let changed = resolver.initialize(&mut record).await.unwrap();
            assert!(!changed);
        }
    }
}
