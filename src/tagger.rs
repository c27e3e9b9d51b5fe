//! Default tag stamping for taggable kinds
//!
//! Runs as an initializer before the first Observe, so the very first
//! Create already carries the system tags and the record's labels. The
//! system keys are owned by the loop; a user-supplied value under the
//! same key is overwritten. Labels never overwrite an explicit spec tag.

use async_trait::async_trait;
use kube::ResourceExt;

use crate::controller::Initializer;
use crate::crd::Taggable;
use crate::{Error, TAG_OWNER_KEY, TAG_UID_KEY};

/// Ensures every taggable record's tag map carries the system tag set:
/// the controller instance identifier and the record's uid
pub struct Tagger {
    owner: String,
}

impl Tagger {
    /// Tagger stamping the given owner identifier
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
        }
    }
}

#[async_trait]
impl<R: Taggable> Initializer<R> for Tagger {
    async fn initialize(&self, record: &mut R) -> Result<bool, Error> {
        // Uid is always assigned by the API server before we see the record.
        let uid = record
            .uid()
            .ok_or_else(|| Error::unexpected("record has no uid"))?;

        let labels = record.labels().clone();

        let mut changed = false;
        let tags = record.tags_mut();
        for (key, value) in labels {
            // Labels ride along as tags but an explicit spec tag wins.
            if !tags.contains_key(&key) {
                tags.insert(key, value);
                changed = true;
            }
        }
        for (key, value) in [(TAG_OWNER_KEY, self.owner.as_str()), (TAG_UID_KEY, uid.as_str())] {
            if tags.get(key).map(String::as_str) != Some(value) {
                tags.insert(key.to_string(), value.to_string());
                changed = true;
            }
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use kube::api::ObjectMeta;

    use crate::crd::{Role, RoleParameters, RoleSpec};
    use crate::DEFAULT_OWNER;

    fn role_with_tags(tags: &[(&str, &str)]) -> Role {
        Role {
            metadata: ObjectMeta {
                name: Some("r1".to_string()),
                uid: Some("11112222-3333-4444-5555-666677778888".to_string()),
                ..Default::default()
            },
            spec: RoleSpec {
                for_provider: RoleParameters {
                    assume_role_policy_document: "{}".to_string(),
                    description: None,
                    max_session_duration: None,
                    path: None,
                    tags: tags
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                },
                deletion_policy: Default::default(),
                management_policies: Default::default(),
                provider_config_ref: None,
                write_connection_secret_to_ref: None,
            },
            status: None,
        }
    }

    #[tokio::test]
    async fn system_tags_are_added_alongside_user_tags() {
        let tagger = Tagger::new(DEFAULT_OWNER);
        let mut role = role_with_tags(&[("env", "prod")]);

        let changed = tagger.initialize(&mut role).await.unwrap();
        assert!(changed);

        let expected: BTreeMap<String, String> = [
            ("env", "prod"),
            (TAG_OWNER_KEY, DEFAULT_OWNER),
            (TAG_UID_KEY, "11112222-3333-4444-5555-666677778888"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        assert_eq!(role.spec.for_provider.tags, expected);
    }

    #[tokio::test]
    async fn stamping_is_idempotent() {
        let tagger = Tagger::new(DEFAULT_OWNER);
        let mut role = role_with_tags(&[]);

        assert!(tagger.initialize(&mut role).await.unwrap());
        assert!(!tagger.initialize(&mut role).await.unwrap());
    }

    #[tokio::test]
    async fn system_keys_override_user_values() {
        let tagger = Tagger::new("cumulus-prod");
        let mut role = role_with_tags(&[(TAG_OWNER_KEY, "somebody-else")]);

        assert!(tagger.initialize(&mut role).await.unwrap());
        assert_eq!(
            role.spec.for_provider.tags.get(TAG_OWNER_KEY).map(String::as_str),
            Some("cumulus-prod")
        );
    }

    #[tokio::test]
    async fn labels_ride_along_without_clobbering_spec_tags() {
        let tagger = Tagger::new(DEFAULT_OWNER);
        let mut role = role_with_tags(&[("team", "storage")]);
        role.metadata.labels = Some(
            [("team", "networking"), ("tier", "gold")]
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );

        assert!(tagger.initialize(&mut role).await.unwrap());
        let tags = &role.spec.for_provider.tags;
        assert_eq!(tags.get("team").map(String::as_str), Some("storage"));
        assert_eq!(tags.get("tier").map(String::as_str), Some("gold"));
    }

    #[tokio::test]
    async fn missing_uid_is_an_error() {
        let tagger = Tagger::new(DEFAULT_OWNER);
        let mut role = role_with_tags(&[]);
        role.metadata.uid = None;

        assert!(tagger.initialize(&mut role).await.is_err());
    }
}
