//! Persistence seam between the reconciliation core and the API server
//!
//! The core never touches [`kube::Api`] directly; it goes through
//! [`Registry`] so tests can substitute an in-memory store and assert on
//! exactly what was written, and when.

use async_trait::async_trait;
use kube::api::PostParams;
use kube::{Api, Client, ResourceExt};

use crate::crd::Managed;
use crate::Error;

/// Reads and writes managed records
#[async_trait]
pub trait Registry<R>: Send + Sync {
    /// Persist the record's spec and metadata. Status changes carried by
    /// the record are not written by this call.
    async fn update(&self, record: &R) -> Result<R, Error>;

    /// Persist the record's status subresource only
    async fn update_status(&self, record: &R) -> Result<(), Error>;
}

/// [`Registry`] backed by the API server.
///
/// Both writes are full replacements carrying the record's resource
/// version, so a stale write surfaces as a 409 conflict and the tick is
/// re-run against fresh state.
pub struct KubeRegistry<R> {
    api: Api<R>,
}

impl<R: Managed> KubeRegistry<R> {
    /// Cluster-scoped registry for one managed kind
    pub fn new(client: Client) -> Self {
        Self {
            api: Api::all(client),
        }
    }
}

#[async_trait]
impl<R: Managed> Registry<R> for KubeRegistry<R> {
    async fn update(&self, record: &R) -> Result<R, Error> {
        let updated = self
            .api
            .replace(&record.name_any(), &PostParams::default(), record)
            .await?;
        Ok(updated)
    }

    async fn update_status(&self, record: &R) -> Result<(), Error> {
        let data = serde_json::to_vec(record).map_err(|err| Error::serialization(err.to_string()))?;
        self.api
            .replace_status(&record.name_any(), &PostParams::default(), data)
            .await?;
        Ok(())
    }
}
